//! Scripted numeric routines for tests and dry runs.

use super::{check_range, BitErrorCount, Distortion, NumericRoutines, NumericsError, SpectralPeak};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Script {
    registers: VecDeque<Result<[u32; 6], NumericsError>>,
    peaks: VecDeque<Result<SpectralPeak, NumericsError>>,
    distortions: VecDeque<Result<Distortion, NumericsError>>,
    bit_errors: VecDeque<Result<BitErrorCount, NumericsError>>,
    frequencies: Vec<u64>,
    modulating_bins: Vec<f64>,
}

/// Numeric routines answering from queues.
///
/// Unscripted calls fall back to simple answers: fixed PLL registers, the
/// strongest bin for peak searches, and `Unavailable` for distortion and bit
/// error counting.
#[derive(Default)]
pub struct ScriptedNumerics {
    script: Mutex<Script>,
}

impl ScriptedNumerics {
    /// Empty script.
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Queue the next register synthesis result.
    pub fn push_registers(&self, result: Result<[u32; 6], NumericsError>) {
        self.script().registers.push_back(result);
    }

    /// Queue the next peak search result.
    pub fn push_peak(&self, result: Result<SpectralPeak, NumericsError>) {
        self.script().peaks.push_back(result);
    }

    /// Queue the next distortion result.
    pub fn push_distortion(&self, result: Result<Distortion, NumericsError>) {
        self.script().distortions.push_back(result);
    }

    /// Queue the next bit error count.
    pub fn push_bit_errors(&self, result: Result<BitErrorCount, NumericsError>) {
        self.script().bit_errors.push_back(result);
    }

    /// Frequencies passed to register synthesis, in call order.
    pub fn synthesized_frequencies(&self) -> Vec<u64> {
        self.script().frequencies.clone()
    }

    /// Modulating bins passed to distortion analysis, in call order.
    pub fn modulating_bins(&self) -> Vec<f64> {
        self.script().modulating_bins.clone()
    }
}

impl NumericRoutines for ScriptedNumerics {
    fn synthesize_pll_registers(&self, frequency: u64) -> Result<[u32; 6], NumericsError> {
        let mut script = self.script();
        script.frequencies.push(frequency);
        script
            .registers
            .pop_front()
            .unwrap_or(Ok([0x0058_0005, 0x0000_8011, 0x0000_4e42, 0x0000_04b3, 0x00ec_803c, 0x0058_0005]))
    }

    fn find_spectral_peak(
        &self,
        spectrum: &[f64],
        start: usize,
        end: usize,
    ) -> Result<SpectralPeak, NumericsError> {
        if let Some(result) = self.script().peaks.pop_front() {
            return result;
        }
        check_range(spectrum, start, end)?;
        let (index, amplitude) = spectrum[start..=end]
            .iter()
            .enumerate()
            .fold((0, f64::MIN), |best, (i, &a)| if a > best.1 { (i, a) } else { best });
        if amplitude <= 0.0 {
            return Err(NumericsError::NotFound);
        }
        Ok(SpectralPeak {
            power: amplitude * amplitude,
            index: (start + index) as f64,
        })
    }

    fn distortion_and_modulation_index(
        &self,
        _spectrum: &[f64],
        modulating_bin: f64,
    ) -> Result<Distortion, NumericsError> {
        let mut script = self.script();
        script.modulating_bins.push(modulating_bin);
        script
            .distortions
            .pop_front()
            .unwrap_or(Err(NumericsError::Unavailable))
    }

    fn count_bit_errors(
        &self,
        _i: &[i32],
        _q: &[i32],
        _max_len: usize,
    ) -> Result<BitErrorCount, NumericsError> {
        self.script()
            .bit_errors
            .pop_front()
            .unwrap_or(Err(NumericsError::Unavailable))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_peak_is_strongest_bin() {
        let numerics = ScriptedNumerics::new();
        let spectrum = [0.0, 1.0, 4.0, 2.0, 9.0];
        let peak = numerics.find_spectral_peak(&spectrum, 1, 3).expect("peak");
        assert_eq!(peak.index, 2.0);
        assert_eq!(peak.power, 16.0);
        assert_eq!(
            numerics.find_spectral_peak(&[0.0; 4], 0, 3),
            Err(NumericsError::NotFound)
        );
    }

    #[test]
    fn test_queued_results_come_first() {
        let numerics = ScriptedNumerics::new();
        numerics.push_peak(Err(NumericsError::NotFound));
        assert!(numerics.find_spectral_peak(&[1.0, 2.0], 0, 1).is_err());
        assert!(numerics.find_spectral_peak(&[1.0, 2.0], 0, 1).is_ok());
    }
}
