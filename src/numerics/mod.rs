//! Numeric primitives provided by the native `libdmr` library.
//!
//! The task layer only relies on the contracts of [`NumericRoutines`]. Builds
//! with the `native_numerics` feature bind the real library; otherwise
//! [`UnavailableNumerics`] reports every routine as unavailable and the tasks
//! that need one fail with an evaluation error. Tests use
//! [`mock::ScriptedNumerics`].

pub mod mock;
#[cfg(feature = "native_numerics")]
pub mod native;

use std::sync::Arc;
use thiserror::Error;

/// Lowest frequency the PLL synthesizer accepts, Hz.
pub const PLL_FREQUENCY_MIN: u64 = 120_000_000;
/// Highest frequency the PLL synthesizer accepts, Hz.
pub const PLL_FREQUENCY_MAX: u64 = 1_600_000_000;

/// Failure of a numeric routine. Never used to encode a computed zero.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NumericsError {
    #[error("no result found")]
    NotFound,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("numeric library is not available in this build")]
    Unavailable,
}

/// Peak found in an amplitude spectrum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralPeak {
    /// Summed power of the bins forming the peak.
    pub power: f64,
    /// Power-weighted mean bin index.
    pub index: f64,
}

/// Harmonic analysis of a modulated tone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Distortion {
    /// Harmonic distortion as a fraction.
    pub distortion: f64,
    pub modulation_index: f64,
}

/// Bit error count of a received 4-level symbol stream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BitErrorCount {
    pub errors: usize,
    pub total: usize,
    /// Constant-symbol reference I samples, symbols concatenated 0..3.
    pub reference_i: Vec<i32>,
    /// Constant-symbol reference Q samples.
    pub reference_q: Vec<i32>,
    /// Length of each symbol's run in the reference samples.
    pub symbol_lengths: [usize; 4],
}

impl BitErrorCount {
    /// Error fraction, `None` when no bits were counted.
    pub fn rate(&self) -> Option<f64> {
        (self.total > 0).then(|| self.errors as f64 / self.total as f64)
    }
}

/// Contracts of the native numeric routines.
pub trait NumericRoutines: Send + Sync {
    /// PLL register values for `frequency` Hz.
    fn synthesize_pll_registers(&self, frequency: u64) -> Result<[u32; 6], NumericsError>;

    /// Peak search over bins `start..=end` of an amplitude spectrum.
    fn find_spectral_peak(
        &self,
        spectrum: &[f64],
        start: usize,
        end: usize,
    ) -> Result<SpectralPeak, NumericsError>;

    /// Distortion and modulation index of a spectrum whose modulating tone
    /// sits at (fractional) bin `modulating_bin`.
    fn distortion_and_modulation_index(
        &self,
        spectrum: &[f64],
        modulating_bin: f64,
    ) -> Result<Distortion, NumericsError>;

    /// Decode the symbol stream and count bit errors, keeping at most
    /// `max_len` reference samples.
    fn count_bit_errors(
        &self,
        i: &[i32],
        q: &[i32],
        max_len: usize,
    ) -> Result<BitErrorCount, NumericsError>;
}

/// Stand-in used when the native library is not linked.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableNumerics;

impl NumericRoutines for UnavailableNumerics {
    fn synthesize_pll_registers(&self, _frequency: u64) -> Result<[u32; 6], NumericsError> {
        Err(NumericsError::Unavailable)
    }

    fn find_spectral_peak(&self, _: &[f64], _: usize, _: usize) -> Result<SpectralPeak, NumericsError> {
        Err(NumericsError::Unavailable)
    }

    fn distortion_and_modulation_index(&self, _: &[f64], _: f64) -> Result<Distortion, NumericsError> {
        Err(NumericsError::Unavailable)
    }

    fn count_bit_errors(&self, _: &[i32], _: &[i32], _: usize) -> Result<BitErrorCount, NumericsError> {
        Err(NumericsError::Unavailable)
    }
}

/// Numeric routines of this build.
pub fn default_routines() -> Arc<dyn NumericRoutines> {
    #[cfg(feature = "native_numerics")]
    {
        Arc::new(native::NativeNumerics)
    }

    #[cfg(not(feature = "native_numerics"))]
    {
        Arc::new(UnavailableNumerics)
    }
}

/// Validate a peak-search bin range against a spectrum.
pub(crate) fn check_range(spectrum: &[f64], start: usize, end: usize) -> Result<(), NumericsError> {
    if start >= end {
        return Err(NumericsError::InvalidInput(format!(
            "empty bin range {start}..={end}"
        )));
    }
    if end >= spectrum.len() {
        return Err(NumericsError::InvalidInput(format!(
            "bin {end} beyond spectrum of {} bins",
            spectrum.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_is_distinct_from_not_found() {
        let n = UnavailableNumerics;
        assert_eq!(n.synthesize_pll_registers(200_000_000), Err(NumericsError::Unavailable));
        assert_ne!(NumericsError::Unavailable, NumericsError::NotFound);
    }

    #[test]
    fn test_bit_error_rate() {
        let count = BitErrorCount {
            errors: 5,
            total: 1000,
            ..Default::default()
        };
        assert_eq!(count.rate(), Some(0.005));
        assert_eq!(BitErrorCount::default().rate(), None);
    }

    #[test]
    fn test_check_range() {
        let spectrum = [0.0; 8];
        assert!(check_range(&spectrum, 0, 7).is_ok());
        assert!(check_range(&spectrum, 3, 3).is_err());
        assert!(check_range(&spectrum, 0, 8).is_err());
    }
}
