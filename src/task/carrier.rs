//! Carrier frequency measurement by two-offset disambiguation.
//!
//! The demodulator only sees `|F_carrier - F_pll|`, so one capture cannot tell
//! which side of the PLL frequency the carrier is on. A second capture with
//! the PLL shifted by `dF` resolves the sign.

use super::parameter::{CARRIER_FREQUENCY, DATA_LENGTH, FREQUENCY};
use super::{Procedure, TaskContext, TaskCore, TaskFault, TaskKind};
use crate::dsp;
use crate::i18n::Message;
use crate::numerics::{NumericRoutines, NumericsError};
use crate::transport::{self, Payload, Pll, Reply, Transport, WordSize};
use crate::units::ADC_SAMPLE_FREQUENCY;

/// PLL shift of the second capture, Hz.
pub const CARRIER_OFFSET: f64 = 10_000.0;
/// ADC channel carrying the demodulated carrier.
const CARRIER_CHANNEL: u64 = 1;

/// Carrier frequency from the offsets observed at PLL frequencies `nominal`
/// (`f0`) and `nominal + df` (`foff`). `None` when the two observations are
/// inconsistent.
pub fn resolve_carrier(nominal: f64, f0: f64, foff: f64, df: f64) -> Option<f64> {
    if f0 < foff && foff >= df {
        Some(nominal - 0.5 * (f0 + foff - df))
    } else if f0 <= df && df > foff {
        Some(nominal + 0.5 * (f0 + df - foff))
    } else if df < f0 && f0 > foff {
        Some(nominal + 0.5 * (f0 + df + foff))
    } else {
        None
    }
}

/// Read `count` ADC samples from `channel`.
pub(crate) fn capture(t: &mut Transport, channel: u64, count: usize) -> Result<Vec<u16>, TaskFault> {
    Ok(t.command(
        "GET ADC DAT",
        &Payload::words([channel, count as u64], WordSize::Two),
        Reply::Words(count),
    )?)
}

/// DC-free, Blackman-windowed amplitude spectrum of raw ADC words.
pub(crate) fn capture_spectrum(buffer: &[u16]) -> Vec<f64> {
    let samples: Vec<f64> = buffer.iter().map(|&w| f64::from(w)).collect();
    let window = dsp::normalized_blackman(samples.len());
    dsp::amplitude_spectrum(&dsp::remove_dc(&samples), &window)
}

/// Frequency offset of the strongest line in a capture spectrum.
fn peak_offset(
    numerics: &dyn NumericRoutines,
    spectrum: &[f64],
    samples: usize,
) -> Result<f64, TaskFault> {
    let end = spectrum.len().saturating_sub(1);
    match numerics.find_spectral_peak(spectrum, 0, end) {
        Ok(peak) if peak.power > 0.0 => Ok(peak.index / samples as f64 * ADC_SAMPLE_FREQUENCY),
        Ok(_) | Err(NumericsError::NotFound) => {
            Err(TaskFault::evaluation(Message::NoCarrierSignal.text()))
        }
        Err(err) => Err(TaskFault::evaluation(err.to_string())),
    }
}

/// Two captures around the nominal carrier, resolved to one frequency.
pub struct MeasureCarrierFrequency;

impl Procedure for MeasureCarrierFrequency {
    fn kind(&self) -> TaskKind {
        TaskKind::MeasureCarrierFrequency
    }

    fn parameters(&self) -> &'static [&'static str] {
        &[FREQUENCY, DATA_LENGTH]
    }

    fn results(&self) -> &'static [&'static str] {
        &[CARRIER_FREQUENCY]
    }

    fn init(&mut self, core: &mut TaskCore, _ctx: &TaskContext) -> Result<(), TaskFault> {
        let link = core.link()?;
        transport::lock(&link).command("SET MEASST", &Payload::single(1), Reply::None)?;
        Ok(())
    }

    fn measure(&mut self, core: &mut TaskCore, ctx: &TaskContext) -> Result<(), TaskFault> {
        let nominal = core.value(FREQUENCY);
        let length = core.value(DATA_LENGTH) as usize;
        let link = core.link()?;

        let (nominal_buf, offset_buf) = {
            let mut t = transport::lock(&link);
            if !t.set_pll_frequency(Pll::Demodulator, nominal as u64, ctx.numerics.as_ref())? {
                return Err(TaskFault::PllLock(Pll::Demodulator));
            }
            let first = capture(&mut t, CARRIER_CHANNEL, length)?;
            let shifted = (nominal + CARRIER_OFFSET) as u64;
            if !t.set_pll_frequency(Pll::Demodulator, shifted, ctx.numerics.as_ref())? {
                return Err(TaskFault::PllLock(Pll::Demodulator));
            }
            let second = capture(&mut t, CARRIER_CHANNEL, length)?;
            (first, second)
        };

        if nominal_buf.len() != offset_buf.len() || nominal_buf.len() != length {
            return Err(TaskFault::evaluation(Message::InconsistentBuffer.text()));
        }

        let nominal_spectrum = capture_spectrum(&nominal_buf);
        let offset_spectrum = capture_spectrum(&offset_buf);
        let f0 = peak_offset(ctx.numerics.as_ref(), &nominal_spectrum, length)?;
        let foff = peak_offset(ctx.numerics.as_ref(), &offset_spectrum, length)?;
        core.spectrum = Some(nominal_spectrum);

        let carrier = resolve_carrier(nominal, f0, foff, CARRIER_OFFSET)
            .ok_or_else(|| TaskFault::evaluation(Message::CarrierEvaluationError.text()))?;
        tracing::debug!(f0, foff, carrier, "Carrier resolved");
        core.set_result(CARRIER_FREQUENCY, carrier);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i18n::{set_language, Language};
    use crate::numerics::mock::ScriptedNumerics;
    use crate::task::test_support::mock_context;
    use crate::transport::mock::{MockDevice, MockReply};
    use serial_test::serial;
    use std::f64::consts::PI;
    use std::sync::Arc;

    const F: f64 = 200_000_000.0;

    #[test]
    fn test_carrier_below_pll_frequency() {
        let carrier = resolve_carrier(F, 3000.0, 12_000.0, CARRIER_OFFSET);
        assert_eq!(carrier, Some(F - 2500.0));
    }

    #[test]
    fn test_carrier_between_pll_frequencies() {
        let carrier = resolve_carrier(F, 2000.0, 8000.0, CARRIER_OFFSET);
        assert_eq!(carrier, Some(F + 2000.0));
    }

    #[test]
    fn test_carrier_above_both_pll_frequencies() {
        let carrier = resolve_carrier(F, 15_000.0, 5000.0, CARRIER_OFFSET);
        assert_eq!(carrier, Some(F + 15_000.0));
    }

    #[test]
    fn test_inconsistent_offsets() {
        assert_eq!(resolve_carrier(F, 12_000.0, 12_000.0, CARRIER_OFFSET), None);
    }

    fn tone(frequency: f64, n: usize) -> Vec<u16> {
        (0..n)
            .map(|k| {
                let phase = 2.0 * PI * frequency * k as f64 / ADC_SAMPLE_FREQUENCY;
                (32768.0 + 10_000.0 * phase.sin()).round() as u16
            })
            .collect()
    }

    #[test]
    #[serial]
    fn test_measure_resolves_carrier_from_captures() {
        let device = MockDevice::new();
        device.set_status(Pll::Demodulator.lock_mask());
        device.push_reply("GET ADC DAT", MockReply::Words(tone(2500.0, 1200)));
        device.push_reply("GET ADC DAT", MockReply::Words(tone(12_500.0, 1200)));
        let numerics = Arc::new(ScriptedNumerics::new());
        let ctx = mock_context(&device, numerics.clone());

        let mut task = TaskKind::MeasureCarrierFrequency.create();
        task.init_meas_with(&ctx, &[(DATA_LENGTH, 1200.0)]);
        assert!(task.is_inited(), "{}", task.message());
        task.measure(&ctx);

        assert!(task.is_completed(), "{}", task.message());
        let carrier = task.result(CARRIER_FREQUENCY).expect("carrier");
        assert!((carrier - (F - 2500.0)).abs() < 1e-3, "carrier {carrier}");
        assert_eq!(numerics.synthesized_frequencies(), vec![400_000_000, 400_020_000]);
        assert_eq!(task.spectrum().map(<[f64]>::len), Some(601));
        let captures = device.requests_named("GET ADC DAT");
        assert_eq!(captures[0].u16_words(), vec![1, 1200]);
    }

    #[test]
    #[serial]
    fn test_flat_capture_reports_no_carrier() {
        set_language(Language::En);
        let device = MockDevice::new();
        device.set_status(Pll::Demodulator.lock_mask());
        device.set_reply("GET ADC DAT", MockReply::Words(vec![32768; 64]));
        let ctx = mock_context(&device, Arc::new(ScriptedNumerics::new()));

        let mut task = TaskKind::MeasureCarrierFrequency.create();
        task.init_meas_with(&ctx, &[(DATA_LENGTH, 64.0)]);
        task.measure(&ctx);
        assert!(task.is_failed());
        assert_eq!(task.message(), "Measurement error:\nNo carrier signal");
        assert_eq!(task.result(CARRIER_FREQUENCY), None);
    }

    #[test]
    #[serial]
    fn test_unlocked_pll_fails_measurement() {
        set_language(Language::En);
        let device = MockDevice::new();
        let ctx = mock_context(&device, Arc::new(ScriptedNumerics::new()));
        let mut task = TaskKind::MeasureCarrierFrequency.create();
        task.init_meas(&ctx);
        task.measure(&ctx);
        assert!(task.is_failed());
        assert_eq!(task.message(), "Demodulator PLL error");
        assert!(device.requests_named("GET ADC DAT").is_empty());
    }
}
