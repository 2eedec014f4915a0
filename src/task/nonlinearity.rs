//! Harmonic distortion and modulation index of the demodulated test tone.

use super::carrier::capture_spectrum;
use super::parameter::{DATA_LENGTH, DISTORTION, FREQUENCY, MODULATION_INDEX, MOD_AMPLITUDE, MOD_FREQUENCY};
use super::{Procedure, TaskContext, TaskCore, TaskFault, TaskKind};
use crate::dsp;
use crate::transport::{self, Payload, Pll, Reply, WordSize};
use crate::units::ADC_SAMPLE_FREQUENCY;

/// ADC channel carrying interleaved I and Q captures.
const IQ_CHANNEL: u64 = 2;

/// LF DAC amplitude code for a fraction of full scale.
pub fn amplitude_code(amplitude: f64) -> u64 {
    (amplitude * f64::from(u16::MAX)).max(0.0) as u64
}

/// LF DAC frequency code for a modulation frequency in Hz.
pub fn frequency_code(frequency: f64) -> u64 {
    (frequency * ADC_SAMPLE_FREQUENCY / 65536.0 + 0.5).floor().max(0.0) as u64
}

/// Fractional spectrum bin of the modulating tone in an `n`-point capture.
pub fn modulating_bin(frequency: f64, n: usize) -> f64 {
    frequency / ADC_SAMPLE_FREQUENCY * n as f64
}

/// Demodulator on the carrier, LF DAC driving the modulator.
pub struct MeasureNonlinearity;

impl Procedure for MeasureNonlinearity {
    fn kind(&self) -> TaskKind {
        TaskKind::MeasureNonlinearity
    }

    fn parameters(&self) -> &'static [&'static str] {
        &[FREQUENCY, MOD_AMPLITUDE, MOD_FREQUENCY, DATA_LENGTH]
    }

    fn results(&self) -> &'static [&'static str] {
        &[DISTORTION, MODULATION_INDEX]
    }

    fn init(&mut self, core: &mut TaskCore, ctx: &TaskContext) -> Result<(), TaskFault> {
        let link = core.link()?;
        let mut t = transport::lock(&link);
        t.command("SET MEASST", &Payload::single(2), Reply::None)?;
        let frequency = core.value(FREQUENCY) as u64;
        if !t.set_pll_frequency(Pll::Demodulator, frequency, ctx.numerics.as_ref())? {
            return Err(TaskFault::PllLock(Pll::Demodulator));
        }
        let lfdac = Payload::mixed([
            (amplitude_code(core.value(MOD_AMPLITUDE)), WordSize::Two),
            (frequency_code(core.value(MOD_FREQUENCY)), WordSize::Four),
        ]);
        t.command("SET LFDAC", &lfdac, Reply::None)?;
        Ok(())
    }

    fn measure(&mut self, core: &mut TaskCore, ctx: &TaskContext) -> Result<(), TaskFault> {
        let length = core.value(DATA_LENGTH) as usize;
        let link = core.link()?;
        let buffer = transport::lock(&link).command(
            "GET ADC DAT",
            &Payload::words([IQ_CHANNEL, 2 * length as u64], WordSize::Two),
            Reply::Words(2 * length),
        )?;
        if buffer.len() % 2 != 0 {
            return Err(TaskFault::Evaluation(None));
        }

        let (i, q) = buffer.split_at(buffer.len() / 2);
        let spectrum = dsp::combine_spectra(&capture_spectrum(i), &capture_spectrum(q));
        let bin = modulating_bin(core.value(MOD_FREQUENCY), i.len());
        let analysis = ctx.numerics.distortion_and_modulation_index(&spectrum, bin);
        core.spectrum = Some(spectrum);

        let analysis = analysis.map_err(|err| {
            tracing::debug!("Distortion analysis failed: {err}");
            TaskFault::Evaluation(None)
        })?;
        core.set_result(DISTORTION, analysis.distortion);
        core.set_result(MODULATION_INDEX, analysis.modulation_index);
        Ok(())
    }
}
