//! Receiver sensitivity: the output attenuation at which the demodulated
//! tone's distortion crosses the reference limit.

use super::carrier::{capture, capture_spectrum};
use super::nonlinearity::modulating_bin;
use super::parameter::{
    DATA_LENGTH, FREQUENCY, MOD_FREQUENCY, REF_ATTENUATION, REF_DISTORTION, REF_OUTPUT_POWER,
    SEARCH_STATUS, THRESHOLD_POWER,
};
use super::{Procedure, TaskContext, TaskCore, TaskFault, TaskKind};
use crate::i18n::Message;
use crate::numerics::NumericRoutines;
use crate::transport::{self, Payload, Pll, Reply, Transport, WordSize};

/// Attenuator codes searched, inclusive.
pub const ATTENUATION_CODES: (u8, u8) = (1, 63);
/// LF ADC input ranges in volts, indexed by range code.
pub const LF_ADC_RANGES: [f64; 5] = [12.288, 10.24, 6.144, 5.12, 2.56];
/// ADC channel of the LF input.
const LF_CHANNEL: u64 = 3;
/// Samples in the auto-ranging capture.
const RANGE_TEST_LEN: usize = 1024;
/// Range use below which a smaller range is tried.
const UNDER_RANGE: f64 = 0.7;
/// Range use above which the capture counts as overloaded.
const OVER_RANGE: f64 = 0.9;
/// LF DAC amplitude code: 80 % of full scale.
const LFDAC_AMPLITUDE: u64 = 52400;

/// Outcome of a threshold search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdStatus {
    Found,
    /// Passing even at the highest attenuation; the threshold is lower than
    /// the device can reach.
    BelowRange,
    /// Failing even at the lowest attenuation.
    AboveRange,
    /// The boundary code and its neighbour agree; the input fluctuates.
    Ambiguous,
}

impl ThresholdStatus {
    /// Numeric code reported as the `searchStatus` result.
    pub fn code(self) -> i8 {
        match self {
            ThresholdStatus::Found => 0,
            ThresholdStatus::BelowRange => -1,
            ThresholdStatus::AboveRange => 1,
            ThresholdStatus::Ambiguous => 2,
        }
    }
}

/// Result of [`search_threshold`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdSearch {
    /// Highest passing code, or the boundary reached.
    pub code: u8,
    pub status: ThresholdStatus,
    /// Bisection probes.
    pub iterations: u32,
    /// All probes, re-probes included.
    pub probes: u32,
}

/// Bisect the attenuation codes for the last one where `probe` passes.
///
/// Assumes `probe` passes for low codes and fails above the threshold. After
/// bisection the boundary code is probed again if it was not the last one
/// probed, and once more with its neighbour to detect an unstable input.
pub fn search_threshold<E>(mut probe: impl FnMut(u8) -> Result<bool, E>) -> Result<ThresholdSearch, E> {
    let (first, last) = ATTENUATION_CODES;
    let (mut low, mut high) = (first, last + 1);
    let mut code = first;
    let mut passed = true;
    let mut iterations = 0;

    while high - low > 1 {
        code = low + (high - low) / 2;
        passed = probe(code)?;
        iterations += 1;
        if passed {
            low = code;
        } else {
            high = code;
        }
    }
    let mut probes = iterations;

    if code != low {
        code = low;
        passed = probe(code)?;
        probes += 1;
    }

    let status = if passed && code == last {
        ThresholdStatus::BelowRange
    } else if !passed && code == first {
        ThresholdStatus::AboveRange
    } else if code < last {
        probes += 1;
        if probe(code + 1)? == passed {
            ThresholdStatus::Ambiguous
        } else {
            ThresholdStatus::Found
        }
    } else {
        ThresholdStatus::Found
    };

    Ok(ThresholdSearch {
        code,
        status,
        iterations,
        probes,
    })
}

/// Fraction of the ADC range used by offset-binary samples.
pub fn range_usage(samples: &[u16]) -> f64 {
    samples
        .iter()
        .map(|&s| (f64::from(s) - 32768.0).abs())
        .fold(0.0, f64::max)
        / 32768.0
}

/// Power at the threshold code, dBm.
pub fn threshold_power(ref_output_power: f64, ref_attenuation: f64, code: u8) -> f64 {
    ref_output_power + ref_attenuation - 0.5 * f64::from(code)
}

/// Settings a probe needs, copied out of the task.
struct ProbeSettings<'a> {
    length: usize,
    mod_frequency: f64,
    ref_distortion: f64,
    numerics: &'a dyn NumericRoutines,
}

/// Sensitivity search state carried between probes of one cycle.
#[derive(Debug, Default)]
pub struct MeasureSensitivity {
    adc_range: usize,
    spectrum: Option<Vec<f64>>,
}

impl MeasureSensitivity {
    fn set_range(t: &mut Transport, range: usize) -> Result<(), TaskFault> {
        t.command("SET LF RANGE", &Payload::single(range as u64), Reply::None)?;
        Ok(())
    }

    /// Pick the smallest LF ADC range that does not overload and leave it set.
    fn auto_range(&mut self, t: &mut Transport) -> Result<(), TaskFault> {
        let mut usage = range_usage(&capture(t, LF_CHANNEL, RANGE_TEST_LEN)?);
        let mut range = self.adc_range;

        if usage < UNDER_RANGE {
            while range + 1 < LF_ADC_RANGES.len()
                && usage * LF_ADC_RANGES[self.adc_range] / LF_ADC_RANGES[range + 1] < OVER_RANGE
            {
                range += 1;
            }
            if range != self.adc_range {
                Self::set_range(t, range)?;
            }
        } else if usage > OVER_RANGE {
            while range > 0 {
                range -= 1;
                Self::set_range(t, range)?;
                usage = range_usage(&capture(t, LF_CHANNEL, RANGE_TEST_LEN)?);
                if usage <= OVER_RANGE {
                    break;
                }
            }
        }
        self.adc_range = range;
        tracing::debug!(range = LF_ADC_RANGES[range], usage, "LF ADC range selected");

        if usage > OVER_RANGE {
            return Err(TaskFault::evaluation(format!(
                "{} {}V",
                Message::LfAdcOverload.text(),
                LF_ADC_RANGES[range]
            )));
        }
        Ok(())
    }

    /// Whether the distortion at attenuation `code` is within the limit.
    fn probe(&mut self, t: &mut Transport, code: u8, settings: &ProbeSettings<'_>) -> Result<bool, TaskFault> {
        t.command("SET ATT", &Payload::single(u64::from(code)), Reply::None)?;
        Self::set_range(t, self.adc_range)?;
        self.auto_range(t)?;

        let buffer = capture(t, LF_CHANNEL, settings.length)?;
        let spectrum = capture_spectrum(&buffer);
        let bin = modulating_bin(settings.mod_frequency, buffer.len());
        let analysis = settings.numerics.distortion_and_modulation_index(&spectrum, bin);
        self.spectrum = Some(spectrum);

        let distortion = analysis
            .map_err(|_| TaskFault::evaluation(Message::DistortionUndefined.text()))?
            .distortion;
        tracing::debug!(code, distortion, "Sensitivity probe");
        Ok(distortion <= settings.ref_distortion)
    }
}

impl Procedure for MeasureSensitivity {
    fn kind(&self) -> TaskKind {
        TaskKind::MeasureSensitivity
    }

    fn parameters(&self) -> &'static [&'static str] {
        &[
            FREQUENCY,
            MOD_FREQUENCY,
            REF_DISTORTION,
            DATA_LENGTH,
            REF_ATTENUATION,
            REF_OUTPUT_POWER,
        ]
    }

    fn results(&self) -> &'static [&'static str] {
        &[THRESHOLD_POWER, SEARCH_STATUS]
    }

    fn init(&mut self, core: &mut TaskCore, ctx: &TaskContext) -> Result<(), TaskFault> {
        let link = core.link()?;
        let mut t = transport::lock(&link);
        t.command("SET MEASST", &Payload::single(4), Reply::None)?;
        t.command(
            "SET LFDAC",
            &Payload::mixed([(LFDAC_AMPLITUDE, WordSize::Two), (0, WordSize::Four)]),
            Reply::None,
        )?;
        let frequency = (core.value(FREQUENCY) + core.value(MOD_FREQUENCY)) as u64;
        if !t.set_pll_frequency(Pll::Modulator, frequency, ctx.numerics.as_ref())? {
            return Err(TaskFault::PllLock(Pll::Modulator));
        }
        Ok(())
    }

    fn measure(&mut self, core: &mut TaskCore, ctx: &TaskContext) -> Result<(), TaskFault> {
        self.adc_range = 0;
        self.spectrum = None;
        let settings = ProbeSettings {
            length: core.value(DATA_LENGTH) as usize,
            mod_frequency: core.value(MOD_FREQUENCY),
            ref_distortion: core.value(REF_DISTORTION),
            numerics: ctx.numerics.as_ref(),
        };
        let link = core.link()?;

        let search = {
            let mut t = transport::lock(&link);
            search_threshold(|code| self.probe(&mut t, code, &settings))
        };
        core.spectrum = self.spectrum.take();
        let search = search?;

        tracing::info!(
            code = search.code,
            status = ?search.status,
            probes = search.probes,
            "Sensitivity threshold search finished"
        );
        core.set_result(
            THRESHOLD_POWER,
            threshold_power(core.value(REF_OUTPUT_POWER), core.value(REF_ATTENUATION), search.code),
        );
        core.set_result(SEARCH_STATUS, f64::from(search.status.code()));
        Ok(())
    }
}
