//! DMR input and output tasks.
//!
//! The device transmits a repeating pseudo-random dibit sequence, 25 samples
//! per symbol, and returns the demodulated I and Q halves in one buffer. Each
//! dibit is a constant tone at ±648 Hz or ±1944 Hz. Analysis reports the bit
//! error rate from the numeric library, then locates the best sampling window
//! of each symbol with a sliding correlation and measures its tone there.

use super::parameter::{
    ATTENUATION, BIT_ERROR_RATE, BIT_FREQUENCY_DEVIATION, BIT_POWER_DIFFERENCE, FREQUENCY, NOISE,
};
use super::power::attenuation_code;
use super::{Procedure, TaskContext, TaskCore, TaskFault, TaskKind};
use crate::dsp;
use crate::i18n::Message;
use crate::numerics::{NumericRoutines, NumericsError};
use crate::transport::{self, Payload, Pll, Reply};
use crate::units::{ADC_SAMPLE_FREQUENCY, SYMBOL_DEVIATION_FREQUENCY};
use rand::Rng;
use std::f64::consts::PI;
use std::path::Path;

/// Words in a `GET DMRDIBIT` reply: 255 dibits, sent twice, 25 samples each,
/// I and Q.
pub const DIBIT_BUFFER_LEN: usize = 255 * 2 * 25 * 2;
/// Samples per channel analysed in one cycle.
pub const CHANNEL_LEN: usize = DIBIT_BUFFER_LEN / 2;
/// Upper bound on the reference runs returned by bit error counting.
const REFERENCE_LIMIT: usize = 20 * 200;
/// Sliding correlation window, samples.
const CORRELATION_WINDOW: usize = 128;
/// Zero-padded FFT length of a symbol window.
const SYMBOL_FFT_LEN: usize = 4096;
/// Half width of the tone search band around the reference tone.
const TONE_BAND: f64 = 0.1;
/// Largest sample magnitude of the model input.
const MODEL_FULL_SCALE: f64 = 32767.0;

/// Nominal tone magnitude of each dibit value.
pub const REFERENCE_TONES: [f64; 4] = [
    SYMBOL_DEVIATION_FREQUENCY,
    3.0 * SYMBOL_DEVIATION_FREQUENCY,
    SYMBOL_DEVIATION_FREQUENCY,
    3.0 * SYMBOL_DEVIATION_FREQUENCY,
];

/// Results of one DMR input analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct DmrAnalysis {
    pub bit_error_rate: f64,
    /// Absent when a symbol tone could not be found.
    pub timing: Option<SymbolTiming>,
}

/// Tone quality at the best sampling window of each dibit value.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolTiming {
    /// Window centres, indexed by dibit value.
    pub positions: [usize; 4],
    /// Measured tone frequencies, Hz.
    pub frequencies: [f64; 4],
    /// Largest |measured - reference| over the four symbols, Hz.
    pub max_frequency_deviation: f64,
    /// `2(max - min)/(max + min)` of the symbol amplitudes.
    pub power_spread: f64,
}

/// Samples with the mean removed, rounded to integers.
pub fn centered(samples: &[f64]) -> Vec<i32> {
    dsp::remove_dc(samples)
        .into_iter()
        .map(|s| s.round() as i32)
        .collect()
}

/// Running sine and cosine sums of I and Q against the 648 Hz and 1944 Hz
/// tones over the current window.
#[derive(Default)]
struct Correlator {
    /// `[I·sin f, I·cos f, I·sin 3f, I·cos 3f, Q·sin f, Q·cos f, Q·sin 3f, Q·cos 3f]`
    sums: [f64; 8],
}

impl Correlator {
    fn terms(i: i32, q: i32, n: usize) -> [f64; 8] {
        let phase = 2.0 * PI * SYMBOL_DEVIATION_FREQUENCY * n as f64 / ADC_SAMPLE_FREQUENCY;
        let (s1, c1) = phase.sin_cos();
        let (s3, c3) = (3.0 * phase).sin_cos();
        let (i, q) = (f64::from(i), f64::from(q));
        [i * s1, i * c1, i * s3, i * c3, q * s1, q * c1, q * s3, q * c3]
    }

    fn add(&mut self, i: i32, q: i32, n: usize) {
        for (sum, term) in self.sums.iter_mut().zip(Self::terms(i, q, n)) {
            *sum += term;
        }
    }

    fn remove(&mut self, i: i32, q: i32, n: usize) {
        for (sum, term) in self.sums.iter_mut().zip(Self::terms(i, q, n)) {
            *sum -= term;
        }
    }

    /// Power of the +648, +1944, -648 and -1944 Hz hypotheses.
    fn hypotheses(&self) -> [f64; 4] {
        let a = &self.sums;
        [
            (a[5] - a[0]).powi(2) + (a[4] + a[1]).powi(2),
            (a[7] - a[2]).powi(2) + (a[6] + a[3]).powi(2),
            (a[5] + a[0]).powi(2) + (a[4] - a[1]).powi(2),
            (a[7] + a[2]).powi(2) + (a[6] - a[3]).powi(2),
        ]
    }
}

/// Index of the dominant hypothesis; ties go to the later one.
fn dominant(p: &[f64; 4]) -> usize {
    if p[0] > p[1] && p[0] > p[2] && p[0] > p[3] {
        0
    } else if p[1] > p[2] && p[1] > p[3] {
        1
    } else if p[2] > p[3] {
        2
    } else {
        3
    }
}

/// Centre of the window where each dibit value dominates most clearly,
/// clamped so a full window fits around it.
pub fn locate_symbol_positions(i: &[i32], q: &[i32]) -> [usize; 4] {
    let len = i.len().min(q.len());
    let half = CORRELATION_WINDOW / 2;
    let mut best_score = [0.0f64; 4];
    let mut positions = [0usize; 4];
    let mut correlator = Correlator::default();

    let mut consider = |correlator: &Correlator, start: usize| {
        let p = correlator.hypotheses();
        let j = dominant(&p);
        let others: f64 = p.iter().sum::<f64>() - p[j];
        let score = p[j] / (others + 1e-6);
        if score > best_score[j] {
            best_score[j] = score;
            positions[j] = start + half;
        }
    };

    for n in 0..CORRELATION_WINDOW.min(len) {
        correlator.add(i[n], q[n], n);
        consider(&correlator, 0);
    }
    for start in 0..len.saturating_sub(CORRELATION_WINDOW) {
        let incoming = start + CORRELATION_WINDOW;
        correlator.add(i[incoming], q[incoming], incoming);
        correlator.remove(i[start], q[start], start);
        consider(&correlator, start);
    }

    let low = half + 1;
    let high = len.saturating_sub(half + 1).max(low);
    positions.map(|p| p.clamp(low, high))
}

/// Frequency and amplitude of the tone in the window centred on `position`.
fn symbol_tone(
    numerics: &dyn NumericRoutines,
    i: &[i32],
    q: &[i32],
    position: usize,
    reference: f64,
) -> Result<(f64, f64), NumericsError> {
    let half = CORRELATION_WINDOW / 2;
    let range = position.saturating_sub(half)..(position + half).min(i.len()).min(q.len());
    let window = dsp::normalized_blackman(range.len());
    let spectrum = |samples: &[i32]| {
        let samples: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();
        dsp::amplitude_spectrum_padded(&samples, &window, SYMBOL_FFT_LEN)
    };
    let combined = dsp::combine_spectra(&spectrum(&i[range.clone()]), &spectrum(&q[range]));

    let bin_width = ADC_SAMPLE_FREQUENCY / SYMBOL_FFT_LEN as f64;
    let start = ((1.0 - TONE_BAND) * reference / bin_width).floor() as usize;
    let end = ((1.0 + TONE_BAND) * reference / bin_width).ceil() as usize;
    let peak = numerics.find_spectral_peak(&combined, start, end)?;
    Ok((peak.index * bin_width, peak.power.max(0.0).sqrt()))
}

/// Tone quality at each symbol position; `None` when any tone is missing.
fn symbol_timing(numerics: &dyn NumericRoutines, i: &[i32], q: &[i32]) -> Option<SymbolTiming> {
    let positions = locate_symbol_positions(i, q);
    let mut frequencies = [0.0; 4];
    let mut amplitudes = [0.0; 4];
    for (symbol, &position) in positions.iter().enumerate() {
        match symbol_tone(numerics, i, q, position, REFERENCE_TONES[symbol]) {
            Ok((frequency, amplitude)) => {
                frequencies[symbol] = frequency;
                amplitudes[symbol] = amplitude;
            }
            Err(err) => {
                tracing::debug!(symbol, position, "Symbol tone not found: {err}");
                return None;
            }
        }
    }

    let max_frequency_deviation = frequencies
        .iter()
        .zip(REFERENCE_TONES)
        .map(|(f, reference)| (f - reference).abs())
        .fold(0.0, f64::max);
    let max = amplitudes.iter().copied().fold(f64::MIN, f64::max);
    let min = amplitudes.iter().copied().fold(f64::MAX, f64::min);
    let power_spread = if max + min > 0.0 {
        2.0 * (max - min) / (max + min)
    } else {
        0.0
    };
    Some(SymbolTiming {
        positions,
        frequencies,
        max_frequency_deviation,
        power_spread,
    })
}

/// Bit error rate and symbol timing of DC-free I and Q samples.
pub fn analyze(numerics: &dyn NumericRoutines, i: &[i32], q: &[i32]) -> Result<DmrAnalysis, TaskFault> {
    let count = match numerics.count_bit_errors(i, q, REFERENCE_LIMIT) {
        Ok(count) => count,
        Err(NumericsError::InvalidInput(detail)) => {
            return Err(TaskFault::evaluation(format!(
                "{} ({detail})",
                Message::TooFewBits.text()
            )))
        }
        Err(err) => return Err(TaskFault::evaluation(err.to_string())),
    };
    let bit_error_rate = count.rate().ok_or_else(|| {
        TaskFault::evaluation(format!("{} - {}", Message::TooFewBits.text(), i.len() + q.len()))
    })?;

    Ok(DmrAnalysis {
        bit_error_rate,
        timing: symbol_timing(numerics, i, q),
    })
}

fn store(core: &mut TaskCore, analysis: &DmrAnalysis) {
    core.set_result(BIT_ERROR_RATE, analysis.bit_error_rate);
    if let Some(timing) = &analysis.timing {
        core.set_result(BIT_FREQUENCY_DEVIATION, timing.max_frequency_deviation);
        core.set_result(BIT_POWER_DIFFERENCE, timing.power_spread);
    }
}

/// Demodulates the device's dibit sequence.
pub struct DmrInput;

impl Procedure for DmrInput {
    fn kind(&self) -> TaskKind {
        TaskKind::DmrInput
    }

    fn parameters(&self) -> &'static [&'static str] {
        &[FREQUENCY]
    }

    fn results(&self) -> &'static [&'static str] {
        &[BIT_ERROR_RATE, BIT_FREQUENCY_DEVIATION, BIT_POWER_DIFFERENCE]
    }

    fn init(&mut self, core: &mut TaskCore, ctx: &TaskContext) -> Result<(), TaskFault> {
        let link = core.link()?;
        let mut t = transport::lock(&link);
        t.command("SET MEASST", &Payload::single(6), Reply::None)?;
        let frequency = core.value(FREQUENCY) as u64;
        if !t.set_pll_frequency(Pll::Demodulator, frequency, ctx.numerics.as_ref())? {
            return Err(TaskFault::PllLock(Pll::Demodulator));
        }
        Ok(())
    }

    fn measure(&mut self, core: &mut TaskCore, ctx: &TaskContext) -> Result<(), TaskFault> {
        let link = core.link()?;
        let buffer = transport::lock(&link).command(
            "GET DMRDIBIT",
            &Payload::empty(),
            Reply::Words(DIBIT_BUFFER_LEN),
        )?;
        if buffer.len() != DIBIT_BUFFER_LEN {
            return Err(TaskFault::evaluation(format!(
                "{} ({} != {DIBIT_BUFFER_LEN})",
                Message::DataLengthMismatch.text(),
                buffer.len()
            )));
        }

        let samples: Vec<f64> = buffer.iter().map(|&w| f64::from(w)).collect();
        let (i, q) = samples.split_at(CHANNEL_LEN);
        let analysis = analyze(ctx.numerics.as_ref(), &centered(i), &centered(q))?;
        store(core, &analysis);
        Ok(())
    }
}

/// Starts the device transmitting the dibit sequence. Single-shot.
pub struct DmrOutput;

impl Procedure for DmrOutput {
    fn kind(&self) -> TaskKind {
        TaskKind::DmrOutput
    }

    fn parameters(&self) -> &'static [&'static str] {
        &[FREQUENCY, ATTENUATION]
    }

    fn results(&self) -> &'static [&'static str] {
        &[]
    }

    fn single_shot(&self) -> bool {
        true
    }

    fn init(&mut self, core: &mut TaskCore, ctx: &TaskContext) -> Result<(), TaskFault> {
        let link = core.link()?;
        let mut t = transport::lock(&link);
        t.command("SET MEASST", &Payload::single(5), Reply::None)?;
        let frequency = core.value(FREQUENCY) as u64;
        if !t.set_pll_frequency(Pll::Modulator, frequency, ctx.numerics.as_ref())? {
            return Err(TaskFault::PllLock(Pll::Modulator));
        }
        t.command(
            "SET ATT",
            &Payload::single(attenuation_code(core.value(ATTENUATION))),
            Reply::None,
        )?;
        Ok(())
    }
}

/// DMR input analysis on recorded I/Q samples with added noise.
#[derive(Debug, Default)]
pub struct DmrInputModel {
    i: Vec<i32>,
    q: Vec<i32>,
}

/// One integer per line; blank lines are skipped.
pub fn read_samples(path: &Path) -> Result<Vec<i32>, String> {
    let text = std::fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .enumerate()
        .map(|(n, line)| {
            line.parse::<i32>()
                .map_err(|e| format!("{}: line {}: {e}", path.display(), n + 1))
        })
        .collect()
}

/// Standard normal sample by the Box-Muller transform.
fn gaussian<R: Rng>(rng: &mut R) -> f64 {
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

/// DC-free window with Gaussian noise of `sigma` counts, clipped to full scale.
fn with_noise<R: Rng>(rng: &mut R, window: &[i32], sigma: f64) -> Vec<i32> {
    let samples: Vec<f64> = window.iter().map(|&s| f64::from(s)).collect();
    centered(&samples)
        .into_iter()
        .map(|s| {
            let noisy = f64::from(s) + (sigma * gaussian(rng)).trunc();
            noisy.clamp(-MODEL_FULL_SCALE, MODEL_FULL_SCALE) as i32
        })
        .collect()
}

impl Procedure for DmrInputModel {
    fn kind(&self) -> TaskKind {
        TaskKind::DmrInputModel
    }

    fn parameters(&self) -> &'static [&'static str] {
        &[FREQUENCY, NOISE]
    }

    fn results(&self) -> &'static [&'static str] {
        &[BIT_ERROR_RATE, BIT_FREQUENCY_DEVIATION, BIT_POWER_DIFFERENCE]
    }

    fn needs_device(&self) -> bool {
        false
    }

    fn init(&mut self, _core: &mut TaskCore, ctx: &TaskContext) -> Result<(), TaskFault> {
        let load = |path: Option<&Path>| {
            let path = path.ok_or_else(|| "no sample file configured".to_string())?;
            read_samples(path)
        };
        let loaded = load(ctx.model.i_samples.as_deref())
            .and_then(|i| Ok((i, load(ctx.model.q_samples.as_deref())?)));
        let (i, q) = loaded.map_err(|detail| {
            TaskFault::Setup(format!("{}\n{detail}", Message::ModelDataError.text()))
        })?;

        if i.len() != q.len() || i.len() < CHANNEL_LEN {
            return Err(TaskFault::Setup(format!(
                "{} ({}, {})",
                Message::DataLengthMismatch.text(),
                i.len(),
                q.len()
            )));
        }
        tracing::info!(samples = i.len(), "Model data loaded");
        self.i = i;
        self.q = q;
        Ok(())
    }

    fn measure(&mut self, core: &mut TaskCore, ctx: &TaskContext) -> Result<(), TaskFault> {
        if self.i.len() < CHANNEL_LEN || self.q.len() < CHANNEL_LEN {
            return Err(TaskFault::evaluation(Message::DataLengthMismatch.text()));
        }
        let mut rng = rand::thread_rng();
        let offset = rng.gen_range(0..=self.i.len() - CHANNEL_LEN);
        let sigma = core.value(NOISE) * MODEL_FULL_SCALE;
        let window = offset..offset + CHANNEL_LEN;
        let i = with_noise(&mut rng, &self.i[window.clone()], sigma);
        let q = with_noise(&mut rng, &self.q[window], sigma);

        let analysis = analyze(ctx.numerics.as_ref(), &i, &q)?;
        store(core, &analysis);
        Ok(())
    }
}
