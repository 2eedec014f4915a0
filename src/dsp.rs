//! Window functions and amplitude spectra for ADC captures.

use num_complex::Complex;
use rustfft::FftPlanner;
use std::f64::consts::PI;

/// Symmetric Blackman window of `n` points.
pub fn blackman(n: usize) -> Vec<f64> {
    if n <= 1 {
        return vec![1.0; n];
    }
    let m = (n - 1) as f64;
    (0..n)
        .map(|k| {
            let x = k as f64 / m;
            0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
        })
        .collect()
}

/// Blackman window scaled to unit RMS, so windowing preserves signal power.
pub fn normalized_blackman(n: usize) -> Vec<f64> {
    let mut window = blackman(n);
    let rms = (window.iter().map(|w| w * w).sum::<f64>() / n.max(1) as f64).sqrt();
    if rms > 0.0 {
        window.iter_mut().for_each(|w| *w /= rms);
    }
    window
}

/// Arithmetic mean, 0 for an empty slice.
pub fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        0.0
    } else {
        samples.iter().sum::<f64>() / samples.len() as f64
    }
}

/// Samples with their mean subtracted.
pub fn remove_dc(samples: &[f64]) -> Vec<f64> {
    let dc = mean(samples);
    samples.iter().map(|s| s - dc).collect()
}

/// One-sided amplitude spectrum `2/N·|FFT(window·x)|`, bins `0..=N/2`.
pub fn amplitude_spectrum(samples: &[f64], window: &[f64]) -> Vec<f64> {
    amplitude_spectrum_padded(samples, window, samples.len())
}

/// Amplitude spectrum of `window·x` zero-padded to `fft_len` points.
///
/// Scaling uses the number of samples, not the padded length, so a tone keeps
/// its amplitude regardless of padding. Returns bins `0..=fft_len/2`.
pub fn amplitude_spectrum_padded(samples: &[f64], window: &[f64], fft_len: usize) -> Vec<f64> {
    let n = samples.len();
    if n == 0 || fft_len == 0 {
        return Vec::new();
    }
    let fft_len = fft_len.max(n);
    let mut buffer: Vec<Complex<f64>> = samples
        .iter()
        .zip(window.iter().chain(std::iter::repeat(&1.0)))
        .map(|(s, w)| Complex::new(s * w, 0.0))
        .collect();
    buffer.resize(fft_len, Complex::new(0.0, 0.0));

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(fft_len);
    fft.process(&mut buffer);

    let scale = 2.0 / n as f64;
    buffer[..=fft_len / 2].iter().map(|c| c.norm() * scale).collect()
}

/// Combined amplitude of two spectra, `sqrt(a² + b²)` bin by bin.
pub fn combine_spectra(a: &[f64], b: &[f64]) -> Vec<f64> {
    a.iter().zip(b).map(|(x, y)| x.hypot(*y)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blackman_shape() {
        let w = blackman(5);
        assert!(w[0].abs() < 1e-12);
        assert!(w[4].abs() < 1e-12);
        assert!((w[2] - 1.0).abs() < 1e-12);
        assert!((w[1] - w[3]).abs() < 1e-12);
    }

    #[test]
    fn test_normalized_window_has_unit_rms() {
        let w = normalized_blackman(1024);
        let rms = (w.iter().map(|x| x * x).sum::<f64>() / 1024.0).sqrt();
        assert!((rms - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_spectrum_peak_at_tone_bin() {
        let n = 1024;
        let samples: Vec<f64> = (0..n)
            .map(|k| 3.0 + (2.0 * PI * 64.0 * k as f64 / n as f64).sin())
            .collect();
        let centered = remove_dc(&samples);
        assert!(mean(&centered).abs() < 1e-9);
        let spectrum = amplitude_spectrum(&centered, &vec![1.0; n]);
        assert_eq!(spectrum.len(), n / 2 + 1);
        let peak = spectrum
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i);
        assert_eq!(peak, Some(64));
        assert!((spectrum[64] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_padding_refines_bins() {
        let samples: Vec<f64> = (0..128)
            .map(|k| (2.0 * PI * 5.0 * k as f64 / 128.0).cos())
            .collect();
        let spectrum = amplitude_spectrum_padded(&samples, &vec![1.0; 128], 1024);
        assert_eq!(spectrum.len(), 513);
        let peak = spectrum
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i);
        assert_eq!(peak, Some(40));
    }
}
