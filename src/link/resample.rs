//! Fourier-method resampling for bounding link bandwidth.
//!
//! The signal is treated as one period of a band-limited periodic function:
//! its spectrum is truncated (or zero-padded) to the target length and
//! inverse-transformed. Even-length Nyquist bins are split or joined so a
//! real input stays real.

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

/// Resample `x` to exactly `num` samples.
pub fn resample(x: &[f64], num: usize) -> Vec<f64> {
    let nx = x.len();
    if num == 0 {
        return Vec::new();
    }
    if nx == 0 {
        return vec![0.0; num];
    }
    if nx == num {
        return x.to_vec();
    }

    let mut planner = FftPlanner::<f64>::new();

    let mut spectrum: Vec<Complex<f64>> = x.iter().map(|&v| Complex::new(v, 0.0)).collect();
    planner.plan_fft_forward(nx).process(&mut spectrum);

    // positive-frequency half of the output spectrum
    let half_len = num / 2 + 1;
    let n = num.min(nx);
    let nyq = n / 2 + 1;
    let mut half = vec![Complex::new(0.0, 0.0); half_len];
    half[..nyq].copy_from_slice(&spectrum[..nyq]);

    if n % 2 == 0 {
        if num < nx {
            half[n / 2] *= 2.0;
        } else {
            half[n / 2] *= 0.5;
        }
    }

    // rebuild the Hermitian spectrum of length `num`
    let mut full = vec![Complex::new(0.0, 0.0); num];
    full[0] = Complex::new(half[0].re, 0.0);
    for k in 1..=(num - 1) / 2 {
        full[k] = half[k];
        full[num - k] = half[k].conj();
    }
    if num % 2 == 0 {
        full[num / 2] = Complex::new(half[num / 2].re, 0.0);
    }

    planner.plan_fft_inverse(num).process(&mut full);

    // rustfft is unnormalized: 1/num for the inverse, times num/nx for the
    // amplitude rescale
    let scale = 1.0 / nx as f64;
    full.iter().map(|c| c.re * scale).collect()
}

/// Resample to `max_rate` samples when longer; shorter input passes through.
pub fn downsample(x: &[f64], max_rate: usize) -> Vec<f64> {
    if x.len() > max_rate {
        resample(x, max_rate)
    } else {
        x.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn assert_close(a: &[f64], b: &[f64]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-9, "{x} != {y}");
        }
    }

    #[test]
    fn test_constant_signal_stays_constant() {
        let y = resample(&[2.5; 100], 30);
        assert_close(&y, &[2.5; 30]);
    }

    #[test]
    fn test_band_limited_sine_is_exact() {
        let x: Vec<f64> = (0..60).map(|i| (2.0 * PI * 2.0 * i as f64 / 60.0).sin()).collect();
        let expected: Vec<f64> = (0..30).map(|j| (2.0 * PI * 2.0 * j as f64 / 30.0).sin()).collect();
        assert_close(&resample(&x, 30), &expected);
    }

    #[test]
    fn test_upsampling_interpolates() {
        let x: Vec<f64> = (0..8).map(|i| (2.0 * PI * i as f64 / 8.0).cos()).collect();
        let expected: Vec<f64> = (0..16).map(|j| (2.0 * PI * j as f64 / 16.0).cos()).collect();
        assert_close(&resample(&x, 16), &expected);
    }

    #[test]
    fn test_downsample_only_when_longer() {
        let short = vec![1.0, 2.0, 3.0];
        assert_eq!(downsample(&short, 30), short);
        assert_eq!(downsample(&[0.0; 31], 30).len(), 30);
        assert_eq!(downsample(&[0.0; 30], 30).len(), 30);
    }
}
