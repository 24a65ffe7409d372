//! Analysis frames and frame conditioning.
//!
//! A `Frame` is a fixed block of mono samples at a known rate, extracted once
//! from source audio by the caller.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Analysis window applied before autocorrelation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Window {
    #[default]
    Rectangular,
    Hann,
    Hamming,
}

/// Fixed-length mono sample block plus its sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    samples: Vec<f64>,
    sample_rate: f64,
}

impl Frame {
    pub fn new(samples: Vec<f64>, sample_rate: f64) -> Result<Self> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "sample rate must be positive, got {sample_rate}"
            )));
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate
    }

    /// Copy out `len` samples starting at `start`.
    pub fn segment(&self, start: usize, len: usize) -> Result<Frame> {
        let end = start.checked_add(len).filter(|&e| e <= self.samples.len());
        match end {
            Some(end) => Ok(Frame {
                samples: self.samples[start..end].to_vec(),
                sample_rate: self.sample_rate,
            }),
            None => Err(Error::LengthMismatch {
                name: "segment".to_string(),
                expected: start.saturating_add(len),
                found: self.samples.len(),
            }),
        }
    }

    /// New frame with `window` applied sample-wise.
    pub fn windowed(&self, window: Window) -> Frame {
        let w = window_coefficients(window, self.samples.len());
        Frame {
            samples: self.samples.iter().zip(&w).map(|(x, w)| x * w).collect(),
            sample_rate: self.sample_rate,
        }
    }
}

/// Window coefficients of length `len` (symmetric form).
pub fn window_coefficients(window: Window, len: usize) -> Vec<f64> {
    match window {
        Window::Rectangular => vec![1.0; len],
        Window::Hann => raised_cosine(len, 0.5, 0.5),
        Window::Hamming => raised_cosine(len, 0.54, 0.46),
    }
}

/// Hann window: w(n) = 0.5 - 0.5 cos(2 pi n / (N-1))
pub fn hann_window(len: usize) -> Vec<f64> {
    raised_cosine(len, 0.5, 0.5)
}

/// Hamming window: w(n) = 0.54 - 0.46 cos(2 pi n / (N-1))
pub fn hamming_window(len: usize) -> Vec<f64> {
    raised_cosine(len, 0.54, 0.46)
}

fn raised_cosine(len: usize, a0: f64, a1: f64) -> Vec<f64> {
    if len < 2 {
        return vec![1.0; len];
    }
    let denom = (len - 1) as f64;
    (0..len)
        .map(|n| a0 - a1 * (2.0 * PI * n as f64 / denom).cos())
        .collect()
}

/// First-order pre-emphasis: y[n] = x[n] - coeff * x[n-1]
pub fn pre_emphasis(samples: &[f64], coeff: f64) -> Vec<f64> {
    let mut prev = 0.0;
    samples
        .iter()
        .map(|&x| {
            let y = x - coeff * prev;
            prev = x;
            y
        })
        .collect()
}

/// Inverse of `pre_emphasis`: y[n] = x[n] + coeff * y[n-1]
pub fn de_emphasis(samples: &[f64], coeff: f64) -> Vec<f64> {
    let mut prev = 0.0;
    samples
        .iter()
        .map(|&x| {
            let y = x + coeff * prev;
            prev = y;
            y
        })
        .collect()
}

/// Subtract the mean.
pub fn remove_dc(samples: &[f64]) -> Vec<f64> {
    if samples.is_empty() {
        return Vec::new();
    }
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    samples.iter().map(|x| x - mean).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_rejects_bad_sample_rate() {
        assert!(Frame::new(vec![0.0; 4], 0.0).is_err());
        assert!(Frame::new(vec![0.0; 4], f64::NAN).is_err());
    }

    #[test]
    fn test_segment_bounds() {
        let frame = Frame::new((0..10).map(|i| i as f64).collect(), 8000.0).unwrap();
        let seg = frame.segment(2, 3).unwrap();
        assert_eq!(seg.samples(), &[2.0, 3.0, 4.0]);
        assert_eq!(seg.sample_rate(), 8000.0);
        assert!(frame.segment(8, 3).is_err());
        assert!(frame.segment(usize::MAX, 2).is_err());
    }

    #[test]
    fn test_hann_endpoints_and_peak() {
        let w = hann_window(65);
        assert_abs_diff_eq!(w[0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(w[64], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(w[32], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_hamming_endpoints() {
        let w = hamming_window(33);
        assert_abs_diff_eq!(w[0], 0.08, epsilon = 1e-12);
        assert_abs_diff_eq!(w[16], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_emphasis_round_trip() {
        let x: Vec<f64> = (0..64).map(|i| (i as f64 * 0.3).sin()).collect();
        let y = de_emphasis(&pre_emphasis(&x, 0.97), 0.97);
        for (a, b) in x.iter().zip(&y) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_remove_dc() {
        let y = remove_dc(&[1.0, 2.0, 3.0]);
        assert_abs_diff_eq!(y.iter().sum::<f64>(), 0.0, epsilon = 1e-12);
    }
}
