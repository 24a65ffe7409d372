//! Autocorrelation-method linear prediction.
//!
//! Biased autocorrelation -> Levinson-Durbin recursion -> `LpcParams`.
//! Coefficients follow the prediction convention used across the crate:
//! x[n] ~ sum_{k=1..M} a_k x[n-k], A(z) = 1 - sum a_k z^-k.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::reflection;

/// All-pole filter: gain plus direct-form predictor coefficients.
///
/// Parameters built through the reflection codec are always stable.
/// Least-squares estimates usually are, but nothing guarantees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LpcParams {
    pub gain: f64,
    pub coefficients: Vec<f64>,
}

/// Output of the Levinson-Durbin recursion.
#[derive(Debug, Clone, PartialEq)]
pub struct Levinson {
    pub coefficients: Vec<f64>,
    /// Reflection coefficients k_1..k_M produced along the way.
    pub reflection: Vec<f64>,
    /// Prediction-error energy after order M.
    pub error_energy: f64,
}

/// Local maximum of an LPC spectral envelope.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralPeak {
    pub frequency_hz: f64,
    pub magnitude: f64,
}

/// Biased autocorrelation R[0..=max_lag]: R[k] = sum_n x[n] x[n-k].
pub fn autocorrelation(samples: &[f64], max_lag: usize) -> Vec<f64> {
    let n = samples.len();
    (0..=max_lag)
        .map(|k| {
            if k >= n {
                return 0.0;
            }
            samples[k..]
                .iter()
                .zip(samples)
                .map(|(a, b)| a * b)
                .sum()
        })
        .collect()
}

/// Solve the Toeplitz normal equations R a = r in O(M^2).
///
/// `r` must hold at least `order + 1` lags.
pub fn levinson_durbin(r: &[f64], order: usize) -> Result<Levinson> {
    if r.len() <= order {
        return Err(Error::LengthMismatch {
            name: "autocorrelation".to_string(),
            expected: order + 1,
            found: r.len(),
        });
    }
    let r0 = r[0];
    if !(r0.is_finite() && r0 > 0.0) {
        return Err(Error::DegenerateInput(format!(
            "zero-lag autocorrelation is {r0}, frame is silent or non-finite"
        )));
    }

    let mut a: Vec<f64> = Vec::with_capacity(order);
    let mut ks = Vec::with_capacity(order);
    let mut err = r0;

    for i in 1..=order {
        let mut acc = r[i];
        for j in 1..i {
            acc -= a[j - 1] * r[i - j];
        }
        let k = acc / err;

        let mut next = Vec::with_capacity(i);
        for j in 1..i {
            next.push(a[j - 1] - k * a[i - j - 1]);
        }
        next.push(k);
        a = next;
        ks.push(k);

        err *= 1.0 - k * k;
        if !(err.is_finite() && err > 0.0) {
            return Err(Error::DegenerateInput(format!(
                "prediction error vanished at order {i} (autocorrelation is singular)"
            )));
        }
    }

    Ok(Levinson {
        coefficients: a,
        reflection: ks,
        error_energy: err,
    })
}

/// Estimate an order-`order` all-pole model of `samples`.
///
/// gain = sqrt(R[0] - sum_k a_k R[k]).
pub fn estimate(samples: &[f64], order: usize) -> Result<LpcParams> {
    if order == 0 || order >= samples.len() {
        return Err(Error::InvalidOrder {
            order,
            frame_len: samples.len(),
        });
    }
    if samples.iter().all(|&x| x == 0.0) {
        return Err(Error::DegenerateInput("frame is all zero".to_string()));
    }

    let r = autocorrelation(samples, order);
    let lev = levinson_durbin(&r, order)?;

    let predicted: f64 = lev
        .coefficients
        .iter()
        .zip(&r[1..])
        .map(|(a, rk)| a * rk)
        .sum();
    let gain = (r[0] - predicted).max(0.0).sqrt();

    tracing::debug!(order, gain, error_energy = lev.error_energy, "lpc estimate");

    Ok(LpcParams {
        gain,
        coefficients: lev.coefficients,
    })
}

impl LpcParams {
    pub fn new(gain: f64, coefficients: Vec<f64>) -> Self {
        Self { gain, coefficients }
    }

    /// Order-0 pass-through filter with the given gain.
    pub fn identity(gain: f64) -> Self {
        Self {
            gain,
            coefficients: Vec::new(),
        }
    }

    /// Estimate from a frame (see [`estimate`]).
    pub fn estimate(frame: &Frame, order: usize) -> Result<Self> {
        estimate(frame.samples(), order)
    }

    /// Build stable parameters from reflection coefficients.
    pub fn from_reflection(gain: f64, reflection: &[f64]) -> Self {
        Self {
            gain,
            coefficients: reflection::step_up(reflection),
        }
    }

    pub fn order(&self) -> usize {
        self.coefficients.len()
    }

    /// Equivalent reflection coefficients (fails if unstable).
    pub fn reflection(&self) -> Result<Vec<f64>> {
        reflection::step_down(&self.coefficients)
    }

    pub fn is_stable(&self) -> bool {
        reflection::is_stable(&self.coefficients)
    }

    /// |H(f)| = gain / |A(e^{jw})|.
    pub fn frequency_response(&self, freq_hz: f64, sample_rate: f64) -> f64 {
        let w = 2.0 * PI * freq_hz / sample_rate;
        let mut re = 1.0;
        let mut im = 0.0;
        for (k, &a) in self.coefficients.iter().enumerate() {
            let phase = w * (k + 1) as f64;
            re -= a * phase.cos();
            im += a * phase.sin();
        }
        self.gain / (re * re + im * im).sqrt()
    }

    /// Magnitude envelope sampled at `bins` evenly spaced frequencies over
    /// [0, fs/2]. Returns (frequency_hz, magnitude) pairs.
    pub fn envelope(&self, bins: usize, sample_rate: f64) -> Vec<(f64, f64)> {
        if bins == 0 {
            return Vec::new();
        }
        let step = if bins > 1 {
            0.5 * sample_rate / (bins - 1) as f64
        } else {
            0.0
        };
        (0..bins)
            .map(|i| {
                let f = i as f64 * step;
                (f, self.frequency_response(f, sample_rate))
            })
            .collect()
    }

    /// Interior local maxima of the envelope (formant candidates), low to high.
    pub fn spectral_peaks(&self, bins: usize, sample_rate: f64) -> Vec<SpectralPeak> {
        let env = self.envelope(bins, sample_rate);
        env.windows(3)
            .filter(|w| w[1].1 > w[0].1 && w[1].1 >= w[2].1)
            .map(|w| SpectralPeak {
                frequency_hz: w[1].0,
                magnitude: w[1].1,
            })
            .collect()
    }

    /// Frequency of the envelope maximum.
    pub fn peak_frequency(&self, bins: usize, sample_rate: f64) -> Option<f64> {
        self.envelope(bins, sample_rate)
            .into_iter()
            .filter(|(_, m)| m.is_finite())
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(f, _)| f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::inverse_filter;
    use approx::assert_abs_diff_eq;

    fn sine(freq: f64, sr: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f64 / sr + 0.3).sin())
            .collect()
    }

    #[test]
    fn test_autocorrelation_small() {
        let r = autocorrelation(&[1.0, 2.0, 3.0], 3);
        assert_eq!(r, vec![14.0, 8.0, 3.0, 0.0]);
    }

    #[test]
    fn test_rejects_bad_order() {
        let x = sine(440.0, 8000.0, 16);
        assert!(matches!(estimate(&x, 0), Err(Error::InvalidOrder { .. })));
        assert!(matches!(estimate(&x, 16), Err(Error::InvalidOrder { .. })));
        assert!(matches!(estimate(&x[..3], 3), Err(Error::InvalidOrder { .. })));
    }

    #[test]
    fn test_rejects_silence() {
        let x = vec![0.0; 256];
        assert!(matches!(estimate(&x, 8), Err(Error::DegenerateInput(_))));
    }

    #[test]
    fn test_sinusoid_pole_angle() {
        let sr = 16000.0;
        let freq = 1000.0;
        let x = sine(freq, sr, 1024);
        let lpc = estimate(&x, 2).unwrap();

        // Roots of z^2 - a1 z - a2: complex pair at angle acos(a1 / (2 sqrt(-a2))).
        let (a1, a2) = (lpc.coefficients[0], lpc.coefficients[1]);
        assert!(a2 < 0.0);
        let angle = (a1 / (2.0 * (-a2).sqrt())).acos();
        let pole_hz = angle * sr / (2.0 * PI);
        assert!((pole_hz - freq).abs() < 5.0, "pole at {pole_hz} Hz");

        // Residual energy is a tiny fraction of the signal energy.
        let energy: f64 = x.iter().map(|v| v * v).sum();
        assert!(lpc.gain * lpc.gain < 1e-3 * energy);
        let residual = inverse_filter(&x, &lpc.coefficients, 1.0);
        let res_energy: f64 = residual[2..].iter().map(|v| v * v).sum();
        assert!(res_energy < 1e-3 * energy, "residual energy {res_energy}");
    }

    #[test]
    fn test_gain_matches_error_energy() {
        let x: Vec<f64> = (0..512)
            .map(|i| (i as f64 * 0.21).sin() + 0.4 * (i as f64 * 1.37).cos() + 0.1 * (i as f64 * 2.9).sin())
            .collect();
        let order = 6;
        let r = autocorrelation(&x, order);
        let lev = levinson_durbin(&r, order).unwrap();
        let lpc = estimate(&x, order).unwrap();
        assert_abs_diff_eq!(lpc.gain * lpc.gain, lev.error_energy, epsilon = 1e-6 * r[0]);
        assert_eq!(lev.reflection.len(), order);
    }

    #[test]
    fn test_levinson_reflection_matches_step_down() {
        let x: Vec<f64> = (0..400).map(|i| ((i * 7919) % 97) as f64 / 97.0 - 0.5).collect();
        let r = autocorrelation(&x, 10);
        let lev = levinson_durbin(&r, 10).unwrap();
        let k = reflection::step_down(&lev.coefficients).unwrap();
        for (a, b) in k.iter().zip(&lev.reflection) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_identity_response_is_flat() {
        let lpc = LpcParams::identity(0.5);
        for (_, m) in lpc.envelope(32, 16000.0) {
            assert_abs_diff_eq!(m, 0.5, epsilon = 1e-12);
        }
        assert!(lpc.spectral_peaks(32, 16000.0).is_empty());
    }

    #[test]
    fn test_resonator_peak() {
        // Two-pole resonator at 2 kHz, radius 0.95.
        let sr = 16000.0;
        let theta = 2.0 * PI * 2000.0 / sr;
        let lpc = LpcParams::new(1.0, vec![2.0 * 0.95 * theta.cos(), -0.95 * 0.95]);
        let peak = lpc.peak_frequency(2049, sr).unwrap();
        assert!((peak - 2000.0).abs() < 20.0, "peak at {peak}");
        assert_eq!(lpc.spectral_peaks(2049, sr).len(), 1);
        assert!(lpc.is_stable());
    }
}
