//! LPC filter pair: FIR prediction-error (inverse) filter and IIR all-pole
//! (forward/synthesis) filter.
//!
//! Streaming filters: `new(coefficients, gain)`, `process(sample) -> sample`, `reset()`.
//! Block helpers start from zero history.

use crate::error::Advisory;

/// Output magnitude beyond which the all-pole filter is reported as diverged.
pub const DIVERGENCE_BOUND: f64 = 1e12;

/// All-pole synthesis filter: y[n] = gain * x[n] + sum_k a_k y[n-k]
///
/// Strictly sequential; only as stable as its coefficients.
pub struct AllPoleFilter {
    coefficients: Vec<f64>,
    gain: f64,
    /// history[k] = y[n-1-k]
    history: Vec<f64>,
}

impl AllPoleFilter {
    pub fn new(coefficients: &[f64], gain: f64) -> Self {
        Self {
            coefficients: coefficients.to_vec(),
            gain,
            history: vec![0.0; coefficients.len()],
        }
    }

    pub fn process(&mut self, x: f64) -> f64 {
        let mut y = self.gain * x;
        for (a, past) in self.coefficients.iter().zip(&self.history) {
            y += a * past;
        }
        if !self.history.is_empty() {
            self.history.rotate_right(1);
            self.history[0] = y;
        }
        y
    }

    pub fn reset(&mut self) {
        self.history.fill(0.0);
    }
}

/// Prediction-error filter: e[n] = (x[n] - sum_k a_k x[n-k]) / gain
///
/// `gain` must be non-zero.
pub struct PredictionErrorFilter {
    coefficients: Vec<f64>,
    inv_gain: f64,
    /// history[k] = x[n-1-k]
    history: Vec<f64>,
}

impl PredictionErrorFilter {
    pub fn new(coefficients: &[f64], gain: f64) -> Self {
        Self {
            coefficients: coefficients.to_vec(),
            inv_gain: 1.0 / gain,
            history: vec![0.0; coefficients.len()],
        }
    }

    pub fn process(&mut self, x: f64) -> f64 {
        let mut pred = 0.0;
        for (a, past) in self.coefficients.iter().zip(&self.history) {
            pred += a * past;
        }
        if !self.history.is_empty() {
            self.history.rotate_right(1);
            self.history[0] = x;
        }
        (x - pred) * self.inv_gain
    }

    pub fn reset(&mut self) {
        self.history.fill(0.0);
    }
}

/// Signal -> residual, zero-padded before the frame start.
pub fn inverse_filter(signal: &[f64], coefficients: &[f64], gain: f64) -> Vec<f64> {
    let mut filter = PredictionErrorFilter::new(coefficients, gain);
    signal.iter().map(|&x| filter.process(x)).collect()
}

/// Excitation -> signal, zero history before n = 0.
pub fn forward_filter(excitation: &[f64], coefficients: &[f64], gain: f64) -> Vec<f64> {
    let mut filter = AllPoleFilter::new(coefficients, gain);
    excitation.iter().map(|&x| filter.process(x)).collect()
}

/// `forward_filter` plus a divergence check on the output.
///
/// Divergence is informational: classic least-squares estimates may be
/// mildly unstable and the output is returned as computed.
pub fn forward_filter_checked(
    excitation: &[f64],
    coefficients: &[f64],
    gain: f64,
) -> (Vec<f64>, Option<Advisory>) {
    let output = forward_filter(excitation, coefficients, gain);
    let advisory = output
        .iter()
        .position(|y| !y.is_finite() || y.abs() > DIVERGENCE_BOUND)
        .map(|index| Advisory::FilterInstability { index });
    if let Some(ref a) = advisory {
        tracing::warn!(order = coefficients.len(), "{a}");
    }
    (output, advisory)
}

/// Reverse-mode gradients of `forward_filter`.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardFilterGrad {
    pub excitation: Vec<f64>,
    pub coefficients: Vec<f64>,
    pub gain: f64,
}

/// Backpropagate dL/dy through y[n] = g x[n] + sum_k a_k y[n-k].
///
/// The adjoint runs backwards in time:
///   lambda[n] = dL/dy[n] + sum_k a_k lambda[n+k]
/// then dL/dx[n] = g lambda[n], dL/dg = sum lambda[n] x[n],
/// dL/da_k = sum_n lambda[n] y[n-k].
pub fn forward_filter_backward(
    grad_output: &[f64],
    output: &[f64],
    excitation: &[f64],
    coefficients: &[f64],
    gain: f64,
) -> ForwardFilterGrad {
    let len = output.len();
    let order = coefficients.len();
    debug_assert_eq!(grad_output.len(), len);
    debug_assert_eq!(excitation.len(), len);

    let mut lambda = vec![0.0; len];
    for n in (0..len).rev() {
        let mut acc = grad_output[n];
        for k in 1..=order.min(len - 1 - n) {
            acc += coefficients[k - 1] * lambda[n + k];
        }
        lambda[n] = acc;
    }

    let grad_gain = lambda.iter().zip(excitation).map(|(l, x)| l * x).sum();
    let mut grad_coeffs = vec![0.0; order];
    for k in 1..=order {
        let mut acc = 0.0;
        for n in k..len {
            acc += lambda[n] * output[n - k];
        }
        grad_coeffs[k - 1] = acc;
    }

    ForwardFilterGrad {
        excitation: lambda.iter().map(|l| gain * l).collect(),
        coefficients: grad_coeffs,
        gain: grad_gain,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflection;
    use approx::assert_abs_diff_eq;

    fn test_excitation(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| ((i * 37 + 11) % 23) as f64 / 23.0 - 0.5)
            .collect()
    }

    #[test]
    fn test_round_trip_stable() {
        let coeffs = reflection::step_up(&[0.8, -0.6, 0.4, -0.2, 0.1]);
        let gain = 0.35;
        let e = test_excitation(2048);
        let y = forward_filter(&e, &coeffs, gain);
        let back = inverse_filter(&y, &coeffs, gain);
        for (a, b) in e.iter().zip(&back) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_one_pole_impulse_response() {
        let mut impulse = vec![0.0; 8];
        impulse[0] = 1.0;
        let y = forward_filter(&impulse, &[0.5], 2.0);
        for (n, v) in y.iter().enumerate() {
            assert_abs_diff_eq!(*v, 2.0 * 0.5f64.powi(n as i32), epsilon = 1e-15);
        }
    }

    #[test]
    fn test_identity_filter_is_gain() {
        let e = test_excitation(16);
        let y = forward_filter(&e, &[], 3.0);
        for (a, b) in e.iter().zip(&y) {
            assert_abs_diff_eq!(3.0 * a, *b, epsilon = 1e-15);
        }
    }

    #[test]
    fn test_streaming_matches_block() {
        let coeffs = [1.2, -0.5];
        let e = test_excitation(64);
        let block = forward_filter(&e, &coeffs, 1.0);

        let mut f = AllPoleFilter::new(&coeffs, 1.0);
        let first: Vec<f64> = e.iter().map(|&x| f.process(x)).collect();
        assert_eq!(first, block);

        f.reset();
        let second: Vec<f64> = e.iter().map(|&x| f.process(x)).collect();
        assert_eq!(second, block);
    }

    #[test]
    fn test_unstable_filter_flagged() {
        let mut impulse = vec![0.0; 400];
        impulse[0] = 1.0;
        let (y, advisory) = forward_filter_checked(&impulse, &[1.5], 1.0);
        assert_eq!(y.len(), 400);
        assert!(matches!(advisory, Some(Advisory::FilterInstability { .. })));

        let (_, advisory) = forward_filter_checked(&impulse, &[0.5], 1.0);
        assert!(advisory.is_none());
    }

    #[test]
    fn test_backward_matches_finite_difference() {
        let coeffs = vec![0.9, -0.4, 0.15];
        let gain = 0.7;
        let e = test_excitation(48);
        let weights: Vec<f64> = (0..48).map(|i| (i as f64 * 0.37).sin()).collect();
        let objective = |e: &[f64], a: &[f64], g: f64| -> f64 {
            forward_filter(e, a, g).iter().zip(&weights).map(|(y, w)| y * w).sum()
        };

        let y = forward_filter(&e, &coeffs, gain);
        let grad = forward_filter_backward(&weights, &y, &e, &coeffs, gain);
        let h = 1e-6;

        for k in 0..coeffs.len() {
            let mut ap = coeffs.clone();
            ap[k] += h;
            let mut am = coeffs.clone();
            am[k] -= h;
            let fd = (objective(&e, &ap, gain) - objective(&e, &am, gain)) / (2.0 * h);
            assert_abs_diff_eq!(grad.coefficients[k], fd, epsilon = 1e-5 * fd.abs().max(1.0));
        }

        let fd = (objective(&e, &coeffs, gain + h) - objective(&e, &coeffs, gain - h)) / (2.0 * h);
        assert_abs_diff_eq!(grad.gain, fd, epsilon = 1e-6 * fd.abs().max(1.0));

        for n in [0, 7, 30, 47] {
            let mut ep = e.clone();
            ep[n] += h;
            let mut em = e.clone();
            em[n] -= h;
            let fd = (objective(&ep, &coeffs, gain) - objective(&em, &coeffs, gain)) / (2.0 * h);
            assert_abs_diff_eq!(grad.excitation[n], fd, epsilon = 1e-6 * fd.abs().max(1.0));
        }
    }
}
