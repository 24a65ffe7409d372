//! Reflection-coefficient codec.
//!
//! log-area ratios (unconstrained) <-> reflection coefficients (|k| < 1)
//! <-> direct-form predictor coefficients.
//!
//! Direct form uses the prediction convention `A(z) = 1 - sum a_k z^-k`.
//! Step-up recursion, orders 1..M:
//!
//!   a_j^(i) = a_j^(i-1) - k_i * a_{i-j}^(i-1)   (j < i)
//!   a_i^(i) = k_i
//!
//! Everything here is elementary arithmetic, and the `*_backward` functions
//! carry the matching reverse-mode rules used by the model fit.

use crate::error::{Error, Result};

/// Largest reflection magnitude `to_reflection` will emit. `tanh` saturates
/// to exactly 1.0 in f64 for large arguments.
pub const REFLECTION_BOUND: f64 = 1.0 - 1e-12;

/// Log-area ratios -> reflection coefficients: k = tanh(g / 2).
///
/// Output is strictly inside (-1, 1) for every finite input.
pub fn to_reflection(log_area_ratios: &[f64]) -> Vec<f64> {
    log_area_ratios
        .iter()
        .map(|&g| (0.5 * g).tanh().clamp(-REFLECTION_BOUND, REFLECTION_BOUND))
        .collect()
}

/// Reflection coefficients -> log-area ratios: g = ln((1 + k) / (1 - k)).
pub fn from_reflection(reflection: &[f64]) -> Result<Vec<f64>> {
    reflection
        .iter()
        .enumerate()
        .map(|(i, &k)| {
            if k.is_finite() && k.abs() < 1.0 {
                Ok(((1.0 + k) / (1.0 - k)).ln())
            } else {
                Err(Error::invalid_parameter(
                    "reflection",
                    format!("coefficient {i} = {k} is not inside (-1, 1)"),
                ))
            }
        })
        .collect()
}

/// dL/dg from dL/dk, where k = tanh(g / 2).
pub fn to_reflection_backward(reflection: &[f64], grad_reflection: &[f64]) -> Vec<f64> {
    reflection
        .iter()
        .zip(grad_reflection)
        .map(|(&k, &gk)| gk * 0.5 * (1.0 - k * k))
        .collect()
}

/// Intermediate predictors of the step-up recursion, orders 0..=M.
#[derive(Debug, Clone, PartialEq)]
pub struct StepUpTrace {
    orders: Vec<Vec<f64>>,
}

impl StepUpTrace {
    /// Final (order M) direct-form coefficients.
    pub fn coefficients(&self) -> &[f64] {
        self.orders.last().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn order(&self) -> usize {
        self.orders.len() - 1
    }

    /// Predictor of order `i` (`i <= M`).
    pub fn predictor(&self, i: usize) -> &[f64] {
        &self.orders[i]
    }
}

/// Reflection coefficients -> direct-form coefficients.
///
/// An empty input is the order-0 identity filter (no poles).
pub fn step_up(reflection: &[f64]) -> Vec<f64> {
    step_up_trace(reflection).coefficients().to_vec()
}

/// Step-up recursion keeping every intermediate order (needed by
/// `step_up_backward`).
pub fn step_up_trace(reflection: &[f64]) -> StepUpTrace {
    let mut orders: Vec<Vec<f64>> = Vec::with_capacity(reflection.len() + 1);
    orders.push(Vec::new());
    for (idx, &k) in reflection.iter().enumerate() {
        let i = idx + 1;
        let prev = &orders[idx];
        let mut next = Vec::with_capacity(i);
        for j in 1..i {
            next.push(prev[j - 1] - k * prev[i - j - 1]);
        }
        next.push(k);
        orders.push(next);
    }
    StepUpTrace { orders }
}

/// Reverse-mode rule for `step_up`: dL/dk from dL/da.
///
/// Walks the recursion from order M down to 1. At order i:
///   dL/dk_i      = g_i - sum_{j<i} g_j * a_{i-j}^(i-1)
///   g^(i-1)_m    = g_m - k_i * g_{i-m}
pub fn step_up_backward(reflection: &[f64], trace: &StepUpTrace, grad_coeffs: &[f64]) -> Vec<f64> {
    let m = reflection.len();
    debug_assert_eq!(grad_coeffs.len(), m);
    debug_assert_eq!(trace.order(), m);

    let mut grad_k = vec![0.0; m];
    let mut g = grad_coeffs.to_vec();
    for i in (1..=m).rev() {
        let prev = trace.predictor(i - 1);
        let k = reflection[i - 1];

        let mut dk = g[i - 1];
        for j in 1..i {
            dk -= g[j - 1] * prev[i - j - 1];
        }
        grad_k[i - 1] = dk;

        let mut next = Vec::with_capacity(i - 1);
        for mm in 1..i {
            next.push(g[mm - 1] - k * g[i - mm - 1]);
        }
        g = next;
    }
    grad_k
}

/// Direct-form coefficients -> reflection coefficients (step-down).
///
/// Fails when some intermediate |k| >= 1, i.e. the filter is not strictly
/// minimum phase.
pub fn step_down(coeffs: &[f64]) -> Result<Vec<f64>> {
    let m = coeffs.len();
    let mut reflection = vec![0.0; m];
    let mut a = coeffs.to_vec();
    for i in (1..=m).rev() {
        let k = a[i - 1];
        if !k.is_finite() || k.abs() >= 1.0 {
            return Err(Error::invalid_parameter(
                "coefficients",
                format!("reflection coefficient {i} = {k} is not inside (-1, 1)"),
            ));
        }
        reflection[i - 1] = k;
        let denom = 1.0 - k * k;
        let mut prev = Vec::with_capacity(i - 1);
        for j in 1..i {
            prev.push((a[j - 1] + k * a[i - j - 1]) / denom);
        }
        a = prev;
    }
    Ok(reflection)
}

/// True when every reflection coefficient of `coeffs` lies strictly inside
/// the unit interval.
pub fn is_stable(coeffs: &[f64]) -> bool {
    step_down(coeffs).is_ok()
}
