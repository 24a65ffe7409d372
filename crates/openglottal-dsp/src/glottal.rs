//! LF glottal flow-derivative pulse driven by the single shape parameter Rd.
//!
//! Rd -> (Ra, Rk, Rg) by the regression of Fant (1995), then timing over a
//! unit period:
//!   Ta = Ra            return-phase time constant
//!   Tp = 1 / (2 Rg)    flow peak
//!   Te = Tp (1 + Rk)   main excitation (derivative minimum)
//!
//! Waveform, with Ee = 1:
//!   t <  Te:  E0 exp(alpha t) sin(pi t / Tp)
//!   t >= Te:  -(1 / (eps Ta)) (exp(-eps (t - Te)) - exp(-eps (1 - Te)))
//!
//! eps solves eps Ta = 1 - exp(-eps (1 - Te)) so the return branch meets the
//! slope at Te and closes at t = 1. alpha is chosen so the derivative
//! integrates to zero over the period (flow returns to baseline), and E0
//! makes the open branch reach -Ee at Te.

use std::f64::consts::PI;

use crate::error::Advisory;

/// Calibrated Rd range of the regression.
pub const RD_MIN: f64 = 0.3;
pub const RD_MAX: f64 = 2.7;

const TP_RANGE: (f64, f64) = (0.05, 0.9);
const TE_MAX: f64 = 0.98;
const TA_MIN: f64 = 1e-3;
const ALPHA_LIMIT: f64 = 4096.0;
const BISECT_ITERS: usize = 200;
const NEWTON_ITERS: usize = 50;

/// One LF pulse with its solved shape constants.
#[derive(Debug, Clone, PartialEq)]
pub struct LfPulse {
    rd: f64,
    ta: f64,
    tp: f64,
    te: f64,
    epsilon: f64,
    alpha: f64,
    e0: f64,
    advisory: Option<Advisory>,
}

impl LfPulse {
    /// Solve the LF constants for `rd`.
    ///
    /// Outside [RD_MIN, RD_MAX] the regression is extrapolated with clamped
    /// timings; the result is best effort and carries an advisory.
    pub fn new(rd: f64) -> Self {
        let in_range = (RD_MIN..=RD_MAX).contains(&rd);
        let advisory = (!in_range).then_some(Advisory::OutOfRangeParameter {
            name: "rd",
            value: rd,
            min: RD_MIN,
            max: RD_MAX,
        });
        if let Some(ref a) = advisory {
            tracing::warn!("{a}");
        }

        let rd_eff = if rd.is_finite() && rd > 0.0 {
            rd
        } else {
            rd.clamp(RD_MIN, RD_MAX).max(RD_MIN)
        };
        let (ta, tp, te) = timing(rd_eff);
        let wg = PI / tp;
        let epsilon = solve_epsilon(ta, 1.0 - te);
        let alpha = solve_alpha(wg, te, ta, epsilon);
        let e0 = -1.0 / ((alpha * te).exp() * (wg * te).sin());

        Self {
            rd,
            ta,
            tp,
            te,
            epsilon,
            alpha,
            e0,
            advisory,
        }
    }

    pub fn rd(&self) -> f64 {
        self.rd
    }

    /// (Ta, Tp, Te) as fractions of the period.
    pub fn timing(&self) -> (f64, f64, f64) {
        (self.ta, self.tp, self.te)
    }

    pub fn advisory(&self) -> Option<&Advisory> {
        self.advisory.as_ref()
    }

    /// Flow derivative at phase `t` in [0, 1).
    pub fn sample(&self, t: f64) -> f64 {
        if t < self.te {
            self.e0 * (self.alpha * t).exp() * (PI * t / self.tp).sin()
        } else {
            let tail = (-self.epsilon * (1.0 - self.te)).exp();
            -((-self.epsilon * (t - self.te)).exp() - tail) / (self.epsilon * self.ta)
        }
    }

    /// `size` uniform samples of one period.
    pub fn table(&self, size: usize) -> Vec<f64> {
        (0..size)
            .map(|i| self.sample(i as f64 / size as f64))
            .collect()
    }
}

/// One period of the LF pulse for `rd`, `size` samples.
pub fn lf_table(rd: f64, size: usize) -> Vec<f64> {
    LfPulse::new(rd).table(size)
}

/// Rd -> (Ta, Tp, Te), clamped into a region where the waveform is defined.
fn timing(rd: f64) -> (f64, f64, f64) {
    let ra = (-1.0 + 4.8 * rd) / 100.0;
    let rk = (22.4 + 11.8 * rd) / 100.0;
    let rg = 0.25 * rk / (0.11 * rd / (0.5 + 1.2 * rk) - ra);

    let mut tp = 1.0 / (2.0 * rg);
    if !(tp.is_finite() && tp > 0.0) {
        tp = TP_RANGE.1;
    }
    let tp = tp.clamp(TP_RANGE.0, TP_RANGE.1);

    // Te must sit between Tp and 2 Tp so sin(pi Te / Tp) < 0.
    let te = (tp * (1.0 + rk)).clamp(tp * 1.01, (tp * 1.99).min(TE_MAX));
    let ta = ra.clamp(TA_MIN, 0.9 * (1.0 - te));
    (ta, tp, te)
}

/// Positive root of eps Ta = 1 - exp(-eps D) by Newton from 1 / Ta.
///
/// The residual is convex and positive at the start point, so iterates
/// decrease monotonically onto the root.
fn solve_epsilon(ta: f64, d: f64) -> f64 {
    let mut eps = 1.0 / ta;
    for _ in 0..NEWTON_ITERS {
        let decay = (-eps * d).exp();
        let f = eps * ta - 1.0 + decay;
        let df = ta - d * decay;
        if df <= 0.0 {
            break;
        }
        let step = f / df;
        eps -= step;
        if step.abs() <= 1e-12 * eps.abs() {
            break;
        }
    }
    eps
}

/// Net area of the pulse over one period as a function of alpha.
fn net_area(alpha: f64, wg: f64, te: f64, ta: f64, eps: f64) -> f64 {
    let (s, c) = (wg * te).sin_cos();
    let open = -(alpha * s - wg * c + wg * (-alpha * te).exp()) / (s * (alpha * alpha + wg * wg));
    let d = 1.0 - te;
    let decay = (-eps * d).exp();
    let ret = -((1.0 - decay) / eps - d * decay) / (eps * ta);
    open + ret
}

/// Alpha giving zero net area, by bracketed bisection.
///
/// Area decreases with alpha: large alpha pushes the open-phase mass towards
/// the negative lobe before Te.
fn solve_alpha(wg: f64, te: f64, ta: f64, eps: f64) -> f64 {
    let f = |a: f64| net_area(a, wg, te, ta, eps);

    let mut lo = -1.0;
    while f(lo) <= 0.0 && lo > -ALPHA_LIMIT {
        lo *= 2.0;
    }
    let mut hi = 1.0;
    while f(hi) >= 0.0 && hi < ALPHA_LIMIT {
        hi *= 2.0;
    }
    if !(f(lo) > 0.0 && f(hi) < 0.0) {
        tracing::warn!(te, ta, "LF area balance has no bracket, using alpha = 0");
        return 0.0;
    }

    for _ in 0..BISECT_ITERS {
        let mid = 0.5 * (lo + hi);
        if f(mid) > 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo <= 1e-12 * mid.abs().max(1.0) {
            break;
        }
    }
    0.5 * (lo + hi)
}
