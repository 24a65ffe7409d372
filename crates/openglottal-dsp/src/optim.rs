//! Gradient-step optimizers over a flat parameter vector.

use serde::{Deserialize, Serialize};

/// One in-place update given same-shaped gradients.
pub trait Optimizer {
    fn step(&mut self, params: &mut [f64], grads: &[f64]);

    /// Forget accumulated state (moments, step count).
    fn reset(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdamConfig {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }
}

/// Adam (Kingma & Ba) with bias-corrected moment estimates.
#[derive(Debug, Clone)]
pub struct Adam {
    config: AdamConfig,
    m: Vec<f64>,
    v: Vec<f64>,
    t: i32,
}

impl Adam {
    pub fn new(config: AdamConfig) -> Self {
        Self {
            config,
            m: Vec::new(),
            v: Vec::new(),
            t: 0,
        }
    }

    pub fn config(&self) -> &AdamConfig {
        &self.config
    }

    /// Steps taken since construction or the last reset.
    pub fn steps(&self) -> usize {
        self.t as usize
    }
}

impl Default for Adam {
    fn default() -> Self {
        Self::new(AdamConfig::default())
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut [f64], grads: &[f64]) {
        debug_assert_eq!(params.len(), grads.len());
        if self.m.len() != params.len() {
            self.m = vec![0.0; params.len()];
            self.v = vec![0.0; params.len()];
            self.t = 0;
        }
        self.t = self.t.saturating_add(1);

        let AdamConfig {
            learning_rate,
            beta1,
            beta2,
            epsilon,
        } = self.config;
        let bc1 = 1.0 - beta1.powi(self.t);
        let bc2 = 1.0 - beta2.powi(self.t);

        for i in 0..params.len() {
            let g = grads[i];
            self.m[i] = beta1 * self.m[i] + (1.0 - beta1) * g;
            self.v[i] = beta2 * self.v[i] + (1.0 - beta2) * g * g;
            let m_hat = self.m[i] / bc1;
            let v_hat = self.v[i] / bc2;
            params[i] -= learning_rate * m_hat / (v_hat.sqrt() + epsilon);
        }
    }

    fn reset(&mut self) {
        self.m.clear();
        self.v.clear();
        self.t = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_first_step_is_learning_rate_times_sign() {
        let mut adam = Adam::new(AdamConfig {
            learning_rate: 0.01,
            ..Default::default()
        });
        let mut p = [1.0, -2.0, 0.5];
        adam.step(&mut p, &[3.0, -0.2, 0.0]);
        assert_abs_diff_eq!(p[0], 1.0 - 0.01, epsilon = 1e-9);
        assert_abs_diff_eq!(p[1], -2.0 + 0.01, epsilon = 1e-9);
        assert_eq!(p[2], 0.5);
        assert_eq!(adam.steps(), 1);
    }

    #[test]
    fn test_quadratic_converges() {
        let target = [3.0, -1.5, 0.25];
        let mut p = [0.0; 3];
        let mut adam = Adam::new(AdamConfig {
            learning_rate: 0.05,
            ..Default::default()
        });
        for _ in 0..2000 {
            let g: Vec<f64> = p.iter().zip(&target).map(|(x, t)| 2.0 * (x - t)).collect();
            adam.step(&mut p, &g);
        }
        for (x, t) in p.iter().zip(&target) {
            assert_abs_diff_eq!(x, t, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_reset_and_resize() {
        let mut adam = Adam::default();
        let mut p = [0.0; 2];
        adam.step(&mut p, &[1.0, 1.0]);
        adam.step(&mut p, &[1.0, 1.0]);
        assert_eq!(adam.steps(), 2);
        adam.reset();
        assert_eq!(adam.steps(), 0);

        let mut q = [0.0; 4];
        adam.step(&mut q, &[1.0; 4]);
        assert_eq!(adam.steps(), 1);
        assert!(q.iter().all(|&x| x < 0.0));
    }

    #[test]
    fn test_config_defaults_from_partial_json() {
        let c: AdamConfig = serde_json::from_str(r#"{"learning_rate": 0.01}"#).unwrap();
        assert_eq!(c.learning_rate, 0.01);
        assert_eq!(c.beta2, 0.999);
    }
}
