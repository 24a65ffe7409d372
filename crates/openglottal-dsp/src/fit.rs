//! Fixed-iteration gradient fit of a `SourceFilterModel` to a target frame.
//!
//! Each iteration: predict -> L1 loss -> gradient -> one optimizer step ->
//! record the loss. There is no convergence test; callers read the loss
//! trajectory. Start values matter: a poor f0 start can settle on the wrong
//! octave, and nothing here corrects for it.

use std::ops::ControlFlow;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::SourceFilterModel;
use crate::optim::{Adam, AdamConfig, Optimizer};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    pub iterations: usize,
    /// Emit a debug event every this many iterations (0 disables).
    pub log_every: usize,
    pub optimizer: AdamConfig,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            iterations: 2000,
            log_every: 100,
            optimizer: AdamConfig::default(),
        }
    }
}

/// Passed to the `fit_with` observer after each update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitProgress {
    pub iteration: usize,
    /// Loss before this iteration's update.
    pub loss: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    /// One loss per completed iteration, measured before its update.
    pub losses: Vec<f64>,
    pub stopped_early: bool,
}

impl FitReport {
    pub fn iterations(&self) -> usize {
        self.losses.len()
    }

    pub fn initial_loss(&self) -> Option<f64> {
        self.losses.first().copied()
    }

    pub fn final_loss(&self) -> Option<f64> {
        self.losses.last().copied()
    }

    /// Mean loss of consecutive `window`-sized chunks (last chunk may be short).
    pub fn window_means(&self, window: usize) -> Vec<f64> {
        if window == 0 {
            return Vec::new();
        }
        self.losses
            .chunks(window)
            .map(|c| c.iter().sum::<f64>() / c.len() as f64)
            .collect()
    }
}

pub struct Fitter<O = Adam> {
    config: FitConfig,
    optimizer: O,
}

impl Fitter<Adam> {
    /// Adam configured from `config.optimizer`.
    pub fn new(config: FitConfig) -> Self {
        let optimizer = Adam::new(config.optimizer);
        Self { config, optimizer }
    }
}

impl<O: Optimizer> Fitter<O> {
    pub fn with_optimizer(config: FitConfig, optimizer: O) -> Self {
        Self { config, optimizer }
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }

    pub fn fit(&mut self, model: &mut SourceFilterModel, target: &[f64]) -> Result<FitReport> {
        self.fit_with(model, target, |_, _| ControlFlow::Continue(()))
    }

    /// `fit` with an observer called once per iteration boundary; returning
    /// `ControlFlow::Break` stops the loop before the next iteration.
    /// Optimizer state starts fresh on every call.
    pub fn fit_with<F>(&mut self, model: &mut SourceFilterModel, target: &[f64], mut observer: F) -> Result<FitReport>
    where
        F: FnMut(&FitProgress, &SourceFilterModel) -> ControlFlow<()>,
    {
        if target.is_empty() {
            return Err(Error::DegenerateInput("fit target is empty".to_string()));
        }

        let iterations = self.config.iterations;
        tracing::info!(
            iterations,
            learning_rate = self.config.optimizer.learning_rate,
            samples = target.len(),
            f0 = model.f0(),
            "starting source-filter fit"
        );

        let mut report = FitReport {
            losses: Vec::with_capacity(iterations),
            stopped_early: false,
        };
        self.optimizer.reset();
        let mut theta = model.trainable();
        let mut warned_non_finite = false;

        for iteration in 0..iterations {
            let (loss, grads) = model.loss_and_gradient(target);
            report.losses.push(loss);

            let mut g = grads.to_vec();
            if g.iter().any(|d| !d.is_finite()) {
                if !warned_non_finite {
                    tracing::warn!(iteration, "non-finite gradient, zeroing affected entries");
                    warned_non_finite = true;
                }
                for d in g.iter_mut().filter(|d| !d.is_finite()) {
                    *d = 0.0;
                }
            }

            self.optimizer.step(&mut theta, &g);
            model.set_trainable(&theta)?;

            if self.config.log_every > 0 && iteration % self.config.log_every == 0 {
                tracing::debug!(iteration, loss, f0 = model.f0(), rd = model.rd(), gain = model.gain(), "fit");
            }

            let progress = FitProgress { iteration, loss };
            if observer(&progress, model).is_break() {
                report.stopped_early = iteration + 1 < iterations;
                break;
            }
        }

        if let (Some(first), Some(last)) = (report.initial_loss(), report.final_loss()) {
            tracing::info!(
                iterations = report.iterations(),
                initial_loss = first,
                final_loss = last,
                f0 = model.f0(),
                rd = model.rd(),
                stopped_early = report.stopped_early,
                "fit finished"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InitialParams, ModelConfig};

    fn small_config() -> ModelConfig {
        ModelConfig {
            sample_rate: 16000.0,
            table_size: 128,
            table_count: 10,
            lpc_order: 2,
        }
    }

    fn model(f0: f64, log_gain: f64, lar: Vec<f64>) -> SourceFilterModel {
        let config = small_config();
        let bank = config.build_bank().unwrap();
        SourceFilterModel::new(
            config,
            bank,
            InitialParams {
                f0,
                offset: 0.1,
                rd_index: 0.0,
                log_gain,
                log_area_ratios: lar,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_window_means() {
        let report = FitReport {
            losses: vec![4.0, 2.0, 3.0, 1.0, 5.0],
            stopped_early: false,
        };
        assert_eq!(report.window_means(2), vec![3.0, 2.0, 5.0]);
        assert!(report.window_means(0).is_empty());
        assert_eq!(report.initial_loss(), Some(4.0));
        assert_eq!(report.final_loss(), Some(5.0));
        assert_eq!(FitReport::default().final_loss(), None);
    }

    #[test]
    fn test_records_every_iteration() {
        let target = model(120.0, 0.0, vec![0.5, -0.2]).predict(256);
        let mut m = model(120.0, -0.5, vec![0.0, 0.0]);
        let mut fitter = Fitter::new(FitConfig {
            iterations: 50,
            log_every: 10,
            optimizer: AdamConfig {
                learning_rate: 0.01,
                ..Default::default()
            },
        });
        let report = fitter.fit(&mut m, &target).unwrap();
        assert_eq!(report.iterations(), 50);
        assert!(!report.stopped_early);
        assert_eq!(fitter.optimizer().steps(), 50);
        assert!(report.final_loss().unwrap() < report.initial_loss().unwrap());
    }

    #[test]
    fn test_reused_fitter_starts_fresh() {
        let target = model(120.0, 0.0, vec![0.5, -0.2]).predict(128);
        let one_step = FitConfig {
            iterations: 1,
            ..Default::default()
        };

        let mut reused = Fitter::new(FitConfig {
            iterations: 300,
            ..Default::default()
        });
        let mut first = model(120.0, -0.5, vec![0.0, 0.0]);
        reused.fit(&mut first, &target).unwrap();
        assert_eq!(reused.optimizer().steps(), 300);

        reused.config = one_step.clone();
        let mut second = model(120.0, -0.5, vec![0.0, 0.0]);
        reused.fit(&mut second, &target).unwrap();
        assert_eq!(reused.optimizer().steps(), 1);

        let mut fresh = model(120.0, -0.5, vec![0.0, 0.0]);
        Fitter::new(one_step).fit(&mut fresh, &target).unwrap();
        assert_eq!(second.trainable(), fresh.trainable());
    }

    #[test]
    fn test_observer_stops_early() {
        let target = model(120.0, 0.0, vec![0.5, -0.2]).predict(128);
        let mut m = model(120.0, -0.5, vec![0.0, 0.0]);
        let mut fitter = Fitter::new(FitConfig {
            iterations: 100,
            ..Default::default()
        });
        let mut seen = Vec::new();
        let report = fitter
            .fit_with(&mut m, &target, |p, _| {
                seen.push(p.iteration);
                if p.iteration == 4 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .unwrap();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert_eq!(report.iterations(), 5);
        assert!(report.stopped_early);
    }

    #[test]
    fn test_empty_target_rejected() {
        let mut m = model(120.0, 0.0, vec![]);
        let mut fitter = Fitter::new(FitConfig::default());
        assert!(matches!(fitter.fit(&mut m, &[]), Err(Error::DegenerateInput(_))));
    }

    #[test]
    fn test_custom_optimizer() {
        struct Sgd(f64);
        impl Optimizer for Sgd {
            fn step(&mut self, params: &mut [f64], grads: &[f64]) {
                for (p, g) in params.iter_mut().zip(grads) {
                    *p -= self.0 * g;
                }
            }
        }

        let target = model(120.0, 0.0, vec![0.3, 0.1]).predict(128);
        let mut m = model(120.0, -0.3, vec![0.3, 0.1]);
        let mut fitter = Fitter::with_optimizer(
            FitConfig {
                iterations: 20,
                ..Default::default()
            },
            Sgd(0.01),
        );
        let report = fitter.fit(&mut m, &target).unwrap();
        assert!(report.final_loss().unwrap() < report.initial_loss().unwrap());
    }
}
