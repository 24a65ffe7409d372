//! Source-filter model: LF wavetable source driving an all-pole filter.
//!
//! Trainable state (flat order used by optimizers):
//!
//! | slot | name            | physical value                         |
//! |------|-----------------|----------------------------------------|
//! | 0    | ln f0           | f0 = exp(ln f0), Hz                    |
//! | 1    | offset          | phase offset, used mod 1               |
//! | 2    | rd_index        | bank index = sigmoid(rd_index) (N - 1) |
//! | 3    | log_gain        | gain = exp(log_gain)                   |
//! | 4..  | log_area_ratios | k = tanh(lar / 2) -> step-up -> a      |
//!
//! Gradients are reverse-mode by hand: L1 loss -> IIR adjoint -> step-up ->
//! tanh, and on the source side through both linear interpolations of the
//! oscillator and the sigmoid.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::filters::{forward_filter, forward_filter_backward, inverse_filter};
use crate::lpc::{self, LpcParams};
use crate::oscillator::WavetableOscillator;
use crate::params::{self, ParameterSet};
use crate::reflection::{self, StepUpTrace};
use crate::tables::{DEFAULT_TABLE_COUNT, DEFAULT_TABLE_SIZE, GlottalTableBank};

/// Scalar slots ahead of the log-area ratios in the flat trainable vector.
pub const SCALAR_PARAMETERS: usize = 4;

/// Immutable model configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub sample_rate: f64,
    /// Samples per glottal table (P).
    pub table_size: usize,
    /// Tables in the bank (N).
    pub table_count: usize,
    /// All-pole filter order (M).
    pub lpc_order: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000.0,
            table_size: DEFAULT_TABLE_SIZE,
            table_count: DEFAULT_TABLE_COUNT,
            lpc_order: 16,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "sample rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if self.table_count == 0 || self.table_size < 2 {
            return Err(Error::InvalidConfig(format!(
                "table bank {}x{} is too small",
                self.table_count, self.table_size
            )));
        }
        Ok(())
    }

    /// Build the glottal table bank this configuration describes.
    pub fn build_bank(&self) -> Result<Arc<GlottalTableBank>> {
        self.validate()?;
        Ok(Arc::new(GlottalTableBank::new(self.table_count, self.table_size)?))
    }
}

/// Starting values for the trainable parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitialParams {
    /// Hz.
    pub f0: f64,
    pub offset: f64,
    /// Raw selector; 0 lands mid-bank.
    pub rd_index: f64,
    pub log_gain: f64,
    /// Empty means all zeros (flat filter).
    pub log_area_ratios: Vec<f64>,
}

impl Default for InitialParams {
    fn default() -> Self {
        Self {
            f0: 100.0,
            offset: 0.0,
            rd_index: 0.0,
            log_gain: 0.0,
            log_area_ratios: Vec::new(),
        }
    }
}

/// dL/d(trainable), laid out like the trainable vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Gradients {
    pub log_f0: f64,
    pub offset: f64,
    pub rd_index: f64,
    pub log_gain: f64,
    pub log_area_ratios: Vec<f64>,
}

impl Gradients {
    pub fn zeros(order: usize) -> Self {
        Self {
            log_f0: 0.0,
            offset: 0.0,
            rd_index: 0.0,
            log_gain: 0.0,
            log_area_ratios: vec![0.0; order],
        }
    }

    pub fn to_vec(&self) -> Vec<f64> {
        let mut v = Vec::with_capacity(SCALAR_PARAMETERS + self.log_area_ratios.len());
        v.extend([self.log_f0, self.offset, self.rd_index, self.log_gain]);
        v.extend_from_slice(&self.log_area_ratios);
        v
    }
}

/// Mean absolute error. Lengths must match.
pub fn l1_loss(prediction: &[f64], target: &[f64]) -> f64 {
    debug_assert_eq!(prediction.len(), target.len());
    if target.is_empty() {
        return 0.0;
    }
    prediction
        .iter()
        .zip(target)
        .map(|(y, t)| (y - t).abs())
        .sum::<f64>()
        / target.len() as f64
}

/// Intermediate values of one prediction, kept for the backward pass.
struct ForwardPass {
    source: Vec<f64>,
    d_phase: Vec<f64>,
    d_bank_index: Vec<f64>,
    reflection: Vec<f64>,
    trace: StepUpTrace,
    gain: f64,
    output: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct SourceFilterModel {
    config: ModelConfig,
    bank: Arc<GlottalTableBank>,
    log_f0: f64,
    offset: f64,
    rd_index: f64,
    log_gain: f64,
    log_area_ratios: Vec<f64>,
}

impl SourceFilterModel {
    /// The bank must match `config.table_count` x `config.table_size`.
    pub fn new(config: ModelConfig, bank: Arc<GlottalTableBank>, init: InitialParams) -> Result<Self> {
        config.validate()?;
        if bank.len() != config.table_count || bank.table_size() != config.table_size {
            return Err(Error::InvalidConfig(format!(
                "bank is {}x{}, config expects {}x{}",
                bank.len(),
                bank.table_size(),
                config.table_count,
                config.table_size
            )));
        }
        if !(init.f0.is_finite() && init.f0 > 0.0) {
            return Err(Error::invalid_parameter(params::F0, format!("must be positive, got {}", init.f0)));
        }
        for (name, v) in [
            (params::OFFSET, init.offset),
            (params::RD_INDEX, init.rd_index),
            (params::LOG_GAIN, init.log_gain),
        ] {
            if !v.is_finite() {
                return Err(Error::invalid_parameter(name, format!("{v} is not finite")));
            }
        }
        if let Some(i) = init.log_area_ratios.iter().position(|x| !x.is_finite()) {
            return Err(Error::invalid_parameter(
                params::LOG_AREA_RATIOS,
                format!("element {i} is not finite"),
            ));
        }
        let order = config.lpc_order;
        let log_area_ratios = match init.log_area_ratios.len() {
            0 => vec![0.0; order],
            n if n == order => init.log_area_ratios,
            n => {
                return Err(Error::LengthMismatch {
                    name: params::LOG_AREA_RATIOS.to_string(),
                    expected: order,
                    found: n,
                });
            }
        };

        Ok(Self {
            config,
            bank,
            log_f0: init.f0.ln(),
            offset: init.offset,
            rd_index: init.rd_index,
            log_gain: init.log_gain,
            log_area_ratios,
        })
    }

    /// Initialize the filter side from a classic autocorrelation estimate of
    /// `samples`: log-area ratios via step-down, log-gain from the per-sample
    /// residual RMS. An unstable estimate leaves the initial ratios in place.
    pub fn from_lpc_estimate(
        config: ModelConfig,
        bank: Arc<GlottalTableBank>,
        samples: &[f64],
        init: InitialParams,
    ) -> Result<Self> {
        let estimate = lpc::estimate(samples, config.lpc_order)?;
        let mut model = Self::new(config, bank, init)?;

        match estimate.reflection().and_then(|k| reflection::from_reflection(&k)) {
            Ok(lar) => model.log_area_ratios = lar,
            Err(e) => tracing::warn!("classic estimate not usable as a start point ({e}), keeping initial filter"),
        }
        let rms = estimate.gain / (samples.len() as f64).sqrt();
        if rms.is_finite() && rms > 0.0 {
            model.log_gain = rms.ln();
        }
        Ok(model)
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn bank(&self) -> &Arc<GlottalTableBank> {
        &self.bank
    }

    pub fn sample_rate(&self) -> f64 {
        self.config.sample_rate
    }

    pub fn order(&self) -> usize {
        self.log_area_ratios.len()
    }

    /// Fundamental frequency in Hz.
    pub fn f0(&self) -> f64 {
        self.log_f0.exp()
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn gain(&self) -> f64 {
        self.log_gain.exp()
    }

    pub fn log_gain(&self) -> f64 {
        self.log_gain
    }

    /// Raw (unsquashed) Rd selector.
    pub fn rd_index(&self) -> f64 {
        self.rd_index
    }

    /// Fractional table index in [0, N-1].
    pub fn bank_index(&self) -> f64 {
        sigmoid(self.rd_index) * (self.bank.len() - 1) as f64
    }

    /// Rd of the blended table.
    pub fn rd(&self) -> f64 {
        self.bank.rd_at(self.bank_index())
    }

    pub fn log_area_ratios(&self) -> &[f64] {
        &self.log_area_ratios
    }

    pub fn reflection(&self) -> Vec<f64> {
        reflection::to_reflection(&self.log_area_ratios)
    }

    /// Current filter; always stable.
    pub fn lpc(&self) -> LpcParams {
        LpcParams::from_reflection(self.gain(), &self.reflection())
    }

    pub fn oscillator(&self) -> WavetableOscillator<'_> {
        WavetableOscillator::new(&self.bank, self.f0(), self.offset, self.bank_index(), self.config.sample_rate)
    }

    /// Glottal source (before the filter).
    pub fn source(&self, steps: usize) -> Vec<f64> {
        self.oscillator().render(steps)
    }

    /// Source through the all-pole filter.
    pub fn predict(&self, steps: usize) -> Vec<f64> {
        let lpc = self.lpc();
        forward_filter(&self.source(steps), &lpc.coefficients, lpc.gain)
    }

    /// Excitation that would reproduce `signal` through the current filter.
    pub fn implied_excitation(&self, signal: &[f64]) -> Vec<f64> {
        let lpc = self.lpc();
        inverse_filter(signal, &lpc.coefficients, lpc.gain)
    }

    /// L1 loss of `predict(target.len())` and its gradient.
    pub fn loss_and_gradient(&self, target: &[f64]) -> (f64, Gradients) {
        let len = target.len();
        if len == 0 {
            return (0.0, Gradients::zeros(self.order()));
        }
        let pass = self.forward_pass(len);
        let loss = l1_loss(&pass.output, target);

        let scale = 1.0 / len as f64;
        let grad_output: Vec<f64> = pass
            .output
            .iter()
            .zip(target)
            .map(|(y, t)| {
                if y > t {
                    scale
                } else if y < t {
                    -scale
                } else {
                    0.0
                }
            })
            .collect();

        (loss, self.backward(&pass, &grad_output))
    }

    /// L1 loss only.
    pub fn loss(&self, target: &[f64]) -> f64 {
        l1_loss(&self.predict(target.len()), target)
    }

    fn forward_pass(&self, steps: usize) -> ForwardPass {
        let osc = self.oscillator();
        let mut source = Vec::with_capacity(steps);
        let mut d_phase = Vec::with_capacity(steps);
        let mut d_bank_index = Vec::with_capacity(steps);
        for n in 0..steps {
            let s = osc.sample_with_derivatives(n);
            source.push(s.value);
            d_phase.push(s.d_phase);
            d_bank_index.push(s.d_bank_index);
        }

        let reflection = self.reflection();
        let trace = reflection::step_up_trace(&reflection);
        let gain = self.gain();
        let output = forward_filter(&source, trace.coefficients(), gain);

        ForwardPass {
            source,
            d_phase,
            d_bank_index,
            reflection,
            trace,
            gain,
            output,
        }
    }

    fn backward(&self, pass: &ForwardPass, grad_output: &[f64]) -> Gradients {
        let filter = forward_filter_backward(
            grad_output,
            &pass.output,
            &pass.source,
            pass.trace.coefficients(),
            pass.gain,
        );
        let grad_k = reflection::step_up_backward(&pass.reflection, &pass.trace, &filter.coefficients);
        let log_area_ratios = reflection::to_reflection_backward(&pass.reflection, &grad_k);

        // p[n] = n f0 / fs + offset (mod 1): dp/doffset = 1, dp/dln f0 = n f0 / fs.
        let f0 = self.f0();
        let fs = self.config.sample_rate;
        let mut offset = 0.0;
        let mut log_f0 = 0.0;
        let mut bank = 0.0;
        for (n, ge) in filter.excitation.iter().enumerate() {
            let gp = ge * pass.d_phase[n];
            offset += gp;
            log_f0 += gp * n as f64 * f0 / fs;
            bank += ge * pass.d_bank_index[n];
        }
        let s = sigmoid(self.rd_index);
        let rd_index = bank * (self.bank.len() - 1) as f64 * s * (1.0 - s);

        Gradients {
            log_f0,
            offset,
            rd_index,
            log_gain: filter.gain * pass.gain,
            log_area_ratios,
        }
    }

    /// Flat trainable vector `[ln f0, offset, rd_index, log_gain, lar..]`.
    pub fn trainable(&self) -> Vec<f64> {
        let mut v = Vec::with_capacity(SCALAR_PARAMETERS + self.order());
        v.extend([self.log_f0, self.offset, self.rd_index, self.log_gain]);
        v.extend_from_slice(&self.log_area_ratios);
        v
    }

    pub fn set_trainable(&mut self, values: &[f64]) -> Result<()> {
        let expected = SCALAR_PARAMETERS + self.order();
        if values.len() != expected {
            return Err(Error::LengthMismatch {
                name: "trainable".to_string(),
                expected,
                found: values.len(),
            });
        }
        self.log_f0 = values[0];
        self.offset = values[1];
        self.rd_index = values[2];
        self.log_gain = values[3];
        self.log_area_ratios.copy_from_slice(&values[SCALAR_PARAMETERS..]);
        Ok(())
    }

    /// Checkpoint of the trainable state (f0 in Hz).
    pub fn parameters(&self) -> ParameterSet {
        let mut p = ParameterSet::new();
        p.insert_scalar(params::F0, self.f0());
        p.insert_scalar(params::OFFSET, self.offset);
        p.insert_scalar(params::RD_INDEX, self.rd_index);
        p.insert_scalar(params::LOG_GAIN, self.log_gain);
        p.insert_vector(params::LOG_AREA_RATIOS, self.log_area_ratios.clone());
        p
    }

    /// Restore a checkpoint. All names must be present and known; nothing is
    /// changed unless every value validates.
    pub fn load_parameters(&mut self, set: &ParameterSet) -> Result<()> {
        set.ensure_only(&params::MODEL_PARAMETERS)?;
        let f0 = set.scalar(params::F0)?;
        if f0 <= 0.0 {
            return Err(Error::invalid_parameter(params::F0, format!("must be positive, got {f0}")));
        }
        let offset = set.scalar(params::OFFSET)?;
        let rd_index = set.scalar(params::RD_INDEX)?;
        let log_gain = set.scalar(params::LOG_GAIN)?;
        let lar = set.vector(params::LOG_AREA_RATIOS)?;
        if lar.len() != self.order() {
            return Err(Error::LengthMismatch {
                name: params::LOG_AREA_RATIOS.to_string(),
                expected: self.order(),
                found: lar.len(),
            });
        }

        self.log_f0 = f0.ln();
        self.offset = offset;
        self.rd_index = rd_index;
        self.log_gain = log_gain;
        self.log_area_ratios.copy_from_slice(lar);
        Ok(())
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
