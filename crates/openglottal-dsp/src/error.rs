//! Error and advisory types for openglottal-dsp.
//!
//! `Error` is returned by the estimator, codec and constructors on
//! structurally invalid input. `Advisory` covers conditions the numerical
//! core works through (best-effort output) but callers may want to know about.

use std::fmt;

use thiserror::Error;

/// Result type alias for openglottal-dsp operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in openglottal-dsp.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Autocorrelation matrix is singular: silent frame, frame shorter than
    /// `order + 1`, or the recursion ran out of prediction-error energy.
    #[error("degenerate input: {0}")]
    DegenerateInput(String),

    /// Requested LPC order is zero or not smaller than the frame length.
    #[error("invalid LPC order {order} for frame of {frame_len} samples")]
    InvalidOrder { order: usize, frame_len: usize },

    /// A parameter outside its structural domain (e.g. |k| >= 1 for a
    /// reflection coefficient that must be inverted).
    #[error("invalid parameter '{name}': {message}")]
    InvalidParameter { name: String, message: String },

    /// Unusable configuration (table sizes, sample rate).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Two sequences that must agree in length do not.
    #[error("length mismatch for '{name}': expected {expected}, found {found}")]
    LengthMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
}

impl Error {
    pub(crate) fn invalid_parameter(name: &str, message: impl Into<String>) -> Self {
        Error::InvalidParameter {
            name: name.to_string(),
            message: message.into(),
        }
    }
}

/// Non-fatal conditions. The operation still produced output.
#[derive(Debug, Clone, PartialEq)]
pub enum Advisory {
    /// A shape parameter fell outside its calibrated range; the waveform was
    /// extrapolated with clamped timing parameters.
    OutOfRangeParameter {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    /// The all-pole filter output diverged (non-finite or beyond the
    /// divergence bound) starting at `index`.
    FilterInstability { index: usize },
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Advisory::OutOfRangeParameter {
                name,
                value,
                min,
                max,
            } => write!(
                f,
                "{name} = {value} outside calibrated range [{min}, {max}], output is extrapolated"
            ),
            Advisory::FilterInstability { index } => {
                write!(f, "all-pole filter diverged at sample {index}")
            }
        }
    }
}
