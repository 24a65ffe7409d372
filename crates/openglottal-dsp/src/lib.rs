//! OpenGlottal DSP library — source-filter speech analysis and synthesis.
//!
//! Pure math with no audio framework dependencies: file I/O and the CLI live
//! in `tools/glottal-fit`.

pub mod error;
pub mod frame;

// Classic path: autocorrelation LPC, reflection codec, filter pair
pub mod filters;
pub mod lpc;
pub mod reflection;

// Glottal source: LF pulses, table bank, oscillator
pub mod glottal;
pub mod oscillator;
pub mod tables;

// Source-filter fit
pub mod fit;
pub mod model;
pub mod optim;
pub mod params;

pub use error::{Advisory, Error, Result};
pub use fit::{FitConfig, FitProgress, FitReport, Fitter};
pub use frame::{Frame, Window};
pub use lpc::LpcParams;
pub use model::{Gradients, InitialParams, ModelConfig, SourceFilterModel};
pub use optim::{Adam, AdamConfig, Optimizer};
pub use params::{ParamValue, ParameterSet};
pub use tables::GlottalTableBank;
