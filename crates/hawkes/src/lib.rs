//! Self-exciting point processes for order-flow events.
//!
//! Provides:
//! - Exponential and power-law kernels
//! - Streaming univariate processes with O(1) exponential intensity
//! - MLE and EM estimation
//! - Ogata thinning simulation
//! - Multivariate exponential processes with joint cross-excitation fits
//! - [`HawkesEngine`]: one stream per [`alpha_core::EventKind`] with
//!   atomically swapped parameters

pub mod engine;
pub mod fit;
pub mod kernel;
pub mod multivariate;
pub mod optimize;
pub mod params;
pub mod process;
pub mod simulate;

pub use engine::{
    CrossExcitation, FitJob, FitOutcome, HawkesEngine, JointFitJob, ParameterSnapshot, RateForecast,
};
pub use fit::{fit, log_likelihood};
pub use kernel::Kernel;
pub use multivariate::{MultivariateHawkes, MultivariateSimulator};
pub use optimize::{Minimum, NelderMead};
pub use params::{HawkesParameters, ParameterStore};
pub use process::UnivariateHawkes;
pub use simulate::{simulate, OgataSimulator};
