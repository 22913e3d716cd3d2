//! Hawkes parameters and the atomically swapped parameter store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use alpha_core::config::HawkesConfig;
use alpha_core::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::kernel::Kernel;

/// Baseline, excitation and decay of a univariate Hawkes process.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HawkesParameters {
    /// Background intensity μ.
    pub mu: f64,
    /// Excitation α.
    pub alpha: f64,
    /// Decay β.
    pub beta: f64,
    pub kernel: Kernel,
}

impl HawkesParameters {
    /// Build a parameter set, rejecting out-of-range or non-stationary values.
    pub fn new(mu: f64, alpha: f64, beta: f64, kernel: Kernel) -> Result<Self> {
        let params = Self {
            mu,
            alpha,
            beta,
            kernel,
        };
        params.validate()?;
        Ok(params)
    }

    /// Exponential-kernel shorthand.
    pub fn exponential(mu: f64, alpha: f64, beta: f64) -> Result<Self> {
        Self::new(mu, alpha, beta, Kernel::Exponential)
    }

    pub fn from_config(config: &HawkesConfig) -> Result<Self> {
        Self::new(
            config.initial_mu,
            config.initial_alpha,
            config.initial_beta,
            Kernel::from_config(config),
        )
    }

    /// Check ranges and stationarity.
    pub fn validate(&self) -> Result<()> {
        if !(self.mu.is_finite() && self.mu >= 0.0) {
            return Err(Error::config(format!("mu {} must be finite and >= 0", self.mu)));
        }
        if !(self.alpha.is_finite() && self.alpha >= 0.0) {
            return Err(Error::config(format!("alpha {} must be finite and >= 0", self.alpha)));
        }
        if !(self.beta.is_finite() && self.beta > 0.0) {
            return Err(Error::config(format!("beta {} must be finite and > 0", self.beta)));
        }
        if let Kernel::PowerLaw { exponent } = self.kernel {
            if !exponent.is_finite() {
                return Err(Error::config("power-law exponent must be finite"));
            }
        }
        let branching_ratio = self.branching_ratio();
        if !(branching_ratio < 1.0) {
            return Err(Error::NonStationaryFit { branching_ratio });
        }
        Ok(())
    }

    /// Expected number of direct offspring per event.
    pub fn branching_ratio(&self) -> f64 {
        self.kernel.l1_norm(self.alpha, self.beta)
    }

    pub fn is_stationary(&self) -> bool {
        self.branching_ratio() < 1.0
    }

    /// Long-run mean intensity `μ / (1 - n)`.
    pub fn stationary_intensity(&self) -> f64 {
        self.mu / (1.0 - self.branching_ratio())
    }
}

/// Current parameters for one event stream.
///
/// Writers replace the whole set at once; readers get an `Arc` to a complete
/// set and never see a partial update. The version increments on every
/// successful install so streaming consumers can detect a swap cheaply.
#[derive(Debug)]
pub struct ParameterStore {
    current: RwLock<Arc<HawkesParameters>>,
    version: AtomicU64,
}

impl ParameterStore {
    pub fn new(params: HawkesParameters) -> Self {
        Self {
            current: RwLock::new(Arc::new(params)),
            version: AtomicU64::new(0),
        }
    }

    /// Snapshot of the installed parameters.
    pub fn load(&self) -> Arc<HawkesParameters> {
        self.current.read().clone()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Install a new set. Non-stationary sets are rejected and the current
    /// set is kept. Returns the new version.
    pub fn install(&self, params: HawkesParameters) -> Result<u64> {
        params.validate()?;
        let mut guard = self.current.write();
        *guard = Arc::new(params);
        Ok(self.version.fetch_add(1, Ordering::AcqRel) + 1)
    }
}
