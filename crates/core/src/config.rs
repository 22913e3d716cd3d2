//! Configuration structures for the microstructure alpha engine.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::BarKind;

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Instrument configuration.
    pub instrument: InstrumentConfig,
    /// Information bar sampling.
    pub bars: BarConfig,
    /// Feature windows and formula constants.
    pub features: FeatureConfig,
    /// Hawkes kernel and refit cadence.
    pub hawkes: HawkesConfig,
    /// Agent coordination.
    pub agents: AgentConfig,
}

impl Config {
    /// Parse a JSON document; missing sections take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.instrument.book_depth == 0 {
            return Err(Error::config("book_depth must be positive"));
        }
        if self.bars.threshold() <= 0.0 {
            return Err(Error::config("bar threshold must be positive"));
        }
        let f = &self.features;
        if f.ofi_levels.len() != 4 || f.ofi_levels.iter().any(|&n| n == 0) {
            return Err(Error::config("ofi_levels must list four 1-based depths"));
        }
        if f.depth_levels == 0 || !(f.depth_decay > 0.0 && f.depth_decay <= 1.0) {
            return Err(Error::config("depth_levels must be positive and depth_decay in (0, 1]"));
        }
        if f.volatility_window < 2 || f.liquidity_window < 2 {
            return Err(Error::config("rolling windows need at least 2 observations"));
        }
        if !(f.frac_diff_d > 0.0 && f.frac_diff_d < 1.0) {
            return Err(Error::config(format!("frac_diff_d {} not in (0, 1)", f.frac_diff_d)));
        }
        if f.macd_fast >= f.macd_slow {
            return Err(Error::config("macd_fast must be shorter than macd_slow"));
        }
        let h = &self.hawkes;
        if h.initial_beta <= 0.0 || h.initial_alpha < 0.0 || h.initial_mu < 0.0 {
            return Err(Error::config("initial Hawkes parameters out of range"));
        }
        if h.initial_alpha / h.initial_beta >= 1.0 {
            return Err(Error::config("initial Hawkes parameters are not stationary"));
        }
        let a = &self.agents;
        if !(a.consensus_threshold > 0.0 && a.consensus_threshold <= 1.0) {
            return Err(Error::config("consensus_threshold must be in (0, 1]"));
        }
        if a.heartbeat_interval_ms == 0 || a.max_missed_heartbeats == 0 {
            return Err(Error::config("heartbeat settings must be positive"));
        }
        if a.mailbox_capacity == 0 {
            return Err(Error::config("mailbox_capacity must be positive"));
        }
        Ok(())
    }
}

/// Instrument-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentConfig {
    /// Trading symbol.
    pub symbol: String,
    /// Number of book levels tracked per side.
    pub book_depth: usize,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            symbol: "WINc1".to_string(),
            book_depth: 10,
        }
    }
}

/// Information bar configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BarConfig {
    /// Active sampling rule.
    pub kind: BarKind,
    /// Ticks per tick bar.
    pub tick_threshold: u32,
    /// Volume per volume bar.
    pub volume_threshold: f64,
    /// Notional per dollar bar.
    pub dollar_threshold: f64,
}

impl BarConfig {
    /// Threshold of the active sampling rule.
    pub fn threshold(&self) -> f64 {
        match self.kind {
            BarKind::Tick => self.tick_threshold as f64,
            BarKind::Volume => self.volume_threshold,
            BarKind::Dollar => self.dollar_threshold,
        }
    }
}

impl Default for BarConfig {
    fn default() -> Self {
        Self {
            kind: BarKind::Tick,
            tick_threshold: 100,
            volume_threshold: 1_000.0,
            dollar_threshold: 100_000.0,
        }
    }
}

/// Feature engineering configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Depths reported in the four OFI slots (1-based).
    pub ofi_levels: Vec<usize>,
    /// Levels used by depth-weighted measures.
    pub depth_levels: usize,
    /// Per-level weight decay for depth-weighted measures.
    pub depth_decay: f64,
    /// Coefficient of the imbalance-adjusted micro-price.
    pub imbalance_adjustment: f64,
    /// Window (bars) for realized volatility.
    pub volatility_window: usize,
    /// Window (bars) for Kyle's lambda and Amihud.
    pub liquidity_window: usize,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bollinger_period: usize,
    pub bollinger_k: f64,
    /// Fractional differentiation order.
    pub frac_diff_d: f64,
    /// Smallest fractional weight kept.
    pub frac_diff_threshold: f64,
    /// Hard cap on the number of fractional weights.
    pub frac_diff_max_weights: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            ofi_levels: vec![1, 2, 3, 5],
            depth_levels: 5,
            depth_decay: 0.5,
            imbalance_adjustment: 0.01,
            volatility_window: 20,
            liquidity_window: 50,
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bollinger_period: 20,
            bollinger_k: 2.0,
            frac_diff_d: 0.4,
            frac_diff_threshold: 1e-4,
            frac_diff_max_weights: 100,
        }
    }
}

/// Hawkes kernel family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelKind {
    Exponential,
    PowerLaw,
}

/// Hawkes parameter estimation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitMethod {
    /// Maximum likelihood.
    Mle,
    /// Expectation-maximization over the branching structure.
    Em,
}

/// Hawkes process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HawkesConfig {
    pub kernel: KernelKind,
    /// Exponent `p` of the power-law kernel.
    pub power_law_exponent: f64,
    pub fit_method: FitMethod,
    /// Seconds between refits.
    pub refit_interval_secs: f64,
    /// Minimum events in the window before a refit is attempted.
    pub min_events_for_fit: usize,
    /// Rolling event window per event type.
    pub window_events: usize,
    pub initial_mu: f64,
    pub initial_alpha: f64,
    pub initial_beta: f64,
}

impl Default for HawkesConfig {
    fn default() -> Self {
        Self {
            kernel: KernelKind::Exponential,
            power_law_exponent: 1.1,
            fit_method: FitMethod::Mle,
            refit_interval_secs: 60.0,
            min_events_for_fit: 50,
            window_events: 2_000,
            initial_mu: 0.1,
            initial_alpha: 0.5,
            initial_beta: 1.0,
        }
    }
}

/// Behaviour of a full mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Producer waits for space.
    Block,
    /// Oldest queued message is discarded.
    DropOldest,
}

/// Agent coordination configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Fraction of positive votes required to pass.
    pub consensus_threshold: f64,
    /// Expected heartbeat period (ms).
    pub heartbeat_interval_ms: u64,
    /// Consecutive missed heartbeats before an agent is unhealthy.
    pub max_missed_heartbeats: u32,
    /// Inbox capacity per agent.
    pub mailbox_capacity: usize,
    pub backpressure: BackpressurePolicy,
    /// How long a consensus round waits for votes (ms).
    pub vote_timeout_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            consensus_threshold: 0.6,
            heartbeat_interval_ms: 5_000,
            max_missed_heartbeats: 3,
            mailbox_capacity: 1_024,
            backpressure: BackpressurePolicy::Block,
            vote_timeout_ms: 5_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.features.ofi_levels, vec![1, 2, 3, 5]);
        assert_eq!(config.features.frac_diff_d, 0.4);
        assert_eq!(config.agents.consensus_threshold, 0.6);
        assert_eq!(config.bars.threshold(), 100.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = Config::from_json(
            r#"{"bars": {"kind": "dollar", "dollar_threshold": 5000.0},
                "hawkes": {"kernel": "power_law", "fit_method": "em"}}"#,
        )
        .unwrap();
        assert_eq!(config.bars.kind, BarKind::Dollar);
        assert_eq!(config.bars.threshold(), 5000.0);
        assert_eq!(config.hawkes.kernel, KernelKind::PowerLaw);
        assert_eq!(config.hawkes.fit_method, FitMethod::Em);
        assert_eq!(config.agents.max_missed_heartbeats, 3);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = Config::default();
        config.features.frac_diff_d = 1.5;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.hawkes.initial_alpha = 2.0;
        assert!(config.validate().is_err());

        assert!(Config::from_json(r#"{"agents": {"consensus_threshold": 0.0}}"#).is_err());
    }
}
