//! Price-impact liquidity measures over a rolling bar window.

use statrs::statistics::Statistics;

use crate::window::RollingWindow;

/// Tracks Kyle's lambda and Amihud illiquidity.
pub struct LiquidityTracker {
    /// Mid price change per bar.
    price_changes: RollingWindow,
    /// Signed (buy minus sell) volume per bar.
    signed_volumes: RollingWindow,
    /// `|return| / dollar_value` per bar, `None` when the bar traded nothing.
    illiquidity: RollingWindow<Option<f64>>,
}

impl LiquidityTracker {
    pub fn new(window: usize) -> Self {
        Self {
            price_changes: RollingWindow::new(window),
            signed_volumes: RollingWindow::new(window),
            illiquidity: RollingWindow::new(window),
        }
    }

    /// Record one bar.
    pub fn update(&mut self, price_change: f64, signed_volume: f64, log_return: f64, dollar_value: f64) {
        self.price_changes.push(price_change);
        self.signed_volumes.push(signed_volume);
        let ratio = (dollar_value > 0.0).then(|| log_return.abs() / dollar_value);
        self.illiquidity.push(ratio);
    }

    /// OLS slope of price change on signed volume; 0 without volume variance.
    pub fn kyle_lambda(&self) -> f64 {
        if self.signed_volumes.len() < 2 {
            return 0.0;
        }
        let volumes: Vec<f64> = self.signed_volumes.iter().copied().collect();
        let changes: Vec<f64> = self.price_changes.iter().copied().collect();
        let variance = volumes.iter().population_variance();
        if !(variance > 0.0) {
            return 0.0;
        }
        changes.iter().population_covariance(volumes.iter()) / variance
    }

    /// Mean `|return| / dollar_value` over bars that traded; 0 when none did.
    pub fn amihud(&self) -> f64 {
        let values: Vec<f64> = self.illiquidity.iter().flatten().copied().collect();
        if values.is_empty() {
            0.0
        } else {
            values.mean()
        }
    }

    pub fn count(&self) -> usize {
        self.price_changes.len()
    }

    pub fn clear(&mut self) {
        self.price_changes.clear();
        self.signed_volumes.clear();
        self.illiquidity.clear();
    }
}
