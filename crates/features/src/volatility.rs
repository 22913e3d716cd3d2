//! Rolling volatility and price kinematics.
//!
//! Volatility is the population standard deviation of log returns over a
//! rolling window. Velocity and acceleration are first and second differences
//! of price per second of bar time.

use alpha_core::{ts_to_secs, TimestampMs};

use crate::window::RollingWindow;

/// Rolling volatility calculator using log returns.
pub struct RollingVolatility {
    returns: RollingWindow,
    /// Previous price (for computing next return).
    prev_price: Option<f64>,
}

impl RollingVolatility {
    pub fn new(window: usize) -> Self {
        Self {
            returns: RollingWindow::new(window),
            prev_price: None,
        }
    }

    /// Add a price observation.
    ///
    /// Returns the current volatility if enough data is available.
    /// Non-positive prices are skipped.
    pub fn add_price(&mut self, price: f64) -> Option<f64> {
        if price <= 0.0 {
            return self.volatility();
        }
        if let Some(prev) = self.prev_price {
            self.returns.push((price / prev).ln());
        }
        self.prev_price = Some(price);
        self.volatility()
    }

    /// Standard deviation of the windowed returns.
    pub fn volatility(&self) -> Option<f64> {
        self.returns.population_std_dev()
    }

    /// Most recent log return.
    pub fn last_return(&self) -> Option<f64> {
        self.returns.last().copied()
    }

    /// Check if the window is full.
    pub fn is_ready(&self) -> bool {
        self.returns.is_full()
    }

    /// Get the number of returns in the window.
    pub fn count(&self) -> usize {
        self.returns.len()
    }

    pub fn clear(&mut self) {
        self.returns.clear();
        self.prev_price = None;
    }
}

/// First and second time-derivative of price across bars.
#[derive(Debug, Clone, Default)]
pub struct PriceKinematics {
    last_price: Option<(TimestampMs, f64)>,
    last_velocity: Option<(TimestampMs, f64)>,
    velocity: f64,
    acceleration: f64,
}

impl PriceKinematics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update with a price at `ts_ms`; returns `(velocity, acceleration)`.
    ///
    /// Both are 0 until enough history exists or when bar time does not advance.
    pub fn update(&mut self, ts_ms: TimestampMs, price: f64) -> (f64, f64) {
        let Some((prev_ts, prev_price)) = self.last_price.replace((ts_ms, price)) else {
            return (0.0, 0.0);
        };

        let dt = ts_to_secs(ts_ms - prev_ts);
        self.velocity = if dt > 0.0 { (price - prev_price) / dt } else { 0.0 };

        self.acceleration = match self.last_velocity {
            Some((_, prev_velocity)) if dt > 0.0 => (self.velocity - prev_velocity) / dt,
            _ => 0.0,
        };
        self.last_velocity = Some((ts_ms, self.velocity));

        (self.velocity, self.acceleration)
    }

    pub fn velocity(&self) -> f64 {
        self.velocity
    }

    pub fn acceleration(&self) -> f64 {
        self.acceleration
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
