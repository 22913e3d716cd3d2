//! Fixed-width fractional differentiation.
//!
//! Weights follow `w_0 = 1, w_k = -w_{k-1} (d - k + 1) / k` and are truncated
//! once `|w_k|` drops below a threshold or a maximum count is reached.

use crate::window::RollingWindow;

/// Streaming fractional differencer for one series.
pub struct FracDiff {
    /// `weights[k]` applies to the value `k` steps back.
    weights: Vec<f64>,
    history: RollingWindow,
}

impl FracDiff {
    pub fn new(d: f64, threshold: f64, max_weights: usize) -> Self {
        let weights = frac_diff_weights(d, threshold, max_weights);
        let history = RollingWindow::new(weights.len());
        Self { weights, history }
    }

    /// Push a value; returns 0 until the history spans every weight.
    pub fn update(&mut self, value: f64) -> f64 {
        self.history.push(value);
        if !self.history.is_full() {
            return 0.0;
        }
        self.history
            .iter()
            .rev()
            .zip(self.weights.iter())
            .map(|(x, w)| x * w)
            .sum()
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn is_ready(&self) -> bool {
        self.history.is_full()
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}

/// Fractional differentiation weights, most recent lag first.
pub fn frac_diff_weights(d: f64, threshold: f64, max_weights: usize) -> Vec<f64> {
    let mut weights = vec![1.0];
    for k in 1..max_weights.max(1) {
        let prev = weights[k - 1];
        let w = -prev * (d - k as f64 + 1.0) / k as f64;
        if w.abs() < threshold {
            break;
        }
        weights.push(w);
    }
    weights
}
