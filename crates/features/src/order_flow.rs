//! Order flow imbalance aggregation.
//!
//! Accumulates multi-level OFI from every book delta between two bar
//! boundaries.

use alpha_core::BookDelta;

/// Per-bar OFI accumulator for a fixed set of depths.
#[derive(Debug, Clone)]
pub struct OfiAccumulator {
    /// Depths (1-based) reported, in slot order.
    levels: Vec<usize>,
    /// Running OFI per depth.
    sums: Vec<f64>,
    /// Deltas folded in since the last take.
    updates: u32,
}

impl OfiAccumulator {
    pub fn new(levels: &[usize]) -> Self {
        Self {
            levels: levels.to_vec(),
            sums: vec![0.0; levels.len()],
            updates: 0,
        }
    }

    /// Fold one book delta into the running sums.
    pub fn add(&mut self, delta: &BookDelta) {
        for (sum, &n) in self.sums.iter_mut().zip(self.levels.iter()) {
            *sum += delta.ofi(n);
        }
        self.updates += 1;
    }

    /// Current OFI per configured depth.
    pub fn values(&self) -> &[f64] {
        &self.sums
    }

    /// Number of deltas accumulated since the last reset.
    pub fn update_count(&self) -> u32 {
        self.updates
    }

    /// Return the accumulated values and start a new bar.
    pub fn take(&mut self) -> Vec<f64> {
        self.updates = 0;
        std::mem::replace(&mut self.sums, vec![0.0; self.levels.len()])
    }

    pub fn reset(&mut self) {
        self.sums.iter_mut().for_each(|s| *s = 0.0);
        self.updates = 0;
    }
}
