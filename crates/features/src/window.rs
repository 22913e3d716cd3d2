//! Fixed-capacity rolling window.

use std::collections::VecDeque;

use statrs::statistics::Statistics;

/// Fixed-capacity FIFO; pushing into a full window evicts the oldest value.
#[derive(Debug, Clone)]
pub struct RollingWindow<T = f64> {
    capacity: usize,
    values: VecDeque<T>,
}

impl<T> RollingWindow<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            values: VecDeque::with_capacity(capacity),
        }
    }

    /// Push a value, returning the evicted one when full.
    pub fn push(&mut self, value: T) -> Option<T> {
        let evicted = if self.values.len() >= self.capacity {
            self.values.pop_front()
        } else {
            None
        };
        self.values.push_back(value);
        evicted
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.values.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Most recent value.
    pub fn last(&self) -> Option<&T> {
        self.values.back()
    }

    /// Value `n` steps back from the most recent (0 = most recent).
    pub fn back(&self, n: usize) -> Option<&T> {
        self.values.len().checked_sub(n + 1).and_then(|i| self.values.get(i))
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator + '_ {
        self.values.iter()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

impl RollingWindow<f64> {
    /// Mean, `None` when empty.
    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        Some(self.values.iter().mean())
    }

    /// Population standard deviation, `None` with fewer than two values.
    pub fn population_std_dev(&self) -> Option<f64> {
        if self.values.len() < 2 {
            return None;
        }
        Some(self.values.iter().population_std_dev())
    }

    /// Sample standard deviation, `None` with fewer than two values.
    pub fn std_dev(&self) -> Option<f64> {
        if self.values.len() < 2 {
            return None;
        }
        Some(self.values.iter().std_dev())
    }

    pub fn sum(&self) -> f64 {
        self.values.iter().sum()
    }
}
