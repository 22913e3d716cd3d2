//! Streaming univariate Hawkes process over a rolling event window.

use std::collections::VecDeque;

use alpha_core::{Error, Result};

use crate::params::HawkesParameters;

/// Univariate self-exciting process.
///
/// For the exponential kernel the intensity is tracked recursively: the
/// accumulated excitation decays by `e^{-βΔt}` between events and jumps by
/// `α` at each event, so `intensity` is O(1). `intensity_exact` sums the
/// kernel over the window and is used for verification, for queries in the
/// past, and for the power-law kernel.
#[derive(Debug, Clone)]
pub struct UnivariateHawkes {
    params: HawkesParameters,
    events: VecDeque<f64>,
    capacity: usize,
    last_t: Option<f64>,
    /// Excitation evaluated at `last_t`, including the event at `last_t`.
    excitation: f64,
}

impl UnivariateHawkes {
    pub fn new(params: HawkesParameters, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            params,
            events: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
            last_t: None,
            excitation: 0.0,
        }
    }

    pub fn params(&self) -> &HawkesParameters {
        &self.params
    }

    /// Swap parameters and rebuild the recursive state from the window.
    pub fn set_params(&mut self, params: HawkesParameters) {
        self.params = params;
        self.rebuild();
    }

    /// Add an event at time `t` (seconds). Times must be non-decreasing.
    pub fn record(&mut self, t: f64) -> Result<()> {
        if !t.is_finite() {
            return Err(Error::data(format!("non-finite event time {t}")));
        }
        if let Some(last) = self.last_t {
            if t < last {
                return Err(Error::data(format!(
                    "event time {t} precedes last event {last}"
                )));
            }
        }

        let HawkesParameters { alpha, beta, kernel, .. } = self.params;
        if kernel.is_exponential() {
            let decay = match self.last_t {
                Some(last) => (-beta * (t - last)).exp(),
                None => 0.0,
            };
            self.excitation = self.excitation * decay + alpha;
        }

        self.events.push_back(t);
        self.last_t = Some(t);

        if self.events.len() > self.capacity {
            if let Some(evicted) = self.events.pop_front() {
                if kernel.is_exponential() {
                    self.excitation -= alpha * (-beta * (t - evicted)).exp();
                    self.excitation = self.excitation.max(0.0);
                }
            }
        }
        Ok(())
    }

    /// Conditional intensity `λ(t)` including any event at exactly `t`.
    pub fn intensity(&self, t: f64) -> f64 {
        match self.last_t {
            None => self.params.mu,
            Some(last) if self.params.kernel.is_exponential() && t >= last => {
                self.params.mu + self.excitation * (-self.params.beta * (t - last)).exp()
            }
            Some(_) => self.intensity_exact(t),
        }
    }

    /// `μ + Σ_{t_j ≤ t} φ(t - t_j)` over the window.
    pub fn intensity_exact(&self, t: f64) -> f64 {
        let HawkesParameters { mu, alpha, beta, kernel } = self.params;
        mu + self
            .events
            .iter()
            .take_while(|&&tj| tj <= t)
            .map(|&tj| kernel.value(alpha, beta, t - tj))
            .sum::<f64>()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last_time(&self) -> Option<f64> {
        self.last_t
    }

    pub fn first_time(&self) -> Option<f64> {
        self.events.front().copied()
    }

    /// Window contents, oldest first.
    pub fn events(&self) -> impl Iterator<Item = f64> + '_ {
        self.events.iter().copied()
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.last_t = None;
        self.excitation = 0.0;
    }

    fn rebuild(&mut self) {
        self.excitation = match (self.last_t, self.params.kernel.is_exponential()) {
            (Some(last), true) => {
                let HawkesParameters { alpha, beta, .. } = self.params;
                self.events
                    .iter()
                    .map(|&tj| alpha * (-beta * (last - tj)).exp())
                    .sum()
            }
            _ => 0.0,
        };
    }
}
