//! Ogata thinning simulation.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use statrs::distribution::Exp;

use crate::kernel::Kernel;
use crate::params::HawkesParameters;

/// Hard cap on events produced by one simulation.
pub const DEFAULT_MAX_EVENTS: usize = 100_000;

/// Lazily generated event times on `(0, horizon]`.
///
/// The sequence is finite and fully determined by the seed; to replay it,
/// build a new simulator with the same seed.
#[derive(Debug)]
pub struct OgataSimulator {
    params: HawkesParameters,
    horizon: f64,
    max_events: usize,
    rng: StdRng,
    t: f64,
    last_event: Option<f64>,
    /// Exponential kernel: excitation at `last_event`.
    excitation: f64,
    /// Power-law kernel: accepted events.
    history: Vec<f64>,
    emitted: usize,
    done: bool,
}

/// Simulate a univariate process on `(0, horizon]`.
pub fn simulate(params: HawkesParameters, horizon: f64, seed: u64) -> OgataSimulator {
    OgataSimulator::new(params, horizon, seed)
}

impl OgataSimulator {
    pub fn new(params: HawkesParameters, horizon: f64, seed: u64) -> Self {
        Self {
            params,
            horizon,
            max_events: DEFAULT_MAX_EVENTS,
            rng: StdRng::seed_from_u64(seed),
            t: 0.0,
            last_event: None,
            excitation: 0.0,
            history: Vec::new(),
            emitted: 0,
            done: !(horizon.is_finite() && horizon > 0.0),
        }
    }

    /// Continue a process whose past events are at `history`, given as
    /// times at or before 0. Later entries are ignored. The simulated path
    /// lies on `(0, horizon]`.
    pub fn conditioned(params: HawkesParameters, history: &[f64], horizon: f64, seed: u64) -> Self {
        let mut sim = Self::new(params, horizon, seed);
        let past = history.iter().copied().filter(|t| *t <= 0.0);
        match params.kernel {
            Kernel::Exponential => {
                let excitation: f64 = past.map(|s| params.alpha * (params.beta * s).exp()).sum();
                if excitation > 0.0 {
                    sim.excitation = excitation;
                    sim.last_event = Some(0.0);
                }
            }
            Kernel::PowerLaw { .. } => sim.history = past.collect(),
        }
        sim
    }

    pub fn with_max_events(mut self, max_events: usize) -> Self {
        self.max_events = max_events;
        self
    }

    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Intensity from events strictly before or at `t`.
    fn intensity(&self, t: f64) -> f64 {
        let HawkesParameters { mu, alpha, beta, kernel } = self.params;
        match kernel {
            Kernel::Exponential => match self.last_event {
                Some(last) => mu + self.excitation * (-beta * (t - last)).exp(),
                None => mu,
            },
            Kernel::PowerLaw { .. } => {
                mu + self
                    .history
                    .iter()
                    .map(|&tj| kernel.value(alpha, beta, t - tj))
                    .sum::<f64>()
            }
        }
    }

    fn accept(&mut self, t: f64) {
        let HawkesParameters { alpha, beta, kernel, .. } = self.params;
        match kernel {
            Kernel::Exponential => {
                let decay = self.last_event.map_or(0.0, |last| (-beta * (t - last)).exp());
                self.excitation = self.excitation * decay + alpha;
            }
            Kernel::PowerLaw { .. } => self.history.push(t),
        }
        self.last_event = Some(t);
        self.emitted += 1;
    }
}

impl Iterator for OgataSimulator {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        while !self.done {
            if self.emitted >= self.max_events {
                self.done = true;
                break;
            }

            // Both kernels are non-increasing, so λ(t⁺) bounds λ until the next event.
            let bound = self.intensity(self.t);
            let waiting = match Exp::new(bound) {
                Ok(dist) => self.rng.sample(dist),
                Err(_) => {
                    self.done = true;
                    break;
                }
            };

            self.t += waiting;
            if self.t > self.horizon {
                self.done = true;
                break;
            }

            let u: f64 = self.rng.gen();
            if u * bound <= self.intensity(self.t) {
                let t = self.t;
                self.accept(t);
                return Some(t);
            }
        }
        None
    }
}
