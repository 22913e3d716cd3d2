//! Multivariate exponential Hawkes process.
//!
//! `λ_i(t) = μ_i + Σ_j Σ_{t_k^j ≤ t} α_ij e^{-β_ij (t - t_k^j)}`, where
//! `α_ij` is the excitation of dimension `i` by events in dimension `j`.

use std::collections::VecDeque;

use alpha_core::{Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use statrs::distribution::Exp;
use tracing::{debug, info};

use crate::fit::check_events;
use crate::optimize::NelderMead;
use crate::params::HawkesParameters;
use crate::simulate::DEFAULT_MAX_EVENTS;

const DEFAULT_HISTORY: usize = 10_000;
const POWER_ITERATIONS: usize = 10_000;
const POWER_TOLERANCE: f64 = 1e-13;

#[derive(Debug, Clone)]
pub struct MultivariateHawkes {
    mu: Vec<f64>,
    alpha: Vec<Vec<f64>>,
    beta: Vec<Vec<f64>>,
    /// `state[i][j]`: excitation of `i` from `j`, evaluated at `last_t`.
    state: Vec<Vec<f64>>,
    last_t: Option<f64>,
    history: VecDeque<(usize, f64)>,
    history_capacity: usize,
}

impl MultivariateHawkes {
    /// Build a stationary model. Shapes must agree and the spectral radius of
    /// the branching matrix must be below 1.
    pub fn new(mu: Vec<f64>, alpha: Vec<Vec<f64>>, beta: Vec<Vec<f64>>) -> Result<Self> {
        let d = mu.len();
        if d == 0 {
            return Err(Error::config("multivariate Hawkes needs at least one dimension"));
        }
        let square = |m: &[Vec<f64>]| m.len() == d && m.iter().all(|row| row.len() == d);
        if !square(&alpha) || !square(&beta) {
            return Err(Error::config(format!("alpha and beta must be {d}x{d}")));
        }
        if mu.iter().any(|m| !(m.is_finite() && *m >= 0.0)) {
            return Err(Error::config("mu must be finite and >= 0"));
        }
        if alpha.iter().flatten().any(|a| !(a.is_finite() && *a >= 0.0)) {
            return Err(Error::config("alpha must be finite and >= 0"));
        }
        if beta.iter().flatten().any(|b| !(b.is_finite() && *b > 0.0)) {
            return Err(Error::config("beta must be finite and > 0"));
        }

        let model = Self {
            mu,
            alpha,
            beta,
            state: vec![vec![0.0; d]; d],
            last_t: None,
            history: VecDeque::new(),
            history_capacity: DEFAULT_HISTORY,
        };
        let radius = model.spectral_radius();
        if !(radius < 1.0) {
            return Err(Error::NonStationaryFit {
                branching_ratio: radius,
            });
        }
        Ok(model)
    }

    /// Independent dimensions with the given exponential marginals.
    pub fn from_marginals(marginals: &[HawkesParameters]) -> Result<Self> {
        let d = marginals.len();
        let mut alpha = vec![vec![0.0; d]; d];
        let mut beta = vec![vec![1.0; d]; d];
        for (i, p) in marginals.iter().enumerate() {
            if !p.kernel.is_exponential() {
                return Err(Error::config("multivariate model uses the exponential kernel"));
            }
            alpha[i][i] = p.alpha;
            beta[i][i] = p.beta;
        }
        Self::new(marginals.iter().map(|p| p.mu).collect(), alpha, beta)
    }

    /// Joint maximum-likelihood fit with one decay per target dimension.
    ///
    /// Row `i` (`μ_i`, `α_i·`, `β_i`) maximises the likelihood of dimension
    /// `i`'s events given every dimension's history, so cross-excitation is
    /// estimated alongside self-excitation. Each dimension needs at least two
    /// events on `[0, horizon]`. A branching matrix with spectral radius of
    /// 1 or more is rejected as [`Error::NonStationaryFit`].
    pub fn fit(events: &[Vec<f64>], horizon: f64) -> Result<Self> {
        let d = events.len();
        if d == 0 {
            return Err(Error::config("multivariate Hawkes needs at least one dimension"));
        }
        for dim in events {
            check_events(dim, horizon)?;
        }
        let merged = merge(events);
        let total_rate = merged.len() as f64 / horizon;

        let optimizer = NelderMead {
            tolerance: 1e-8,
            max_iterations: 4_000,
            ..NelderMead::default()
        };

        let mut mu = Vec::with_capacity(d);
        let mut alpha = Vec::with_capacity(d);
        let mut beta = Vec::with_capacity(d);
        for (i, dim) in events.iter().enumerate() {
            let rate = dim.len() as f64 / horizon;
            // x = [ln μ, ln α_i0 .. ln α_i(d-1), ln β]
            let objective = |x: &[f64]| {
                let alpha_row: Vec<f64> = x[1..=d].iter().map(|a| a.exp()).collect();
                -row_log_likelihood(&merged, horizon, i, x[0].exp(), &alpha_row, x[d + 1].exp())
            };

            let mut best: Option<(Vec<f64>, f64)> = None;
            for beta0 in [total_rate.max(1e-3), 10.0 * total_rate.max(1e-3)] {
                let mut start = vec![(0.5 * rate).ln()];
                start.extend(std::iter::repeat((0.25 * beta0 / d as f64).ln()).take(d));
                start.push(beta0.ln());

                let first = optimizer.minimize(objective, &start);
                let second = optimizer.minimize(objective, &first.x);
                debug!(
                    dim = i,
                    beta0,
                    iterations = first.iterations + second.iterations,
                    converged = second.converged,
                    nll = second.fx,
                    "Joint MLE run finished"
                );
                if best.as_ref().map_or(true, |(_, fx)| second.fx < *fx) {
                    best = Some((second.x, second.fx));
                }
            }

            let Some((x, fx)) = best else {
                return Err(Error::data("likelihood optimisation did not run"));
            };
            if !fx.is_finite() {
                return Err(Error::data(format!(
                    "likelihood optimisation for dimension {i} did not find a finite optimum"
                )));
            }
            mu.push(x[0].exp());
            alpha.push(x[1..=d].iter().map(|a| a.exp()).collect::<Vec<f64>>());
            beta.push(vec![x[d + 1].exp(); d]);
        }

        let model = Self::new(mu, alpha, beta)?;
        info!(
            dimensions = d,
            events = merged.len(),
            spectral_radius = model.spectral_radius(),
            cross_excitation = model.cross_excitation(),
            "Joint Hawkes fit"
        );
        Ok(model)
    }

    pub fn dimension(&self) -> usize {
        self.mu.len()
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity.max(1);
        self
    }

    /// Record an event in dimension `dim` at time `t`.
    pub fn record(&mut self, dim: usize, t: f64) -> Result<()> {
        let d = self.dimension();
        if dim >= d {
            return Err(Error::data(format!("dimension {dim} out of range (0..{d})")));
        }
        if !t.is_finite() {
            return Err(Error::data(format!("non-finite event time {t}")));
        }
        if let Some(last) = self.last_t {
            if t < last {
                return Err(Error::data(format!(
                    "event time {t} precedes last event {last}"
                )));
            }
            let dt = t - last;
            for i in 0..d {
                for j in 0..d {
                    self.state[i][j] *= (-self.beta[i][j] * dt).exp();
                }
            }
        }
        for i in 0..d {
            self.state[i][dim] += self.alpha[i][dim];
        }
        self.last_t = Some(t);

        self.history.push_back((dim, t));
        if self.history.len() > self.history_capacity {
            if let Some((j, s)) = self.history.pop_front() {
                for i in 0..d {
                    let contribution = self.alpha[i][j] * (-self.beta[i][j] * (t - s)).exp();
                    self.state[i][j] = (self.state[i][j] - contribution).max(0.0);
                }
            }
        }
        Ok(())
    }

    /// `λ_i(t)`, recursive for `t` at or after the last event.
    pub fn intensity(&self, dim: usize, t: f64) -> f64 {
        match self.last_t {
            None => self.mu[dim],
            Some(last) if t >= last => {
                let dt = t - last;
                self.mu[dim]
                    + self.state[dim]
                        .iter()
                        .zip(&self.beta[dim])
                        .map(|(s, b)| s * (-b * dt).exp())
                        .sum::<f64>()
            }
            Some(_) => self.intensity_exact(dim, t),
        }
    }

    pub fn intensities(&self, t: f64) -> Vec<f64> {
        (0..self.dimension()).map(|i| self.intensity(i, t)).collect()
    }

    /// Direct sum over the retained history.
    pub fn intensity_exact(&self, dim: usize, t: f64) -> f64 {
        self.mu[dim]
            + self
                .history
                .iter()
                .take_while(|(_, s)| *s <= t)
                .map(|&(j, s)| self.alpha[dim][j] * (-self.beta[dim][j] * (t - s)).exp())
                .sum::<f64>()
    }

    /// `α_ij / β_ij`.
    pub fn branching_matrix(&self) -> Vec<Vec<f64>> {
        self.alpha
            .iter()
            .zip(&self.beta)
            .map(|(a, b)| a.iter().zip(b).map(|(a, b)| a / b).collect())
            .collect()
    }

    /// Perron root of the branching matrix.
    ///
    /// Power iteration on `B + I`: the shift makes the dominant eigenvalue
    /// unique for any non-negative `B`, and `ρ(B) = ρ(B + I) - 1`.
    pub fn spectral_radius(&self) -> f64 {
        let b = self.branching_matrix();
        let d = b.len();
        let mut x = vec![1.0 / d as f64; d];
        let mut lambda = 0.0;

        for _ in 0..POWER_ITERATIONS {
            let y: Vec<f64> = (0..d)
                .map(|i| x[i] + b[i].iter().zip(&x).map(|(bij, xj)| bij * xj).sum::<f64>())
                .collect();
            let norm: f64 = y.iter().sum();
            if !(norm.is_finite() && norm > 0.0) {
                return f64::INFINITY;
            }
            let next = norm;
            x = y.into_iter().map(|v| v / norm).collect();
            if (next - lambda).abs() < POWER_TOLERANCE {
                lambda = next;
                break;
            }
            lambda = next;
        }
        (lambda - 1.0).max(0.0)
    }

    pub fn is_stationary(&self) -> bool {
        self.spectral_radius() < 1.0
    }

    pub fn mu(&self) -> &[f64] {
        &self.mu
    }

    pub fn alpha(&self) -> &[Vec<f64>] {
        &self.alpha
    }

    /// Mean off-diagonal branching ratio; 0 for a single dimension.
    pub fn cross_excitation(&self) -> f64 {
        let d = self.dimension();
        if d < 2 {
            return 0.0;
        }
        let b = self.branching_matrix();
        let off: f64 = (0..d)
            .flat_map(|i| (0..d).filter(move |&j| j != i).map(move |j| (i, j)))
            .map(|(i, j)| b[i][j])
            .sum();
        off / (d * (d - 1)) as f64
    }

    pub fn max_branching(&self) -> f64 {
        self.branching_matrix()
            .iter()
            .flatten()
            .copied()
            .fold(0.0, f64::max)
    }

    pub fn mean_branching(&self) -> f64 {
        let d = self.dimension();
        self.branching_matrix().iter().flatten().sum::<f64>() / (d * d) as f64
    }

    /// Events as `(dimension, time)` pairs on `(0, horizon]`.
    pub fn simulate(&self, horizon: f64, seed: u64) -> MultivariateSimulator {
        let mut model = self.clone();
        model.clear();
        MultivariateSimulator {
            model,
            horizon,
            max_events: DEFAULT_MAX_EVENTS,
            rng: StdRng::seed_from_u64(seed),
            t: 0.0,
            emitted: 0,
            done: !(horizon.is_finite() && horizon > 0.0),
        }
    }

    pub fn clear(&mut self) {
        for row in &mut self.state {
            row.iter_mut().for_each(|s| *s = 0.0);
        }
        self.last_t = None;
        self.history.clear();
    }
}

/// All dimensions' events as `(dimension, time)`, sorted by time.
fn merge(events: &[Vec<f64>]) -> Vec<(usize, f64)> {
    let mut merged: Vec<(usize, f64)> = events
        .iter()
        .enumerate()
        .flat_map(|(dim, times)| times.iter().map(move |&t| (dim, t)))
        .collect();
    merged.sort_by(|a, b| a.1.total_cmp(&b.1));
    merged
}

/// Log-likelihood of dimension `dim`'s events under
/// `λ(t) = μ + Σ_j α_j Σ_{s ∈ j, s < t} e^{-β (t - s)}`, over merged and
/// time-sorted events on `[0, horizon]`. `-∞` if the intensity is not
/// positive at an event.
pub fn row_log_likelihood(
    merged: &[(usize, f64)],
    horizon: f64,
    dim: usize,
    mu: f64,
    alpha_row: &[f64],
    beta: f64,
) -> f64 {
    let d = alpha_row.len();
    let mut state = vec![0.0; d];
    let mut exposure = vec![0.0; d];
    let mut prev: Option<f64> = None;
    let mut sum_log = 0.0;

    for &(j, t) in merged {
        if let Some(p) = prev {
            let decay = (-beta * (t - p)).exp();
            state.iter_mut().for_each(|s| *s *= decay);
        }
        if j == dim {
            let lambda = mu + alpha_row.iter().zip(&state).map(|(a, s)| a * s).sum::<f64>();
            if !(lambda > 0.0) {
                return f64::NEG_INFINITY;
            }
            sum_log += lambda.ln();
        }
        if j < d {
            state[j] += 1.0;
            exposure[j] += 1.0 - (-beta * (horizon - t)).exp();
        }
        prev = Some(t);
    }

    let compensator = mu * horizon
        + alpha_row
            .iter()
            .zip(&exposure)
            .map(|(a, e)| a / beta * e)
            .sum::<f64>();
    sum_log - compensator
}

/// Ogata thinning over the summed intensity.
#[derive(Debug)]
pub struct MultivariateSimulator {
    model: MultivariateHawkes,
    horizon: f64,
    max_events: usize,
    rng: StdRng,
    t: f64,
    emitted: usize,
    done: bool,
}

impl MultivariateSimulator {
    pub fn with_max_events(mut self, max_events: usize) -> Self {
        self.max_events = max_events;
        self
    }
}

impl Iterator for MultivariateSimulator {
    type Item = (usize, f64);

    fn next(&mut self) -> Option<(usize, f64)> {
        while !self.done {
            if self.emitted >= self.max_events {
                self.done = true;
                break;
            }

            let bound: f64 = self.model.intensities(self.t).iter().sum();
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

            let current = self.model.intensities(self.t);
            let total: f64 = current.iter().sum();
            let u: f64 = self.rng.gen();
            if u * bound > total {
                continue;
            }

            let mut pick = self.rng.gen::<f64>() * total;
            let mut dim = current.len() - 1;
            for (i, lambda) in current.iter().enumerate() {
                if pick < *lambda {
                    dim = i;
                    break;
                }
                pick -= lambda;
            }

            let t = self.t;
            if self.model.record(dim, t).is_err() {
                self.done = true;
                break;
            }
            self.emitted += 1;
            return Some((dim, t));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn two_dim() -> MultivariateHawkes {
        MultivariateHawkes::new(
            vec![0.5, 0.5],
            vec![vec![0.2, 0.3], vec![0.1, 0.4]],
            vec![vec![1.0, 1.0], vec![1.0, 1.0]],
        )
        .unwrap()
    }

    #[test]
    fn test_spectral_radius() {
        // Eigenvalues of [[0.2, 0.3], [0.1, 0.4]] are 0.1 and 0.5.
        assert_abs_diff_eq!(two_dim().spectral_radius(), 0.5, epsilon = 1e-9);

        let diag = MultivariateHawkes::new(
            vec![1.0, 1.0, 1.0],
            vec![vec![0.3, 0.0, 0.0], vec![0.0, 0.8, 0.0], vec![0.0, 0.0, 0.1]],
            vec![vec![1.0; 3]; 3],
        )
        .unwrap();
        assert_abs_diff_eq!(diag.spectral_radius(), 0.8, epsilon = 1e-9);
    }

    #[test]
    fn test_non_stationary_rejected() {
        let result = MultivariateHawkes::new(
            vec![0.5, 0.5],
            vec![vec![0.6, 0.5], vec![0.5, 0.6]],
            vec![vec![1.0, 1.0], vec![1.0, 1.0]],
        );
        match result {
            Err(Error::NonStationaryFit { branching_ratio }) => {
                assert_abs_diff_eq!(branching_ratio, 1.1, epsilon = 1e-9)
            }
            other => panic!("expected NonStationaryFit, got {other:?}"),
        }
    }

    #[test]
    fn test_shape_mismatch() {
        let result = MultivariateHawkes::new(vec![0.5, 0.5], vec![vec![0.1]], vec![vec![1.0]]);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_cross_excitation() {
        let mut m = two_dim();
        m.record(0, 1.0).unwrap();
        assert_relative_eq!(m.intensity(0, 1.0), 0.5 + 0.2);
        assert_relative_eq!(m.intensity(1, 1.0), 0.5 + 0.1);
        assert!(matches!(m.record(2, 2.0), Err(Error::Data(_))));
        assert!(matches!(m.record(0, 0.5), Err(Error::Data(_))));
    }

    #[test]
    fn test_recursive_matches_exact() {
        let mut m = MultivariateHawkes::new(
            vec![0.2, 0.1],
            vec![vec![0.5, 0.2], vec![0.4, 0.3]],
            vec![vec![2.0, 1.0], vec![3.0, 1.5]],
        )
        .unwrap();
        for (dim, t) in [(0, 0.1), (1, 0.4), (1, 0.45), (0, 1.3), (0, 2.0), (1, 2.7)] {
            m.record(dim, t).unwrap();
            for i in 0..2 {
                assert_relative_eq!(m.intensity(i, t + 0.3), m.intensity_exact(i, t + 0.3), max_relative = 1e-12);
            }
        }
    }

    #[test]
    fn test_simulated_rates() {
        // (I - B)^{-1} μ = [1, 1].
        let m = two_dim();
        let horizon = 200.0;
        let runs = 50;
        let mut counts = [0usize; 2];
        for seed in 0..runs {
            for (dim, _) in m.simulate(horizon, seed) {
                counts[dim] += 1;
            }
        }
        for c in counts {
            assert_relative_eq!(c as f64 / runs as f64, horizon, max_relative = 0.1);
        }
    }

    #[test]
    fn test_simulation_is_seeded() {
        let m = two_dim();
        let a: Vec<_> = m.simulate(30.0, 5).collect();
        let b: Vec<_> = m.simulate(30.0, 5).collect();
        assert_eq!(a, b);
        assert!(a.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn test_from_marginals() {
        let marginals = [
            HawkesParameters::exponential(0.3, 0.4, 1.0).unwrap(),
            HawkesParameters::exponential(0.6, 0.9, 3.0).unwrap(),
        ];
        let m = MultivariateHawkes::from_marginals(&marginals).unwrap();
        assert_abs_diff_eq!(m.spectral_radius(), 0.4, epsilon = 1e-9);
        assert_eq!(m.branching_matrix()[0][1], 0.0);
    }

    fn split(events: impl Iterator<Item = (usize, f64)>, d: usize) -> Vec<Vec<f64>> {
        let mut split = vec![Vec::new(); d];
        for (dim, t) in events {
            split[dim].push(t);
        }
        split
    }

    #[test]
    fn test_row_likelihood_reduces_to_univariate() {
        // One dimension: same as the univariate exponential likelihood.
        let events = [0.5, 0.9, 1.0, 2.2, 2.25, 4.0];
        let merged: Vec<(usize, f64)> = events.iter().map(|&t| (0, t)).collect();
        let p = HawkesParameters::exponential(0.4, 0.8, 2.0).unwrap();
        assert_relative_eq!(
            row_log_likelihood(&merged, 5.0, 0, 0.4, &[0.8], 2.0),
            crate::fit::log_likelihood(&events, 5.0, &p),
            max_relative = 1e-12
        );
    }

    #[test]
    fn test_joint_fit_recovers_cross_excitation() {
        let truth = two_dim();
        let horizon = 1_000.0;
        let events = split(truth.simulate(horizon, 9), 2);

        let fitted = MultivariateHawkes::fit(&events, horizon).unwrap();
        let b = fitted.branching_matrix();
        assert!((b[0][1] - 0.3).abs() < 0.15, "{b:?}");
        assert!(b[0][1] > b[1][0], "{b:?}");
        assert!((fitted.spectral_radius() - 0.5).abs() < 0.2, "{b:?}");
        assert!(fitted.is_stationary());
        for (mu, rate) in fitted.mu().iter().zip([0.5, 0.5]) {
            assert!((mu - rate).abs() < 0.25, "{:?}", fitted.mu());
        }
    }

    #[test]
    fn test_independent_streams_have_little_cross_excitation() {
        let marginals = [
            HawkesParameters::exponential(0.5, 0.4, 1.0).unwrap(),
            HawkesParameters::exponential(0.8, 0.3, 1.0).unwrap(),
        ];
        let truth = MultivariateHawkes::from_marginals(&marginals).unwrap();
        let horizon = 1_000.0;
        let fitted = MultivariateHawkes::fit(&split(truth.simulate(horizon, 3), 2), horizon).unwrap();
        assert!(fitted.cross_excitation() < 0.1, "{:?}", fitted.branching_matrix());
        assert!(fitted.max_branching() < 1.0);
    }

    #[test]
    fn test_joint_fit_needs_events_in_every_dimension() {
        let events = vec![vec![0.5, 1.0, 2.0], vec![1.5]];
        assert!(matches!(
            MultivariateHawkes::fit(&events, 3.0),
            Err(Error::InsufficientData(_))
        ));
        assert!(matches!(MultivariateHawkes::fit(&[], 3.0), Err(Error::Config(_))));
    }

    #[test]
    fn test_branching_diagnostics() {
        let m = two_dim();
        assert_abs_diff_eq!(m.cross_excitation(), 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(m.max_branching(), 0.4, epsilon = 1e-12);
        assert_abs_diff_eq!(m.mean_branching(), 0.25, epsilon = 1e-12);
    }
}
