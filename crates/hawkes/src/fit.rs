//! Likelihood and parameter estimation.

use alpha_core::config::FitMethod;
use alpha_core::{Error, Result};
use tracing::debug;

use crate::kernel::Kernel;
use crate::optimize::NelderMead;
use crate::params::HawkesParameters;

/// Lags with `β·Δ` beyond this contribute nothing measurable in the E-step.
const EM_TRUNCATION: f64 = 30.0;
const EM_MAX_ITERATIONS: usize = 500;
const EM_TOLERANCE: f64 = 1e-8;

/// `Σ log λ(t_i) − ∫_0^T λ(s) ds` for sorted events in `[0, T]`.
///
/// O(n) for the exponential kernel, O(n²) otherwise. Returns `-∞` when the
/// intensity is non-positive at an event.
pub fn log_likelihood(events: &[f64], horizon: f64, params: &HawkesParameters) -> f64 {
    let HawkesParameters { mu, alpha, beta, kernel } = *params;

    let mut sum_log = 0.0;
    match kernel {
        Kernel::Exponential => {
            // a = Σ_{j<i} e^{-β(t_i - t_j)}
            let mut a = 0.0;
            let mut prev: Option<f64> = None;
            for &t in events {
                if let Some(p) = prev {
                    a = (-beta * (t - p)).exp() * (1.0 + a);
                }
                let lambda = mu + alpha * a;
                if lambda <= 0.0 {
                    return f64::NEG_INFINITY;
                }
                sum_log += lambda.ln();
                prev = Some(t);
            }
        }
        Kernel::PowerLaw { .. } => {
            for (i, &t) in events.iter().enumerate() {
                let lambda = mu
                    + events[..i]
                        .iter()
                        .map(|&tj| kernel.value(alpha, beta, t - tj))
                        .sum::<f64>();
                if lambda <= 0.0 {
                    return f64::NEG_INFINITY;
                }
                sum_log += lambda.ln();
            }
        }
    }

    let compensator = mu * horizon
        + events
            .iter()
            .map(|&t| kernel.integral(alpha, beta, horizon - t))
            .sum::<f64>();

    sum_log - compensator
}

/// Estimate parameters from event times observed on `[0, horizon]`.
///
/// The result is validated: a non-stationary estimate is returned as
/// [`Error::NonStationaryFit`] and must not be installed.
pub fn fit(
    events: &[f64],
    horizon: f64,
    kernel: Kernel,
    method: FitMethod,
) -> Result<HawkesParameters> {
    check_events(events, horizon)?;
    match method {
        FitMethod::Mle => fit_mle(events, horizon, kernel),
        FitMethod::Em => match kernel {
            Kernel::Exponential => fit_em(events, horizon),
            Kernel::PowerLaw { .. } => Err(Error::config(
                "EM estimation is only available for the exponential kernel",
            )),
        },
    }
}

pub(crate) fn check_events(events: &[f64], horizon: f64) -> Result<()> {
    if events.len() < 2 {
        return Err(Error::insufficient_data(format!(
            "need at least 2 events to fit, got {}",
            events.len()
        )));
    }
    if !(horizon.is_finite() && horizon > 0.0) {
        return Err(Error::data(format!("invalid horizon {horizon}")));
    }
    if events.iter().any(|t| !t.is_finite() || *t < 0.0 || *t > horizon) {
        return Err(Error::data("event times must lie in [0, horizon]"));
    }
    if events.windows(2).any(|w| w[1] < w[0]) {
        return Err(Error::data("event times must be sorted"));
    }
    Ok(())
}

fn fit_mle(events: &[f64], horizon: f64, kernel: Kernel) -> Result<HawkesParameters> {
    let rate = events.len() as f64 / horizon;
    // α that gives a branching ratio of 0.5 at unit β.
    let unit_alpha = match kernel {
        Kernel::Exponential => 0.5,
        Kernel::PowerLaw { exponent } if exponent > 1.0 => 0.5 * (exponent - 1.0),
        Kernel::PowerLaw { .. } => {
            return Err(Error::NonStationaryFit {
                branching_ratio: f64::INFINITY,
            })
        }
    };

    let objective = |x: &[f64]| {
        let params = HawkesParameters {
            mu: x[0].exp(),
            alpha: x[1].exp(),
            beta: x[2].exp(),
            kernel,
        };
        -log_likelihood(events, horizon, &params)
    };

    let optimizer = NelderMead {
        tolerance: 1e-8,
        ..NelderMead::default()
    };

    let mut best: Option<(Vec<f64>, f64)> = None;
    for beta0 in [rate.max(1e-3), 10.0 * rate.max(1e-3)] {
        let start = [(0.5 * rate).ln(), (unit_alpha * beta0).ln(), beta0.ln()];
        let first = optimizer.minimize(objective, &start);
        // Restart from the first optimum to escape a collapsed simplex.
        let second = optimizer.minimize(objective, &first.x);
        debug!(
            beta0,
            iterations = first.iterations + second.iterations,
            converged = second.converged,
            nll = second.fx,
            "MLE run finished"
        );
        if best.as_ref().map_or(true, |(_, fx)| second.fx < *fx) {
            best = Some((second.x, second.fx));
        }
    }

    match best {
        Some((x, fx)) if fx.is_finite() => {
            HawkesParameters::new(x[0].exp(), x[1].exp(), x[2].exp(), kernel)
        }
        _ => Err(Error::data("likelihood optimisation did not find a finite optimum")),
    }
}

fn fit_em(events: &[f64], horizon: f64) -> Result<HawkesParameters> {
    let n = events.len() as f64;
    let rate = n / horizon;
    let mut mu = 0.5 * rate;
    let mut beta = rate.max(1e-3);
    let mut alpha = 0.5 * beta;

    for iteration in 0..EM_MAX_ITERATIONS {
        let mut background = 0.0;
        let mut offspring = 0.0;
        let mut offspring_lag = 0.0;

        for (i, &ti) in events.iter().enumerate() {
            let mut kernel_sum = 0.0;
            let mut lagged = 0.0;
            for &tj in events[..i].iter().rev() {
                let lag = ti - tj;
                if beta * lag > EM_TRUNCATION {
                    break;
                }
                let w = alpha * (-beta * lag).exp();
                kernel_sum += w;
                lagged += w * lag;
            }
            let lambda = mu + kernel_sum;
            if lambda <= 0.0 {
                continue;
            }
            background += mu / lambda;
            offspring += kernel_sum / lambda;
            offspring_lag += lagged / lambda;
        }

        let new_mu = background / horizon;
        let new_beta = if offspring_lag > 0.0 {
            offspring / offspring_lag
        } else {
            beta
        };
        let exposure: f64 = events
            .iter()
            .map(|&t| 1.0 - (-new_beta * (horizon - t)).exp())
            .sum();
        let new_alpha = if exposure > 0.0 {
            new_beta * offspring / exposure
        } else {
            0.0
        };

        let change = ((new_mu - mu).abs() / mu.max(1e-12))
            .max((new_alpha - alpha).abs() / alpha.max(1e-12))
            .max((new_beta - beta).abs() / beta.max(1e-12));

        mu = new_mu;
        alpha = new_alpha;
        beta = new_beta;

        if !(mu.is_finite() && alpha.is_finite() && beta.is_finite()) {
            return Err(Error::data("EM iteration diverged"));
        }
        if change < EM_TOLERANCE {
            debug!(iterations = iteration + 1, "EM converged");
            break;
        }
    }

    HawkesParameters::exponential(mu, alpha, beta)
}
