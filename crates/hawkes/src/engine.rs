//! Per-kind Hawkes streams with background refitting.

use std::sync::Arc;

use alpha_core::config::{FitMethod, HawkesConfig};
use alpha_core::{Error, EventKind, HawkesFeatures, Result, TimestampMs};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::{debug, info, warn};

use crate::fit::fit;
use crate::kernel::Kernel;
use crate::multivariate::MultivariateHawkes;
use crate::params::{HawkesParameters, ParameterStore};
use crate::process::UnivariateHawkes;
use crate::simulate::OgataSimulator;

#[derive(Debug)]
struct Stream {
    kind: EventKind,
    process: UnivariateHawkes,
    store: Arc<ParameterStore>,
    seen_version: u64,
    last_refit: Option<f64>,
}

impl Stream {
    /// Pick up parameters installed since the last look.
    fn sync(&mut self) {
        let version = self.store.version();
        if version != self.seen_version {
            self.process.set_params(*self.store.load());
            self.seen_version = version;
            debug!(kind = ?self.kind, version, "Streaming state rebuilt");
        }
    }
}

/// Installed parameters for one event kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSnapshot {
    pub kind: EventKind,
    pub version: u64,
    pub events: usize,
    pub params: HawkesParameters,
    pub branching_ratio: f64,
}

/// A self-contained refit that can run off the streaming path.
#[derive(Debug)]
pub struct FitJob {
    pub kind: EventKind,
    events: Vec<f64>,
    horizon: f64,
    kernel: Kernel,
    method: FitMethod,
    store: Arc<ParameterStore>,
}

/// Parameters a refit installed.
#[derive(Debug, Clone, Copy)]
pub struct FitOutcome {
    pub kind: EventKind,
    pub params: HawkesParameters,
    pub version: u64,
}

impl FitJob {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Fit and install. A rejected fit leaves the store untouched.
    pub fn run(self) -> Result<FitOutcome> {
        let params = match fit(&self.events, self.horizon, self.kernel, self.method) {
            Ok(params) => params,
            Err(e) => {
                warn!(kind = ?self.kind, events = self.events.len(), error = %e, "Hawkes refit rejected");
                return Err(e);
            }
        };
        let version = self.store.install(params)?;
        info!(
            kind = ?self.kind,
            events = self.events.len(),
            mu = params.mu,
            alpha = params.alpha,
            beta = params.beta,
            branching_ratio = params.branching_ratio(),
            version,
            "Hawkes parameters refit"
        );
        Ok(FitOutcome {
            kind: self.kind,
            params,
            version,
        })
    }
}

/// Branching summary of the last accepted joint fit across all kinds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CrossExcitation {
    /// Mean off-diagonal branching ratio.
    pub cross: f64,
    pub max_branching: f64,
    pub mean_branching: f64,
    pub spectral_radius: f64,
    pub events: usize,
}

/// Joint fit over every stream's window, in [`EventKind::ALL`] order.
#[derive(Debug)]
pub struct JointFitJob {
    events: Vec<Vec<f64>>,
    horizon: f64,
    slot: Arc<RwLock<Option<CrossExcitation>>>,
}

impl JointFitJob {
    pub fn len(&self) -> usize {
        self.events.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fit and publish the summary. A rejected fit keeps the previous one.
    pub fn run(self) -> Result<CrossExcitation> {
        let events = self.len();
        let model = match MultivariateHawkes::fit(&self.events, self.horizon) {
            Ok(model) => model,
            Err(e) => {
                warn!(events, error = %e, "Joint Hawkes fit rejected");
                return Err(e);
            }
        };
        let summary = CrossExcitation {
            cross: model.cross_excitation(),
            max_branching: model.max_branching(),
            mean_branching: model.mean_branching(),
            spectral_radius: model.spectral_radius(),
            events,
        };
        *self.slot.write() = Some(summary);
        Ok(summary)
    }
}

/// Monte Carlo forecast of an event rate over a horizon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateForecast {
    /// Mean events per second across simulated paths.
    pub mean: f64,
    pub std_dev: f64,
    pub samples: usize,
}

/// One Hawkes stream per monitored event kind.
///
/// Times are seconds relative to the first event the engine observes.
#[derive(Debug)]
pub struct HawkesEngine {
    config: HawkesConfig,
    kernel: Kernel,
    origin_ms: Option<TimestampMs>,
    streams: Vec<Stream>,
    joint: Arc<RwLock<Option<CrossExcitation>>>,
    last_joint_refit: Option<f64>,
}

impl HawkesEngine {
    pub fn new(config: &HawkesConfig) -> Result<Self> {
        let params = HawkesParameters::from_config(config)?;
        let streams = EventKind::ALL
            .iter()
            .map(|&kind| Stream {
                kind,
                process: UnivariateHawkes::new(params, config.window_events),
                store: Arc::new(ParameterStore::new(params)),
                seen_version: 0,
                last_refit: None,
            })
            .collect();

        Ok(Self {
            config: config.clone(),
            kernel: params.kernel,
            origin_ms: None,
            streams,
            joint: Arc::new(RwLock::new(None)),
            last_joint_refit: None,
        })
    }

    fn secs(&self, ts_ms: TimestampMs) -> f64 {
        let origin = self.origin_ms.unwrap_or(ts_ms);
        (ts_ms - origin) as f64 / 1000.0
    }

    fn stream(&mut self, kind: EventKind) -> &mut Stream {
        &mut self.streams[kind.index()]
    }

    /// Record an event of `kind` at `ts_ms`.
    pub fn record(&mut self, kind: EventKind, ts_ms: TimestampMs) -> Result<()> {
        if self.origin_ms.is_none() {
            self.origin_ms = Some(ts_ms);
        }
        let t = self.secs(ts_ms);
        let stream = self.stream(kind);
        stream.sync();
        stream.process.record(t)
    }

    pub fn intensity(&mut self, kind: EventKind, ts_ms: TimestampMs) -> f64 {
        let t = self.secs(ts_ms);
        let stream = self.stream(kind);
        stream.sync();
        stream.process.intensity(t)
    }

    pub fn event_count(&self, kind: EventKind) -> usize {
        self.streams[kind.index()].process.len()
    }

    /// Enough events and the refit interval has elapsed.
    pub fn refit_due(&self, kind: EventKind, now_ms: TimestampMs) -> bool {
        let stream = &self.streams[kind.index()];
        if stream.process.len() < self.config.min_events_for_fit {
            return false;
        }
        match stream.last_refit {
            None => true,
            Some(last) => self.secs(now_ms) - last >= self.config.refit_interval_secs,
        }
    }

    /// Snapshot the window for an off-thread refit and mark the refit as started.
    ///
    /// Returns `None` when fewer than two events are available.
    pub fn fit_job(&mut self, kind: EventKind, now_ms: TimestampMs) -> Option<FitJob> {
        let now = self.secs(now_ms);
        let kernel = self.kernel;
        let method = self.config.fit_method;
        let stream = self.stream(kind);

        let first = stream.process.first_time()?;
        let last = stream.process.last_time()?;
        if stream.process.len() < 2 {
            return None;
        }
        stream.last_refit = Some(now);

        let events: Vec<f64> = stream.process.events().map(|t| t - first).collect();
        Some(FitJob {
            kind,
            events,
            horizon: (now.max(last) - first).max(f64::EPSILON),
            kernel,
            method,
            store: stream.store.clone(),
        })
    }

    /// Every stream has enough events and the refit interval has elapsed
    /// since the last joint fit.
    pub fn joint_refit_due(&self, now_ms: TimestampMs) -> bool {
        if self
            .streams
            .iter()
            .any(|s| s.process.len() < self.config.min_events_for_fit)
        {
            return false;
        }
        match self.last_joint_refit {
            None => true,
            Some(last) => self.secs(now_ms) - last >= self.config.refit_interval_secs,
        }
    }

    /// Snapshot every stream for a joint fit and mark it as started.
    ///
    /// Times share one origin, the earliest event in any window. Returns
    /// `None` when a stream has fewer than two events.
    pub fn joint_fit_job(&mut self, now_ms: TimestampMs) -> Option<JointFitJob> {
        if self.streams.iter().any(|s| s.process.len() < 2) {
            return None;
        }
        let now = self.secs(now_ms);
        let first = self
            .streams
            .iter()
            .filter_map(|s| s.process.first_time())
            .fold(f64::INFINITY, f64::min);
        let last = self
            .streams
            .iter()
            .filter_map(|s| s.process.last_time())
            .fold(f64::NEG_INFINITY, f64::max);
        self.last_joint_refit = Some(now);

        Some(JointFitJob {
            events: self
                .streams
                .iter()
                .map(|s| s.process.events().map(|t| t - first).collect())
                .collect(),
            horizon: (now.max(last) - first).max(f64::EPSILON),
            slot: self.joint.clone(),
        })
    }

    pub fn cross_excitation(&self) -> Option<CrossExcitation> {
        *self.joint.read()
    }

    /// Forecast the rate of `kind` over the next `horizon_secs` by
    /// simulating `samples` paths conditioned on the current window.
    pub fn predict_rate(
        &mut self,
        kind: EventKind,
        now_ms: TimestampMs,
        horizon_secs: f64,
        samples: usize,
        seed: u64,
    ) -> Result<RateForecast> {
        if samples == 0 {
            return Err(Error::config("rate forecast needs at least one sample"));
        }
        if !(horizon_secs.is_finite() && horizon_secs > 0.0) {
            return Err(Error::config(format!(
                "rate forecast horizon must be positive, got {horizon_secs}"
            )));
        }
        let now = self.secs(now_ms);
        let stream = self.stream(kind);
        stream.sync();
        let params = *stream.process.params();
        let history: Vec<f64> = stream.process.events().map(|t| t - now).collect();

        let rates: Vec<f64> = (0..samples as u64)
            .map(|i| {
                let sim = OgataSimulator::conditioned(params, &history, horizon_secs, seed.wrapping_add(i));
                sim.count() as f64 / horizon_secs
            })
            .collect();

        let forecast = RateForecast {
            mean: rates.iter().mean(),
            std_dev: if samples > 1 { rates.iter().population_std_dev() } else { 0.0 },
            samples,
        };
        debug!(kind = ?kind, mean = forecast.mean, std_dev = forecast.std_dev, "Hawkes rate forecast");
        Ok(forecast)
    }

    /// Refit `kind` on the current window synchronously.
    pub fn refit(&mut self, kind: EventKind, now_ms: TimestampMs) -> Result<HawkesParameters> {
        let job = self.fit_job(kind, now_ms).ok_or_else(|| {
            Error::insufficient_data(format!("{kind:?} has fewer than 2 events"))
        })?;
        let outcome = job.run()?;
        self.stream(kind).sync();
        Ok(outcome.params)
    }

    /// Install externally estimated parameters.
    pub fn install(&mut self, kind: EventKind, params: HawkesParameters) -> Result<u64> {
        let stream = self.stream(kind);
        match stream.store.install(params) {
            Ok(version) => {
                stream.sync();
                Ok(version)
            }
            Err(e) => {
                warn!(kind = ?kind, error = %e, "Hawkes parameters rejected");
                Err(e)
            }
        }
    }

    /// Shared store for `kind`; background refits install through it.
    pub fn store(&self, kind: EventKind) -> Arc<ParameterStore> {
        self.streams[kind.index()].store.clone()
    }

    pub fn parameters(&self, kind: EventKind) -> HawkesParameters {
        *self.streams[kind.index()].store.load()
    }

    /// Buy/sell intensities at `ts_ms`, the mean branching ratio of the two
    /// aggressor streams and the cancel-to-trade intensity ratio. Cross
    /// excitation is 0 until a joint fit has been accepted.
    pub fn features(&mut self, ts_ms: TimestampMs) -> HawkesFeatures {
        let buy_intensity = self.intensity(EventKind::BuyAggressive, ts_ms);
        let sell_intensity = self.intensity(EventKind::SellAggressive, ts_ms);
        let cancel_intensity = self.intensity(EventKind::Cancel, ts_ms);
        let total = buy_intensity + sell_intensity;
        let buy_sell_ratio = if total > 0.0 { buy_intensity / total } else { 0.5 };
        let cancel_ratio = if total > 0.0 { cancel_intensity / total } else { 0.0 };
        let self_excitation = 0.5
            * (self.parameters(EventKind::BuyAggressive).branching_ratio()
                + self.parameters(EventKind::SellAggressive).branching_ratio());
        let max_branching = EventKind::ALL
            .iter()
            .map(|&k| self.parameters(k).branching_ratio())
            .fold(0.0, f64::max);

        HawkesFeatures {
            buy_intensity,
            sell_intensity,
            buy_sell_ratio,
            self_excitation,
            cancel_ratio,
            cross_excitation: self.cross_excitation().map_or(0.0, |c| c.cross),
            max_branching,
        }
    }

    pub fn export(&self) -> Vec<ParameterSnapshot> {
        self.streams
            .iter()
            .map(|s| {
                let params = *s.store.load();
                ParameterSnapshot {
                    kind: s.kind,
                    version: s.store.version(),
                    events: s.process.len(),
                    params,
                    branching_ratio: params.branching_ratio(),
                }
            })
            .collect()
    }

    /// Drop all events; installed parameters and the joint summary are kept.
    pub fn reset(&mut self) {
        self.origin_ms = None;
        self.last_joint_refit = None;
        for stream in &mut self.streams {
            stream.process.clear();
            stream.last_refit = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulate::simulate;
    use approx::assert_relative_eq;

    fn engine() -> HawkesEngine {
        HawkesEngine::new(&HawkesConfig::default()).unwrap()
    }

    /// Feed a simulated path into `kind`, returning the last timestamp.
    fn feed(engine: &mut HawkesEngine, kind: EventKind, params: HawkesParameters, horizon: f64) -> TimestampMs {
        let mut last = 0;
        for t in simulate(params, horizon, 21) {
            last = (t * 1000.0) as TimestampMs;
            engine.record(kind, last).unwrap();
        }
        last
    }

    #[test]
    fn test_neutral_features_without_events() {
        let mut e = engine();
        let f = e.features(1_000);
        assert_relative_eq!(f.buy_intensity, 0.1);
        assert_relative_eq!(f.sell_intensity, 0.1);
        assert_relative_eq!(f.buy_sell_ratio, 0.5);
        assert_relative_eq!(f.self_excitation, 0.5);
        assert_relative_eq!(f.cancel_ratio, 0.5);
        assert_relative_eq!(f.cross_excitation, 0.0);
        assert_relative_eq!(f.max_branching, 0.5);
    }

    #[test]
    fn test_cancel_ratio_tracks_cancel_bursts() {
        let mut e = engine();
        for i in 0..10 {
            e.record(EventKind::Cancel, 1_000 + i * 50).unwrap();
        }
        let f = e.features(1_500);
        assert!(f.cancel_ratio > 1.0, "{f:?}");
    }

    #[test]
    fn test_joint_fit_publishes_cross_excitation() {
        let config = HawkesConfig {
            min_events_for_fit: 20,
            ..HawkesConfig::default()
        };
        let mut e = HawkesEngine::new(&config).unwrap();
        assert!(!e.joint_refit_due(0));
        assert!(e.joint_fit_job(0).is_none());

        let truth = MultivariateHawkes::new(
            vec![0.5, 0.5, 0.3],
            vec![vec![0.2, 0.3, 0.0], vec![0.1, 0.3, 0.0], vec![0.0, 0.0, 0.2]],
            vec![vec![1.0; 3]; 3],
        )
        .unwrap();
        let mut last = 0;
        for (dim, t) in truth.simulate(600.0, 5) {
            last = (t * 1000.0) as TimestampMs;
            e.record(EventKind::ALL[dim], last).unwrap();
        }
        assert!(e.joint_refit_due(last));

        let job = e.joint_fit_job(last).unwrap();
        assert!(!e.joint_refit_due(last));
        let summary = std::thread::spawn(move || job.run()).join().unwrap().unwrap();
        assert!(summary.spectral_radius < 1.0);
        assert!(summary.cross > 0.0);
        assert_eq!(e.cross_excitation(), Some(summary));

        let f = e.features(last);
        assert_relative_eq!(f.cross_excitation, summary.cross);
    }

    #[test]
    fn test_rate_forecast_rises_after_burst() {
        let mut e = engine();
        let quiet = e.predict_rate(EventKind::BuyAggressive, 0, 5.0, 400, 7).unwrap();
        // Baseline plus offspring of a stationary process: μ / (1 - n).
        assert!((quiet.mean - 0.2).abs() < 0.1, "{quiet:?}");

        for i in 0..8 {
            e.record(EventKind::BuyAggressive, 10_000 + i * 20).unwrap();
        }
        let hot = e.predict_rate(EventKind::BuyAggressive, 10_200, 5.0, 400, 7).unwrap();
        assert!(hot.mean > quiet.mean + 0.3, "{hot:?} vs {quiet:?}");
        assert!(hot.std_dev > 0.0);
        assert_eq!(hot.samples, 400);

        assert!(e.predict_rate(EventKind::Cancel, 0, 5.0, 0, 7).is_err());
        assert!(e.predict_rate(EventKind::Cancel, 0, 0.0, 10, 7).is_err());
    }

    #[test]
    fn test_buy_pressure_moves_ratio() {
        let mut e = engine();
        for i in 0..5 {
            e.record(EventKind::BuyAggressive, 1_000 + i * 100).unwrap();
        }
        let f = e.features(1_500);
        assert!(f.buy_intensity > f.sell_intensity);
        assert!(f.buy_sell_ratio > 0.5);
    }

    #[test]
    fn test_timestamps_are_relative_to_first_event() {
        let mut e = engine();
        e.record(EventKind::Cancel, 1_700_000_000_000).unwrap();
        // One event at t = 0: λ(0) = μ + α.
        assert_relative_eq!(e.intensity(EventKind::Cancel, 1_700_000_000_000), 0.6);
        assert!(e.record(EventKind::Cancel, 1_699_999_999_000).is_err());
    }

    #[test]
    fn test_rejected_install_keeps_parameters() {
        let mut e = engine();
        let before = e.parameters(EventKind::BuyAggressive);
        let bad = HawkesParameters {
            mu: 0.1,
            alpha: 2.0,
            beta: 1.0,
            kernel: Kernel::Exponential,
        };
        let err = e.install(EventKind::BuyAggressive, bad).unwrap_err();
        assert!(matches!(err, Error::NonStationaryFit { branching_ratio } if branching_ratio == 2.0));
        assert_eq!(e.parameters(EventKind::BuyAggressive), before);
        assert_eq!(e.store(EventKind::BuyAggressive).version(), 0);
    }

    #[test]
    fn test_install_rebuilds_streaming_intensity() {
        let mut e = engine();
        e.record(EventKind::SellAggressive, 0).unwrap();
        e.record(EventKind::SellAggressive, 500).unwrap();
        let p = HawkesParameters::exponential(0.3, 0.2, 0.5).unwrap();
        assert_eq!(e.install(EventKind::SellAggressive, p).unwrap(), 1);
        let expected = 0.3 + 0.2 * (-0.5_f64 * 1.0).exp() + 0.2 * (-0.5_f64 * 0.5).exp();
        assert_relative_eq!(e.intensity(EventKind::SellAggressive, 1_000), expected, max_relative = 1e-12);
    }

    #[test]
    fn test_refit_due_and_insufficient_data() {
        let mut e = engine();
        assert!(!e.refit_due(EventKind::BuyAggressive, 0));
        assert!(matches!(
            e.refit(EventKind::BuyAggressive, 0),
            Err(Error::InsufficientData(_))
        ));
        for i in 0..50 {
            e.record(EventKind::BuyAggressive, i * 200).unwrap();
        }
        assert!(e.refit_due(EventKind::BuyAggressive, 10_000));
        assert!(e.fit_job(EventKind::BuyAggressive, 10_000).is_some());
        assert!(!e.refit_due(EventKind::BuyAggressive, 20_000));
        assert!(e.refit_due(EventKind::BuyAggressive, 70_000));
    }

    #[test]
    fn test_refit_installs_new_parameters() {
        let mut e = engine();
        let truth = HawkesParameters::exponential(0.5, 0.8, 2.0).unwrap();
        let last = feed(&mut e, EventKind::BuyAggressive, truth, 1_000.0);

        let fitted = e.refit(EventKind::BuyAggressive, last).unwrap();
        assert!(fitted.is_stationary());
        assert_eq!(e.parameters(EventKind::BuyAggressive), fitted);
        assert_eq!(e.store(EventKind::BuyAggressive).version(), 1);
        // Untouched streams keep the initial set.
        assert_eq!(e.store(EventKind::SellAggressive).version(), 0);
    }

    #[test]
    fn test_fit_job_runs_off_thread() {
        let mut e = engine();
        let truth = HawkesParameters::exponential(0.5, 0.8, 2.0).unwrap();
        let last = feed(&mut e, EventKind::SellAggressive, truth, 500.0);

        let job = e.fit_job(EventKind::SellAggressive, last).unwrap();
        let outcome = std::thread::spawn(move || job.run()).join().unwrap().unwrap();
        assert_eq!(outcome.version, 1);

        // The streaming path notices the swap on its next read.
        let t = last + 10;
        let lambda = e.intensity(EventKind::SellAggressive, t);
        assert!(lambda >= outcome.params.mu);
        assert_eq!(e.parameters(EventKind::SellAggressive), outcome.params);
    }

    #[test]
    fn test_export_and_reset() {
        let mut e = engine();
        e.record(EventKind::Cancel, 10).unwrap();
        let snapshot = e.export();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[EventKind::Cancel.index()].events, 1);
        assert_relative_eq!(snapshot[0].branching_ratio, 0.5);

        e.reset();
        assert_eq!(e.event_count(EventKind::Cancel), 0);
        // Origin is re-established after a reset.
        e.record(EventKind::Cancel, 5).unwrap();
    }
}
