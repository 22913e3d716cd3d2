//! Hawkes intensities for aggressive order flow and cancellations.

use alpha_core::config::HawkesConfig;
use alpha_core::{Error, EventKind, TimestampMs};
use alpha_hawkes::HawkesEngine;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::agent::Agent;
use crate::message::{
    topics, AgentMessage, Command, DataPayload, ErrorReport, Payload, VoteValue,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Stream(EventKind),
    Joint,
}

struct InFlight {
    target: Target,
    /// Set by a `Refit` command; a rejection is then reported as an error.
    requested: bool,
    handle: JoinHandle<alpha_core::Result<()>>,
}

/// Records trade and cancel events, publishes intensities on every bar and
/// refits each stream, and all streams jointly, on blocking workers.
pub struct HawkesAgent {
    id: String,
    engine: HawkesEngine,
    in_flight: Vec<InFlight>,
    last_ts: Option<TimestampMs>,
}

impl HawkesAgent {
    pub fn new(id: impl Into<String>, config: &HawkesConfig) -> alpha_core::Result<Self> {
        Ok(Self {
            id: id.into(),
            engine: HawkesEngine::new(config)?,
            in_flight: Vec::new(),
            last_ts: None,
        })
    }

    pub fn engine(&self) -> &HawkesEngine {
        &self.engine
    }

    fn running(&mut self, target: Target) -> Option<&mut InFlight> {
        self.in_flight.iter_mut().find(|job| job.target == target)
    }

    fn spawn(&mut self, target: Target, requested: bool) -> bool {
        let handle = match target {
            Target::Stream(kind) => {
                let now = self.last_ts.unwrap_or_default();
                let Some(job) = self.engine.fit_job(kind, now) else {
                    return false;
                };
                debug!(kind = ?kind, events = job.len(), requested, "Spawning Hawkes refit");
                tokio::task::spawn_blocking(move || job.run().map(|_| ()))
            }
            Target::Joint => {
                let now = self.last_ts.unwrap_or_default();
                let Some(job) = self.engine.joint_fit_job(now) else {
                    return false;
                };
                debug!(events = job.len(), "Spawning joint Hawkes fit");
                tokio::task::spawn_blocking(move || job.run().map(|_| ()))
            }
        };
        self.in_flight.push(InFlight {
            target,
            requested,
            handle,
        });
        true
    }

    fn record(&mut self, kind: EventKind, ts_ms: TimestampMs) -> alpha_core::Result<()> {
        self.engine.record(kind, ts_ms)?;
        self.last_ts = Some(self.last_ts.map_or(ts_ms, |t| t.max(ts_ms)));

        if self.running(Target::Stream(kind)).is_none() && self.engine.refit_due(kind, ts_ms) {
            self.spawn(Target::Stream(kind), false);
        }
        if self.running(Target::Joint).is_none() && self.engine.joint_refit_due(ts_ms) {
            self.spawn(Target::Joint, false);
        }
        Ok(())
    }

    /// Start a refit of `kind` unless one is already running, in which case
    /// its result is reported once it lands.
    fn request_refit(&mut self, kind: EventKind) -> Option<AgentMessage> {
        if let Some(job) = self.running(Target::Stream(kind)) {
            job.requested = true;
            debug!(kind = ?kind, "Hawkes refit already in flight");
            return None;
        }
        if self.spawn(Target::Stream(kind), true) {
            return None;
        }
        let err = Error::insufficient_data(format!("{kind:?} has fewer than 2 events"));
        Some(AgentMessage::error(self.id.clone(), ErrorReport::from_error(&err)))
    }

    /// Collect finished fits: a parameter snapshot if any stream installed
    /// new parameters, and an error for each rejected requested refit.
    async fn harvest(&mut self) -> Vec<AgentMessage> {
        let mut out = Vec::new();
        let mut installed = false;
        let mut pending = Vec::with_capacity(self.in_flight.len());
        for job in self.in_flight.drain(..) {
            if !job.handle.is_finished() {
                pending.push(job);
                continue;
            }
            match Self::settle(job).await {
                (Target::Stream(_), _, Ok(())) => installed = true,
                (Target::Stream(_), true, Err(e)) => {
                    out.push(AgentMessage::error(self.id.clone(), ErrorReport::from_error(&e)));
                }
                (Target::Joint, _, Ok(())) => {
                    if let Some(summary) = self.engine.cross_excitation() {
                        info!(
                            cross = summary.cross,
                            spectral_radius = summary.spectral_radius,
                            "Cross-excitation updated"
                        );
                    }
                }
                _ => {}
            }
        }
        self.in_flight = pending;
        if installed {
            out.push(self.params_message());
        }
        out
    }

    async fn settle(job: InFlight) -> (Target, bool, alpha_core::Result<()>) {
        let result = match job.handle.await {
            // Rejections are logged by the job itself.
            Ok(result) => result,
            Err(e) => {
                warn!(fit = ?job.target, error = %e, "Hawkes refit task failed");
                Err(Error::data(format!("refit task failed: {e}")))
            }
        };
        (job.target, job.requested, result)
    }

    fn params_message(&self) -> AgentMessage {
        AgentMessage::data(self.id.clone(), DataPayload::HawkesParams(self.engine.export()))
    }
}

#[async_trait]
impl Agent for HawkesAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> Vec<String> {
        vec![topics::TRADE.to_string(), topics::BOOK.to_string(), topics::BAR.to_string()]
    }

    async fn handle(&mut self, message: AgentMessage) -> anyhow::Result<Vec<AgentMessage>> {
        let mut out = Vec::new();

        match message.payload {
            Payload::Data(DataPayload::Trade { tick, side }) => {
                if let Some(kind) = EventKind::from_side(side) {
                    self.record(kind, tick.ts_ms)?;
                }
            }
            Payload::Data(DataPayload::Book { delta, .. }) if delta.cancellations > 0 => {
                self.record(EventKind::Cancel, delta.ts_ms)?;
            }
            Payload::Data(DataPayload::Bar(bar)) => {
                let features = self.engine.features(bar.end_ms);
                out.push(AgentMessage::data(
                    self.id.clone(),
                    DataPayload::Hawkes {
                        ts_ms: bar.end_ms,
                        features,
                    },
                ));
            }
            Payload::Command(Command::Refit { kind }) => {
                out.extend(self.request_refit(kind));
            }
            Payload::Command(Command::Reset) => {
                self.engine.reset();
                self.last_ts = None;
            }
            _ => {}
        }

        out.extend(self.harvest().await);
        Ok(out)
    }

    async fn on_tick(&mut self) -> anyhow::Result<Vec<AgentMessage>> {
        Ok(self.harvest().await)
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        for job in std::mem::take(&mut self.in_flight) {
            Self::settle(job).await;
        }
        Ok(())
    }

    /// Bullish when buy pressure outruns sell pressure.
    async fn vote(&mut self, topic: &str) -> Option<VoteValue> {
        if topic != topics::BULLISH {
            return None;
        }
        let now = self.last_ts?;
        let features = self.engine.features(now);
        Some(VoteValue::Bool(features.buy_intensity > features.sell_intensity))
    }
}
