//! Agent registry, message routing, liveness and consensus.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use alpha_core::config::AgentConfig;
use alpha_core::{Error, FeatureVector, Result};
use alpha_hawkes::ParameterSnapshot;
use alpha_ingestion::{FeedEvent, FeedSource};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::agent::{run_agent, Agent, AgentState};
use crate::consensus::tally;
use crate::health::HealthMonitor;
use crate::mailbox::{Delivery, Mailbox};
use crate::message::{
    AgentId, AgentMessage, Command, ConsensusResult, DataPayload, ErrorReport, MessageType,
    Payload, StatusReport, Vote, VoteValue,
};

pub const COORDINATOR_ID: &str = "coordinator";
/// Sender of feed events published through [`Coordinator::pump`].
pub const FEED_ID: &str = "feed";

/// What the coordinator hands to the downstream consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Features(FeatureVector),
    HawkesParams(Vec<ParameterSnapshot>),
    Consensus(ConsensusResult),
    Error { agent: AgentId, report: ErrorReport },
    Unhealthy(AgentId),
}

/// One row of [`Coordinator::status`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub id: AgentId,
    pub state: AgentState,
    pub healthy: bool,
    pub priority: i32,
    pub capabilities: Vec<String>,
    /// Messages handled, as of the last state report.
    pub processed: u64,
    pub pending: usize,
    pub dropped: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorStatus {
    pub agents: Vec<AgentStatus>,
    pub bus_pending: usize,
    pub bus_capacity: usize,
    /// Agent messages evicted from a full bus under `DropOldest`.
    pub bus_dropped: u64,
    /// Outputs discarded because the consumer fell behind.
    pub outputs_dropped: u64,
    /// Deliveries abandoned on a mailbox that stayed full.
    pub delivery_timeouts: u64,
    pub consensus_rounds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerNode {
    pub id: AgentId,
    pub state: AgentState,
    pub capabilities: Vec<String>,
    pub priority: i32,
}

/// Who is registered and which topics reach whom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkTopology {
    pub coordinator: AgentId,
    pub workers: Vec<WorkerNode>,
    /// Topic to subscribers, in registration order.
    pub connections: BTreeMap<String, Vec<AgentId>>,
}

struct AgentEntry {
    capabilities: Vec<String>,
    priority: i32,
    mailbox: Arc<Mailbox>,
    /// Last state the agent reported.
    state: AgentState,
    processed: u64,
    task: JoinHandle<()>,
}

struct Ballot {
    topic: String,
    round: u64,
    expected: BTreeSet<AgentId>,
    replies: BTreeMap<AgentId, Option<VoteValue>>,
}

impl Ballot {
    fn complete(&self) -> bool {
        self.replies.len() >= self.expected.len()
    }
}

/// Owns the agent table. Each registered agent runs in its own task and
/// talks to the coordinator only through its mailbox and the shared bus.
///
/// The bus is bounded like every mailbox and follows the same backpressure
/// policy, so agents producing faster than the coordinator dispatches either
/// wait or lose their oldest undelivered messages.
pub struct Coordinator {
    config: AgentConfig,
    agents: BTreeMap<AgentId, AgentEntry>,
    routes: BTreeMap<String, Vec<AgentId>>,
    health: HealthMonitor,
    bus: Arc<Mailbox>,
    outputs: Sender<Output>,
    output_rx: Option<Receiver<Output>>,
    outputs_dropped: u64,
    delivery_timeouts: u64,
    round: u64,
    ballot: Option<Ballot>,
}

impl Coordinator {
    pub fn new(config: &AgentConfig) -> Self {
        let (outputs, output_rx) = mpsc::channel(config.mailbox_capacity.max(1));
        Self {
            health: HealthMonitor::new(
                Duration::from_millis(config.heartbeat_interval_ms),
                config.max_missed_heartbeats,
            ),
            bus: Arc::new(Mailbox::new(config.mailbox_capacity, config.backpressure)),
            config: config.clone(),
            agents: BTreeMap::new(),
            routes: BTreeMap::new(),
            outputs,
            output_rx: Some(output_rx),
            outputs_dropped: 0,
            delivery_timeouts: 0,
            round: 0,
            ballot: None,
        }
    }

    /// Downstream stream of features, parameter snapshots, consensus results
    /// and surfaced errors. Can be taken once. Bounded by the mailbox
    /// capacity; outputs beyond it are dropped and counted.
    pub fn take_outputs(&mut self) -> Option<Receiver<Output>> {
        self.output_rx.take()
    }

    fn emit(&mut self, output: Output) {
        match self.outputs.try_send(output) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(_)) => {
                self.outputs_dropped += 1;
                if self.outputs_dropped.is_power_of_two() {
                    warn!(dropped = self.outputs_dropped, "Output consumer lagging, dropping outputs");
                }
            }
        }
    }

    fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.config.heartbeat_interval_ms)
    }

    fn liveness_window(&self) -> Duration {
        self.heartbeat_interval() * self.config.max_missed_heartbeats
    }

    /// Register and start an agent. Must be called within a Tokio runtime.
    pub fn register(&mut self, agent: Box<dyn Agent>) -> Result<()> {
        let id = agent.id().to_string();
        if id == COORDINATOR_ID || self.agents.contains_key(&id) {
            return Err(Error::agent(format!("agent id {id} already registered")));
        }

        let capabilities = agent.capabilities();
        let priority = agent.priority();
        for topic in &capabilities {
            self.routes.entry(topic.clone()).or_default().push(id.clone());
        }

        let mailbox = Arc::new(Mailbox::new(
            self.config.mailbox_capacity,
            self.config.backpressure,
        ));
        let task = tokio::spawn(run_agent(
            agent,
            mailbox.clone(),
            self.bus.clone(),
            self.heartbeat_interval(),
        ));

        self.health.register(&id, Instant::now());
        info!(agent = %id, capabilities = ?capabilities, priority, "Registered agent");
        self.agents.insert(
            id,
            AgentEntry {
                capabilities,
                priority,
                mailbox,
                state: AgentState::Initialized,
                processed: 0,
                task,
            },
        );
        Ok(())
    }

    pub fn agent_ids(&self) -> Vec<AgentId> {
        self.agents.keys().cloned().collect()
    }

    pub fn state(&self, id: &str) -> Option<AgentState> {
        self.agents.get(id).map(|e| e.state)
    }

    pub fn is_healthy(&self, id: &str) -> bool {
        self.health.is_healthy(id)
    }

    pub fn subscribers(&self, topic: &str) -> Vec<AgentId> {
        self.routes.get(topic).cloned().unwrap_or_default()
    }

    /// Running and healthy.
    fn is_available(&self, id: &str) -> bool {
        self.agents
            .get(id)
            .map_or(false, |e| e.state == AgentState::Running && self.health.is_healthy(id))
    }

    /// Agent messages waiting on the bus.
    pub fn bus_len(&self) -> usize {
        self.bus.len()
    }

    pub fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            agents: self
                .agents
                .iter()
                .map(|(id, e)| AgentStatus {
                    id: id.clone(),
                    state: e.state,
                    healthy: self.health.is_healthy(id),
                    priority: e.priority,
                    capabilities: e.capabilities.clone(),
                    processed: e.processed,
                    pending: e.mailbox.len(),
                    dropped: e.mailbox.dropped(),
                })
                .collect(),
            bus_pending: self.bus.len(),
            bus_capacity: self.bus.capacity(),
            bus_dropped: self.bus.dropped(),
            outputs_dropped: self.outputs_dropped,
            delivery_timeouts: self.delivery_timeouts,
            consensus_rounds: self.round,
        }
    }

    pub fn topology(&self) -> NetworkTopology {
        NetworkTopology {
            coordinator: COORDINATOR_ID.to_string(),
            workers: self
                .agents
                .iter()
                .map(|(id, e)| WorkerNode {
                    id: id.clone(),
                    state: e.state,
                    capabilities: e.capabilities.clone(),
                    priority: e.priority,
                })
                .collect(),
            connections: self.routes.clone(),
        }
    }

    /// Route a message from outside the agent set, such as a feed event.
    pub async fn publish(&mut self, message: AgentMessage) {
        self.dispatch(message).await;
    }

    /// Deliver `message` to the highest-priority available agent serving
    /// `capability`; ties go to the earliest registered.
    pub async fn route_to_capability(
        &mut self,
        capability: &str,
        mut message: AgentMessage,
    ) -> Result<AgentId> {
        let mut best: Option<(i32, AgentId)> = None;
        for id in self.subscribers(capability) {
            if !self.is_available(&id) {
                continue;
            }
            let priority = self.agents.get(&id).map_or(i32::MIN, |e| e.priority);
            if best.as_ref().map_or(true, |(p, _)| priority > *p) {
                best = Some((priority, id));
            }
        }
        let Some((_, id)) = best else {
            return Err(Error::agent(format!("no available agent for {capability}")));
        };
        debug!(capability, agent = %id, "Routing by capability");
        message.receiver = Some(id.clone());
        self.deliver(&id, message).await;
        Ok(id)
    }

    /// Ask an agent to stop processing data. It keeps heartbeating and is
    /// left out of routing and consensus until resumed.
    pub async fn pause(&mut self, id: &str) -> Result<()> {
        self.control(id, Command::Pause).await
    }

    pub async fn resume(&mut self, id: &str) -> Result<()> {
        self.control(id, Command::Resume).await
    }

    async fn control(&mut self, id: &str, command: Command) -> Result<()> {
        if !self.agents.contains_key(id) {
            return Err(Error::agent(format!("unknown agent {id}")));
        }
        self.deliver(id, AgentMessage::command(COORDINATOR_ID, id, command))
            .await;
        Ok(())
    }

    /// Publish every event from `feed` until it is exhausted, dispatching
    /// agent traffic in between. Returns the number of feed events.
    pub async fn pump<F: FeedSource + ?Sized>(&mut self, feed: &mut F) -> Result<usize> {
        let mut n = 0;
        while let Some(event) = feed.next_event().await? {
            let data = match event {
                FeedEvent::Tick(tick) => DataPayload::Tick(tick),
                FeedEvent::Book(update) => DataPayload::BookUpdate(update),
            };
            self.dispatch(AgentMessage::data(FEED_ID, data)).await;
            self.process_pending().await;
            n += 1;
        }
        debug!(events = n, "Feed exhausted");
        Ok(n)
    }

    /// Dispatch everything already on the bus without waiting.
    pub async fn process_pending(&mut self) -> usize {
        let mut n = 0;
        while let Some(message) = self.bus.try_recv() {
            self.dispatch(message).await;
            n += 1;
        }
        self.check_health();
        n
    }

    /// Dispatch bus traffic until `duration` has elapsed.
    pub async fn run_for(&mut self, duration: Duration) {
        let deadline = Instant::now() + duration;
        let bus = self.bus.clone();
        loop {
            match tokio::time::timeout_at(deadline, bus.recv()).await {
                Ok(Some(message)) => self.dispatch(message).await,
                Ok(None) | Err(_) => break,
            }
            self.check_health();
        }
        self.check_health();
    }

    /// Mark silent agents unhealthy. Returns the newly unhealthy ids.
    pub fn check_health(&mut self) -> Vec<AgentId> {
        let newly = self.health.check(Instant::now());
        for id in &newly {
            let err = Error::AgentUnhealthy(format!(
                "{id} missed {} heartbeats",
                self.config.max_missed_heartbeats
            ));
            warn!(agent = %id, error = %err, "Agent excluded from consensus");
            self.emit(Output::Unhealthy(id.clone()));
        }
        newly
    }

    async fn dispatch(&mut self, message: AgentMessage) {
        if self.agents.contains_key(&message.sender)
            && self.health.beat(&message.sender, Instant::now())
        {
            info!(agent = %message.sender, "Agent healthy again");
        }

        let forward = match &message.payload {
            Payload::Heartbeat => false,
            Payload::Status(StatusReport::State { state, processed }) => {
                if let Some(entry) = self.agents.get_mut(&message.sender) {
                    debug!(agent = %message.sender, ?state, processed, "Agent status");
                    entry.state = *state;
                    entry.processed = *processed;
                }
                false
            }
            Payload::Status(StatusReport::Vote { round, value, .. }) => {
                if let Some(ballot) = self.ballot.as_mut() {
                    if ballot.round == *round && ballot.expected.contains(&message.sender) {
                        ballot.replies.insert(message.sender.clone(), *value);
                    }
                }
                false
            }
            Payload::Data(data) => {
                let output = match data {
                    DataPayload::Features(fv) => Some(Output::Features(fv.clone())),
                    DataPayload::HawkesParams(snapshot) => {
                        Some(Output::HawkesParams(snapshot.clone()))
                    }
                    _ => None,
                };
                if let Some(output) = output {
                    self.emit(output);
                }
                true
            }
            Payload::Error(report) => {
                warn!(agent = %message.sender, error = %report.message, "Agent reported error");
                self.emit(Output::Error {
                    agent: message.sender.clone(),
                    report: report.clone(),
                });
                true
            }
            Payload::Command(_) => true,
        };
        if !forward {
            return;
        }

        if message.kind() != MessageType::Command {
            self.route(message).await;
            return;
        }
        match message.receiver.clone() {
            Some(receiver) => self.deliver(&receiver, message).await,
            None => {
                let targets: Vec<AgentId> = self
                    .agents
                    .keys()
                    .filter(|id| **id != message.sender)
                    .cloned()
                    .collect();
                for id in targets {
                    self.deliver(&id, message.clone()).await;
                }
            }
        }
    }

    /// Deliver to every subscriber of the message topic except its sender.
    /// Paused subscribers are skipped.
    async fn route(&mut self, message: AgentMessage) {
        let Some(topic) = message.topic() else { return };
        let subscribers = self.subscribers(topic);
        if subscribers.is_empty() {
            debug!(topic, "No subscribers");
            return;
        }
        for id in subscribers.iter().filter(|id| **id != message.sender) {
            if self.state(id) == Some(AgentState::Paused) {
                continue;
            }
            self.deliver(id, message.clone()).await;
        }
    }

    /// Send into the agent's mailbox. Under `Block` this waits for space for
    /// at most one liveness window before giving up on the message.
    async fn deliver(&mut self, id: &str, message: AgentMessage) {
        let Some(entry) = self.agents.get(id) else {
            warn!(agent = %id, "Dropping message for unknown agent");
            return;
        };
        let mailbox = entry.mailbox.clone();
        match tokio::time::timeout(self.liveness_window(), mailbox.send(message)).await {
            Ok(Ok(Delivery::Queued)) => {}
            Ok(Ok(Delivery::DroppedOldest)) => {
                debug!(agent = %id, dropped = mailbox.dropped(), "Mailbox full, dropped oldest");
            }
            Ok(Err(e)) => warn!(agent = %id, error = %e, "Delivery failed"),
            Err(_) => {
                self.delivery_timeouts += 1;
                warn!(agent = %id, pending = mailbox.len(), "Delivery timed out on a full mailbox");
            }
        }
    }

    /// Tally with the configured threshold.
    pub fn tally(&self, topic: &str, votes: &[Vote]) -> ConsensusResult {
        tally(topic, votes, self.config.consensus_threshold)
    }

    /// Ask every healthy running agent for a vote on `topic`.
    ///
    /// Agents that abstain or do not answer within the vote timeout are not
    /// counted. Fails with `ConsensusUnavailable` when no agent is eligible.
    pub async fn request_consensus(&mut self, topic: &str) -> Result<ConsensusResult> {
        self.process_pending().await;

        let voters: BTreeSet<AgentId> = self
            .agents
            .keys()
            .filter(|id| self.is_available(id))
            .cloned()
            .collect();

        if voters.is_empty() {
            let err = Error::ConsensusUnavailable(format!("no healthy voters for {topic}"));
            warn!(topic, error = %err, "Consensus unavailable");
            self.emit(Output::Error {
                agent: COORDINATOR_ID.to_string(),
                report: ErrorReport::from_error(&err),
            });
            return Err(err);
        }

        self.round += 1;
        let round = self.round;
        self.ballot = Some(Ballot {
            topic: topic.to_string(),
            round,
            expected: voters.clone(),
            replies: BTreeMap::new(),
        });

        for id in &voters {
            let request = AgentMessage::command(
                COORDINATOR_ID,
                id.clone(),
                Command::RequestVote {
                    topic: topic.to_string(),
                    round,
                },
            );
            self.deliver(id, request).await;
        }

        let deadline = Instant::now() + Duration::from_millis(self.config.vote_timeout_ms);
        let bus = self.bus.clone();
        while !self.ballot.as_ref().map_or(true, Ballot::complete) {
            match tokio::time::timeout_at(deadline, bus.recv()).await {
                Ok(Some(message)) => self.dispatch(message).await,
                Ok(None) | Err(_) => break,
            }
        }

        let Some(ballot) = self.ballot.take() else {
            return Err(Error::agent("ballot lost"));
        };
        let missing = ballot.expected.len() - ballot.replies.len();
        if missing > 0 {
            debug!(topic, round, missing, "Voters did not answer in time");
        }

        let votes: Vec<Vote> = ballot
            .replies
            .into_iter()
            .filter_map(|(agent_id, value)| value.map(|value| Vote { agent_id, value }))
            .collect();
        let result = self.tally(&ballot.topic, &votes);
        info!(
            topic,
            round,
            ratio = result.ratio,
            passed = result.passed,
            voters = result.voters,
            "Consensus round"
        );
        self.emit(Output::Consensus(result.clone()));
        Ok(result)
    }

    /// Drain and close the agent's mailbox, wait for its task and remove it
    /// from routing, liveness tracking and consensus.
    ///
    /// Bus traffic keeps being dispatched while waiting, so an agent blocked
    /// on a full bus can finish.
    pub async fn stop_agent(&mut self, id: &str) -> Result<()> {
        let Some(mut entry) = self.agents.remove(id) else {
            return Err(Error::agent(format!("unknown agent {id}")));
        };

        for topic in &entry.capabilities {
            if let Some(subscribers) = self.routes.get_mut(topic) {
                subscribers.retain(|s| s != id);
                if subscribers.is_empty() {
                    self.routes.remove(topic);
                }
            }
        }
        self.health.remove(id);

        let discarded = entry.mailbox.drain();
        entry.mailbox.close();

        let deadline = Instant::now() + self.liveness_window();
        let bus = self.bus.clone();
        loop {
            tokio::select! {
                _ = &mut entry.task => break,
                next = bus.recv() => match next {
                    Some(message) => self.dispatch(message).await,
                    None => break,
                },
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(agent = %id, "Agent did not stop in time, aborting");
                    entry.task.abort();
                    break;
                }
            }
        }

        info!(agent = %id, discarded, "Agent stopped and unregistered");
        Ok(())
    }

    /// Stop every agent.
    pub async fn shutdown(&mut self) {
        for id in self.agent_ids() {
            if let Err(e) = self.stop_agent(&id).await {
                warn!(agent = %id, error = %e, "Stop failed");
            }
        }
        self.process_pending().await;
        info!("Coordinator shut down");
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        // Wake agent tasks still waiting on either side.
        self.bus.close();
        for entry in self.agents.values() {
            entry.mailbox.close();
        }
    }
}
