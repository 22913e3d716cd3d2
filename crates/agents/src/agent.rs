//! Agent trait, lifecycle and the per-agent task loop.

use std::sync::Arc;
use std::time::Duration;

use alpha_core::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::mailbox::Mailbox;
use crate::message::{AgentMessage, Command, ErrorReport, Payload, StatusReport, VoteValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentState {
    Initialized,
    Starting,
    Running,
    /// Heartbeating and answering commands, but not processing data.
    Paused,
    Stopping,
    Stopped,
    Error,
}

impl AgentState {
    pub fn can_transition_to(self, next: AgentState) -> bool {
        use AgentState::*;
        matches!(
            (self, next),
            (Initialized, Starting)
                | (Starting, Running)
                | (Starting, Error)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Stopping)
                | (Paused, Stopping)
                | (Error, Stopping)
                | (Running, Error)
                | (Paused, Error)
                | (Stopping, Stopped)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == AgentState::Stopped
    }
}

/// Guarded state machine.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: AgentState,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: AgentState::Initialized,
        }
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn transition(&mut self, next: AgentState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::agent(format!(
                "illegal transition {:?} -> {:?}",
                self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// An analytic unit driven by its own task.
///
/// The coordinator delivers DATA and COMMAND messages from the agent's
/// mailbox to `handle`; vote requests go to `vote`. Heartbeats and status
/// reports are sent by the task loop, not by implementations.
#[async_trait]
pub trait Agent: Send + 'static {
    fn id(&self) -> &str;

    /// Topics this agent subscribes to.
    fn capabilities(&self) -> Vec<String>;

    /// Preference when a capability is served by a single agent; higher wins.
    fn priority(&self) -> i32 {
        0
    }

    async fn start(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Process one message. Returned messages are routed by the coordinator.
    ///
    /// Errors that downcast to a transient [`alpha_core::Error`] are reported
    /// and processing continues; any other error moves the agent to `Error`.
    async fn handle(&mut self, message: AgentMessage) -> anyhow::Result<Vec<AgentMessage>>;

    /// Called on every heartbeat tick while running. Returned messages are
    /// routed like those from `handle`.
    async fn on_tick(&mut self) -> anyhow::Result<Vec<AgentMessage>> {
        Ok(Vec::new())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Opinion on `topic`; `None` abstains.
    async fn vote(&mut self, _topic: &str) -> Option<VoteValue> {
        None
    }
}

/// Send on the bus. Waits for space under `Block`; a closed bus means the
/// coordinator is gone and the message is dropped.
async fn emit(bus: &Mailbox, message: AgentMessage) {
    if let Err(e) = bus.send(message).await {
        debug!(error = %e, "Bus closed, message dropped");
    }
}

/// Report a failed hook or handler. Returns true if the agent must stop.
async fn report_failure(id: &str, bus: &Mailbox, err: anyhow::Error) -> bool {
    let core = err.downcast_ref::<Error>();
    let report = match core {
        Some(e) => ErrorReport::from_error(e),
        None => ErrorReport {
            message: format!("{err:#}"),
            gap: None,
        },
    };
    let transient = core.map_or(false, Error::is_transient);
    emit(bus, AgentMessage::error(id, report)).await;

    if transient {
        warn!(agent = %id, error = %err, "Message handling failed");
    } else {
        error!(agent = %id, error = %err, "Agent failed");
    }
    !transient
}

/// Task body for one registered agent.
pub(crate) async fn run_agent(
    mut agent: Box<dyn Agent>,
    mailbox: Arc<Mailbox>,
    bus: Arc<Mailbox>,
    heartbeat: Duration,
) {
    let id = agent.id().to_string();
    let mut lifecycle = Lifecycle::new();
    let mut processed: u64 = 0;
    let mut skipped: u64 = 0;

    let status = |state: AgentState, processed: u64| {
        AgentMessage::new(
            id.clone(),
            Payload::Status(StatusReport::State { state, processed }),
        )
    };

    if lifecycle.transition(AgentState::Starting).is_ok() {
        emit(&bus, status(AgentState::Starting, processed)).await;
    }

    if let Err(err) = agent.start().await {
        error!(agent = %id, error = %err, "Agent failed to start");
        emit(
            &bus,
            AgentMessage::error(
                id.clone(),
                ErrorReport {
                    message: format!("{err:#}"),
                    gap: None,
                },
            ),
        )
        .await;
        if lifecycle.transition(AgentState::Error).is_ok() {
            emit(&bus, status(AgentState::Error, processed)).await;
        }
        return;
    }

    if lifecycle.transition(AgentState::Running).is_ok() {
        emit(&bus, status(AgentState::Running, processed)).await;
    }
    debug!(agent = %id, "Agent running");

    let mut ticker = tokio::time::interval(heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                emit(&bus, AgentMessage::heartbeat(id.clone())).await;
                if lifecycle.state() != AgentState::Running {
                    continue;
                }
                match agent.on_tick().await {
                    Ok(outputs) => {
                        for out in outputs {
                            emit(&bus, out).await;
                        }
                    }
                    Err(err) => {
                        if report_failure(&id, &bus, err).await {
                            if lifecycle.transition(AgentState::Error).is_ok() {
                                emit(&bus, status(AgentState::Error, processed)).await;
                            }
                            break;
                        }
                    }
                }
            }
            next = mailbox.recv() => {
                let Some(message) = next else { break };

                match &message.payload {
                    Payload::Command(Command::RequestVote { topic, round }) => {
                        let value = agent.vote(topic).await;
                        emit(
                            &bus,
                            AgentMessage::new(
                                id.clone(),
                                Payload::Status(StatusReport::Vote {
                                    topic: topic.clone(),
                                    round: *round,
                                    value,
                                }),
                            ),
                        )
                        .await;
                        continue;
                    }
                    Payload::Command(command @ (Command::Pause | Command::Resume)) => {
                        let next = if *command == Command::Pause {
                            AgentState::Paused
                        } else {
                            AgentState::Running
                        };
                        match lifecycle.transition(next) {
                            Ok(()) => {
                                info!(agent = %id, state = ?next, skipped, "Agent state changed");
                                emit(&bus, status(next, processed)).await;
                            }
                            Err(e) => debug!(agent = %id, error = %e, "Ignoring command"),
                        }
                        continue;
                    }
                    Payload::Heartbeat | Payload::Status(_) => continue,
                    _ => {}
                }

                if lifecycle.state() == AgentState::Paused {
                    skipped += 1;
                    continue;
                }
                processed += 1;

                match agent.handle(message).await {
                    Ok(outputs) => {
                        for out in outputs {
                            emit(&bus, out).await;
                        }
                    }
                    Err(err) => {
                        if report_failure(&id, &bus, err).await {
                            if lifecycle.transition(AgentState::Error).is_ok() {
                                emit(&bus, status(AgentState::Error, processed)).await;
                            }
                            break;
                        }
                    }
                }
            }
        }
    }

    if lifecycle.transition(AgentState::Stopping).is_ok() {
        emit(&bus, status(AgentState::Stopping, processed)).await;
    }
    if let Err(err) = agent.stop().await {
        warn!(agent = %id, error = %err, "Agent stop hook failed");
    }
    if lifecycle.transition(AgentState::Stopped).is_ok() {
        emit(&bus, status(AgentState::Stopped, processed)).await;
    }
    info!(agent = %id, processed, skipped, "Agent task finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use alpha_core::config::BackpressurePolicy;

    #[test]
    fn test_legal_transitions() {
        let mut lc = Lifecycle::new();
        lc.transition(AgentState::Starting).unwrap();
        lc.transition(AgentState::Running).unwrap();
        lc.transition(AgentState::Paused).unwrap();
        lc.transition(AgentState::Running).unwrap();
        lc.transition(AgentState::Error).unwrap();
        lc.transition(AgentState::Stopping).unwrap();
        lc.transition(AgentState::Stopped).unwrap();
        assert!(lc.state().is_terminal());
    }

    #[test]
    fn test_illegal_transitions() {
        let mut lc = Lifecycle::new();
        assert!(lc.transition(AgentState::Running).is_err());
        assert!(lc.transition(AgentState::Paused).is_err());
        assert_eq!(lc.state(), AgentState::Initialized);

        lc.transition(AgentState::Starting).unwrap();
        assert!(lc.transition(AgentState::Paused).is_err());
        lc.transition(AgentState::Running).unwrap();
        assert!(lc.transition(AgentState::Stopped).is_err());
        lc.transition(AgentState::Stopping).unwrap();
        lc.transition(AgentState::Stopped).unwrap();
        for next in [
            AgentState::Initialized,
            AgentState::Starting,
            AgentState::Running,
            AgentState::Paused,
            AgentState::Stopping,
            AgentState::Error,
        ] {
            assert!(lc.transition(next).is_err());
        }
        assert!(!AgentState::Initialized.can_transition_to(AgentState::Error));
        assert!(!AgentState::Paused.can_transition_to(AgentState::Paused));
    }

    /// Echoes every data message back on the bus.
    struct Echo;

    #[async_trait]
    impl Agent for Echo {
        fn id(&self) -> &str {
            "echo"
        }

        fn capabilities(&self) -> Vec<String> {
            Vec::new()
        }

        async fn handle(&mut self, message: AgentMessage) -> anyhow::Result<Vec<AgentMessage>> {
            Ok(vec![message])
        }
    }

    fn states(bus: &Mailbox) -> (Vec<AgentState>, usize) {
        let mut states = Vec::new();
        let mut echoed = 0;
        while let Some(message) = bus.try_recv() {
            match message.payload {
                Payload::Status(StatusReport::State { state, .. }) => states.push(state),
                Payload::Heartbeat => {}
                _ => echoed += 1,
            }
        }
        (states, echoed)
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_agent_skips_data() {
        let mailbox = Arc::new(Mailbox::new(16, BackpressurePolicy::Block));
        let bus = Arc::new(Mailbox::new(64, BackpressurePolicy::Block));
        let task = tokio::spawn(run_agent(
            Box::new(Echo),
            mailbox.clone(),
            bus.clone(),
            Duration::from_millis(100),
        ));
        let data = || AgentMessage::new("feed", Payload::Error(ErrorReport { message: "x".into(), gap: None }));

        mailbox.send(data()).await.unwrap();
        mailbox.send(AgentMessage::command("c", "echo", Command::Pause)).await.unwrap();
        mailbox.send(data()).await.unwrap();
        mailbox.send(AgentMessage::command("c", "echo", Command::Resume)).await.unwrap();
        mailbox.send(data()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        mailbox.close();
        task.await.unwrap();

        let (states, echoed) = states(&bus);
        assert_eq!(
            states,
            vec![
                AgentState::Starting,
                AgentState::Running,
                AgentState::Paused,
                AgentState::Running,
                AgentState::Stopping,
                AgentState::Stopped,
            ]
        );
        assert_eq!(echoed, 2);
    }
}
