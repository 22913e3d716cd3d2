//! Agent coordination for the microstructure alpha engine.
//!
//! This crate handles:
//! - The message envelope and topic routing
//! - Bounded mailboxes with block or drop-oldest backpressure
//! - Agent lifecycle, pause/resume and per-agent tasks
//! - Capability routing by priority, status and topology snapshots
//! - Heartbeat health monitoring
//! - Threshold consensus voting
//! - The ingestion, feature and Hawkes agents that form the pipeline

pub mod agent;
pub mod consensus;
pub mod coordinator;
pub mod feature_agent;
pub mod hawkes_agent;
pub mod health;
pub mod ingestion_agent;
pub mod mailbox;
pub mod message;

pub use agent::{Agent, AgentState, Lifecycle};
pub use consensus::tally;
pub use coordinator::{
    AgentStatus, Coordinator, CoordinatorStatus, NetworkTopology, Output, WorkerNode,
    COORDINATOR_ID, FEED_ID,
};
pub use feature_agent::FeatureAgent;
pub use hawkes_agent::HawkesAgent;
pub use health::HealthMonitor;
pub use ingestion_agent::IngestionAgent;
pub use mailbox::{Delivery, Mailbox};
pub use message::{
    topics, AgentId, AgentMessage, Command, ConsensusResult, DataPayload, ErrorReport,
    MessageType, Payload, StatusReport, Vote, VoteValue,
};
