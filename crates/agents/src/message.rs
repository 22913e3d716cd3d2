//! Inter-agent messages.

use alpha_core::{
    BookDelta, BookUpdate, EventKind, FeatureVector, HawkesFeatures, InformationBar, OrderBook,
    SeqNo, Tick, TimestampMs, TradeSide,
};
use alpha_hawkes::ParameterSnapshot;
use serde::{Deserialize, Serialize};

use crate::agent::AgentState;

pub type AgentId = String;

/// Routing class of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Data,
    Command,
    Status,
    Error,
    Heartbeat,
}

/// Market data and analytics published on a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topic", content = "data", rename_all = "snake_case")]
pub enum DataPayload {
    /// Raw feed tick.
    Tick(Tick),
    /// Raw feed book update.
    BookUpdate(BookUpdate),
    /// Book after an applied update.
    Book { book: OrderBook, delta: BookDelta },
    /// Classified trade print.
    Trade { tick: Tick, side: TradeSide },
    Bar(InformationBar),
    Features(FeatureVector),
    Hawkes { ts_ms: TimestampMs, features: HawkesFeatures },
    HawkesParams(Vec<ParameterSnapshot>),
}

impl DataPayload {
    pub fn topic(&self) -> &'static str {
        match self {
            DataPayload::Tick(_) => topics::TICK,
            DataPayload::BookUpdate(_) => topics::BOOK_UPDATE,
            DataPayload::Book { .. } => topics::BOOK,
            DataPayload::Trade { .. } => topics::TRADE,
            DataPayload::Bar(_) => topics::BAR,
            DataPayload::Features(_) => topics::FEATURES,
            DataPayload::Hawkes { .. } => topics::HAWKES,
            DataPayload::HawkesParams(_) => topics::HAWKES_PARAMS,
        }
    }
}

/// Topic names used for routing.
pub mod topics {
    pub const TICK: &str = "tick";
    pub const BOOK_UPDATE: &str = "book_update";
    pub const BOOK: &str = "book";
    pub const TRADE: &str = "trade";
    pub const BAR: &str = "bar";
    pub const FEATURES: &str = "features";
    pub const HAWKES: &str = "hawkes";
    pub const HAWKES_PARAMS: &str = "hawkes_params";
    pub const ERROR: &str = "error";
    /// Consensus topic: is the short-term outlook bullish?
    pub const BULLISH: &str = "bullish";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    RequestVote { topic: String, round: u64 },
    /// Refit one Hawkes stream now.
    Refit { kind: EventKind },
    /// Drop accumulated state, e.g. after a reconnect.
    Reset,
    /// Stop processing data until `Resume`; heartbeats continue.
    Pause,
    Resume,
}

/// A vote is either a yes/no or a score in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VoteValue {
    Bool(bool),
    Score(f64),
}

impl VoteValue {
    /// Scores count as positive from 0.5 upwards.
    pub fn is_positive(&self) -> bool {
        match *self {
            VoteValue::Bool(b) => b,
            VoteValue::Score(s) => s >= 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub agent_id: AgentId,
    pub value: VoteValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub topic: String,
    pub ratio: f64,
    pub passed: bool,
    pub voters: usize,
    pub positive: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StatusReport {
    State { state: AgentState, processed: u64 },
    /// Reply to a vote request; `None` abstains.
    Vote {
        topic: String,
        round: u64,
        value: Option<VoteValue>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub message: String,
    /// Set when the error is a sequence gap.
    pub gap: Option<(SeqNo, SeqNo)>,
}

impl ErrorReport {
    pub fn from_error(err: &alpha_core::Error) -> Self {
        let gap = match *err {
            alpha_core::Error::SequenceGapDetected { expected, got } => Some((expected, got)),
            _ => None,
        };
        Self {
            message: err.to_string(),
            gap,
        }
    }
}

/// Payload variants, one per message type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Payload {
    Data(DataPayload),
    Command(Command),
    Status(StatusReport),
    Error(ErrorReport),
    Heartbeat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub sender: AgentId,
    /// Direct recipient; topic routing applies when unset.
    pub receiver: Option<AgentId>,
    pub timestamp_ms: TimestampMs,
    pub payload: Payload,
}

impl AgentMessage {
    pub fn new(sender: impl Into<AgentId>, payload: Payload) -> Self {
        Self {
            sender: sender.into(),
            receiver: None,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            payload,
        }
    }

    pub fn data(sender: impl Into<AgentId>, data: DataPayload) -> Self {
        Self::new(sender, Payload::Data(data))
    }

    pub fn command(sender: impl Into<AgentId>, receiver: impl Into<AgentId>, command: Command) -> Self {
        let mut msg = Self::new(sender, Payload::Command(command));
        msg.receiver = Some(receiver.into());
        msg
    }

    pub fn error(sender: impl Into<AgentId>, report: ErrorReport) -> Self {
        Self::new(sender, Payload::Error(report))
    }

    pub fn heartbeat(sender: impl Into<AgentId>) -> Self {
        Self::new(sender, Payload::Heartbeat)
    }

    pub fn kind(&self) -> MessageType {
        match self.payload {
            Payload::Data(_) => MessageType::Data,
            Payload::Command(_) => MessageType::Command,
            Payload::Status(_) => MessageType::Status,
            Payload::Error(_) => MessageType::Error,
            Payload::Heartbeat => MessageType::Heartbeat,
        }
    }

    /// Routing topic, if the message is routed by topic.
    pub fn topic(&self) -> Option<&'static str> {
        match &self.payload {
            Payload::Data(data) => Some(data.topic()),
            Payload::Error(_) => Some(topics::ERROR),
            _ => None,
        }
    }
}
