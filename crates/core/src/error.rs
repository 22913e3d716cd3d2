//! Error types for the microstructure alpha engine.

use thiserror::Error;

use crate::types::SeqNo;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the microstructure alpha engine.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or unordered book; the update is dropped.
    #[error("Invalid book state: {0}")]
    InvalidBookState(String),

    /// Missing events in an instrument stream.
    #[error("Sequence gap detected: expected {expected}, got {got}")]
    SequenceGapDetected { expected: SeqNo, got: SeqNo },

    /// Rejected Hawkes refit; previous parameters are retained.
    #[error("Non-stationary Hawkes fit: branching ratio {branching_ratio:.4} >= 1")]
    NonStationaryFit { branching_ratio: f64 },

    /// Agent missed its heartbeats.
    #[error("Agent unhealthy: {0}")]
    AgentUnhealthy(String),

    /// No healthy voters for a consensus round.
    #[error("Consensus unavailable: {0}")]
    ConsensusUnavailable(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data error (invalid or missing data).
    #[error("Data error: {0}")]
    Data(String),

    /// Insufficient data for computation.
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// Agent lifecycle or mailbox error.
    #[error("Agent error: {0}")]
    Agent(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with message.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an invalid book state error.
    pub fn invalid_book(msg: impl Into<String>) -> Self {
        Error::InvalidBookState(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a data error.
    pub fn data(msg: impl Into<String>) -> Self {
        Error::Data(msg.into())
    }

    /// Create an insufficient data error.
    pub fn insufficient_data(msg: impl Into<String>) -> Self {
        Error::InsufficientData(msg.into())
    }

    /// Create an agent error.
    pub fn agent(msg: impl Into<String>) -> Self {
        Error::Agent(msg.into())
    }

    /// Whether the next clean update recovers from this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::InvalidBookState(_) | Error::Data(_) | Error::NonStationaryFit { .. }
        )
    }
}
