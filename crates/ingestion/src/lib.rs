//! Data ingestion and normalization for the microstructure alpha engine.
//!
//! This crate handles:
//! - Sequence gap and duplicate detection
//! - Order book reconstruction with per-level deltas
//! - Trade side inference (bid/ask classification with tick rule)
//! - Tick, volume and dollar bar sampling
//! - The feed input interface

pub mod book;
pub mod classifier;
pub mod feed;
pub mod sampler;
pub mod sequence;

pub use book::{BookStats, OrderBookState};
pub use classifier::{ClassificationStats, TradeClassifier};
pub use feed::{FeedEvent, FeedSource, ReplayFeed};
pub use sampler::BarSampler;
pub use sequence::{SeqCheck, SequenceGuard};
