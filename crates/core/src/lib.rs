//! Core types and configuration for the microstructure alpha engine.
//!
//! This crate provides shared types used across all other crates:
//! - Market data types (ticks, book levels, book deltas, information bars)
//! - The fixed-order feature vector
//! - Configuration structures
//! - Common error types

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;
