//! Feature computation for the microstructure alpha engine.
//!
//! This crate handles:
//! - Micro-price estimators and spread measures
//! - Book imbalance, book pressure and multi-level order flow imbalance
//! - Rolling volatility, price velocity and acceleration
//! - Kyle's lambda and Amihud illiquidity
//! - Fractional differentiation
//! - RSI, MACD and Bollinger position
//! - The per-bar feature vector

pub mod engine;
pub mod fracdiff;
pub mod imbalance;
pub mod liquidity;
pub mod microprice;
pub mod order_flow;
pub mod technical;
pub mod volatility;
pub mod window;

pub use engine::FeatureEngine;
pub use fracdiff::FracDiff;
pub use liquidity::LiquidityTracker;
pub use order_flow::OfiAccumulator;
pub use technical::{Bollinger, Macd, Rsi};
pub use volatility::{PriceKinematics, RollingVolatility};
pub use window::RollingWindow;
