//! Core data types for the microstructure alpha engine.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Timestamp in milliseconds since Unix epoch (UTC).
pub type TimestampMs = i64;

/// Feed sequence number.
pub type SeqNo = u64;

/// Size/quantity type.
pub type Size = f64;

/// Convert a millisecond timestamp to a UTC datetime.
///
/// Returns `None` when the timestamp is outside chrono's range.
#[inline]
pub fn ts_to_datetime(ts_ms: TimestampMs) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ts_ms).single()
}

/// Convert a millisecond timestamp to fractional seconds.
#[inline]
pub fn ts_to_secs(ts_ms: TimestampMs) -> f64 {
    ts_ms as f64 / 1000.0
}

/// A single tick from the feed: top of book plus the last trade print.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Feed sequence number.
    pub seq: SeqNo,
    /// Timestamp in milliseconds.
    pub ts_ms: TimestampMs,
    /// Best bid price.
    pub bid: f64,
    /// Best ask price.
    pub ask: f64,
    /// Last traded price.
    pub last: f64,
    /// Traded volume of the last print.
    pub volume: Size,
}

impl Tick {
    /// Mid price of the quote carried by the tick.
    #[inline]
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    /// Traded notional (`last * volume`).
    #[inline]
    pub fn notional(&self) -> f64 {
        self.last * self.volume
    }

    /// Check that prices and volume are usable.
    pub fn validate(&self) -> Result<()> {
        if !self.last.is_finite() || self.last <= 0.0 {
            return Err(Error::data(format!("tick {} has invalid last price {}", self.seq, self.last)));
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(Error::data(format!("tick {} has invalid volume {}", self.seq, self.volume)));
        }
        Ok(())
    }
}

/// Inferred aggressor side of a trade print.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i8)]
pub enum TradeSide {
    /// Trade at or above ask (buyer-initiated).
    Buy = 1,
    /// Trade at or below bid (seller-initiated).
    Sell = -1,
    /// Trade between bid and ask (ambiguous).
    Ambiguous = 0,
}

impl TradeSide {
    /// Get the sign as f64.
    #[inline]
    pub fn sign_f64(self) -> f64 {
        (self as i8) as f64
    }
}

/// Side of the order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookSide {
    Bid,
    Ask,
}

/// A single price level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderBookLevel {
    pub price: f64,
    pub volume: Size,
}

impl OrderBookLevel {
    pub fn new(price: f64, volume: Size) -> Self {
        Self { price, volume }
    }
}

/// Limit order book snapshot. Best level is index 0 on both sides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    /// Instrument symbol.
    pub symbol: String,
    /// Snapshot timestamp in milliseconds.
    pub ts_ms: TimestampMs,
    /// Feed sequence number.
    pub seq: SeqNo,
    /// Bid levels, strictly decreasing in price.
    pub bids: Vec<OrderBookLevel>,
    /// Ask levels, strictly increasing in price.
    pub asks: Vec<OrderBookLevel>,
}

impl OrderBook {
    /// Create an empty book.
    pub fn empty(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ts_ms: 0,
            seq: 0,
            bids: Vec::new(),
            asks: Vec::new(),
        }
    }

    /// Best bid level.
    #[inline]
    pub fn best_bid(&self) -> Option<&OrderBookLevel> {
        self.bids.first()
    }

    /// Best ask level.
    #[inline]
    pub fn best_ask(&self) -> Option<&OrderBookLevel> {
        self.asks.first()
    }

    /// Mid price; 0 when either side is empty.
    pub fn mid_price(&self) -> f64 {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => (b.price + a.price) / 2.0,
            _ => 0.0,
        }
    }

    /// Spread; 0 when either side is empty.
    pub fn spread(&self) -> f64 {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => a.price - b.price,
            _ => 0.0,
        }
    }

    /// Volume-weighted micro-price of the top of book.
    ///
    /// Falls back to the mid price when both top-of-book volumes are zero.
    pub fn micro_price(&self) -> f64 {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => {
                let total = b.volume + a.volume;
                if total > 0.0 {
                    (b.price * a.volume + a.price * b.volume) / total
                } else {
                    (b.price + a.price) / 2.0
                }
            }
            _ => 0.0,
        }
    }

    /// Check ordering, crossing and volume invariants.
    pub fn validate(&self) -> Result<()> {
        for side in [&self.bids, &self.asks] {
            for level in side.iter() {
                if !level.price.is_finite() || level.price <= 0.0 {
                    return Err(Error::invalid_book(format!("non-positive price {}", level.price)));
                }
                if !level.volume.is_finite() || level.volume < 0.0 {
                    return Err(Error::invalid_book(format!("negative volume {}", level.volume)));
                }
            }
        }
        if self.bids.windows(2).any(|w| w[1].price >= w[0].price) {
            return Err(Error::invalid_book("bid levels not strictly decreasing"));
        }
        if self.asks.windows(2).any(|w| w[1].price <= w[0].price) {
            return Err(Error::invalid_book("ask levels not strictly increasing"));
        }
        if let (Some(b), Some(a)) = (self.best_bid(), self.best_ask()) {
            if b.price >= a.price {
                return Err(Error::invalid_book(format!("crossed book: bid {} >= ask {}", b.price, a.price)));
            }
        }
        Ok(())
    }
}

/// Partial book update for a single level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelUpdate {
    pub seq: SeqNo,
    pub ts_ms: TimestampMs,
    pub side: BookSide,
    /// Depth index (0 = best).
    pub index: usize,
    pub price: f64,
    /// New resting volume; 0 removes the level at `index`.
    pub volume: Size,
}

/// Inbound order book event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BookUpdate {
    /// Full refresh of the visible book.
    Snapshot(OrderBook),
    /// Replace or remove one level.
    Level(LevelUpdate),
}

impl BookUpdate {
    /// Sequence number of the update.
    pub fn seq(&self) -> SeqNo {
        match self {
            BookUpdate::Snapshot(book) => book.seq,
            BookUpdate::Level(level) => level.seq,
        }
    }

    /// Timestamp of the update.
    pub fn ts_ms(&self) -> TimestampMs {
        match self {
            BookUpdate::Snapshot(book) => book.ts_ms,
            BookUpdate::Level(level) => level.ts_ms,
        }
    }
}

/// Per-level volume changes between two consecutive book states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookDelta {
    pub seq: SeqNo,
    pub ts_ms: TimestampMs,
    /// Signed bid volume change per level.
    pub bid_deltas: Vec<f64>,
    /// Signed ask volume change per level.
    pub ask_deltas: Vec<f64>,
    /// True when there was no prior state to compare against.
    pub first: bool,
    /// Levels whose volume shrank at an unchanged price.
    pub cancellations: u32,
}

impl BookDelta {
    /// Delta describing a first observation.
    pub fn initial(seq: SeqNo, ts_ms: TimestampMs, depth: usize) -> Self {
        Self {
            seq,
            ts_ms,
            bid_deltas: vec![0.0; depth],
            ask_deltas: vec![0.0; depth],
            first: true,
            cancellations: 0,
        }
    }

    /// Order flow imbalance over the first `n` levels.
    pub fn ofi(&self, n: usize) -> f64 {
        if self.first {
            return 0.0;
        }
        self.bid_deltas
            .iter()
            .zip(self.ask_deltas.iter())
            .take(n)
            .map(|(b, a)| b - a)
            .sum()
    }
}

/// Information bar sampling rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarKind {
    /// Close after N ticks.
    Tick,
    /// Close after N units of traded volume.
    Volume,
    /// Close after N units of traded notional.
    Dollar,
}

/// Bar closed by accumulated market activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InformationBar {
    pub kind: BarKind,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: Size,
    /// Sum of `last * volume`.
    pub dollar_value: f64,
    /// Volume classified as buyer-initiated.
    pub buy_volume: Size,
    /// Volume classified as seller-initiated.
    pub sell_volume: Size,
    pub start_ms: TimestampMs,
    pub end_ms: TimestampMs,
    pub tick_count: u32,
}

impl InformationBar {
    /// Net signed volume (buy minus sell).
    #[inline]
    pub fn signed_volume(&self) -> f64 {
        self.buy_volume - self.sell_volume
    }
}

/// Number of slots in a feature vector.
pub const FEATURE_COUNT: usize = 27;

/// Slot names in vector order.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    // price
    "mid_price",
    "micro_price",
    "weighted_mid_price",
    "imbalance_adjusted_micro_price",
    // order flow
    "ofi_1",
    "ofi_2",
    "ofi_3",
    "ofi_5",
    // book imbalance
    "book_imbalance",
    "weighted_imbalance",
    "book_pressure",
    // spread
    "spread",
    "relative_spread",
    // volatility
    "realized_volatility",
    "price_velocity",
    "price_acceleration",
    // hawkes
    "hawkes_buy_intensity",
    "hawkes_sell_intensity",
    "hawkes_buy_sell_ratio",
    "hawkes_self_excitation",
    // liquidity
    "kyle_lambda",
    "amihud_illiquidity",
    // fractional differentiation
    "frac_diff_price",
    "frac_diff_volume",
    // technical
    "rsi",
    "macd_signal",
    "bollinger_position",
];

/// Fixed-order feature vector emitted once per bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Bar end timestamp.
    pub ts_ms: TimestampMs,
    pub values: [f64; FEATURE_COUNT],
}

impl FeatureVector {
    /// Slot index for a feature name.
    pub fn index_of(name: &str) -> Option<usize> {
        FEATURE_NAMES.iter().position(|n| *n == name)
    }

    /// Value of a named slot.
    pub fn get(&self, name: &str) -> Option<f64> {
        Self::index_of(name).map(|i| self.values[i])
    }

    /// Bar timestamp as a datetime.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        ts_to_datetime(self.ts_ms)
    }

    /// Iterate `(name, value)` pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        FEATURE_NAMES.iter().copied().zip(self.values.iter().copied())
    }
}

/// Hawkes-derived features. The first four fill vector slots; the rest are
/// diagnostics published alongside.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HawkesFeatures {
    pub buy_intensity: f64,
    pub sell_intensity: f64,
    /// `buy / (buy + sell)`, 0.5 when both are zero.
    pub buy_sell_ratio: f64,
    /// Current branching ratio α/β.
    pub self_excitation: f64,
    /// Cancel intensity over aggressive (buy + sell) intensity.
    #[serde(default)]
    pub cancel_ratio: f64,
    /// Mean off-diagonal branching ratio of the joint fit; 0 before one.
    #[serde(default)]
    pub cross_excitation: f64,
    /// Largest installed per-kind branching ratio.
    #[serde(default)]
    pub max_branching: f64,
}

impl Default for HawkesFeatures {
    fn default() -> Self {
        Self {
            buy_intensity: 0.0,
            sell_intensity: 0.0,
            buy_sell_ratio: 0.5,
            self_excitation: 0.0,
            cancel_ratio: 0.0,
            cross_excitation: 0.0,
            max_branching: 0.0,
        }
    }
}

/// Monitored order-flow event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    BuyAggressive,
    SellAggressive,
    Cancel,
}

impl EventKind {
    /// All monitored kinds in stream order.
    pub const ALL: [EventKind; 3] = [
        EventKind::BuyAggressive,
        EventKind::SellAggressive,
        EventKind::Cancel,
    ];

    /// Stream index.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Aggressor event for a classified trade side.
    pub fn from_side(side: TradeSide) -> Option<Self> {
        match side {
            TradeSide::Buy => Some(EventKind::BuyAggressive),
            TradeSide::Sell => Some(EventKind::SellAggressive),
            TradeSide::Ambiguous => None,
        }
    }
}
