//! Trade side inference from the quote carried by each tick.
//!
//! A print at or above the ask is buyer-initiated, at or below the bid is
//! seller-initiated. Prints inside the spread fall back to the tick rule.

use alpha_core::{Tick, TradeSide};

/// Statistics about trade classification quality.
#[derive(Debug, Clone, Default)]
pub struct ClassificationStats {
    /// Total ticks classified.
    pub total_trades: u64,
    pub buy_trades: u64,
    pub sell_trades: u64,
    pub ambiguous_trades: u64,
    /// Total volume processed.
    pub total_volume: f64,
    pub buy_volume: f64,
    pub sell_volume: f64,
    pub ambiguous_volume: f64,
    /// Ticks classified by the tick rule instead of the quote.
    pub tick_rule_trades: u64,
}

impl ClassificationStats {
    /// Get the fraction of ambiguous volume.
    pub fn ambiguous_frac(&self) -> f64 {
        if self.total_volume > 0.0 {
            self.ambiguous_volume / self.total_volume
        } else {
            0.0
        }
    }

    /// Reset statistics.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Classifies each tick's last print as buy, sell or ambiguous.
pub struct TradeClassifier {
    /// Whether to use tick rule fallback for in-spread prints.
    use_tick_rule: bool,
    /// Last trade price (for tick rule).
    last_trade_price: Option<f64>,
    /// Last trade side (for zero-tick continuation).
    last_trade_side: TradeSide,
    stats: ClassificationStats,
}

impl TradeClassifier {
    pub fn new(use_tick_rule: bool) -> Self {
        Self {
            use_tick_rule,
            last_trade_price: None,
            last_trade_side: TradeSide::Ambiguous,
            stats: ClassificationStats::default(),
        }
    }

    /// Classify a single tick.
    pub fn classify(&mut self, tick: &Tick) -> TradeSide {
        let quote_valid = tick.bid > 0.0 && tick.ask > 0.0 && tick.bid < tick.ask;

        let mut side = if !quote_valid {
            TradeSide::Ambiguous
        } else if tick.last >= tick.ask {
            TradeSide::Buy
        } else if tick.last <= tick.bid {
            TradeSide::Sell
        } else {
            TradeSide::Ambiguous
        };

        if side == TradeSide::Ambiguous && self.use_tick_rule {
            if let Some(last_price) = self.last_trade_price {
                side = if tick.last > last_price {
                    TradeSide::Buy
                } else if tick.last < last_price {
                    TradeSide::Sell
                } else {
                    // Zero-tick continuation
                    self.last_trade_side
                };
                if side != TradeSide::Ambiguous {
                    self.stats.tick_rule_trades += 1;
                }
            }
        }

        self.stats.total_trades += 1;
        self.stats.total_volume += tick.volume;
        match side {
            TradeSide::Buy => {
                self.stats.buy_trades += 1;
                self.stats.buy_volume += tick.volume;
            }
            TradeSide::Sell => {
                self.stats.sell_trades += 1;
                self.stats.sell_volume += tick.volume;
            }
            TradeSide::Ambiguous => {
                self.stats.ambiguous_trades += 1;
                self.stats.ambiguous_volume += tick.volume;
            }
        }

        self.last_trade_price = Some(tick.last);
        if side != TradeSide::Ambiguous {
            self.last_trade_side = side;
        }

        side
    }

    /// Get classification statistics.
    pub fn stats(&self) -> &ClassificationStats {
        &self.stats
    }

    /// Clear all state (last trade info and statistics).
    pub fn clear(&mut self) {
        self.last_trade_price = None;
        self.last_trade_side = TradeSide::Ambiguous;
        self.stats.reset();
    }
}

impl Default for TradeClassifier {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_tick(seq: u64, bid: f64, ask: f64, last: f64, volume: f64) -> Tick {
        Tick {
            seq,
            ts_ms: seq as i64 * 100,
            bid,
            ask,
            last,
            volume,
        }
    }

    #[test]
    fn test_classify_at_ask_and_bid() {
        let mut classifier = TradeClassifier::new(false);
        assert_eq!(classifier.classify(&make_tick(1, 100.0, 101.0, 101.0, 1.0)), TradeSide::Buy);
        assert_eq!(classifier.classify(&make_tick(2, 100.0, 101.0, 100.0, 1.0)), TradeSide::Sell);
        assert_eq!(classifier.classify(&make_tick(3, 100.0, 102.0, 101.0, 1.0)), TradeSide::Ambiguous);
    }

    #[test]
    fn test_tick_rule_fallback() {
        let mut classifier = TradeClassifier::new(true);
        // First in-spread print has no reference price.
        assert_eq!(classifier.classify(&make_tick(1, 100.0, 102.0, 101.0, 1.0)), TradeSide::Ambiguous);
        assert_eq!(classifier.classify(&make_tick(2, 100.0, 102.0, 101.5, 1.0)), TradeSide::Buy);
        assert_eq!(classifier.classify(&make_tick(3, 100.0, 102.0, 100.5, 1.0)), TradeSide::Sell);
        assert_eq!(classifier.stats().tick_rule_trades, 2);
    }

    #[test]
    fn test_zero_tick_continuation() {
        let mut classifier = TradeClassifier::new(true);
        assert_eq!(classifier.classify(&make_tick(1, 100.0, 102.0, 102.0, 1.0)), TradeSide::Buy);
        // Quote moved; same price is now inside the spread.
        assert_eq!(classifier.classify(&make_tick(2, 101.0, 103.0, 102.0, 1.0)), TradeSide::Buy);
    }

    #[test]
    fn test_stats() {
        let mut classifier = TradeClassifier::new(false);
        classifier.classify(&make_tick(1, 100.0, 101.0, 101.0, 0.1));
        classifier.classify(&make_tick(2, 100.0, 101.0, 100.0, 0.2));
        classifier.classify(&make_tick(3, 100.0, 101.0, 100.5, 0.3));

        let stats = classifier.stats();
        assert_eq!(stats.total_trades, 3);
        assert_eq!(stats.buy_trades, 1);
        assert_eq!(stats.sell_trades, 1);
        assert_eq!(stats.ambiguous_trades, 1);
        assert!((stats.buy_volume - 0.1).abs() < 1e-10);
        assert!((stats.sell_volume - 0.2).abs() < 1e-10);
        assert!((stats.ambiguous_frac() - 0.5).abs() < 1e-10);
    }
}
