//! Book imbalance and pressure measures.

use alpha_core::OrderBook;

/// `(bid - ask) / (bid + ask)` in [-1, 1]; 0 when both are 0.
#[inline]
pub fn simple_imbalance(bid_volume: f64, ask_volume: f64) -> f64 {
    let total = bid_volume + ask_volume;
    if total > 0.0 {
        (bid_volume - ask_volume) / total
    } else {
        0.0
    }
}

/// Top-of-book imbalance.
pub fn book_imbalance(book: &OrderBook) -> f64 {
    let bid = book.best_bid().map_or(0.0, |l| l.volume);
    let ask = book.best_ask().map_or(0.0, |l| l.volume);
    simple_imbalance(bid, ask)
}

/// Imbalance of volumes weighted by `decay^i` over the first `levels` levels.
pub fn weighted_imbalance(book: &OrderBook, levels: usize, decay: f64) -> f64 {
    let weighted = |side: &[alpha_core::OrderBookLevel]| -> f64 {
        let mut weight = 1.0;
        let mut total = 0.0;
        for level in side.iter().take(levels) {
            total += level.volume * weight;
            weight *= decay;
        }
        total
    };
    simple_imbalance(weighted(&book.bids), weighted(&book.asks))
}

/// `Σ bid_vol / dist - Σ ask_vol / dist`, with `dist` the distance from mid.
///
/// Levels sitting exactly at mid are skipped. 0 when either side is empty.
pub fn book_pressure(book: &OrderBook, levels: usize) -> f64 {
    let mid = book.mid_price();
    if mid <= 0.0 {
        return 0.0;
    }

    let pressure = |side: &[alpha_core::OrderBookLevel]| -> f64 {
        side.iter()
            .take(levels)
            .filter_map(|level| {
                let distance = (mid - level.price).abs();
                (distance > 0.0).then(|| level.volume / distance)
            })
            .sum()
    };

    pressure(&book.bids) - pressure(&book.asks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alpha_core::OrderBookLevel;
    use approx::assert_abs_diff_eq;

    fn book(bids: &[(f64, f64)], asks: &[(f64, f64)]) -> OrderBook {
        OrderBook {
            symbol: "WIN".to_string(),
            ts_ms: 0,
            seq: 1,
            bids: bids.iter().map(|&(p, v)| OrderBookLevel::new(p, v)).collect(),
            asks: asks.iter().map(|&(p, v)| OrderBookLevel::new(p, v)).collect(),
        }
    }

    #[test]
    fn test_zero_volume_imbalance_is_zero() {
        assert_eq!(simple_imbalance(0.0, 0.0), 0.0);
        let b = book(&[(100.0, 0.0)], &[(101.0, 0.0)]);
        assert_eq!(book_imbalance(&b), 0.0);
        assert_eq!(weighted_imbalance(&b, 5, 0.5), 0.0);
        assert_abs_diff_eq!(b.micro_price(), b.mid_price(), epsilon = 1e-12);
    }

    #[test]
    fn test_imbalance_bounds() {
        assert_abs_diff_eq!(simple_imbalance(10.0, 0.0), 1.0);
        assert_abs_diff_eq!(simple_imbalance(0.0, 10.0), -1.0);
        assert_abs_diff_eq!(simple_imbalance(30.0, 10.0), 0.5);
    }

    #[test]
    fn test_weighted_imbalance_decays_with_depth() {
        // Deep bid volume matters less than top ask volume.
        let b = book(&[(100.0, 10.0), (99.0, 40.0)], &[(101.0, 30.0)]);
        let expected = (10.0 + 20.0 - 30.0) / (10.0 + 20.0 + 30.0);
        assert_abs_diff_eq!(weighted_imbalance(&b, 5, 0.5), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_book_pressure() {
        // mid = 100.5; distances 0.5 and 1.5
        let b = book(&[(100.0, 10.0), (99.0, 30.0)], &[(101.0, 10.0)]);
        let expected = (10.0 / 0.5 + 30.0 / 1.5) - 10.0 / 0.5;
        assert_abs_diff_eq!(book_pressure(&b, 5), expected, epsilon = 1e-12);
        assert_abs_diff_eq!(book_pressure(&b, 1), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_book_pressure_empty_side() {
        let b = book(&[(100.0, 10.0)], &[]);
        assert_eq!(book_pressure(&b, 5), 0.0);
    }
}
