//! Fair-price estimators and spread measures over a book snapshot.

use alpha_core::OrderBook;

use crate::imbalance::book_imbalance;

/// Mid price; 0 when either side is empty.
#[inline]
pub fn mid_price(book: &OrderBook) -> f64 {
    book.mid_price()
}

/// Top-of-book volume-weighted micro-price, mid price when both volumes are 0.
#[inline]
pub fn micro_price(book: &OrderBook) -> f64 {
    book.micro_price()
}

/// Micro-price over the first `levels` levels of both sides.
///
/// Each level contributes `price * volume * decay^i`, normalized by the total
/// weighted volume. Falls back to the mid price when that total is 0.
pub fn weighted_mid_price(book: &OrderBook, levels: usize, decay: f64) -> f64 {
    let mut weighted_notional = 0.0;
    let mut weighted_volume = 0.0;

    for side in [&book.bids, &book.asks] {
        let mut weight = 1.0;
        for level in side.iter().take(levels) {
            weighted_notional += level.price * level.volume * weight;
            weighted_volume += level.volume * weight;
            weight *= decay;
        }
    }

    if weighted_volume > 0.0 {
        weighted_notional / weighted_volume
    } else {
        book.mid_price()
    }
}

/// Micro-price shifted by `coeff * spread` toward the heavier side of the top level.
pub fn imbalance_adjusted_micro_price(book: &OrderBook, coeff: f64) -> f64 {
    let imbalance = book_imbalance(book);
    let sign = if imbalance > 0.0 {
        1.0
    } else if imbalance < 0.0 {
        -1.0
    } else {
        0.0
    };
    book.micro_price() + coeff * book.spread() * sign
}

/// Absolute spread; 0 when either side is empty.
#[inline]
pub fn spread(book: &OrderBook) -> f64 {
    book.spread()
}

/// Spread relative to mid; 0 when mid is 0.
pub fn relative_spread(book: &OrderBook) -> f64 {
    let mid = book.mid_price();
    if mid > 0.0 {
        book.spread() / mid
    } else {
        0.0
    }
}
