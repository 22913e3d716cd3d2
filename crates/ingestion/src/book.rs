//! Order book reconstruction and per-level delta extraction.
//!
//! [`OrderBookState`] is owned by a single ingestion task. It applies full
//! snapshots and single-level updates in sequence order and reports, for each
//! accepted update, the per-level volume changes used by order-flow imbalance.

use alpha_core::config::InstrumentConfig;
use alpha_core::{
    BookDelta, BookSide, BookUpdate, Error, LevelUpdate, OrderBook, OrderBookLevel, Result,
};
use tracing::{debug, warn};

use crate::sequence::{SeqCheck, SequenceGuard};

/// Counters for book maintenance.
#[derive(Debug, Clone, Default)]
pub struct BookStats {
    /// Updates applied.
    pub applied: u64,
    /// Duplicate or out-of-order updates dropped.
    pub stale: u64,
    /// Updates rejected for breaking book invariants.
    pub invalid: u64,
    /// Sequence gaps surfaced.
    pub gaps: u64,
}

/// Book state for one instrument.
pub struct OrderBookState {
    book: OrderBook,
    depth: usize,
    guard: SequenceGuard,
    /// False until the first update, and again after `reset`.
    seeded: bool,
    /// Set after a gap on a partial update; cleared by the next snapshot.
    awaiting_snapshot: bool,
    stats: BookStats,
}

impl OrderBookState {
    /// Create an empty book tracking `depth` levels per side.
    pub fn new(symbol: impl Into<String>, depth: usize) -> Self {
        Self {
            book: OrderBook::empty(symbol),
            depth: depth.max(1),
            guard: SequenceGuard::new(),
            seeded: false,
            awaiting_snapshot: false,
            stats: BookStats::default(),
        }
    }

    pub fn from_config(config: &InstrumentConfig) -> Self {
        Self::new(config.symbol.clone(), config.book_depth)
    }

    /// Apply an update.
    ///
    /// Returns `Ok(None)` for duplicate or stale updates. A gap is reported as
    /// `SequenceGapDetected`: a snapshot still becomes the new baseline, while
    /// a partial update clears the book until the next snapshot arrives.
    /// Invalid updates leave the stored book untouched.
    pub fn apply(&mut self, update: &BookUpdate) -> Result<Option<BookDelta>> {
        if let BookUpdate::Snapshot(snapshot) = update {
            if snapshot.symbol != self.book.symbol {
                return Err(Error::data(format!(
                    "snapshot for {} applied to {}",
                    snapshot.symbol, self.book.symbol
                )));
            }
        }

        let seq = update.seq();
        match self.guard.check(seq) {
            SeqCheck::Stale => {
                self.stats.stale += 1;
                debug!(seq, last = ?self.guard.last(), "Dropping stale book update");
                return Ok(None);
            }
            SeqCheck::Gap { expected, got } => {
                self.stats.gaps += 1;
                warn!(expected, got, symbol = %self.book.symbol, "Sequence gap in book stream");
                self.resync(update);
                return Err(Error::SequenceGapDetected { expected, got });
            }
            SeqCheck::First | SeqCheck::InOrder => {}
        }

        if self.awaiting_snapshot {
            match update {
                BookUpdate::Snapshot(_) => self.awaiting_snapshot = false,
                BookUpdate::Level(_) => {
                    warn!(seq, "Partial update ignored while awaiting snapshot");
                    return Ok(None);
                }
            }
        }

        let candidate = match self.build_candidate(update) {
            Ok(book) => book,
            Err(e) => {
                self.stats.invalid += 1;
                warn!(seq, error = %e, "Rejected book update");
                return Err(e);
            }
        };

        let delta = if self.seeded {
            self.diff(&candidate)
        } else {
            BookDelta::initial(candidate.seq, candidate.ts_ms, self.depth)
        };

        self.book = candidate;
        self.seeded = true;
        self.stats.applied += 1;
        Ok(Some(delta))
    }

    /// Immutable copy of the current book.
    pub fn snapshot(&self) -> OrderBook {
        self.book.clone()
    }

    /// Borrow the current book.
    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    /// Drop all state. The next update is a first observation.
    pub fn reset(&mut self) {
        let symbol = std::mem::take(&mut self.book.symbol);
        self.book = OrderBook::empty(symbol);
        self.guard.reset();
        self.seeded = false;
        self.awaiting_snapshot = false;
    }

    /// Whether at least one update has been applied since the last reset.
    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn stats(&self) -> &BookStats {
        &self.stats
    }

    fn resync(&mut self, update: &BookUpdate) {
        match update {
            BookUpdate::Snapshot(_) => match self.build_candidate(update) {
                Ok(book) => {
                    self.book = book;
                    self.seeded = true;
                    self.awaiting_snapshot = false;
                }
                Err(e) => {
                    warn!(error = %e, "Resync snapshot invalid, clearing book");
                    self.clear_for_snapshot();
                }
            },
            BookUpdate::Level(_) => self.clear_for_snapshot(),
        }
    }

    fn clear_for_snapshot(&mut self) {
        self.book.bids.clear();
        self.book.asks.clear();
        self.seeded = false;
        self.awaiting_snapshot = true;
    }

    fn build_candidate(&self, update: &BookUpdate) -> Result<OrderBook> {
        let mut book = match update {
            BookUpdate::Snapshot(snapshot) => snapshot.clone(),
            BookUpdate::Level(level) => {
                let mut book = self.book.clone();
                apply_level(&mut book, level)?;
                book.seq = level.seq;
                book.ts_ms = level.ts_ms;
                book
            }
        };
        book.bids.truncate(self.depth);
        book.asks.truncate(self.depth);
        book.validate()?;
        Ok(book)
    }

    fn diff(&self, curr: &OrderBook) -> BookDelta {
        let (bid_deltas, bid_cancels) = side_deltas(&self.book.bids, &curr.bids, BookSide::Bid, self.depth);
        let (ask_deltas, ask_cancels) = side_deltas(&self.book.asks, &curr.asks, BookSide::Ask, self.depth);
        BookDelta {
            seq: curr.seq,
            ts_ms: curr.ts_ms,
            bid_deltas,
            ask_deltas,
            first: false,
            cancellations: bid_cancels + ask_cancels,
        }
    }
}

fn apply_level(book: &mut OrderBook, update: &LevelUpdate) -> Result<()> {
    let levels = match update.side {
        BookSide::Bid => &mut book.bids,
        BookSide::Ask => &mut book.asks,
    };
    let idx = update.index;

    if update.volume == 0.0 {
        if idx >= levels.len() {
            return Err(Error::invalid_book(format!(
                "remove of level {} beyond {} levels",
                idx,
                levels.len()
            )));
        }
        levels.remove(idx);
        return Ok(());
    }

    let level = OrderBookLevel::new(update.price, update.volume);
    if idx < levels.len() {
        levels[idx] = level;
    } else if idx == levels.len() {
        levels.push(level);
    } else {
        return Err(Error::invalid_book(format!(
            "level {} leaves a hole after {} levels",
            idx,
            levels.len()
        )));
    }
    Ok(())
}

/// Per-level volume change between two states of one side.
///
/// A level that improves in price (or appears) contributes its full new
/// volume; a level that worsens (or disappears) contributes minus its old
/// volume; an unchanged price contributes the volume difference.
fn side_deltas(
    prev: &[OrderBookLevel],
    curr: &[OrderBookLevel],
    side: BookSide,
    depth: usize,
) -> (Vec<f64>, u32) {
    let mut deltas = Vec::with_capacity(depth);
    let mut cancellations = 0;

    for i in 0..depth {
        let delta = match (prev.get(i), curr.get(i)) {
            (None, None) => 0.0,
            (None, Some(c)) => c.volume,
            (Some(p), None) => -p.volume,
            (Some(p), Some(c)) => {
                let improved = match side {
                    BookSide::Bid => c.price > p.price,
                    BookSide::Ask => c.price < p.price,
                };
                if improved {
                    c.volume
                } else if c.price == p.price {
                    let d = c.volume - p.volume;
                    if d < 0.0 {
                        cancellations += 1;
                    }
                    d
                } else {
                    -p.volume
                }
            }
        };
        deltas.push(delta);
    }

    (deltas, cancellations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn make_book(seq: u64, bids: &[(f64, f64)], asks: &[(f64, f64)]) -> BookUpdate {
        BookUpdate::Snapshot(OrderBook {
            symbol: "WIN".to_string(),
            ts_ms: seq as i64 * 100,
            seq,
            bids: bids.iter().map(|&(p, v)| OrderBookLevel::new(p, v)).collect(),
            asks: asks.iter().map(|&(p, v)| OrderBookLevel::new(p, v)).collect(),
        })
    }

    fn make_level(seq: u64, side: BookSide, index: usize, price: f64, volume: f64) -> BookUpdate {
        BookUpdate::Level(LevelUpdate {
            seq,
            ts_ms: seq as i64 * 100,
            side,
            index,
            price,
            volume,
        })
    }

    #[test]
    fn test_first_observation_has_zero_ofi() {
        for depth in [1, 3, 5, 10] {
            let mut state = OrderBookState::new("WIN", depth);
            let delta = state
                .apply(&make_book(1, &[(100.0, 50.0), (99.5, 20.0)], &[(100.5, 10.0)]))
                .unwrap()
                .unwrap();
            assert!(delta.first);
            for n in [1, 2, 3, 5] {
                assert_eq!(delta.ofi(n), 0.0);
            }
        }
    }

    #[test]
    fn test_same_price_volume_change() {
        let mut state = OrderBookState::new("WIN", 5);
        state.apply(&make_book(1, &[(100.0, 50.0)], &[(100.5, 10.0)])).unwrap();
        let delta = state
            .apply(&make_book(2, &[(100.0, 80.0)], &[(100.5, 4.0)]))
            .unwrap()
            .unwrap();
        assert_abs_diff_eq!(delta.bid_deltas[0], 30.0);
        assert_abs_diff_eq!(delta.ask_deltas[0], -6.0);
        assert_abs_diff_eq!(delta.ofi(1), 36.0);
        assert_eq!(delta.cancellations, 1);
    }

    #[test]
    fn test_price_improvement_counts_as_added_volume() {
        let mut state = OrderBookState::new("WIN", 5);
        state
            .apply(&make_book(1, &[(100.0, 50.0), (99.5, 30.0)], &[(101.0, 10.0)]))
            .unwrap();
        // New best bid pushes the old best to level 1.
        let delta = state
            .apply(&make_book(2, &[(100.5, 5.0), (100.0, 50.0)], &[(101.0, 10.0)]))
            .unwrap()
            .unwrap();
        assert_abs_diff_eq!(delta.bid_deltas[0], 5.0);
        assert_abs_diff_eq!(delta.bid_deltas[1], 50.0);
        assert_eq!(delta.cancellations, 0);
        assert!(delta.ofi(1) > 0.0);
    }

    #[test]
    fn test_level_removal_counts_as_lost_volume() {
        let mut state = OrderBookState::new("WIN", 5);
        state.apply(&make_book(1, &[(100.0, 50.0)], &[(100.5, 10.0), (101.0, 20.0)])).unwrap();
        let delta = state
            .apply(&make_level(2, BookSide::Ask, 0, 100.5, 0.0))
            .unwrap()
            .unwrap();
        // Best ask worsens from 100.5 to 101.0.
        assert_abs_diff_eq!(delta.ask_deltas[0], -10.0);
        assert_abs_diff_eq!(delta.ask_deltas[1], -20.0);
        assert_abs_diff_eq!(delta.ofi(1), 10.0);
        assert_eq!(state.book().asks.len(), 1);
    }

    #[test]
    fn test_invalid_update_leaves_state_untouched() {
        let mut state = OrderBookState::new("WIN", 5);
        state.apply(&make_book(1, &[(100.0, 50.0)], &[(100.5, 10.0)])).unwrap();
        let before = state.snapshot();

        let result = state.apply(&make_book(2, &[(101.0, 5.0)], &[(100.5, 10.0)]));
        assert!(matches!(result, Err(Error::InvalidBookState(_))));
        assert_eq!(state.snapshot(), before);
        assert_eq!(state.stats().invalid, 1);

        // Next clean update recovers.
        assert!(state.apply(&make_book(3, &[(100.0, 55.0)], &[(100.5, 10.0)])).unwrap().is_some());
    }

    #[test]
    fn test_level_hole_rejected() {
        let mut state = OrderBookState::new("WIN", 5);
        state.apply(&make_book(1, &[(100.0, 50.0)], &[(100.5, 10.0)])).unwrap();
        let result = state.apply(&make_level(2, BookSide::Bid, 3, 98.0, 1.0));
        assert!(matches!(result, Err(Error::InvalidBookState(_))));
    }

    #[test]
    fn test_duplicate_dropped() {
        let mut state = OrderBookState::new("WIN", 5);
        let update = make_book(1, &[(100.0, 50.0)], &[(100.5, 10.0)]);
        assert!(state.apply(&update).unwrap().is_some());
        assert!(state.apply(&update).unwrap().is_none());
        assert_eq!(state.stats().stale, 1);
    }

    #[test]
    fn test_gap_on_snapshot_resyncs() {
        let mut state = OrderBookState::new("WIN", 5);
        state.apply(&make_book(1, &[(100.0, 50.0)], &[(100.5, 10.0)])).unwrap();
        let result = state.apply(&make_book(5, &[(99.0, 1.0)], &[(99.5, 1.0)]));
        assert!(matches!(
            result,
            Err(Error::SequenceGapDetected { expected: 2, got: 5 })
        ));
        assert_eq!(state.book().seq, 5);

        let delta = state
            .apply(&make_book(6, &[(99.0, 3.0)], &[(99.5, 1.0)]))
            .unwrap()
            .unwrap();
        assert_abs_diff_eq!(delta.ofi(1), 2.0);
    }

    #[test]
    fn test_gap_on_level_waits_for_snapshot() {
        let mut state = OrderBookState::new("WIN", 5);
        state.apply(&make_book(1, &[(100.0, 50.0)], &[(100.5, 10.0)])).unwrap();
        assert!(state.apply(&make_level(3, BookSide::Bid, 0, 100.0, 40.0)).is_err());
        assert!(!state.is_seeded());
        assert!(state.apply(&make_level(4, BookSide::Bid, 0, 100.0, 45.0)).unwrap().is_none());

        let delta = state
            .apply(&make_book(5, &[(100.0, 45.0)], &[(100.5, 10.0)]))
            .unwrap()
            .unwrap();
        assert!(delta.first);
    }

    #[test]
    fn test_reset_makes_next_update_first() {
        let mut state = OrderBookState::new("WIN", 5);
        state.apply(&make_book(7, &[(100.0, 50.0)], &[(100.5, 10.0)])).unwrap();
        state.reset();
        let delta = state
            .apply(&make_book(1, &[(100.0, 70.0)], &[(100.5, 10.0)]))
            .unwrap()
            .unwrap();
        assert!(delta.first);
        assert_eq!(delta.ofi(5), 0.0);
    }

    #[test]
    fn test_depth_truncation() {
        let mut state = OrderBookState::new("WIN", 2);
        state
            .apply(&make_book(1, &[(100.0, 1.0), (99.0, 1.0), (98.0, 1.0)], &[(101.0, 1.0)]))
            .unwrap();
        assert_eq!(state.book().bids.len(), 2);
    }
}
