//! Sequence number tracking for a single instrument stream.

use alpha_core::SeqNo;

/// Outcome of checking one sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqCheck {
    /// No prior sequence number; accepted as the baseline.
    First,
    /// Exactly one past the last accepted number.
    InOrder,
    /// Duplicate or older than the last accepted number.
    Stale,
    /// Events are missing. The guard has already moved its baseline to `got`.
    Gap { expected: SeqNo, got: SeqNo },
}

/// Detects duplicates, reordering and gaps in a feed sequence.
#[derive(Debug, Clone, Default)]
pub struct SequenceGuard {
    last: Option<SeqNo>,
    stale: u64,
    gaps: u64,
}

impl SequenceGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check `seq` and advance the baseline unless it is stale.
    pub fn check(&mut self, seq: SeqNo) -> SeqCheck {
        let result = match self.last {
            None => SeqCheck::First,
            Some(last) if seq <= last => SeqCheck::Stale,
            Some(last) if seq == last + 1 => SeqCheck::InOrder,
            Some(last) => SeqCheck::Gap {
                expected: last + 1,
                got: seq,
            },
        };

        match result {
            SeqCheck::Stale => self.stale += 1,
            SeqCheck::Gap { .. } => {
                self.gaps += 1;
                self.last = Some(seq);
            }
            _ => self.last = Some(seq),
        }

        result
    }

    /// Last accepted sequence number.
    pub fn last(&self) -> Option<SeqNo> {
        self.last
    }

    /// Number of stale or duplicate numbers seen.
    pub fn stale_count(&self) -> u64 {
        self.stale
    }

    /// Number of gaps seen.
    pub fn gap_count(&self) -> u64 {
        self.gaps
    }

    /// Forget the baseline (reconnect).
    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_order_sequence() {
        let mut guard = SequenceGuard::new();
        assert_eq!(guard.check(10), SeqCheck::First);
        assert_eq!(guard.check(11), SeqCheck::InOrder);
        assert_eq!(guard.check(12), SeqCheck::InOrder);
        assert_eq!(guard.last(), Some(12));
    }

    #[test]
    fn test_duplicates_and_reordering_are_stale() {
        let mut guard = SequenceGuard::new();
        guard.check(5);
        guard.check(6);
        assert_eq!(guard.check(6), SeqCheck::Stale);
        assert_eq!(guard.check(3), SeqCheck::Stale);
        assert_eq!(guard.last(), Some(6));
        assert_eq!(guard.stale_count(), 2);
    }

    #[test]
    fn test_gap_moves_baseline() {
        let mut guard = SequenceGuard::new();
        guard.check(1);
        assert_eq!(guard.check(4), SeqCheck::Gap { expected: 2, got: 4 });
        assert_eq!(guard.check(5), SeqCheck::InOrder);
        assert_eq!(guard.gap_count(), 1);
    }

    #[test]
    fn test_reset() {
        let mut guard = SequenceGuard::new();
        guard.check(100);
        guard.reset();
        assert_eq!(guard.check(1), SeqCheck::First);
    }
}
