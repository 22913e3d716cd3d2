//! Threshold voting.

use crate::message::{ConsensusResult, Vote};

/// `ratio = positive / total`, `passed = ratio >= threshold`.
///
/// With no votes the ratio is 0 and the vote fails.
pub fn tally(topic: &str, votes: &[Vote], threshold: f64) -> ConsensusResult {
    let voters = votes.len();
    let positive = votes.iter().filter(|v| v.value.is_positive()).count();
    let ratio = if voters == 0 {
        0.0
    } else {
        positive as f64 / voters as f64
    };

    ConsensusResult {
        topic: topic.to_string(),
        ratio,
        passed: voters > 0 && ratio >= threshold,
        voters,
        positive,
    }
}
