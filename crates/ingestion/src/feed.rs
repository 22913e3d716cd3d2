//! Feed input interface and an in-memory replay source.

use std::time::Duration;

use alpha_core::{BookUpdate, Error, Result, Tick, TimestampMs};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One event delivered by a feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum FeedEvent {
    Tick(Tick),
    Book(BookUpdate),
}

impl FeedEvent {
    pub fn ts_ms(&self) -> TimestampMs {
        match self {
            FeedEvent::Tick(tick) => tick.ts_ms,
            FeedEvent::Book(update) => update.ts_ms(),
        }
    }
}

/// Push-style market data source for one instrument.
#[async_trait]
pub trait FeedSource: Send {
    /// Next event, or `None` once the source is exhausted.
    async fn next_event(&mut self) -> Result<Option<FeedEvent>>;

    /// Historical events with `from_ms <= ts < to_ms`.
    async fn backfill(&mut self, from_ms: TimestampMs, to_ms: TimestampMs) -> Result<Vec<FeedEvent>>;
}

/// Replays a fixed list of events in order.
pub struct ReplayFeed {
    events: Vec<FeedEvent>,
    cursor: usize,
    pace: Option<Duration>,
}

impl ReplayFeed {
    pub fn new(events: Vec<FeedEvent>) -> Self {
        Self {
            events,
            cursor: 0,
            pace: None,
        }
    }

    /// Sleep for `pace` before each event.
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = Some(pace);
        self
    }

    /// Parse one JSON-encoded [`FeedEvent`] per line; blank lines are skipped.
    pub fn from_json_lines(text: &str) -> Result<Self> {
        let events = text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str(line)
                    .map_err(|e| Error::data(format!("line {}: {}", i + 1, e)))
            })
            .collect::<Result<Vec<FeedEvent>>>()?;
        Ok(Self::new(events))
    }

    /// Events not yet delivered.
    pub fn remaining(&self) -> usize {
        self.events.len() - self.cursor
    }

    /// Restart from the first event.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }
}

#[async_trait]
impl FeedSource for ReplayFeed {
    async fn next_event(&mut self) -> Result<Option<FeedEvent>> {
        if self.cursor >= self.events.len() {
            return Ok(None);
        }
        if let Some(pace) = self.pace {
            tokio::time::sleep(pace).await;
        }
        let event = self.events[self.cursor].clone();
        self.cursor += 1;
        Ok(Some(event))
    }

    async fn backfill(&mut self, from_ms: TimestampMs, to_ms: TimestampMs) -> Result<Vec<FeedEvent>> {
        if from_ms > to_ms {
            return Err(Error::data(format!("backfill range {}..{} is reversed", from_ms, to_ms)));
        }
        Ok(self
            .events
            .iter()
            .filter(|e| (from_ms..to_ms).contains(&e.ts_ms()))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_tick(seq: u64, ts_ms: i64) -> FeedEvent {
        FeedEvent::Tick(Tick {
            seq,
            ts_ms,
            bid: 99.5,
            ask: 100.5,
            last: 100.0,
            volume: 1.0,
        })
    }

    #[tokio::test]
    async fn test_replay_in_order() {
        let mut feed = ReplayFeed::new(vec![make_tick(1, 10), make_tick(2, 20)]);
        assert_eq!(feed.next_event().await.unwrap().unwrap().ts_ms(), 10);
        assert_eq!(feed.next_event().await.unwrap().unwrap().ts_ms(), 20);
        assert!(feed.next_event().await.unwrap().is_none());

        feed.rewind();
        assert_eq!(feed.remaining(), 2);
    }

    #[tokio::test]
    async fn test_backfill_range() {
        let mut feed = ReplayFeed::new((1..=5).map(|i| make_tick(i, i as i64 * 100)).collect());
        let events = feed.backfill(200, 400).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(feed.backfill(400, 200).await.is_err());
    }

    #[test]
    fn test_json_lines() {
        let line = serde_json::to_string(&make_tick(1, 10)).unwrap();
        let feed = ReplayFeed::from_json_lines(&format!("{}\n\n{}\n", line, line)).unwrap();
        assert_eq!(feed.remaining(), 2);
        assert!(ReplayFeed::from_json_lines("{not json}").is_err());
    }
}
