//! Per-bar feature vectors.

use alpha_core::config::Config;
use alpha_core::{FeatureVector, HawkesFeatures, InformationBar, OrderBook};
use alpha_features::FeatureEngine;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::agent::Agent;
use crate::message::{
    topics, AgentMessage, Command, DataPayload, ErrorReport, Payload, VoteValue,
};

/// Turns bars into feature vectors using the latest book snapshot and Hawkes
/// intensities it has seen.
pub struct FeatureAgent {
    id: String,
    engine: FeatureEngine,
    symbol: String,
    book: Option<OrderBook>,
    hawkes: HawkesFeatures,
    last: Option<FeatureVector>,
    warmed_up: bool,
}

impl FeatureAgent {
    pub fn new(id: impl Into<String>, config: &Config) -> Self {
        Self {
            id: id.into(),
            engine: FeatureEngine::new(config),
            symbol: config.instrument.symbol.clone(),
            book: None,
            hawkes: HawkesFeatures::default(),
            last: None,
            warmed_up: false,
        }
    }

    /// Most recent vector emitted.
    pub fn last_vector(&self) -> Option<&FeatureVector> {
        self.last.as_ref()
    }

    fn on_bar(&mut self, bar: &InformationBar) -> Vec<AgentMessage> {
        let empty;
        let book = match &self.book {
            Some(book) => book,
            None => {
                empty = OrderBook::empty(self.symbol.clone());
                &empty
            }
        };

        match self.engine.on_bar(bar, book, &self.hawkes) {
            Ok(vector) => {
                if !self.warmed_up && self.engine.is_warmed_up() {
                    self.warmed_up = true;
                    info!(agent = %self.id, bars = self.engine.bars_processed(), "Feature windows warmed up");
                }
                self.last = Some(vector.clone());
                vec![AgentMessage::data(self.id.clone(), DataPayload::Features(vector))]
            }
            // Suppressed bars surface as ERROR.
            Err(err) => vec![AgentMessage::error(self.id.clone(), ErrorReport::from_error(&err))],
        }
    }
}

#[async_trait]
impl Agent for FeatureAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> Vec<String> {
        [topics::BOOK, topics::BAR, topics::HAWKES, topics::ERROR]
            .iter()
            .map(|t| t.to_string())
            .collect()
    }

    async fn handle(&mut self, message: AgentMessage) -> anyhow::Result<Vec<AgentMessage>> {
        match message.payload {
            Payload::Data(DataPayload::Book { book, delta }) => {
                self.engine.add_book_delta(&delta);
                self.book = Some(book);
                Ok(Vec::new())
            }
            Payload::Data(DataPayload::Bar(bar)) => Ok(self.on_bar(&bar)),
            Payload::Data(DataPayload::Hawkes { features, .. }) => {
                self.hawkes = features;
                Ok(Vec::new())
            }
            Payload::Error(ErrorReport {
                gap: Some((expected, got)),
                ..
            }) => {
                // Ingestion already dropped the bar containing the gap.
                debug!(from = %message.sender, expected, got, "Discarding pre-gap order flow");
                self.engine.discard_order_flow();
                Ok(Vec::new())
            }
            Payload::Command(Command::Reset) => {
                self.engine.clear();
                self.book = None;
                self.hawkes = HawkesFeatures::default();
                self.last = None;
                self.warmed_up = false;
                Ok(Vec::new())
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Bullish when the micro-price sits above the mid.
    async fn vote(&mut self, topic: &str) -> Option<VoteValue> {
        if topic != topics::BULLISH {
            return None;
        }
        let last = self.last.as_ref()?;
        let micro = last.get("micro_price")?;
        let mid = last.get("mid_price")?;
        Some(VoteValue::Bool(micro > mid))
    }
}
