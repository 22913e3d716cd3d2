//! Feed ingestion: book maintenance, trade classification and bar sampling.

use alpha_core::config::Config;
use alpha_core::{BookUpdate, Error, Tick};
use alpha_ingestion::{BarSampler, OrderBookState, SeqCheck, SequenceGuard, TradeClassifier};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::agent::Agent;
use crate::message::{topics, AgentMessage, Command, DataPayload, ErrorReport, Payload};

/// Sole owner of the order book. Publishes `book`, `trade` and `bar` data and
/// reports sequence gaps as ERROR messages.
pub struct IngestionAgent {
    id: String,
    book: OrderBookState,
    sampler: BarSampler,
    classifier: TradeClassifier,
    ticks: SequenceGuard,
}

impl IngestionAgent {
    pub fn new(id: impl Into<String>, config: &Config) -> alpha_core::Result<Self> {
        Ok(Self {
            id: id.into(),
            book: OrderBookState::from_config(&config.instrument),
            sampler: BarSampler::from_config(&config.bars)?,
            classifier: TradeClassifier::default(),
            ticks: SequenceGuard::new(),
        })
    }

    fn on_tick(&mut self, tick: Tick) -> anyhow::Result<Vec<AgentMessage>> {
        let mut out = Vec::new();

        match self.ticks.check(tick.seq) {
            SeqCheck::Stale => {
                debug!(seq = tick.seq, "Dropping stale tick");
                return Ok(out);
            }
            SeqCheck::Gap { expected, got } => {
                warn!(expected, got, "Tick sequence gap, discarding bar in progress");
                self.sampler.invalidate();
                out.push(AgentMessage::error(
                    self.id.clone(),
                    ErrorReport::from_error(&Error::SequenceGapDetected { expected, got }),
                ));
            }
            SeqCheck::First | SeqCheck::InOrder => {}
        }

        let side = self.classifier.classify(&tick);
        out.push(AgentMessage::data(
            self.id.clone(),
            DataPayload::Trade { tick, side },
        ));
        if let Some(bar) = self.sampler.push(&tick, side)? {
            out.push(AgentMessage::data(self.id.clone(), DataPayload::Bar(bar)));
        }
        Ok(out)
    }

    fn on_book_update(&mut self, update: &BookUpdate) -> anyhow::Result<Vec<AgentMessage>> {
        match self.book.apply(update) {
            Ok(Some(delta)) => Ok(vec![AgentMessage::data(
                self.id.clone(),
                DataPayload::Book {
                    book: self.book.snapshot(),
                    delta,
                },
            )]),
            Ok(None) => Ok(Vec::new()),
            Err(err @ Error::SequenceGapDetected { .. }) => {
                self.sampler.invalidate();
                Ok(vec![AgentMessage::error(
                    self.id.clone(),
                    ErrorReport::from_error(&err),
                )])
            }
            Err(err @ Error::InvalidBookState(_)) => Ok(vec![AgentMessage::error(
                self.id.clone(),
                ErrorReport::from_error(&err),
            )]),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl Agent for IngestionAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> Vec<String> {
        vec![topics::TICK.to_string(), topics::BOOK_UPDATE.to_string()]
    }

    async fn handle(&mut self, message: AgentMessage) -> anyhow::Result<Vec<AgentMessage>> {
        match message.payload {
            Payload::Data(DataPayload::Tick(tick)) => self.on_tick(tick),
            Payload::Data(DataPayload::BookUpdate(update)) => self.on_book_update(&update),
            Payload::Command(Command::Reset) => {
                self.book.reset();
                self.sampler.clear();
                self.classifier.clear();
                self.ticks.reset();
                Ok(Vec::new())
            }
            _ => Ok(Vec::new()),
        }
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        let stats = self.book.stats();
        debug!(
            applied = stats.applied,
            stale = stats.stale,
            invalid = stats.invalid,
            gaps = stats.gaps,
            bars = self.sampler.emitted_bars(),
            "Ingestion stopped"
        );
        Ok(())
    }
}
