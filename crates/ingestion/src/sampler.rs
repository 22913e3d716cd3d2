//! Information bar sampling.
//!
//! Bars close when accumulated activity (ticks, traded volume or traded
//! notional) crosses a threshold. The accumulator keeps the residual beyond
//! the threshold so no activity is counted twice or lost.

use alpha_core::config::BarConfig;
use alpha_core::{BarKind, Error, InformationBar, Result, Tick, TimestampMs, TradeSide};
use tracing::{debug, warn};

/// A bar that's currently being built.
#[derive(Debug, Clone)]
struct BarInProgress {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    dollar_value: f64,
    buy_volume: f64,
    sell_volume: f64,
    start_ms: TimestampMs,
    end_ms: TimestampMs,
    tick_count: u32,
}

impl BarInProgress {
    fn new(tick: &Tick) -> Self {
        Self {
            open: tick.last,
            high: f64::NEG_INFINITY,
            low: f64::INFINITY,
            close: tick.last,
            volume: 0.0,
            dollar_value: 0.0,
            buy_volume: 0.0,
            sell_volume: 0.0,
            start_ms: tick.ts_ms,
            end_ms: tick.ts_ms,
            tick_count: 0,
        }
    }

    fn add_tick(&mut self, tick: &Tick, side: TradeSide) {
        self.high = self.high.max(tick.last);
        self.low = self.low.min(tick.last);
        self.close = tick.last;
        self.volume += tick.volume;
        self.dollar_value += tick.notional();
        match side {
            TradeSide::Buy => self.buy_volume += tick.volume,
            TradeSide::Sell => self.sell_volume += tick.volume,
            TradeSide::Ambiguous => {}
        }
        self.end_ms = tick.ts_ms;
        self.tick_count += 1;
    }

    fn to_bar(&self, kind: BarKind) -> InformationBar {
        InformationBar {
            kind,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            dollar_value: self.dollar_value,
            buy_volume: self.buy_volume,
            sell_volume: self.sell_volume,
            start_ms: self.start_ms,
            end_ms: self.end_ms,
            tick_count: self.tick_count,
        }
    }
}

/// Event-driven bar sampler for one bar kind.
pub struct BarSampler {
    kind: BarKind,
    threshold: f64,
    accumulator: f64,
    current: Option<BarInProgress>,
    emitted: u64,
    suppressed: u64,
}

impl BarSampler {
    /// Create a sampler. The threshold must be positive.
    pub fn new(kind: BarKind, threshold: f64) -> Result<Self> {
        if !(threshold.is_finite() && threshold > 0.0) {
            return Err(Error::config(format!("bar threshold {} must be positive", threshold)));
        }
        Ok(Self {
            kind,
            threshold,
            accumulator: 0.0,
            current: None,
            emitted: 0,
            suppressed: 0,
        })
    }

    pub fn from_config(config: &BarConfig) -> Result<Self> {
        Self::new(config.kind, config.threshold())
    }

    /// Add a classified tick. Returns the bar closed by this tick, if any.
    ///
    /// At most one bar closes per tick. A residual that still exceeds the
    /// threshold closes the following bar on the next tick.
    pub fn push(&mut self, tick: &Tick, side: TradeSide) -> Result<Option<InformationBar>> {
        tick.validate()?;

        let bar = self.current.get_or_insert_with(|| BarInProgress::new(tick));
        bar.add_tick(tick, side);

        self.accumulator += match self.kind {
            BarKind::Tick => 1.0,
            BarKind::Volume => tick.volume,
            BarKind::Dollar => tick.notional(),
        };

        if self.accumulator < self.threshold {
            return Ok(None);
        }

        self.accumulator -= self.threshold;
        let closed = self.current.take().map(|b| b.to_bar(self.kind));
        if let Some(bar) = &closed {
            self.emitted += 1;
            debug!(
                kind = ?self.kind,
                ticks = bar.tick_count,
                residual = self.accumulator,
                "Bar closed"
            );
        }
        Ok(closed)
    }

    /// Discard the bar in progress after a sequence gap.
    pub fn invalidate(&mut self) {
        if self.current.take().is_some() {
            self.suppressed += 1;
            warn!(kind = ?self.kind, "Bar suppressed after sequence gap");
        }
        self.accumulator = 0.0;
    }

    /// Close the bar in progress regardless of the threshold.
    pub fn flush(&mut self) -> Option<InformationBar> {
        let bar = self.current.take()?.to_bar(self.kind);
        self.accumulator = 0.0;
        self.emitted += 1;
        Some(bar)
    }

    pub fn kind(&self) -> BarKind {
        self.kind
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Activity accumulated toward the next bar.
    pub fn accumulator(&self) -> f64 {
        self.accumulator
    }

    /// Ticks in the bar currently being built.
    pub fn pending_ticks(&self) -> u32 {
        self.current.as_ref().map_or(0, |b| b.tick_count)
    }

    pub fn emitted_bars(&self) -> u64 {
        self.emitted
    }

    pub fn suppressed_bars(&self) -> u64 {
        self.suppressed
    }

    /// Clear all state.
    pub fn clear(&mut self) {
        self.current = None;
        self.accumulator = 0.0;
    }
}
