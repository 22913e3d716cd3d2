//! Feature computation engine.
//!
//! Combines all feature components into the fixed 27-slot vector emitted
//! once per information bar.

use alpha_core::config::FeatureConfig;
use alpha_core::{
    BookDelta, Config, Error, FeatureVector, HawkesFeatures, InformationBar, OrderBook, Result,
    SeqNo, FEATURE_COUNT,
};
use tracing::{debug, warn};

use crate::{
    fracdiff::FracDiff,
    imbalance::{book_imbalance, book_pressure, weighted_imbalance},
    liquidity::LiquidityTracker,
    microprice::{imbalance_adjusted_micro_price, relative_spread, weighted_mid_price},
    order_flow::OfiAccumulator,
    technical::{Bollinger, Macd, Rsi},
    volatility::{PriceKinematics, RollingVolatility},
};

/// Feature computation engine.
pub struct FeatureEngine {
    config: FeatureConfig,
    /// Order flow imbalance since the last bar.
    ofi: OfiAccumulator,
    volatility: RollingVolatility,
    kinematics: PriceKinematics,
    liquidity: LiquidityTracker,
    rsi: Rsi,
    macd: Macd,
    bollinger: Bollinger,
    frac_price: FracDiff,
    frac_volume: FracDiff,
    /// Reference price of the previous emitted bar.
    prev_price: Option<f64>,
    /// Gap observed since the last bar boundary.
    pending_gap: Option<(SeqNo, SeqNo)>,
    bars_processed: u64,
    bars_suppressed: u64,
}

impl FeatureEngine {
    /// Create a new feature engine from configuration.
    pub fn new(config: &Config) -> Self {
        Self::with_feature_config(&config.features)
    }

    pub fn with_feature_config(config: &FeatureConfig) -> Self {
        Self {
            ofi: OfiAccumulator::new(&config.ofi_levels),
            volatility: RollingVolatility::new(config.volatility_window),
            kinematics: PriceKinematics::new(),
            liquidity: LiquidityTracker::new(config.liquidity_window),
            rsi: Rsi::new(config.rsi_period),
            macd: Macd::new(config.macd_fast, config.macd_slow, config.macd_signal),
            bollinger: Bollinger::new(config.bollinger_period, config.bollinger_k),
            frac_price: FracDiff::new(
                config.frac_diff_d,
                config.frac_diff_threshold,
                config.frac_diff_max_weights,
            ),
            frac_volume: FracDiff::new(
                config.frac_diff_d,
                config.frac_diff_threshold,
                config.frac_diff_max_weights,
            ),
            prev_price: None,
            pending_gap: None,
            bars_processed: 0,
            bars_suppressed: 0,
            config: config.clone(),
        }
    }

    /// Fold a book delta into the current bar's order flow.
    pub fn add_book_delta(&mut self, delta: &BookDelta) {
        self.ofi.add(delta);
    }

    /// Flag a sequence gap inside the current bar window; the bar that
    /// closes it is suppressed.
    pub fn mark_gap(&mut self, expected: SeqNo, got: SeqNo) {
        if self.pending_gap.is_none() {
            self.pending_gap = Some((expected, got));
        }
    }

    /// Drop order flow accumulated before a gap whose bar was already
    /// discarded upstream. The next bar is computed normally.
    pub fn discard_order_flow(&mut self) {
        self.ofi.reset();
    }

    /// Compute the feature vector for a closed bar.
    ///
    /// If a gap was flagged during the bar window, no vector is produced:
    /// the accumulated order flow is discarded and `SequenceGapDetected` is
    /// returned.
    pub fn on_bar(
        &mut self,
        bar: &InformationBar,
        book: &OrderBook,
        hawkes: &HawkesFeatures,
    ) -> Result<FeatureVector> {
        if let Some((expected, got)) = self.pending_gap.take() {
            self.ofi.reset();
            self.bars_suppressed += 1;
            warn!(expected, got, end_ms = bar.end_ms, "Suppressing features for bar with sequence gap");
            return Err(Error::SequenceGapDetected { expected, got });
        }

        let cfg = &self.config;
        let mut values = [0.0; FEATURE_COUNT];

        // Price
        let mid = book.mid_price();
        values[0] = mid;
        values[1] = book.micro_price();
        values[2] = weighted_mid_price(book, cfg.depth_levels, cfg.depth_decay);
        values[3] = imbalance_adjusted_micro_price(book, cfg.imbalance_adjustment);

        // Order flow
        let ofi = self.ofi.take();
        for (slot, value) in values[4..8].iter_mut().zip(ofi.iter()) {
            *slot = *value;
        }

        // Book imbalance
        values[8] = book_imbalance(book);
        values[9] = weighted_imbalance(book, cfg.depth_levels, cfg.depth_decay);
        values[10] = book_pressure(book, cfg.depth_levels);

        // Spread
        values[11] = book.spread();
        values[12] = relative_spread(book);

        // Rolling state uses the bar close when the book is one-sided.
        let price = if mid > 0.0 { mid } else { bar.close };

        // Volatility
        values[13] = self.volatility.add_price(price).unwrap_or(0.0);
        let (velocity, acceleration) = self.kinematics.update(bar.end_ms, price);
        values[14] = velocity;
        values[15] = acceleration;

        // Hawkes
        values[16] = hawkes.buy_intensity;
        values[17] = hawkes.sell_intensity;
        values[18] = hawkes.buy_sell_ratio;
        values[19] = hawkes.self_excitation;

        // Liquidity
        if let Some(prev) = self.prev_price {
            let log_return = if prev > 0.0 && price > 0.0 { (price / prev).ln() } else { 0.0 };
            self.liquidity
                .update(price - prev, bar.signed_volume(), log_return, bar.dollar_value);
        }
        values[20] = self.liquidity.kyle_lambda();
        values[21] = self.liquidity.amihud();

        // Fractional differentiation
        values[22] = self.frac_price.update(price);
        values[23] = self.frac_volume.update(bar.volume);

        // Technical
        values[24] = self.rsi.update(price);
        values[25] = self.macd.update(price);
        values[26] = self.bollinger.update(price);

        for value in values.iter_mut() {
            if !value.is_finite() {
                *value = 0.0;
            }
        }

        self.prev_price = Some(price);
        self.bars_processed += 1;
        debug!(end_ms = bar.end_ms, bars = self.bars_processed, "Features computed");

        Ok(FeatureVector {
            ts_ms: bar.end_ms,
            values,
        })
    }

    /// True once every rolling component has seen a full window. Vectors
    /// emitted before that carry warm-up defaults in the affected slots.
    pub fn is_warmed_up(&self) -> bool {
        let bars = self.bars_processed as usize;
        self.volatility.is_ready()
            && self.frac_price.is_ready()
            && bars > self.config.rsi_period
            && bars >= self.config.bollinger_period
            && bars >= self.config.macd_slow + self.config.macd_signal
    }

    pub fn bars_processed(&self) -> u64 {
        self.bars_processed
    }

    pub fn suppressed_bars(&self) -> u64 {
        self.bars_suppressed
    }

    /// Clear all state.
    pub fn clear(&mut self) {
        self.ofi.reset();
        self.volatility.clear();
        self.kinematics.clear();
        self.liquidity.clear();
        self.rsi.clear();
        self.macd.clear();
        self.bollinger.clear();
        self.frac_price.clear();
        self.frac_volume.clear();
        self.prev_price = None;
        self.pending_gap = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alpha_core::{BarKind, OrderBookLevel};
    use approx::assert_abs_diff_eq;

    fn default_config() -> Config {
        let mut config = Config::default();
        config.features.volatility_window = 5; // Small window for testing
        config
    }

    fn make_book(mid: f64, bid_vol: f64, ask_vol: f64) -> OrderBook {
        OrderBook {
            symbol: "WIN".to_string(),
            ts_ms: 0,
            seq: 1,
            bids: vec![
                OrderBookLevel::new(mid - 0.5, bid_vol),
                OrderBookLevel::new(mid - 1.5, bid_vol),
            ],
            asks: vec![
                OrderBookLevel::new(mid + 0.5, ask_vol),
                OrderBookLevel::new(mid + 1.5, ask_vol),
            ],
        }
    }

    fn make_bar(end_ms: i64, close: f64) -> InformationBar {
        InformationBar {
            kind: BarKind::Tick,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 100.0,
            dollar_value: 100.0 * close,
            buy_volume: 60.0,
            sell_volume: 40.0,
            start_ms: end_ms - 1_000,
            end_ms,
            tick_count: 100,
        }
    }

    fn make_delta(bid: f64, ask: f64) -> BookDelta {
        BookDelta {
            seq: 2,
            ts_ms: 0,
            bid_deltas: vec![bid, 0.0, 0.0, 0.0, 0.0],
            ask_deltas: vec![ask, 0.0, 0.0, 0.0, 0.0],
            first: false,
            cancellations: 0,
        }
    }

    #[test]
    fn test_engine_creation() {
        let engine = FeatureEngine::new(&default_config());
        assert!(!engine.is_warmed_up());
        assert_eq!(engine.bars_processed(), 0);
    }

    #[test]
    fn test_first_bar_defaults() {
        let mut engine = FeatureEngine::new(&default_config());
        let fv = engine
            .on_bar(&make_bar(1_000, 100.0), &make_book(100.0, 10.0, 10.0), &HawkesFeatures::default())
            .unwrap();

        assert_eq!(fv.ts_ms, 1_000);
        assert_abs_diff_eq!(fv.get("mid_price").unwrap(), 100.0);
        assert_abs_diff_eq!(fv.get("micro_price").unwrap(), 100.0);
        assert_eq!(fv.get("ofi_1").unwrap(), 0.0);
        assert_eq!(fv.get("book_imbalance").unwrap(), 0.0);
        assert_abs_diff_eq!(fv.get("spread").unwrap(), 1.0);
        assert_eq!(fv.get("realized_volatility").unwrap(), 0.0);
        assert_eq!(fv.get("hawkes_buy_sell_ratio").unwrap(), 0.5);
        assert_eq!(fv.get("kyle_lambda").unwrap(), 0.0);
        assert_eq!(fv.get("frac_diff_price").unwrap(), 0.0);
        assert_eq!(fv.get("rsi").unwrap(), 50.0);
        assert_eq!(fv.get("macd_signal").unwrap(), 0.0);
        assert_eq!(fv.get("bollinger_position").unwrap(), 0.5);
    }

    #[test]
    fn test_ofi_accumulates_and_resets_per_bar() {
        let mut engine = FeatureEngine::new(&default_config());
        let book = make_book(100.0, 10.0, 10.0);
        engine.add_book_delta(&make_delta(5.0, 1.0));
        engine.add_book_delta(&make_delta(2.0, -3.0));

        let fv = engine.on_bar(&make_bar(1_000, 100.0), &book, &HawkesFeatures::default()).unwrap();
        assert_abs_diff_eq!(fv.get("ofi_1").unwrap(), 9.0);
        assert_abs_diff_eq!(fv.get("ofi_5").unwrap(), 9.0);

        let fv = engine.on_bar(&make_bar(2_000, 100.0), &book, &HawkesFeatures::default()).unwrap();
        assert_eq!(fv.get("ofi_1").unwrap(), 0.0);
    }

    #[test]
    fn test_gap_suppresses_bar() {
        let mut engine = FeatureEngine::new(&default_config());
        let book = make_book(100.0, 10.0, 10.0);
        engine.add_book_delta(&make_delta(5.0, 0.0));
        engine.mark_gap(10, 14);

        let result = engine.on_bar(&make_bar(1_000, 100.0), &book, &HawkesFeatures::default());
        assert!(matches!(
            result,
            Err(Error::SequenceGapDetected { expected: 10, got: 14 })
        ));
        assert_eq!(engine.suppressed_bars(), 1);
        assert_eq!(engine.bars_processed(), 0);

        // Next clean bar starts from an empty order-flow window.
        let fv = engine.on_bar(&make_bar(2_000, 100.0), &book, &HawkesFeatures::default()).unwrap();
        assert_eq!(fv.get("ofi_1").unwrap(), 0.0);
    }

    #[test]
    fn test_discarded_order_flow_keeps_next_bar() {
        let mut engine = FeatureEngine::new(&default_config());
        let book = make_book(100.0, 10.0, 10.0);
        engine.add_book_delta(&make_delta(5.0, 0.0));
        engine.discard_order_flow();
        engine.add_book_delta(&make_delta(2.0, 0.0));

        let fv = engine.on_bar(&make_bar(1_000, 100.0), &book, &HawkesFeatures::default()).unwrap();
        assert_abs_diff_eq!(fv.get("ofi_1").unwrap(), 2.0);
        assert_eq!(engine.suppressed_bars(), 0);
    }

    #[test]
    fn test_warm_up_covers_every_window() {
        let mut config = default_config();
        config.features.frac_diff_max_weights = 5;
        config.features.rsi_period = 4;
        config.features.bollinger_period = 5;
        config.features.macd_fast = 3;
        config.features.macd_slow = 6;
        config.features.macd_signal = 3;
        let mut engine = FeatureEngine::new(&config);
        let book = make_book(100.0, 10.0, 10.0);

        // MACD needs slow + signal bars, the longest of the windows above.
        for i in 0..9 {
            assert!(!engine.is_warmed_up(), "warmed up after {i} bars");
            engine
                .on_bar(&make_bar((i + 1) * 1_000, 100.0), &book, &HawkesFeatures::default())
                .unwrap();
        }
        assert!(engine.is_warmed_up());

        engine.clear();
        assert!(!engine.is_warmed_up());
    }

    #[test]
    fn test_hawkes_slots_passed_through() {
        let mut engine = FeatureEngine::new(&default_config());
        let hawkes = HawkesFeatures {
            buy_intensity: 2.0,
            sell_intensity: 1.0,
            buy_sell_ratio: 2.0 / 3.0,
            self_excitation: 0.4,
            ..HawkesFeatures::default()
        };
        let fv = engine
            .on_bar(&make_bar(1_000, 100.0), &make_book(100.0, 10.0, 10.0), &hawkes)
            .unwrap();
        assert_eq!(&fv.values[16..20], &[2.0, 1.0, 2.0 / 3.0, 0.4]);
    }

    #[test]
    fn test_velocity_and_volatility_after_warmup() {
        let mut engine = FeatureEngine::new(&default_config());
        let mut last = None;
        for i in 0..10 {
            let mid = 100.0 + (i % 2) as f64;
            let fv = engine
                .on_bar(
                    &make_bar((i + 1) * 1_000, mid),
                    &make_book(mid, 10.0, 10.0),
                    &HawkesFeatures::default(),
                )
                .unwrap();
            last = Some(fv);
        }
        let fv = last.unwrap();
        assert!(fv.get("realized_volatility").unwrap() > 0.0);
        // Last step: 100 -> 101 over one second, after a -1 step
        assert_abs_diff_eq!(fv.get("price_velocity").unwrap(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(fv.get("price_acceleration").unwrap(), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_one_sided_book_uses_bar_close() {
        let mut engine = FeatureEngine::new(&default_config());
        let mut book = make_book(100.0, 10.0, 10.0);
        book.asks.clear();
        let fv = engine.on_bar(&make_bar(1_000, 99.0), &book, &HawkesFeatures::default()).unwrap();
        assert_eq!(fv.get("mid_price").unwrap(), 0.0);
        assert_eq!(fv.get("relative_spread").unwrap(), 0.0);
        assert_eq!(fv.get("book_pressure").unwrap(), 0.0);
        assert!(fv.values.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_clear() {
        let mut engine = FeatureEngine::new(&default_config());
        engine.mark_gap(1, 3);
        engine.clear();
        assert!(engine
            .on_bar(&make_bar(1_000, 100.0), &make_book(100.0, 1.0, 1.0), &HawkesFeatures::default())
            .is_ok());
    }
}
