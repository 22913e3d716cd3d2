//! Classic technical indicators computed incrementally per bar.
//!
//! Each indicator returns a neutral value until warmed up and carries its
//! previous value forward whenever its denominator is zero.

use crate::window::RollingWindow;

/// Relative Strength Index with simple average gains and losses.
pub struct Rsi {
    period: usize,
    prices: RollingWindow,
    value: f64,
}

impl Rsi {
    pub const NEUTRAL: f64 = 50.0;

    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            prices: RollingWindow::new(period.max(1) + 1),
            value: Self::NEUTRAL,
        }
    }

    pub fn update(&mut self, price: f64) -> f64 {
        self.prices.push(price);
        if !self.prices.is_full() {
            return self.value;
        }

        let (mut gains, mut losses) = (0.0, 0.0);
        let prices: Vec<f64> = self.prices.iter().copied().collect();
        for w in prices.windows(2) {
            let change = w[1] - w[0];
            if change > 0.0 {
                gains += change;
            } else {
                losses -= change;
            }
        }

        let avg_gain = gains / self.period as f64;
        let avg_loss = losses / self.period as f64;
        let total = avg_gain + avg_loss;
        if total > 0.0 {
            self.value = 100.0 * avg_gain / total;
        }
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn clear(&mut self) {
        self.prices.clear();
        self.value = Self::NEUTRAL;
    }
}

/// Exponential moving average with `alpha = 2 / (span + 1)`, seeded by the first value.
#[derive(Debug, Clone)]
struct Ema {
    alpha: f64,
    value: Option<f64>,
}

impl Ema {
    fn new(span: usize) -> Self {
        Self {
            alpha: 2.0 / (span as f64 + 1.0),
            value: None,
        }
    }

    fn update(&mut self, x: f64) -> f64 {
        let next = match self.value {
            Some(prev) => self.alpha * x + (1.0 - self.alpha) * prev,
            None => x,
        };
        self.value = Some(next);
        next
    }
}

/// MACD signal line.
pub struct Macd {
    fast: Ema,
    slow: Ema,
    signal: Ema,
    warmup: usize,
    count: usize,
    value: f64,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        Self {
            fast: Ema::new(fast),
            slow: Ema::new(slow),
            signal: Ema::new(signal),
            warmup: slow,
            count: 0,
            value: 0.0,
        }
    }

    /// Returns the signal line, 0 until `slow` prices have been seen.
    pub fn update(&mut self, price: f64) -> f64 {
        let line = self.fast.update(price) - self.slow.update(price);
        let signal = self.signal.update(line);
        self.count += 1;
        if self.count >= self.warmup {
            self.value = signal;
        }
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn clear(&mut self) {
        self.fast.value = None;
        self.slow.value = None;
        self.signal.value = None;
        self.count = 0;
        self.value = 0.0;
    }
}

/// Position of price inside its Bollinger bands, clipped to [0, 1].
pub struct Bollinger {
    prices: RollingWindow,
    k: f64,
    value: f64,
}

impl Bollinger {
    pub const NEUTRAL: f64 = 0.5;

    pub fn new(period: usize, k: f64) -> Self {
        Self {
            prices: RollingWindow::new(period),
            k,
            value: Self::NEUTRAL,
        }
    }

    pub fn update(&mut self, price: f64) -> f64 {
        self.prices.push(price);
        if !self.prices.is_full() {
            return self.value;
        }

        let (Some(middle), Some(std)) = (self.prices.mean(), self.prices.std_dev()) else {
            return self.value;
        };
        let lower = middle - self.k * std;
        let width = 2.0 * self.k * std;
        if width > 0.0 {
            self.value = ((price - lower) / width).clamp(0.0, 1.0);
        }
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn clear(&mut self) {
        self.prices.clear();
        self.value = Self::NEUTRAL;
    }
}
