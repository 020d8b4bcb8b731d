// Moving Average Convergence Divergence (MACD) histogram
use super::{Indicator, IndicatorKind};
use crate::types::{Bar, IndicatorPoint};
use serde::{Deserialize, Serialize};

/// Exponential Moving Average seeded with the first value
///
/// Matches a non-adjusted EWM: `ema = alpha * x + (1 - alpha) * ema_prev`
/// with `alpha = 2 / (span + 1)`.
#[derive(Debug, Clone)]
pub struct Ema {
    /// Smoothing factor (alpha)
    alpha: f64,
    /// Current EMA value
    value: Option<f64>,
}

impl Ema {
    pub fn new(span: usize) -> Self {
        Self {
            alpha: 2.0 / (span.max(1) as f64 + 1.0),
            value: None,
        }
    }

    /// Update EMA with a new value
    pub fn update(&mut self, new_value: f64) -> f64 {
        let next = self.next(new_value);
        self.value = Some(next);
        next
    }

    fn next(&self, new_value: f64) -> f64 {
        match self.value {
            None => new_value,
            Some(current) => self.alpha * new_value + (1.0 - self.alpha) * current,
        }
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn reset(&mut self) {
        self.value = None;
    }
}

/// MACD spans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct MacdParams {
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

impl Default for MacdParams {
    fn default() -> Self {
        Self {
            fast: 12,
            slow: 26,
            signal: 9,
        }
    }
}

/// MACD histogram accumulator.
///
/// Only finalized bars contribute; no provisional value is exposed.
#[derive(Debug, Clone)]
pub struct Macd {
    params: MacdParams,
    fast: Ema,
    slow: Ema,
    signal: Ema,
}

impl Macd {
    pub fn new(params: MacdParams) -> Self {
        Self {
            params,
            fast: Ema::new(params.fast),
            slow: Ema::new(params.slow),
            signal: Ema::new(params.signal),
        }
    }

    pub fn params(&self) -> MacdParams {
        self.params
    }

    /// Current MACD line (fast EMA minus slow EMA)
    pub fn line(&self) -> Option<f64> {
        Some(self.fast.value()? - self.slow.value()?)
    }
}

impl Indicator for Macd {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::MacdHistogram
    }

    fn consume_final(&mut self, bar: &Bar) -> IndicatorPoint {
        let line = self.fast.update(bar.close) - self.slow.update(bar.close);
        let signal = self.signal.update(line);
        IndicatorPoint::new(bar.time, Some(line - signal))
    }

    fn peek_provisional(&self, _bar: &Bar) -> Option<IndicatorPoint> {
        None
    }

    fn reset(&mut self) {
        self.fast.reset();
        self.slow.reset();
        self.signal.reset();
    }
}
