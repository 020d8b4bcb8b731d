//! SMA band signal detector over committed bars.
//!
//! A bar straddling its SMA (`high > sma > low`) signals:
//! - BUY when it closes above the SMA and the SMA stayed above the highs of
//!   each of the previous 3 bars;
//! - SELL when it closes below the SMA and the SMA stayed below the lows of
//!   each of the previous 3 bars.

use crate::types::{Bar, MarkerKind};
use std::collections::VecDeque;

/// Number of preceding bars the band condition looks back over
pub const LOOKBACK: usize = 3;

#[derive(Debug, Clone, Copy)]
struct BandSample {
    sma: Option<f64>,
    high: f64,
    low: f64,
}

#[derive(Debug, Clone, Default)]
pub struct SmaBandDetector {
    history: VecDeque<BandSample>,
}

impl SmaBandDetector {
    pub fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(LOOKBACK + 1),
        }
    }

    /// Feed a committed bar and its SMA value, returning a signal if one fires.
    pub fn observe(&mut self, bar: &Bar, sma: Option<f64>) -> Option<MarkerKind> {
        let signal = sma.and_then(|sma| self.evaluate(bar, sma));

        self.history.push_back(BandSample {
            sma,
            high: bar.high,
            low: bar.low,
        });
        if self.history.len() > LOOKBACK {
            self.history.pop_front();
        }
        signal
    }

    fn evaluate(&self, bar: &Bar, sma: f64) -> Option<MarkerKind> {
        if !(bar.high > sma && sma > bar.low) || self.history.len() < LOOKBACK {
            return None;
        }

        // Every previous SMA must be defined
        let prev_smas = self
            .history
            .iter()
            .map(|s| s.sma)
            .collect::<Option<Vec<f64>>>()?;
        let sma_min = prev_smas.iter().copied().fold(f64::INFINITY, f64::min);
        let sma_max = prev_smas.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let high_max = self.history.iter().map(|s| s.high).fold(f64::NEG_INFINITY, f64::max);
        let low_min = self.history.iter().map(|s| s.low).fold(f64::INFINITY, f64::min);

        if sma < bar.close && sma_min > high_max {
            Some(MarkerKind::Buy)
        } else if sma > bar.close && sma_max < low_min {
            Some(MarkerKind::Sell)
        } else {
            None
        }
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }
}
