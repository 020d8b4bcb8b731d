// Relative Strength Index (RSI) from simple rolling averages of gains and losses
use super::{window::RollingWindow, Indicator, IndicatorKind};
use crate::types::{Bar, IndicatorPoint};

#[derive(Debug, Clone)]
pub struct Rsi {
    gains: RollingWindow,
    losses: RollingWindow,
    prev_close: Option<f64>,
}

impl Rsi {
    pub fn new(length: usize) -> Self {
        Self {
            gains: RollingWindow::new(length),
            losses: RollingWindow::new(length),
            prev_close: None,
        }
    }

    pub fn length(&self) -> usize {
        self.gains.capacity()
    }
}

/// Split a close-to-close change into (gain, loss)
fn split(delta: f64) -> (f64, f64) {
    if delta > 0.0 {
        (delta, 0.0)
    } else {
        (0.0, -delta)
    }
}

/// RSI in [0, 100]. A flat window has no defined value.
fn strength(avg_gain: f64, avg_loss: f64) -> Option<f64> {
    if avg_loss == 0.0 {
        return (avg_gain > 0.0).then_some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

impl Indicator for Rsi {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Rsi
    }

    fn consume_final(&mut self, bar: &Bar) -> IndicatorPoint {
        let Some(prev) = self.prev_close.replace(bar.close) else {
            return IndicatorPoint::undefined(bar.time);
        };

        let (gain, loss) = split(bar.close - prev);
        self.gains.push(gain);
        self.losses.push(loss);

        let value = match (self.gains.mean(), self.losses.mean()) {
            (Some(avg_gain), Some(avg_loss)) => strength(avg_gain, avg_loss),
            _ => None,
        };
        IndicatorPoint::new(bar.time, value)
    }

    fn peek_provisional(&self, bar: &Bar) -> Option<IndicatorPoint> {
        let Some(prev) = self.prev_close else {
            return Some(IndicatorPoint::undefined(bar.time));
        };

        let (gain, loss) = split(bar.close - prev);
        let value = match (self.gains.peek_mean(gain), self.losses.peek_mean(loss)) {
            (Some(avg_gain), Some(avg_loss)) => strength(avg_gain, avg_loss),
            _ => None,
        };
        Some(IndicatorPoint::new(bar.time, value))
    }

    fn reset(&mut self) {
        self.gains.clear();
        self.losses.clear();
        self.prev_close = None;
    }
}
