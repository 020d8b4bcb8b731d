// Simple Moving Average (SMA) over bar closes
use super::{window::RollingWindow, Indicator, IndicatorKind};
use crate::types::{Bar, IndicatorPoint};

#[derive(Debug, Clone)]
pub struct Sma {
    window: RollingWindow,
}

impl Sma {
    pub fn new(period: usize) -> Self {
        Self {
            window: RollingWindow::new(period),
        }
    }

    pub fn period(&self) -> usize {
        self.window.capacity()
    }
}

impl Indicator for Sma {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Sma
    }

    fn consume_final(&mut self, bar: &Bar) -> IndicatorPoint {
        self.window.push(bar.close);
        IndicatorPoint::new(bar.time, self.window.mean())
    }

    fn peek_provisional(&self, bar: &Bar) -> Option<IndicatorPoint> {
        Some(IndicatorPoint::new(bar.time, self.window.peek_mean(bar.close)))
    }

    fn reset(&mut self) {
        self.window.clear();
    }
}
