//! Indicator Pipeline: incremental accumulators over finalized bars.
//!
//! Each accumulator consumes a committed bar exactly once through
//! [`Indicator::consume_final`]. A bar that is still forming is only *peeked*
//! through [`Indicator::peek_provisional`], which takes `&self` and therefore
//! cannot move any accumulator state.

use crate::{
    error::ChartError,
    types::{Bar, IndicatorPoint, UnixTime},
};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub mod macd;
pub mod rsi;
pub mod sma;
pub mod window;

pub use macd::{Ema, Macd, MacdParams};
pub use rsi::Rsi;
pub use sma::Sma;
pub use window::RollingWindow;

/// Default SMA window when the snapshot does not carry one
pub const DEFAULT_SMA_PERIOD: usize = 21;

/// Default RSI length
pub const DEFAULT_RSI_LENGTH: usize = 14;

/// Identifies one derived series.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Deserialize, Serialize,
)]
pub enum IndicatorKind {
    #[display("SMA")]
    Sma,
    #[display("MACD_hist")]
    MacdHistogram,
    #[display("RSI")]
    Rsi,
}

/// Incremental accumulator over bar closes.
pub trait Indicator {
    fn kind(&self) -> IndicatorKind;

    /// Fold a finalized bar into the accumulator and emit its point.
    fn consume_final(&mut self, bar: &Bar) -> IndicatorPoint;

    /// Value the accumulator would emit if `bar` were finalized now.
    ///
    /// `None` means the indicator exposes no provisional value.
    fn peek_provisional(&self, bar: &Bar) -> Option<IndicatorPoint>;

    fn reset(&mut self);
}

/// A single derived point tagged with its series.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct IndicatorUpdate {
    pub kind: IndicatorKind,
    pub point: IndicatorPoint,
}

/// A full derived series, as produced by [`IndicatorPipeline::replay`].
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct IndicatorSeries {
    pub points: Vec<IndicatorPoint>,
}

impl IndicatorSeries {
    pub fn last_value(&self) -> Option<f64> {
        self.points.last().and_then(|p| p.value)
    }
}

/// Indicator parameters other than the SMA window, which comes from the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct IndicatorConfig {
    /// SMA window used when the snapshot omits `sma_param`
    pub sma_fallback: usize,
    pub macd: MacdParams,
    pub rsi_length: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            sma_fallback: DEFAULT_SMA_PERIOD,
            macd: MacdParams::default(),
            rsi_length: DEFAULT_RSI_LENGTH,
        }
    }
}

impl IndicatorConfig {
    pub fn with_sma_fallback(mut self, period: usize) -> Self {
        self.sma_fallback = period;
        self
    }

    pub fn with_macd(mut self, macd: MacdParams) -> Self {
        self.macd = macd;
        self
    }

    pub fn with_rsi_length(mut self, length: usize) -> Self {
        self.rsi_length = length;
        self
    }
}

/// Owns one accumulator per indicator and enforces commit-once per bar time.
pub struct IndicatorPipeline {
    sma_period: usize,
    indicators: Vec<Box<dyn Indicator + Send>>,
    last_committed: Option<UnixTime>,
}

impl std::fmt::Debug for IndicatorPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndicatorPipeline")
            .field("sma_period", &self.sma_period)
            .field("kinds", &self.kinds())
            .field("last_committed", &self.last_committed)
            .finish()
    }
}

impl IndicatorPipeline {
    pub fn new(sma_period: usize, config: &IndicatorConfig) -> Self {
        let indicators: Vec<Box<dyn Indicator + Send>> = vec![
            Box::new(Sma::new(sma_period)),
            Box::new(Macd::new(config.macd)),
            Box::new(Rsi::new(config.rsi_length)),
        ];
        Self {
            sma_period: sma_period.max(1),
            indicators,
            last_committed: None,
        }
    }

    pub fn sma_period(&self) -> usize {
        self.sma_period
    }

    pub fn kinds(&self) -> Vec<IndicatorKind> {
        self.indicators.iter().map(|i| i.kind()).collect()
    }

    pub fn last_committed(&self) -> Option<UnixTime> {
        self.last_committed
    }

    /// True if a bar at `time` (or later) has already been committed.
    pub fn is_committed(&self, time: UnixTime) -> bool {
        self.last_committed.is_some_and(|last| time <= last)
    }

    /// Commit a finalized bar to every accumulator.
    pub fn consume_final(&mut self, bar: &Bar) -> Result<Vec<IndicatorUpdate>, ChartError> {
        match self.last_committed {
            Some(last) if bar.time == last => {
                return Err(ChartError::DuplicateCommit { time: bar.time });
            }
            Some(last) if bar.time < last => {
                return Err(ChartError::OutOfOrderUpdate {
                    last,
                    received: bar.time,
                });
            }
            _ => {}
        }

        self.last_committed = Some(bar.time);
        Ok(self
            .indicators
            .iter_mut()
            .map(|indicator| IndicatorUpdate {
                kind: indicator.kind(),
                point: indicator.consume_final(bar),
            })
            .collect())
    }

    /// Provisional values for a still-forming bar. Accumulators are untouched.
    pub fn peek_provisional(&self, bar: &Bar) -> Vec<IndicatorUpdate> {
        self.indicators
            .iter()
            .filter_map(|indicator| {
                indicator
                    .peek_provisional(bar)
                    .map(|point| IndicatorUpdate {
                        kind: indicator.kind(),
                        point,
                    })
            })
            .collect()
    }

    /// Rebuild every accumulator from `bars`, ascending, and return the
    /// derived series in [`Self::kinds`] order.
    pub fn replay(&mut self, bars: &[Bar]) -> Result<Vec<(IndicatorKind, IndicatorSeries)>, ChartError> {
        self.reset();

        let mut series: Vec<(IndicatorKind, IndicatorSeries)> = self
            .kinds()
            .into_iter()
            .map(|kind| {
                let points = Vec::with_capacity(bars.len());
                (kind, IndicatorSeries { points })
            })
            .collect();

        for bar in bars {
            for (slot, update) in series.iter_mut().zip(self.consume_final(bar)?) {
                slot.1.points.push(update.point);
            }
        }

        debug!(
            bars = bars.len(),
            sma_period = self.sma_period,
            "IndicatorPipeline replayed snapshot"
        );
        Ok(series)
    }

    pub fn reset(&mut self) {
        self.indicators.iter_mut().for_each(|i| i.reset());
        self.last_committed = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(time: UnixTime, close: f64) -> Bar {
        Bar::new(time, close, close, close, close, 0.0)
    }

    fn snapshot_bars() -> Vec<Bar> {
        (0..5).map(|i| bar(100 + i, 10.0 + i as f64)).collect()
    }

    fn sma_of(updates: &[IndicatorUpdate]) -> Option<f64> {
        updates
            .iter()
            .find(|u| u.kind == IndicatorKind::Sma)
            .and_then(|u| u.point.value)
    }

    #[test]
    fn test_replay_snapshot_sma() {
        let mut pipeline = IndicatorPipeline::new(3, &IndicatorConfig::default());
        let series = pipeline.replay(&snapshot_bars()).unwrap();

        let (kind, sma) = &series[0];
        assert_eq!(*kind, IndicatorKind::Sma);
        let values: Vec<_> = sma.points.iter().map(|p| (p.time, p.value)).collect();
        assert_eq!(
            values,
            vec![
                (100, None),
                (101, None),
                (102, Some(11.0)),
                (103, Some(12.0)),
                (104, Some(13.0)),
            ]
        );
        assert_eq!(pipeline.last_committed(), Some(104));
        // MACD and RSI stay aligned to the bar sequence
        assert!(series.iter().all(|(_, s)| s.points.len() == 5));
    }

    #[test]
    fn test_commit_after_replay() {
        let mut pipeline = IndicatorPipeline::new(3, &IndicatorConfig::default());
        pipeline.replay(&snapshot_bars()).unwrap();

        let updates = pipeline.consume_final(&bar(105, 15.0)).unwrap();
        assert_eq!(sma_of(&updates), Some(14.0));
        assert_eq!(updates.len(), 3);
    }

    #[test]
    fn test_consume_final_rejects_recommit() {
        struct TestCase {
            input: UnixTime,
            expected: ChartError,
        }

        let tests = vec![
            TestCase {
                // TC0: same bar committed twice
                input: 104,
                expected: ChartError::DuplicateCommit { time: 104 },
            },
            TestCase {
                // TC1: earlier bar
                input: 102,
                expected: ChartError::OutOfOrderUpdate {
                    last: 104,
                    received: 102,
                },
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let mut pipeline = IndicatorPipeline::new(3, &IndicatorConfig::default());
            pipeline.replay(&snapshot_bars()).unwrap();

            let actual = pipeline.consume_final(&bar(test.input, 1.0));
            assert_eq!(actual, Err(test.expected), "TC{} failed", index);

            // Rejected commits leave the accumulators untouched
            let next = pipeline.consume_final(&bar(105, 15.0)).unwrap();
            assert_eq!(sma_of(&next), Some(14.0), "TC{} mutated state", index);
        }
    }

    #[test]
    fn test_peek_provisional_never_commits() {
        let mut pipeline = IndicatorPipeline::new(3, &IndicatorConfig::default());
        pipeline.replay(&snapshot_bars()).unwrap();

        for close in [20.0, 5.0, 15.0] {
            let peeked = pipeline.peek_provisional(&bar(105, close));
            assert!(peeked.iter().all(|u| u.kind != IndicatorKind::MacdHistogram));
            assert!(peeked.iter().any(|u| u.kind == IndicatorKind::Rsi));
        }
        assert_eq!(sma_of(&pipeline.peek_provisional(&bar(105, 15.0))), Some(14.0));
        assert_eq!(pipeline.last_committed(), Some(104));
        assert!(!pipeline.is_committed(105));

        let committed = pipeline.consume_final(&bar(105, 15.0)).unwrap();
        assert_eq!(sma_of(&committed), Some(14.0));
        assert!(pipeline.is_committed(105));
    }

    #[test]
    fn test_replay_resets_previous_state() {
        let mut pipeline = IndicatorPipeline::new(3, &IndicatorConfig::default());
        pipeline.replay(&snapshot_bars()).unwrap();
        let again = pipeline.replay(&snapshot_bars()).unwrap();
        assert_eq!(again[0].1.last_value(), Some(13.0));
    }

    #[test]
    fn test_indicator_kind_display() {
        assert_eq!(IndicatorKind::Sma.to_string(), "SMA");
        assert_eq!(IndicatorKind::MacdHistogram.to_string(), "MACD_hist");
        assert_eq!(IndicatorKind::Rsi.to_string(), "RSI");
    }
}
