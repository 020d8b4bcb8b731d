//! Rendering surface contract and the deltas pushed to it.
//!
//! The engine never draws. It emits [`RenderDelta`]s into a [`RenderSink`];
//! a [`SurfaceRouter`] maps those deltas onto the [`ChartSurface`]s registered
//! with a [`TimeAxisCoordinator`].

use crate::{
    axis::{LogicalRange, SurfaceId, TimeAxisCoordinator, ViewSurface},
    bar::UpsertOutcome,
    error::ChartError,
    feed::ConnectionStatus,
    indicator::{IndicatorKind, IndicatorSeries},
    types::{Bar, IndicatorPoint, Marker, UnixTime},
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Series a surface can plot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum SeriesKey {
    Candles,
    Sma,
    MacdHistogram,
    Rsi,
}

impl From<IndicatorKind> for SeriesKey {
    fn from(kind: IndicatorKind) -> Self {
        match kind {
            IndicatorKind::Sma => SeriesKey::Sma,
            IndicatorKind::MacdHistogram => SeriesKey::MacdHistogram,
            IndicatorKind::Rsi => SeriesKey::Rsi,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub enum SeriesPoint {
    Candle(Bar),
    Value(IndicatorPoint),
}

impl SeriesPoint {
    pub fn time(&self) -> UnixTime {
        match self {
            SeriesPoint::Candle(bar) => bar.time,
            SeriesPoint::Value(point) => point.time,
        }
    }
}

/// Whether a bar or point may still be revised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum BarPhase {
    Provisional,
    Final,
}

/// Everything a surface needs for the initial draw after the snapshot.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct SnapshotFrame {
    pub bars: Vec<Bar>,
    pub indicators: Vec<(IndicatorKind, IndicatorSeries)>,
    pub markers: Vec<Marker>,
    pub sma_period: usize,
}

/// One incremental change for the rendering side.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum RenderDelta {
    /// Full series after the snapshot was applied
    Reset(Box<SnapshotFrame>),
    Bar {
        bar: Bar,
        outcome: UpsertOutcome,
        phase: BarPhase,
    },
    Indicator {
        kind: IndicatorKind,
        point: IndicatorPoint,
        phase: BarPhase,
    },
    /// Full ordered marker set, emitted when it changed
    Markers(Vec<Marker>),
    Connection(ConnectionStatus),
    Diagnostic(ChartError),
}

/// Receives render deltas from the engine.
pub trait RenderSink {
    fn render(&mut self, delta: RenderDelta);
}

impl RenderSink for Vec<RenderDelta> {
    fn render(&mut self, delta: RenderDelta) {
        self.push(delta);
    }
}

impl<T> RenderSink for Arc<Mutex<T>>
where
    T: RenderSink,
{
    fn render(&mut self, delta: RenderDelta) {
        self.lock().render(delta);
    }
}

impl RenderSink for mpsc::UnboundedSender<RenderDelta> {
    fn render(&mut self, delta: RenderDelta) {
        // Receiver gone means the surface was torn down
        let _ = self.send(delta);
    }
}

/// Drawing contract of a chart pane.
pub trait ChartSurface: ViewSurface {
    fn set_series(&mut self, key: SeriesKey, points: Vec<SeriesPoint>);

    fn append_or_replace_last(&mut self, key: SeriesKey, point: SeriesPoint);

    fn set_markers(&mut self, markers: &[Marker]);
}

/// Maps render deltas onto the surfaces of a coordinator.
#[derive(Debug, Clone, Default)]
pub struct SurfaceRouter {
    routes: Vec<(SeriesKey, SurfaceId)>,
    marker_surfaces: Vec<SurfaceId>,
    /// Bars shown by the initial visible range
    visible_bars: usize,
    /// Keep the latest bar in view as bars are appended
    follow_latest: bool,
    last_time: Option<UnixTime>,
}

impl SurfaceRouter {
    pub fn new(visible_bars: usize) -> Self {
        Self {
            visible_bars: visible_bars.max(1),
            follow_latest: true,
            ..Default::default()
        }
    }

    pub fn route(mut self, key: SeriesKey, surface: SurfaceId) -> Self {
        self.routes.push((key, surface));
        self
    }

    pub fn with_markers(mut self, surface: SurfaceId) -> Self {
        self.marker_surfaces.push(surface);
        self
    }

    pub fn follow_latest(&self) -> bool {
        self.follow_latest
    }

    pub fn set_follow_latest(&mut self, follow: bool) {
        self.follow_latest = follow;
    }

    fn targets(&self, key: SeriesKey) -> impl Iterator<Item = SurfaceId> + '_ {
        self.routes
            .iter()
            .filter(move |(k, _)| *k == key)
            .map(|(_, id)| *id)
    }

    /// Apply `delta` to the routed surfaces. Deltas without a surface
    /// counterpart (connection status, diagnostics) are handed back.
    pub fn apply<S: ChartSurface>(
        &mut self,
        delta: RenderDelta,
        coordinator: &mut TimeAxisCoordinator<S>,
    ) -> Option<RenderDelta> {
        match delta {
            RenderDelta::Reset(frame) => {
                let candles: Vec<_> = frame.bars.iter().copied().map(SeriesPoint::Candle).collect();
                self.set_series(coordinator, SeriesKey::Candles, candles);
                for (kind, series) in &frame.indicators {
                    let points = series.points.iter().copied().map(SeriesPoint::Value).collect();
                    self.set_series(coordinator, SeriesKey::from(*kind), points);
                }
                self.set_markers(coordinator, &frame.markers);

                self.last_time = frame.bars.last().map(|b| b.time);
                if let Some(range) = initial_range(&frame.bars, self.visible_bars) {
                    coordinator.set_all(range);
                }
                None
            }
            RenderDelta::Bar { bar, outcome, .. } => {
                for id in self.targets(SeriesKey::Candles) {
                    if let Some(surface) = coordinator.surface_mut(id) {
                        surface.append_or_replace_last(SeriesKey::Candles, SeriesPoint::Candle(bar));
                    }
                }

                let previous = self.last_time.replace(bar.time);
                if outcome == UpsertOutcome::Appended && self.follow_latest {
                    if let (Some(range), Some(previous)) = (coordinator.shared_range(), previous) {
                        if range.contains(previous) {
                            coordinator.set_all(range.shift(bar.time - previous));
                        }
                    }
                }
                None
            }
            RenderDelta::Indicator { kind, point, .. } => {
                let key = SeriesKey::from(kind);
                for id in self.targets(key) {
                    if let Some(surface) = coordinator.surface_mut(id) {
                        surface.append_or_replace_last(key, SeriesPoint::Value(point));
                    }
                }
                None
            }
            RenderDelta::Markers(markers) => {
                self.set_markers(coordinator, &markers);
                None
            }
            other @ (RenderDelta::Connection(_) | RenderDelta::Diagnostic(_)) => Some(other),
        }
    }

    fn set_series<S: ChartSurface>(
        &self,
        coordinator: &mut TimeAxisCoordinator<S>,
        key: SeriesKey,
        points: Vec<SeriesPoint>,
    ) {
        for id in self.targets(key) {
            if let Some(surface) = coordinator.surface_mut(id) {
                surface.set_series(key, points.clone());
            }
        }
    }

    fn set_markers<S: ChartSurface>(&self, coordinator: &mut TimeAxisCoordinator<S>, markers: &[Marker]) {
        for id in &self.marker_surfaces {
            if let Some(surface) = coordinator.surface_mut(*id) {
                surface.set_markers(markers);
            }
        }
    }
}

/// Range covering the last `n` bars
pub fn initial_range(bars: &[Bar], n: usize) -> Option<LogicalRange> {
    let last = bars.last()?;
    let start = bars.len().saturating_sub(n.max(1));
    Some(LogicalRange::new(bars[start].time, last.time))
}
