use chart_sync::{
    backtest::{self, BacktestReport, DEFAULT_INITIAL_BALANCE},
    surface::initial_range,
    Bar, ChartSurface, ConnectionStatus, IndicatorPoint, LogicalRange, Marker, RangeNotifier,
    RenderDelta, RenderSink, SeriesKey, SeriesPoint, SurfaceId, SurfaceRouter,
    TimeAxisCoordinator, UnixTime, ViewSurface,
};
use std::collections::HashMap;

/// Narrowest range a pane can be zoomed into, in seconds
const MIN_SPAN: UnixTime = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaneKind {
    Price,
    Macd,
    Rsi,
}

impl PaneKind {
    pub fn title(&self) -> &'static str {
        match self {
            PaneKind::Price => "PRICE",
            PaneKind::Macd => "MACD HIST",
            PaneKind::Rsi => "RSI",
        }
    }
}

/// One chart pane of the terminal.
#[derive(Debug)]
pub struct Pane {
    pub kind: PaneKind,
    pub candles: Vec<Bar>,
    pub lines: HashMap<SeriesKey, Vec<IndicatorPoint>>,
    pub markers: Vec<Marker>,
    range: Option<LogicalRange>,
    notifier: Option<RangeNotifier>,
}

impl Pane {
    pub fn new(kind: PaneKind) -> Self {
        Self {
            kind,
            candles: Vec::new(),
            lines: HashMap::new(),
            markers: Vec::new(),
            range: None,
            notifier: None,
        }
    }

    pub fn line(&self, key: SeriesKey) -> &[IndicatorPoint] {
        self.lines.get(&key).map(Vec::as_slice).unwrap_or_default()
    }

    /// User gesture: move or rescale the visible range, then tell the peers.
    fn gesture(&mut self, range: LogicalRange) {
        self.range = Some(range);
        if let Some(notifier) = &self.notifier {
            notifier.notify(range);
        }
    }
}

fn upsert_last<T, F>(points: &mut Vec<T>, point: T, time: F)
where
    F: Fn(&T) -> UnixTime,
{
    match points.last_mut() {
        Some(last) if time(last) == time(&point) => *last = point,
        Some(last) if time(last) > time(&point) => {}
        _ => points.push(point),
    }
}

impl ViewSurface for Pane {
    fn visible_range(&self) -> Option<LogicalRange> {
        self.range
    }

    fn set_visible_range(&mut self, range: LogicalRange) {
        self.range = Some(range);
    }

    fn on_visible_range_changed(&mut self, notifier: RangeNotifier) {
        self.notifier = Some(notifier);
    }
}

impl ChartSurface for Pane {
    fn set_series(&mut self, key: SeriesKey, points: Vec<SeriesPoint>) {
        match key {
            SeriesKey::Candles => {
                self.candles = points
                    .into_iter()
                    .filter_map(|point| match point {
                        SeriesPoint::Candle(bar) => Some(bar),
                        SeriesPoint::Value(_) => None,
                    })
                    .collect();
            }
            key => {
                let values = points
                    .into_iter()
                    .filter_map(|point| match point {
                        SeriesPoint::Value(value) => Some(value),
                        SeriesPoint::Candle(_) => None,
                    })
                    .collect();
                self.lines.insert(key, values);
            }
        }
    }

    fn append_or_replace_last(&mut self, key: SeriesKey, point: SeriesPoint) {
        match (key, point) {
            (SeriesKey::Candles, SeriesPoint::Candle(bar)) => {
                upsert_last(&mut self.candles, bar, |b| b.time)
            }
            (key, SeriesPoint::Value(value)) => {
                upsert_last(self.lines.entry(key).or_default(), value, |p| p.time)
            }
            _ => {}
        }
    }

    fn set_markers(&mut self, markers: &[Marker]) {
        self.markers = markers.to_vec();
    }
}

/// Terminal state fed by the engine through [`RenderSink`].
#[derive(Debug)]
pub struct ChartView {
    coordinator: TimeAxisCoordinator<Pane>,
    router: SurfaceRouter,
    pane_ids: [SurfaceId; 3],
    focus: usize,
    visible_bars: usize,
    pub connection: Option<ConnectionStatus>,
    pub last_diagnostic: Option<String>,
    pub markers: Vec<Marker>,
    pub last_close: Option<f64>,
}

impl ChartView {
    pub fn new(visible_bars: usize) -> Self {
        let mut coordinator = TimeAxisCoordinator::new();
        let price = coordinator.register(Pane::new(PaneKind::Price));
        let macd = coordinator.register(Pane::new(PaneKind::Macd));
        let rsi = coordinator.register(Pane::new(PaneKind::Rsi));

        let router = SurfaceRouter::new(visible_bars)
            .route(SeriesKey::Candles, price)
            .route(SeriesKey::Sma, price)
            .route(SeriesKey::MacdHistogram, macd)
            .route(SeriesKey::Rsi, rsi)
            .with_markers(price);

        Self {
            coordinator,
            router,
            pane_ids: [price, macd, rsi],
            focus: 0,
            visible_bars,
            connection: None,
            last_diagnostic: None,
            markers: Vec::new(),
            last_close: None,
        }
    }

    pub fn panes(&self) -> impl Iterator<Item = (bool, &Pane)> + '_ {
        self.pane_ids.iter().enumerate().filter_map(|(index, id)| {
            self.coordinator
                .surface(*id)
                .map(|pane| (index == self.focus, pane))
        })
    }

    pub fn price(&self) -> Option<&Pane> {
        self.coordinator.surface(self.pane_ids[0])
    }

    pub fn shared_range(&self) -> Option<LogicalRange> {
        self.coordinator.shared_range()
    }

    pub fn follow_latest(&self) -> bool {
        self.router.follow_latest()
    }

    pub fn bar_count(&self) -> usize {
        self.price().map(|pane| pane.candles.len()).unwrap_or(0)
    }

    pub fn backtest(&self) -> BacktestReport {
        backtest::run(&self.markers, self.last_close, DEFAULT_INITIAL_BALANCE)
    }

    pub fn focus_next(&mut self) {
        self.focus = (self.focus + 1) % self.pane_ids.len();
    }

    /// Scroll the focused pane by a tenth of its span; negative moves back in time.
    pub fn scroll(&mut self, direction: i64) {
        let id = self.pane_ids[self.focus];
        let Some(range) = self.coordinator.range_of(id) else {
            return;
        };
        let step = (range.span() / 10).max(1);
        self.router.set_follow_latest(false);
        self.gesture(id, range.shift(step * direction.signum()));
    }

    pub fn zoom(&mut self, factor: f64) {
        let id = self.pane_ids[self.focus];
        let Some(range) = self.coordinator.range_of(id) else {
            return;
        };
        self.gesture(id, range.zoom(factor, MIN_SPAN));
    }

    /// Toggle follow mode; turning it on jumps back to the latest bars.
    pub fn toggle_follow(&mut self) {
        let follow = !self.router.follow_latest();
        self.router.set_follow_latest(follow);
        if !follow {
            return;
        }
        let range = self
            .price()
            .and_then(|pane| initial_range(&pane.candles, self.visible_bars));
        if let Some(range) = range {
            self.coordinator.set_all(range);
        }
    }

    fn gesture(&mut self, id: SurfaceId, range: LogicalRange) {
        if let Some(pane) = self.coordinator.surface_mut(id) {
            pane.gesture(range);
        }
        self.coordinator.pump();
    }
}

impl RenderSink for ChartView {
    fn render(&mut self, delta: RenderDelta) {
        match &delta {
            RenderDelta::Reset(frame) => {
                self.markers = frame.markers.clone();
                self.last_close = frame.bars.last().map(|bar| bar.close);
                self.last_diagnostic = None;
            }
            RenderDelta::Bar { bar, .. } => self.last_close = Some(bar.close),
            RenderDelta::Markers(markers) => self.markers = markers.clone(),
            _ => {}
        }

        match self.router.apply(delta, &mut self.coordinator) {
            Some(RenderDelta::Connection(status)) => self.connection = Some(status),
            Some(RenderDelta::Diagnostic(error)) => self.last_diagnostic = Some(error.to_string()),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chart_sync::{
        bar::UpsertOutcome,
        surface::{BarPhase, SnapshotFrame},
        ChartError, IndicatorKind, IndicatorSeries, MarkerKind,
    };

    fn bar(time: i64, close: f64) -> Bar {
        Bar::new(time, close, close + 1.0, close - 1.0, close, 1.0)
    }

    fn frame(count: i64) -> RenderDelta {
        let bars: Vec<_> = (0..count).map(|i| bar(i * 60, 100.0 + i as f64)).collect();
        let rsi = IndicatorSeries {
            points: bars.iter().map(|b| IndicatorPoint::new(b.time, Some(50.0))).collect(),
        };
        RenderDelta::Reset(Box::new(SnapshotFrame {
            bars,
            indicators: vec![(IndicatorKind::Rsi, rsi)],
            markers: vec![Marker::new(0, MarkerKind::Buy, 100.0)],
            sma_period: 21,
        }))
    }

    fn ranges(view: &ChartView) -> Vec<Option<LogicalRange>> {
        view.panes().map(|(_, pane)| pane.visible_range()).collect()
    }

    #[test]
    fn test_reset_seeds_every_pane() {
        let mut view = ChartView::new(5);
        view.render(frame(10));

        let expected = Some(LogicalRange::new(300, 540));
        assert_eq!(ranges(&view), vec![expected; 3]);
        assert_eq!(view.bar_count(), 10);
        assert_eq!(view.last_close, Some(109.0));
        assert_eq!(view.price().unwrap().markers.len(), 1);
        assert_eq!(
            view.panes().nth(2).map(|(_, pane)| pane.line(SeriesKey::Rsi).len()),
            Some(10)
        );
    }

    #[test]
    fn test_scroll_moves_all_panes_and_stops_follow() {
        let mut view = ChartView::new(5);
        view.render(frame(10));

        view.focus_next();
        view.scroll(-1);

        let expected = Some(LogicalRange::new(276, 516));
        assert_eq!(ranges(&view), vec![expected; 3]);
        assert!(!view.follow_latest());

        // Appending while not following leaves the range alone
        view.render(RenderDelta::Bar {
            bar: bar(600, 111.0),
            outcome: UpsertOutcome::Appended,
            phase: BarPhase::Provisional,
        });
        assert_eq!(view.shared_range(), expected);

        view.toggle_follow();
        assert_eq!(view.shared_range(), Some(LogicalRange::new(360, 600)));
    }

    #[test]
    fn test_live_bar_replaces_forming_candle() {
        let mut view = ChartView::new(5);
        view.render(frame(3));

        for (close, outcome) in [(1.0, UpsertOutcome::Appended), (2.0, UpsertOutcome::Replaced)] {
            view.render(RenderDelta::Bar {
                bar: bar(180, close),
                outcome,
                phase: BarPhase::Provisional,
            });
        }

        let candles = &view.price().unwrap().candles;
        assert_eq!(candles.len(), 4);
        assert_eq!(candles[3].close, 2.0);
        // Follow mode shifted the range once, on the append
        assert_eq!(view.shared_range(), Some(LogicalRange::new(60, 180)));
    }

    #[test]
    fn test_status_deltas() {
        let mut view = ChartView::new(5);
        view.render(RenderDelta::Connection(ConnectionStatus::Reconnecting));
        view.render(RenderDelta::Diagnostic(ChartError::OutOfOrderUpdate {
            last: 120,
            received: 60,
        }));

        assert_eq!(view.connection, Some(ConnectionStatus::Reconnecting));
        assert!(view.last_diagnostic.is_some());

        view.render(RenderDelta::Markers(vec![
            Marker::new(0, MarkerKind::Buy, 100.0),
            Marker::new(60, MarkerKind::Sell, 105.0),
        ]));
        assert_eq!(view.backtest().pnl(), 5.0);
    }
}
