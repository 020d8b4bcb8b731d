use crate::view::{ChartView, Pane, PaneKind};
use chart_sync::{
    Bar, ConnectionStatus, IndicatorPoint, LogicalRange, MarkerKind, SeriesKey, ViewSurface,
};
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line as TextLine, Span},
    widgets::{
        canvas::{Canvas, Context, Line, Rectangle},
        Block, BorderType, Borders, Paragraph,
    },
    Frame,
};

const C_UP: Color = Color::Rgb(100, 220, 100);
const C_DOWN: Color = Color::Rgb(220, 100, 100);
const C_SMA: Color = Color::Rgb(255, 215, 0);
const C_RSI: Color = Color::Rgb(100, 149, 237);
const C_GUIDE: Color = Color::Rgb(90, 90, 90);
const C_BORDER: Color = Color::Rgb(138, 43, 226);
const C_FOCUS: Color = Color::Rgb(0, 255, 127);
const C_BG: Color = Color::Rgb(18, 18, 28);

const RSI_OVERSOLD: f64 = 30.0;
const RSI_OVERBOUGHT: f64 = 70.0;

pub fn ui(f: &mut Frame, view: &ChartView) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Percentage(55),
            Constraint::Percentage(20),
            Constraint::Percentage(20),
        ])
        .split(f.area());

    render_status_bar(f, chunks[0], view);

    let interval = view.price().map(|pane| interval_of(&pane.candles)).unwrap_or(60);
    for ((focused, pane), area) in view.panes().zip(chunks[1..].iter()) {
        render_pane(f, *area, pane, focused, interval);
    }
}

fn render_status_bar(f: &mut Frame, area: Rect, view: &ChartView) {
    let (symbol, text, color) = match view.connection {
        Some(ConnectionStatus::Connected) => ("●", "CONNECTED", C_UP),
        Some(ConnectionStatus::Reconnecting) => ("◌", "RECONNECTING", C_SMA),
        Some(ConnectionStatus::Disconnected) | None => ("○", "DISCONNECTED", C_DOWN),
    };

    let report = view.backtest();
    let pnl_color = if report.pnl() >= 0.0 { C_UP } else { C_DOWN };
    let last = view
        .last_close
        .map(|close| format!("{close:.2}"))
        .unwrap_or_else(|| "-".to_string());

    let mut spans = vec![
        Span::styled(
            format!(" {symbol} {text} "),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!(" bars {} ", view.bar_count())),
        Span::raw(format!(" last {last} ")),
        Span::raw(format!(" markers {} ", view.markers.len())),
        Span::styled(
            format!(" bal {:.2} ({:+.2}) ", report.balance, report.pnl()),
            Style::default().fg(pnl_color),
        ),
        Span::styled(
            if view.follow_latest() { " FOLLOW " } else { " FREE " },
            Style::default().fg(C_RSI),
        ),
    ];
    if let Some(diagnostic) = &view.last_diagnostic {
        spans.push(Span::styled(format!(" ⚠ {diagnostic} "), Style::default().fg(C_DOWN)));
    }
    spans.push(Span::styled(
        " [Q] Quit [Tab] Focus [←→] Scroll [↑↓] Zoom [F] Follow ",
        Style::default().fg(Color::Rgb(128, 128, 128)),
    ));

    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Double)
        .border_style(Style::default().fg(C_BORDER))
        .style(Style::default().bg(C_BG));

    let paragraph = Paragraph::new(TextLine::from(spans))
        .block(block)
        .alignment(Alignment::Center);

    f.render_widget(paragraph, area);
}

fn render_pane(f: &mut Frame, area: Rect, pane: &Pane, focused: bool, interval: i64) {
    let border = if focused { C_FOCUS } else { C_BORDER };
    let range = pane
        .visible_range()
        .or_else(|| full_range(&pane.candles))
        .unwrap_or(LogicalRange::new(0, interval));

    let title = format!(" {} {} ", pane.kind.title(), axis_label(range));
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(border))
        .style(Style::default().bg(C_BG));

    let half = interval as f64 / 2.0;
    let x_bounds = [range.from as f64 - half, range.to as f64 + half];
    let y_bounds = match pane.kind {
        PaneKind::Price => price_bounds(pane, range),
        PaneKind::Macd => symmetric_bounds(pane.line(SeriesKey::MacdHistogram), range),
        PaneKind::Rsi => [0.0, 100.0],
    };

    let canvas = Canvas::default()
        .block(block)
        .marker(symbols::Marker::Braille)
        .x_bounds(x_bounds)
        .y_bounds(y_bounds)
        .paint(|ctx| match pane.kind {
            PaneKind::Price => paint_price(ctx, pane, range, y_bounds, half),
            PaneKind::Macd => paint_histogram(ctx, pane.line(SeriesKey::MacdHistogram), range),
            PaneKind::Rsi => paint_rsi(ctx, pane.line(SeriesKey::Rsi), x_bounds),
        });

    f.render_widget(canvas, area);
}

fn paint_price(ctx: &mut Context, pane: &Pane, range: LogicalRange, y_bounds: [f64; 2], half: f64) {
    let body = half * 0.6;
    for bar in visible(&pane.candles, range, |b| b.time) {
        let x = bar.time as f64;
        let color = if bar.is_bullish() { C_UP } else { C_DOWN };
        ctx.draw(&Line::new(x, bar.low, x, bar.high, color));
        ctx.draw(&Rectangle {
            x: x - body,
            y: bar.open.min(bar.close),
            width: body * 2.0,
            height: (bar.close - bar.open).abs(),
            color,
        });
    }

    paint_line(ctx, pane.line(SeriesKey::Sma), range, C_SMA);

    // Markers sit just outside the candle they annotate
    let offset = (y_bounds[1] - y_bounds[0]) * 0.04;
    ctx.layer();
    for marker in pane.markers.iter().filter(|m| range.contains(m.time)) {
        let bar = pane.candles.iter().find(|b| b.time == marker.time);
        let (symbol, y, color) = match marker.kind {
            MarkerKind::Buy => ("▲", bar.map_or(marker.price, |b| b.low) - offset, C_UP),
            MarkerKind::Sell => ("▼", bar.map_or(marker.price, |b| b.high) + offset, C_DOWN),
        };
        ctx.print(
            marker.time as f64,
            y,
            Span::styled(symbol, Style::default().fg(color).add_modifier(Modifier::BOLD)),
        );
    }
}

fn paint_histogram(ctx: &mut Context, points: &[IndicatorPoint], range: LogicalRange) {
    for point in visible(points, range, |p| p.time) {
        if let Some(value) = point.value {
            let color = if value >= 0.0 { C_UP } else { C_DOWN };
            let x = point.time as f64;
            ctx.draw(&Line::new(x, 0.0, x, value, color));
        }
    }
}

fn paint_rsi(ctx: &mut Context, points: &[IndicatorPoint], x_bounds: [f64; 2]) {
    for guide in [RSI_OVERSOLD, RSI_OVERBOUGHT] {
        ctx.draw(&Line::new(x_bounds[0], guide, x_bounds[1], guide, C_GUIDE));
    }
    let range = LogicalRange::new(x_bounds[0].ceil() as i64, x_bounds[1].floor() as i64);
    paint_line(ctx, points, range, C_RSI);
}

/// Connect consecutive defined points; undefined values break the line.
fn paint_line(ctx: &mut Context, points: &[IndicatorPoint], range: LogicalRange, color: Color) {
    let visible: Vec<_> = visible(points, range, |p| p.time).collect();
    for pair in visible.windows(2) {
        if let (Some(a), Some(b)) = (pair[0].value, pair[1].value) {
            ctx.draw(&Line::new(pair[0].time as f64, a, pair[1].time as f64, b, color));
        }
    }
}

fn visible<'a, T, F>(items: &'a [T], range: LogicalRange, time: F) -> impl Iterator<Item = &'a T>
where
    F: Fn(&T) -> i64 + 'a,
{
    items.iter().filter(move |item| range.contains(time(item)))
}

fn price_bounds(pane: &Pane, range: LogicalRange) -> [f64; 2] {
    let (low, high) = visible(&pane.candles, range, |b| b.time)
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(low, high), bar| {
            (low.min(bar.low), high.max(bar.high))
        });
    if low > high {
        return [0.0, 1.0];
    }
    let pad = ((high - low) * 0.08).max(high.abs() * 1e-4).max(1e-9);
    [low - pad, high + pad]
}

fn symmetric_bounds(points: &[IndicatorPoint], range: LogicalRange) -> [f64; 2] {
    let extent = visible(points, range, |p| p.time)
        .filter_map(|p| p.value)
        .fold(0.0_f64, |acc, value| acc.max(value.abs()));
    let extent = if extent > 0.0 { extent * 1.1 } else { 1.0 };
    [-extent, extent]
}

fn full_range(candles: &[Bar]) -> Option<LogicalRange> {
    Some(LogicalRange::new(candles.first()?.time, candles.last()?.time))
}

/// Smallest spacing between consecutive bars, in seconds.
fn interval_of(candles: &[Bar]) -> i64 {
    candles
        .windows(2)
        .map(|pair| pair[1].time - pair[0].time)
        .filter(|delta| *delta > 0)
        .min()
        .unwrap_or(60)
}

fn axis_label(range: LogicalRange) -> String {
    let format = |time: i64| {
        chrono::DateTime::from_timestamp(time, 0)
            .map(|dt| dt.format("%m-%d %H:%M").to_string())
            .unwrap_or_else(|| time.to_string())
    };
    format!("{} → {}", format(range.from), format(range.to))
}
