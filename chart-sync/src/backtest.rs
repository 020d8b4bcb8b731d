//! Marker backtest: long-only, one position at a time.

use crate::types::{Marker, MarkerKind, UnixTime};
use serde::{Deserialize, Serialize};

/// Starting balance used by the terminal status bar
pub const DEFAULT_INITIAL_BALANCE: f64 = 10_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct OpenPosition {
    pub entry_time: UnixTime,
    pub entry_price: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BacktestReport {
    pub initial_balance: f64,
    /// Balance after closing trades and marking any open position to `last_close`
    pub balance: f64,
    pub closed_trades: usize,
    pub winning_trades: usize,
    pub open_position: Option<OpenPosition>,
}

impl BacktestReport {
    pub fn pnl(&self) -> f64 {
        self.balance - self.initial_balance
    }
}

/// Walk `markers` in time order: BUY opens when flat, SELL closes adding
/// `price - entry` to the balance. An open position is marked to `last_close`.
pub fn run(markers: &[Marker], last_close: Option<f64>, initial_balance: f64) -> BacktestReport {
    let mut ordered = markers.to_vec();
    ordered.sort_by_key(|m| m.time);

    let mut balance = initial_balance;
    let mut position: Option<OpenPosition> = None;
    let mut closed_trades = 0;
    let mut winning_trades = 0;

    for marker in ordered {
        match (marker.kind, position) {
            (MarkerKind::Buy, None) => {
                position = Some(OpenPosition {
                    entry_time: marker.time,
                    entry_price: marker.price,
                });
            }
            (MarkerKind::Sell, Some(open)) => {
                let profit = marker.price - open.entry_price;
                balance += profit;
                closed_trades += 1;
                if profit > 0.0 {
                    winning_trades += 1;
                }
                position = None;
            }
            _ => {}
        }
    }

    if let (Some(open), Some(close)) = (position, last_close) {
        balance += close - open.entry_price;
    }

    BacktestReport {
        initial_balance,
        balance,
        closed_trades,
        winning_trades,
        open_position: position,
    }
}
