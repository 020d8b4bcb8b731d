/// Core data types for chart series
///
/// These types match the JSON produced by the chart backend: the
/// `/historical_data` snapshot rows and the per-message live feed payload.
use crate::error::ChartError;
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Deserializer, Serialize};

/// Seconds since the Unix epoch.
pub type UnixTime = i64;

/// Timestamps at or above this magnitude are milliseconds, not seconds.
const MILLIS_THRESHOLD: f64 = 1e11;

/// One OHLC candle for a fixed time interval.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Bar {
    /// Interval start, in seconds
    #[serde(deserialize_with = "de_unix_time")]
    pub time: UnixTime,
    #[serde(deserialize_with = "de_f64")]
    pub open: f64,
    #[serde(deserialize_with = "de_f64")]
    pub high: f64,
    #[serde(deserialize_with = "de_f64")]
    pub low: f64,
    #[serde(deserialize_with = "de_f64")]
    pub close: f64,
    #[serde(default, deserialize_with = "de_f64")]
    pub volume: f64,
}

impl Bar {
    pub fn new(time: UnixTime, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Verify the per-bar invariants: finite prices, `low <= {open, close} <= high`
    /// and non-negative volume.
    pub fn check(&self) -> Result<(), ChartError> {
        let malformed = |reason: &str| ChartError::MalformedBar {
            time: self.time,
            reason: reason.to_string(),
        };

        if ![self.open, self.high, self.low, self.close, self.volume]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(malformed("non-finite value"));
        }
        if self.low > self.open.min(self.close) || self.high < self.open.max(self.close) {
            return Err(malformed("open/close outside low..high"));
        }
        if self.volume < 0.0 {
            return Err(malformed("negative volume"));
        }
        Ok(())
    }

    /// Interval start as a UTC timestamp
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.time, 0)
    }

    pub fn is_bullish(&self) -> bool {
        self.close >= self.open
    }
}

/// A derived indicator value aligned to a bar time.
///
/// `value == None` is the "undefined" sentinel: the accumulator has not seen
/// enough bars yet.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct IndicatorPoint {
    pub time: UnixTime,
    pub value: Option<f64>,
}

impl IndicatorPoint {
    pub fn new(time: UnixTime, value: Option<f64>) -> Self {
        Self { time, value }
    }

    pub fn undefined(time: UnixTime) -> Self {
        Self { time, value: None }
    }

    pub fn is_defined(&self) -> bool {
        self.value.is_some()
    }
}

/// Signal side of a marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Deserialize, Serialize)]
pub enum MarkerKind {
    #[display("BUY")]
    #[serde(rename = "BUY", alias = "Buy", alias = "buy")]
    Buy,
    #[display("SELL")]
    #[serde(rename = "SELL", alias = "Sell", alias = "sell")]
    Sell,
}

impl MarkerKind {
    pub fn is_buy(&self) -> bool {
        matches!(self, MarkerKind::Buy)
    }

    pub fn is_sell(&self) -> bool {
        matches!(self, MarkerKind::Sell)
    }
}

/// A BUY/SELL annotation at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Marker {
    #[serde(alias = "timestamp", deserialize_with = "de_unix_time")]
    pub time: UnixTime,
    #[serde(rename = "type")]
    pub kind: MarkerKind,
    #[serde(deserialize_with = "de_f64")]
    pub price: f64,
}

impl Marker {
    pub fn new(time: UnixTime, kind: MarkerKind, price: f64) -> Self {
        Self { time, kind, price }
    }
}

/// Server-computed indicator values carried on a live update.
///
/// Only used to cross-check the locally maintained accumulators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
pub struct IndicatorSnapshot {
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub sma: Option<f64>,
    #[serde(default, alias = "MACD_hist", deserialize_with = "de_opt_f64")]
    pub macd_hist: Option<f64>,
    #[serde(default, alias = "RSI", deserialize_with = "de_opt_f64")]
    pub rsi: Option<f64>,
}

/// One message from the live feed, possibly revising the currently forming bar.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LiveUpdate {
    /// Start of the forming interval
    #[serde(alias = "timestamp", deserialize_with = "de_unix_time")]
    pub time: UnixTime,
    #[serde(deserialize_with = "de_f64")]
    pub open: f64,
    #[serde(deserialize_with = "de_f64")]
    pub high: f64,
    #[serde(deserialize_with = "de_f64")]
    pub low: f64,
    #[serde(deserialize_with = "de_f64")]
    pub close: f64,
    #[serde(default, deserialize_with = "de_f64")]
    pub volume: f64,
    #[serde(flatten)]
    pub indicators: IndicatorSnapshot,
    /// The bar will not be revised again
    #[serde(default, alias = "isFinal")]
    pub is_final: bool,
    #[serde(default)]
    pub signal: Option<MarkerKind>,
}

impl LiveUpdate {
    /// Provisional update without indicators or signal.
    pub fn provisional(bar: Bar) -> Self {
        Self {
            time: bar.time,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            indicators: IndicatorSnapshot::default(),
            is_final: false,
            signal: None,
        }
    }

    /// Final update without indicators or signal.
    pub fn finalized(bar: Bar) -> Self {
        Self {
            is_final: true,
            ..Self::provisional(bar)
        }
    }

    pub fn with_signal(mut self, signal: MarkerKind) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn bar(&self) -> Bar {
        Bar::new(self.time, self.open, self.high, self.low, self.close, self.volume)
    }
}

// ============================================================================
// Lenient wire decoding
// ============================================================================
// The backend serializes float columns as strings and mixes second and
// millisecond timestamps, so every numeric field goes through these helpers.

pub(crate) fn value_to_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Normalize a raw epoch value to whole seconds.
pub fn normalize_unix_time(raw: f64) -> UnixTime {
    if raw.abs() >= MILLIS_THRESHOLD {
        (raw / 1000.0).floor() as UnixTime
    } else {
        raw.floor() as UnixTime
    }
}

pub(crate) fn de_unix_time<'de, D>(deserializer: D) -> Result<UnixTime, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    value_to_f64(&value)
        .filter(|v| v.is_finite())
        .map(normalize_unix_time)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {value}")))
}

pub(crate) fn de_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    value_to_f64(&value).ok_or_else(|| serde::de::Error::custom(format!("invalid number: {value}")))
}

pub(crate) fn de_opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(value_to_f64)
        .filter(|v| v.is_finite()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bar_check() {
        struct TestCase {
            input: Bar,
            expected: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: well formed
                input: Bar::new(100, 10.0, 12.0, 9.0, 11.0, 5.0),
                expected: true,
            },
            TestCase {
                // TC1: close above high
                input: Bar::new(100, 10.0, 12.0, 9.0, 13.0, 5.0),
                expected: false,
            },
            TestCase {
                // TC2: open below low
                input: Bar::new(100, 8.0, 12.0, 9.0, 11.0, 5.0),
                expected: false,
            },
            TestCase {
                // TC3: NaN close
                input: Bar::new(100, 10.0, 12.0, 9.0, f64::NAN, 5.0),
                expected: false,
            },
            TestCase {
                // TC4: negative volume
                input: Bar::new(100, 10.0, 12.0, 9.0, 11.0, -1.0),
                expected: false,
            },
            TestCase {
                // TC5: flat doji
                input: Bar::new(100, 10.0, 10.0, 10.0, 10.0, 0.0),
                expected: true,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(test.input.check().is_ok(), test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_live_update_decodes_feed_message() {
        let raw = r#"{"time":1700000040,"open":100.5,"high":101.0,"low":100.1,"close":100.9,
                      "sma":100.2,"signal":"BUY","is_final":true}"#;
        let update: LiveUpdate = serde_json::from_str(raw).unwrap();

        assert_eq!(update.time, 1700000040);
        assert_eq!(update.close, 100.9);
        assert_eq!(update.volume, 0.0);
        assert_eq!(update.indicators.sma, Some(100.2));
        assert_eq!(update.indicators.rsi, None);
        assert!(update.is_final);
        assert_eq!(update.signal, Some(MarkerKind::Buy));
    }

    #[test]
    fn test_live_update_defaults() {
        let raw = r#"{"time":"1700000040","open":"1","high":"2","low":"0.5","close":"1.5",
                      "sma":null,"signal":null}"#;
        let update: LiveUpdate = serde_json::from_str(raw).unwrap();

        assert_eq!(update.open, 1.0);
        assert_eq!(update.indicators.sma, None);
        assert!(!update.is_final);
        assert_eq!(update.signal, None);
    }

    #[test]
    fn test_millisecond_timestamps_normalized() {
        let raw = r#"{"time":1700000040000,"open":1,"high":1,"low":1,"close":1}"#;
        let update: LiveUpdate = serde_json::from_str(raw).unwrap();
        assert_eq!(update.time, 1700000040);

        assert_eq!(normalize_unix_time(1700000040.7), 1700000040);
        assert_eq!(normalize_unix_time(104.0), 104);
    }

    #[test]
    fn test_marker_decodes_signal_row() {
        let raw = r#"{"timestamp":1700000040.0,"price":"101.25","type":"SELL"}"#;
        let marker: Marker = serde_json::from_str(raw).unwrap();
        assert_eq!(marker, Marker::new(1700000040, MarkerKind::Sell, 101.25));
    }

    #[test]
    fn test_nan_strings_are_undefined() {
        let raw = r#"{"sma":"nan","MACD_hist":"0.25","RSI":"inf"}"#;
        let snapshot: IndicatorSnapshot = serde_json::from_str(raw).unwrap();
        assert_eq!(snapshot.sma, None);
        assert_eq!(snapshot.macd_hist, Some(0.25));
        assert_eq!(snapshot.rsi, None);
    }

    #[test]
    fn test_marker_kind_display() {
        assert_eq!(MarkerKind::Buy.to_string(), "BUY");
        assert_eq!(MarkerKind::Sell.to_string(), "SELL");
        assert!(MarkerKind::Buy.is_buy());
        assert!(MarkerKind::Sell.is_sell());
    }
}
