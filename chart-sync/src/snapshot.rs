//! Historical snapshot: wire types and the HTTP client that fetches them.

use crate::{
    error::ChartError,
    indicator::{IndicatorKind, IndicatorSeries},
    types::{de_f64, de_opt_f64, de_unix_time, value_to_f64, Bar, IndicatorPoint, Marker, UnixTime},
};
use serde::{Deserialize, Deserializer};
use std::{collections::BTreeMap, collections::HashMap, time::Duration};
use tracing::{debug, warn};

/// Response body of `GET /historical_data`
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotResponse {
    pub historical_data: Vec<HistoricalRow>,
    #[serde(default)]
    pub signals: Vec<serde_json::Value>,
    /// Older backends split signals by side
    #[serde(default)]
    pub buy_signals: Vec<serde_json::Value>,
    #[serde(default)]
    pub sell_signals: Vec<serde_json::Value>,
    #[serde(default, deserialize_with = "de_opt_period")]
    pub sma_param: Option<usize>,
}

/// One bar of the snapshot plus its materialized indicator columns.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoricalRow {
    #[serde(alias = "time", deserialize_with = "de_unix_time")]
    pub timestamp: UnixTime,
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
    #[serde(default, rename = "MACD_hist", alias = "macd_hist", deserialize_with = "de_opt_f64")]
    pub macd_hist: Option<f64>,
    #[serde(default, rename = "RSI", alias = "rsi", deserialize_with = "de_opt_f64")]
    pub rsi: Option<f64>,
    /// Remaining columns, eg/ `sma_21`
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl HistoricalRow {
    pub fn bar(&self) -> Bar {
        Bar::new(
            self.timestamp,
            self.open,
            self.high,
            self.low,
            self.close,
            self.volume,
        )
    }
}

fn de_opt_period<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(value_to_f64)
        .filter(|v| v.is_finite() && *v >= 1.0)
        .map(|v| v as usize))
}

fn sma_period_from_column(key: &str) -> Option<usize> {
    key.strip_prefix("sma_")?.parse().ok().filter(|p| *p >= 1)
}

/// Validated-at-load historical snapshot handed to the reconciler.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    pub bars: Vec<Bar>,
    /// Indicator columns computed by the backend, used for display only
    pub columns: BTreeMap<IndicatorKind, IndicatorSeries>,
    pub signals: Vec<Marker>,
    /// Authoritative SMA window, when the backend sent one
    pub sma_param: Option<usize>,
}

impl Snapshot {
    pub fn new(bars: Vec<Bar>) -> Self {
        Self {
            bars,
            ..Default::default()
        }
    }

    pub fn with_sma_param(mut self, period: usize) -> Self {
        self.sma_param = Some(period);
        self
    }

    pub fn with_signals(mut self, signals: Vec<Marker>) -> Self {
        self.signals = signals;
        self
    }

    pub fn with_column(mut self, kind: IndicatorKind, points: Vec<IndicatorPoint>) -> Self {
        self.columns.insert(kind, IndicatorSeries { points });
        self
    }
}

impl From<SnapshotResponse> for Snapshot {
    fn from(response: SnapshotResponse) -> Self {
        let SnapshotResponse {
            historical_data: rows,
            signals,
            buy_signals,
            sell_signals,
            sma_param,
        } = response;

        // Columns are uniform across rows, so the first row names them
        let sma_key = rows.first().and_then(|row| match sma_param {
            Some(period) => [format!("sma_{period}"), "sma".to_string()]
                .into_iter()
                .find(|key| row.extra.contains_key(key)),
            None => row
                .extra
                .keys()
                .filter_map(|key| sma_period_from_column(key).map(|p| (p, key.clone())))
                .min()
                .map(|(_, key)| key),
        });
        let sma_param = sma_param.or_else(|| sma_key.as_deref().and_then(sma_period_from_column));

        let mut columns = BTreeMap::new();
        let mut insert = |kind: IndicatorKind, points: Vec<IndicatorPoint>| {
            if points.iter().any(IndicatorPoint::is_defined) {
                columns.insert(kind, IndicatorSeries { points });
            }
        };
        if let Some(key) = &sma_key {
            insert(
                IndicatorKind::Sma,
                rows.iter()
                    .map(|row| {
                        let value = row.extra.get(key).and_then(value_to_f64).filter(|v| v.is_finite());
                        IndicatorPoint::new(row.timestamp, value)
                    })
                    .collect(),
            );
        }
        insert(
            IndicatorKind::MacdHistogram,
            rows.iter().map(|row| IndicatorPoint::new(row.timestamp, row.macd_hist)).collect(),
        );
        insert(
            IndicatorKind::Rsi,
            rows.iter().map(|row| IndicatorPoint::new(row.timestamp, row.rsi)).collect(),
        );

        let raw_signals = signals.len() + buy_signals.len() + sell_signals.len();
        let mut markers: Vec<Marker> = signals
            .into_iter()
            .chain(buy_signals)
            .chain(sell_signals)
            .filter_map(|value| serde_json::from_value::<Marker>(value).ok())
            .collect();
        if markers.len() < raw_signals {
            warn!(
                skipped = raw_signals - markers.len(),
                "Snapshot contained undecodable signals"
            );
        }
        markers.sort_by_key(|m| m.time);

        Self {
            bars: rows.iter().map(HistoricalRow::bar).collect(),
            columns,
            signals: markers,
            sma_param,
        }
    }
}

/// Snapshot client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotConfig {
    /// Full endpoint, eg/ http://localhost:8001/historical_data
    pub url: String,
    pub timeout: Duration,
    /// Attempts after the first failed one
    pub retries: usize,
    pub retry_delay: Duration,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8001/historical_data".to_string(),
            timeout: Duration::from_secs(10),
            retries: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

impl SnapshotConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotClient {
    http: reqwest::Client,
    config: SnapshotConfig,
}

impl SnapshotClient {
    pub fn new(config: SnapshotConfig) -> Result<Self, ChartError> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    /// Fetch and decode the snapshot once.
    pub async fn fetch(&self) -> Result<Snapshot, ChartError> {
        let response = self.http.get(&self.config.url).send().await?;

        if !response.status().is_success() {
            return Err(ChartError::Http(format!(
                "{} returned {}",
                self.config.url,
                response.status()
            )));
        }

        let body: SnapshotResponse = response.json().await?;
        let snapshot = Snapshot::from(body);
        debug!(
            bars = snapshot.bars.len(),
            signals = snapshot.signals.len(),
            sma_param = ?snapshot.sma_param,
            "Fetched snapshot"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MarkerKind;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    const BODY: &str = r#"{
        "historical_data": [
            {"timestamp": 100, "open": "10", "high": "10", "low": "10", "close": "10", "volume": "1",
             "sma_3": "nan", "MACD_hist": "0.0", "RSI": "nan"},
            {"timestamp": 101, "open": "11", "high": "11", "low": "11", "close": "11", "volume": "1",
             "sma_3": "nan", "MACD_hist": "0.1", "RSI": "nan"},
            {"timestamp": 102, "open": "12", "high": "12", "low": "12", "close": "12", "volume": "1",
             "sma_3": "11.0", "MACD_hist": "0.2", "RSI": "nan"}
        ],
        "signals": [
            {"timestamp": 102, "price": 12.0, "type": "SELL"},
            {"timestamp": 101, "price": 11.0, "type": "BUY"},
            {"timestamp": 101, "price": 11.0, "type": "HOLD"}
        ],
        "sma_param": 3
    }"#;

    #[test]
    fn test_snapshot_from_response() {
        let response: SnapshotResponse = serde_json::from_str(BODY).unwrap();
        let snapshot = Snapshot::from(response);

        assert_eq!(snapshot.bars.len(), 3);
        assert_eq!(snapshot.bars[2], Bar::new(102, 12.0, 12.0, 12.0, 12.0, 1.0));
        assert_eq!(snapshot.sma_param, Some(3));

        let sma = &snapshot.columns[&IndicatorKind::Sma];
        assert_eq!(sma.points[0].value, None);
        assert_eq!(sma.last_value(), Some(11.0));
        assert_eq!(
            snapshot.columns[&IndicatorKind::MacdHistogram].last_value(),
            Some(0.2)
        );
        // An all-undefined column is treated as absent
        assert!(!snapshot.columns.contains_key(&IndicatorKind::Rsi));

        // Undecodable signal skipped, the rest sorted by time
        assert_eq!(
            snapshot.signals,
            vec![
                Marker::new(101, MarkerKind::Buy, 11.0),
                Marker::new(102, MarkerKind::Sell, 12.0),
            ]
        );
    }

    #[test]
    fn test_sma_param_inferred_from_column() {
        let raw = r#"{
            "historical_data": [
                {"time": 1700000000000, "open": 1, "high": 1, "low": 1, "close": 1, "sma_50": 1.0}
            ],
            "buy_signals": [{"timestamp": 1700000000, "price": 1.0, "type": "BUY"}]
        }"#;
        let snapshot = Snapshot::from(serde_json::from_str::<SnapshotResponse>(raw).unwrap());

        assert_eq!(snapshot.sma_param, Some(50));
        assert_eq!(snapshot.bars[0].time, 1700000000);
        assert_eq!(snapshot.columns[&IndicatorKind::Sma].last_value(), Some(1.0));
        assert_eq!(snapshot.signals.len(), 1);
    }

    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });

        format!("http://{addr}/historical_data")
    }

    #[tokio::test]
    async fn test_fetch_snapshot_over_http() {
        let url = serve_once("200 OK", BODY).await;
        let client = SnapshotClient::new(SnapshotConfig::new(url)).unwrap();

        let snapshot = client.fetch().await.unwrap();
        assert_eq!(snapshot.bars.len(), 3);
        assert_eq!(snapshot.signals.len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_reports_http_status() {
        let url = serve_once("500 Internal Server Error", r#"{"detail":"boom"}"#).await;
        let client = SnapshotClient::new(SnapshotConfig::new(url).with_retries(0)).unwrap();

        let error = client.fetch().await.unwrap_err();
        assert!(matches!(error, ChartError::Http(_)), "{error:?}");
    }

    #[test]
    fn test_snapshot_config_builder() {
        let config = SnapshotConfig::new("http://example.com/historical_data")
            .with_timeout(Duration::from_secs(3))
            .with_retries(5)
            .with_retry_delay(Duration::from_millis(250));

        assert_eq!(config.url, "http://example.com/historical_data");
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.retries, 5);
        assert_eq!(config.retry_delay, Duration::from_millis(250));
    }
}
