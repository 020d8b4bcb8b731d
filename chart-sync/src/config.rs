/// Runtime configuration
///
/// Builder-style structs with defaults, plus [`ChartConfig::from_env`] which
/// reads `CHART_*` environment variables and falls back to the default on a
/// missing or unparsable value.
use crate::{
    error::ChartError, feed::FeedConfig, indicator::IndicatorConfig, reconciler::ReconcilerConfig,
    snapshot::SnapshotConfig,
};
use std::str::FromStr;
use url::Url;

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8001";
pub const DEFAULT_SNAPSHOT_PATH: &str = "/historical_data";
pub const DEFAULT_FEED_PATH: &str = "/ws/kucoin";
pub const DEFAULT_VISIBLE_BARS: usize = 120;

#[derive(Debug, Clone, PartialEq)]
pub struct ChartConfig {
    /// Base URL shared by the snapshot endpoint and the live feed
    pub backend_url: String,
    pub snapshot_path: String,
    pub feed_path: String,
    /// Bars in the initial visible range
    pub visible_bars: usize,
    /// Transport settings; `url` is derived by [`ChartConfig::resolve`]
    pub feed: FeedConfig,
    pub snapshot: SnapshotConfig,
    pub reconciler: ReconcilerConfig,
    pub indicators: IndicatorConfig,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            snapshot_path: DEFAULT_SNAPSHOT_PATH.to_string(),
            feed_path: DEFAULT_FEED_PATH.to_string(),
            visible_bars: DEFAULT_VISIBLE_BARS,
            feed: FeedConfig::default(),
            snapshot: SnapshotConfig::default(),
            reconciler: ReconcilerConfig::default(),
            indicators: IndicatorConfig::default(),
        }
    }
}

impl ChartConfig {
    pub fn new(backend_url: impl Into<String>) -> Self {
        Self {
            backend_url: backend_url.into(),
            ..Default::default()
        }
    }

    /// Read configuration from `CHART_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parse = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            backend_url: parse("CHART_BACKEND_URL").unwrap_or(defaults.backend_url),
            snapshot_path: parse("CHART_SNAPSHOT_PATH").unwrap_or(defaults.snapshot_path),
            feed_path: parse("CHART_FEED_PATH").unwrap_or(defaults.feed_path),
            visible_bars: parse_or(parse("CHART_VISIBLE_BARS"), defaults.visible_bars),
            reconciler: defaults
                .reconciler
                .with_pending_capacity(parse_or(
                    parse("CHART_PENDING_CAPACITY"),
                    defaults.reconciler.pending_capacity,
                ))
                .with_derive_signals(
                    parse("CHART_DERIVE_SIGNALS")
                        .and_then(|v| parse_flag(&v))
                        .unwrap_or(defaults.reconciler.derive_signals),
                )
                .with_markers_on_final_only(
                    parse("CHART_FINAL_MARKERS")
                        .and_then(|v| parse_flag(&v))
                        .unwrap_or(defaults.reconciler.markers_on_final_only),
                ),
            ..defaults
        }
    }

    pub fn with_visible_bars(mut self, bars: usize) -> Self {
        self.visible_bars = bars;
        self
    }

    pub fn with_feed(mut self, feed: FeedConfig) -> Self {
        self.feed = feed;
        self
    }

    pub fn with_snapshot(mut self, snapshot: SnapshotConfig) -> Self {
        self.snapshot = snapshot;
        self
    }

    pub fn with_reconciler(mut self, reconciler: ReconcilerConfig) -> Self {
        self.reconciler = reconciler;
        self
    }

    pub fn with_indicators(mut self, indicators: IndicatorConfig) -> Self {
        self.indicators = indicators;
        self
    }

    /// `GET` endpoint of the historical snapshot
    pub fn snapshot_url(&self) -> Result<Url, ChartError> {
        let base = Url::parse(&self.backend_url)?;
        match base.scheme() {
            "http" | "https" => Ok(base.join(&self.snapshot_path)?),
            other => Err(ChartError::Config(format!(
                "backend URL scheme must be http or https, got {other}"
            ))),
        }
    }

    /// WebSocket endpoint of the live feed: the backend URL with its scheme
    /// mapped to `ws`/`wss`.
    pub fn feed_url(&self) -> Result<Url, ChartError> {
        let mut url = Url::parse(&self.backend_url)?.join(&self.feed_path)?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(ChartError::Config(format!(
                    "cannot derive a WebSocket URL from scheme {other}"
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|()| ChartError::Config(format!("cannot set scheme {scheme} on {url}")))?;
        Ok(url)
    }

    /// Transport configs with their endpoints filled in.
    pub fn resolve(&self) -> Result<(SnapshotConfig, FeedConfig), ChartError> {
        let snapshot = SnapshotConfig {
            url: self.snapshot_url()?.to_string(),
            ..self.snapshot.clone()
        };
        let feed = FeedConfig {
            url: self.feed_url()?.to_string(),
            ..self.feed.clone()
        };
        Ok((snapshot, feed))
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let config = ChartConfig::from_lookup(lookup(&[]));
        assert_eq!(config, ChartConfig::default());
        assert_eq!(
            config.snapshot_url().unwrap().as_str(),
            "http://localhost:8001/historical_data"
        );
        assert_eq!(config.feed_url().unwrap().as_str(), "ws://localhost:8001/ws/kucoin");
    }

    #[test]
    fn test_env_overrides() {
        let config = ChartConfig::from_lookup(lookup(&[
            ("CHART_BACKEND_URL", "https://charts.example.com"),
            ("CHART_FEED_PATH", "/ws/BTC-USDT"),
            ("CHART_VISIBLE_BARS", "60"),
            ("CHART_PENDING_CAPACITY", "not-a-number"),
            ("CHART_DERIVE_SIGNALS", "Yes"),
            ("CHART_FINAL_MARKERS", "1"),
        ]));

        assert_eq!(config.visible_bars, 60);
        assert_eq!(config.reconciler.pending_capacity, 1024);
        assert!(config.reconciler.derive_signals);
        assert!(config.reconciler.markers_on_final_only);

        let (snapshot, feed) = config.resolve().unwrap();
        assert_eq!(snapshot.url, "https://charts.example.com/historical_data");
        assert_eq!(feed.url, "wss://charts.example.com/ws/BTC-USDT");
        assert_eq!(feed.ping_interval, config.feed.ping_interval);
    }

    #[test]
    fn test_invalid_backend_url() {
        struct TestCase {
            input: &'static str,
            expected_feed_ok: bool,
            expected_snapshot_ok: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: relative URL
                input: "localhost:8001",
                expected_feed_ok: false,
                expected_snapshot_ok: false,
            },
            TestCase {
                // TC1: ws base serves the feed but not the snapshot
                input: "ws://localhost:8001",
                expected_feed_ok: true,
                expected_snapshot_ok: false,
            },
            TestCase {
                // TC2: not a URL
                input: "::",
                expected_feed_ok: false,
                expected_snapshot_ok: false,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let config = ChartConfig::new(test.input);
            assert_eq!(config.feed_url().is_ok(), test.expected_feed_ok, "TC{} feed", index);
            assert_eq!(
                config.snapshot_url().is_ok(),
                test.expected_snapshot_ok,
                "TC{} snapshot",
                index
            );
            if let Err(error) = config.resolve() {
                assert!(error.is_fatal(), "TC{} error not fatal", index);
            }
        }
    }
}
