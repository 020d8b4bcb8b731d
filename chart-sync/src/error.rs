use crate::types::UnixTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors generated in `chart-sync`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Error)]
pub enum ChartError {
    #[error("snapshot bars not strictly increasing at index {index}: {prev} followed by {next}")]
    InvalidOrder {
        index: usize,
        prev: UnixTime,
        next: UnixTime,
    },

    #[error("stale update: received time {received} is earlier than last bar time {last}")]
    OutOfOrderUpdate { last: UnixTime, received: UnixTime },

    #[error("bar at time {time} committed twice")]
    DuplicateCommit { time: UnixTime },

    #[error("malformed bar at time {time}: {reason}")]
    MalformedBar { time: UnixTime, reason: String },

    #[error("pending buffer full, dropped update at time {dropped}")]
    BufferOverflow { dropped: UnixTime },

    #[error("snapshot already applied")]
    AlreadyStreaming,

    #[error("engine torn down")]
    Closed,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("SocketError: {0}")]
    Socket(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ChartError {
    /// Determine if an error prevents the engine from continuing.
    ///
    /// Stale, malformed and duplicate live data is dropped and reported; the
    /// chart keeps showing the last good state.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_fatal(&self) -> bool {
        match self {
            ChartError::Config(_) | ChartError::Closed => true,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ChartError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Decode(value.to_string())
        } else {
            Self::Http(value.to_string())
        }
    }
}

impl From<serde_json::Error> for ChartError {
    fn from(value: serde_json::Error) -> Self {
        Self::Decode(value.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ChartError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Socket(value.to_string())
    }
}

impl From<url::ParseError> for ChartError {
    fn from(value: url::ParseError) -> Self {
        Self::Config(value.to_string())
    }
}
