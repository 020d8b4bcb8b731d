/// Live feed client for the chart backend's bar stream
///
/// Provides automatic reconnection, heartbeat, idle read timeout and
/// per-message decoding into [`LiveUpdate`]s.
use crate::{error::ChartError, types::LiveUpdate};
use derive_more::Display;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

pub mod timeout;

use timeout::{TimeoutStream, DEFAULT_READ_TIMEOUT};

/// Feed client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedConfig {
    /// WebSocket endpoint, eg/ ws://localhost:8001/ws/kucoin
    pub url: String,
    /// Ping interval to keep connection alive
    pub ping_interval: Duration,
    /// Reconnection delay after disconnect
    pub reconnect_delay: Duration,
    /// Reconnect when nothing is received for this long
    pub read_timeout: Duration,
    /// Maximum channel buffer size for updates
    pub channel_buffer_size: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8001/ws/kucoin".to_string(),
            ping_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(2),
            read_timeout: DEFAULT_READ_TIMEOUT,
            channel_buffer_size: 1000,
        }
    }
}

impl FeedConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_channel_buffer_size(mut self, size: usize) -> Self {
        self.channel_buffer_size = size;
        self
    }
}

/// Connection status updates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Deserialize, Serialize)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Reconnecting,
}

/// Decode one text frame.
///
/// Returns `Ok(None)` for control payloads (`{"type": "welcome"}` and the like)
/// that carry no bar.
pub fn decode_message(text: &str) -> Result<Option<LiveUpdate>, ChartError> {
    let value = serde_json::from_str::<serde_json::Value>(text)?;
    if let Some(kind) = value.get("type").and_then(|v| v.as_str()) {
        debug!(kind, "Received control message");
        return Ok(None);
    }
    Ok(Some(serde_json::from_value::<LiveUpdate>(value)?))
}

/// Live feed client
pub struct FeedClient {
    config: FeedConfig,
    update_tx: mpsc::Sender<LiveUpdate>,
    update_rx: mpsc::Receiver<LiveUpdate>,
    status_tx: mpsc::Sender<ConnectionStatus>,
    status_rx: mpsc::Receiver<ConnectionStatus>,
    error_tx: mpsc::Sender<ChartError>,
    error_rx: mpsc::Receiver<ChartError>,
}

/// Receivers for a running feed. Dropping the handle closes the connection.
#[derive(Debug)]
pub struct FeedHandle {
    pub updates: mpsc::Receiver<LiveUpdate>,
    pub status: mpsc::Receiver<ConnectionStatus>,
    /// Connection and socket failures; dropped when nobody keeps up
    pub errors: mpsc::Receiver<ChartError>,
    task: JoinHandle<()>,
}

impl FeedHandle {
    /// Stop the connection loop and close the socket.
    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl FeedClient {
    pub fn new(config: FeedConfig) -> Self {
        let (update_tx, update_rx) = mpsc::channel(config.channel_buffer_size.max(1));
        let (status_tx, status_rx) = mpsc::channel(10);
        let (error_tx, error_rx) = mpsc::channel(10);

        Self {
            config,
            update_tx,
            update_rx,
            status_tx,
            status_rx,
            error_tx,
            error_rx,
        }
    }

    /// Start the connection loop on the current tokio runtime.
    pub fn start(self) -> FeedHandle {
        let config = self.config.clone();
        let update_tx = self.update_tx.clone();
        let status_tx = self.status_tx.clone();
        let error_tx = self.error_tx.clone();

        let task = tokio::spawn(async move {
            run_feed_loop(config, update_tx, status_tx, error_tx).await;
        });

        FeedHandle {
            updates: self.update_rx,
            status: self.status_rx,
            errors: self.error_rx,
            task,
        }
    }
}

/// Main connection loop with auto-reconnect
async fn run_feed_loop(
    config: FeedConfig,
    update_tx: mpsc::Sender<LiveUpdate>,
    status_tx: mpsc::Sender<ConnectionStatus>,
    error_tx: mpsc::Sender<ChartError>,
) {
    // Never block the read loop on a slow error consumer
    let report = |error: ChartError| {
        let _ = error_tx.try_send(error);
    };

    info!(url = %config.url, "Starting live feed client");

    loop {
        let _ = status_tx.send(ConnectionStatus::Reconnecting).await;

        match connect_async(config.url.as_str()).await {
            Ok((ws_stream, _)) => {
                info!(url = %config.url, "Connected to live feed");
                let _ = status_tx.send(ConnectionStatus::Connected).await;

                let (mut write, read) = ws_stream.split();
                let mut read = TimeoutStream::new(read, config.read_timeout);

                // Spawn ping task to keep connection alive
                let ping_interval = config.ping_interval;
                let (ping_shutdown_tx, mut ping_shutdown_rx) = mpsc::channel::<()>(1);

                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(ping_interval);
                    loop {
                        tokio::select! {
                            _ = interval.tick() => {
                                if write.send(Message::Ping(vec![].into())).await.is_err() {
                                    debug!("Failed to send ping, connection likely dead");
                                    break;
                                }
                            }
                            _ = ping_shutdown_rx.recv() => {
                                debug!("Ping task shutting down");
                                break;
                            }
                        }
                    }
                });

                let mut receiver_dropped = false;
                while let Some(msg) = read.next().await {
                    match msg {
                        Ok(Message::Text(text)) => match decode_message(&text) {
                            Ok(Some(update)) => {
                                if update_tx.send(update).await.is_err() {
                                    warn!("Update receiver dropped, stopping feed");
                                    receiver_dropped = true;
                                    break;
                                }
                            }
                            Ok(None) => {}
                            Err(e) => {
                                error!("Failed to parse message: {}", e);
                                debug!("Raw message: {}", text.as_str());
                            }
                        },
                        Ok(Message::Close(_)) => {
                            info!("Server closed connection");
                            break;
                        }
                        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                            // Heartbeat messages - tungstenite handles these automatically
                        }
                        Err(e) => {
                            let error = ChartError::from(e);
                            error!(%error, "WebSocket read failed");
                            report(error);
                            break;
                        }
                        _ => {}
                    }
                }

                let _ = ping_shutdown_tx.send(()).await;
                let _ = status_tx.send(ConnectionStatus::Disconnected).await;

                if receiver_dropped {
                    return;
                }
                warn!("Connection closed, will reconnect...");
            }
            Err(e) => {
                let error = ChartError::from(e);
                error!(url = %config.url, %error, "Failed to connect");
                report(error);
                let _ = status_tx.send(ConnectionStatus::Disconnected).await;
            }
        }

        debug!("Waiting {:?} before reconnecting...", config.reconnect_delay);
        tokio::time::sleep(config.reconnect_delay).await;
    }
}
