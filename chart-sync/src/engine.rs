//! Runtime driver: one task owns the [`StreamReconciler`] and awaits the
//! snapshot fetch, each feed message and shutdown.
//!
//! The feed's mpsc channel is the FIFO that queues updates in arrival order.
//! Each update is fully reconciled before the next one is received.

use crate::{
    config::ChartConfig,
    error::ChartError,
    feed::{ConnectionStatus, FeedClient},
    reconciler::{ReconcilerStats, StreamReconciler},
    snapshot::{Snapshot, SnapshotClient},
    surface::{RenderDelta, RenderSink},
    types::LiveUpdate,
};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{error, info, warn};

pub struct ChartEngine;

impl ChartEngine {
    /// Start the feed and the snapshot fetch, and reconcile into `sink` until
    /// [`EngineHandle::shutdown`] is called.
    pub fn spawn<K>(config: ChartConfig, sink: K) -> Result<EngineHandle, ChartError>
    where
        K: RenderSink + Send + 'static,
    {
        let (snapshot_config, feed_config) = config.resolve()?;
        let retries = snapshot_config.retries;
        let retry_delay = snapshot_config.retry_delay;
        let client = Arc::new(SnapshotClient::new(snapshot_config)?);
        let reconciler = StreamReconciler::new(config.reconciler, config.indicators);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            // Feed opens first; updates that beat the snapshot are buffered
            let mut feed = FeedClient::new(feed_config).start();

            let fetch = move |attempt: usize| {
                let client = Arc::clone(&client);
                async move {
                    if attempt > 0 {
                        tokio::time::sleep(retry_delay).await;
                    }
                    client.fetch().await
                }
            };

            let stats = run_engine(
                reconciler,
                fetch,
                retries,
                &mut feed.updates,
                &mut feed.status,
                &mut feed.errors,
                sink,
                shutdown_rx,
            )
            .await;

            // Closes the socket
            drop(feed);
            stats
        });

        Ok(EngineHandle {
            shutdown_tx: Some(shutdown_tx),
            task,
        })
    }
}

/// Running engine. Dropping the handle also stops the engine.
#[derive(Debug)]
pub struct EngineHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<ReconcilerStats>,
}

impl EngineHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Tear the engine down and return what it processed.
    pub async fn shutdown(mut self) -> ReconcilerStats {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        match (&mut self.task).await {
            Ok(stats) => stats,
            Err(error) => {
                error!(%error, "Engine task failed");
                ReconcilerStats::default()
            }
        }
    }

    /// Like [`Self::shutdown`], giving up after `timeout`.
    pub async fn shutdown_timeout(self, timeout: Duration) -> Option<ReconcilerStats> {
        tokio::time::timeout(timeout, self.shutdown()).await.ok()
    }
}

/// Single-mutator event loop.
pub(crate) async fn run_engine<K, F, Fut>(
    mut reconciler: StreamReconciler,
    mut fetch: F,
    retries: usize,
    updates: &mut mpsc::Receiver<LiveUpdate>,
    status: &mut mpsc::Receiver<ConnectionStatus>,
    errors: &mut mpsc::Receiver<ChartError>,
    mut sink: K,
    mut shutdown: oneshot::Receiver<()>,
) -> ReconcilerStats
where
    K: RenderSink,
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Snapshot, ChartError>>,
{
    let mut attempt = 0;
    let mut pending_snapshot = Box::pin(fetch(attempt));
    let mut snapshot_done = false;
    let mut updates_open = true;
    let mut status_open = true;
    let mut errors_open = true;

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("Engine shutting down");
                break;
            }

            result = &mut pending_snapshot, if !snapshot_done => {
                let applied = result.and_then(|snapshot| reconciler.apply_snapshot(snapshot, &mut sink));
                match applied {
                    Ok(()) => {
                        snapshot_done = true;
                        if !updates_open {
                            break;
                        }
                    }
                    Err(error) if attempt < retries && !error.is_fatal() => {
                        attempt += 1;
                        warn!(%error, attempt, retries, "Snapshot failed, retrying");
                        sink.render(RenderDelta::Diagnostic(error));
                        pending_snapshot.set(fetch(attempt));
                    }
                    Err(error) => {
                        error!(%error, attempts = attempt + 1, "Snapshot failed, giving up");
                        sink.render(RenderDelta::Diagnostic(error));
                        break;
                    }
                }
            }

            update = updates.recv(), if updates_open => match update {
                Some(update) => {
                    // Rejections are reported to the sink by the reconciler
                    let _ = reconciler.on_live_update(update, &mut sink);
                }
                None => {
                    info!("Live feed closed");
                    updates_open = false;
                    if snapshot_done {
                        break;
                    }
                }
            },

            connection = status.recv(), if status_open => match connection {
                Some(connection) => sink.render(RenderDelta::Connection(connection)),
                None => status_open = false,
            },

            error = errors.recv(), if errors_open => match error {
                Some(error) => sink.render(RenderDelta::Diagnostic(error)),
                None => errors_open = false,
            },
        }
    }

    let stats = reconciler.teardown();
    info!(?stats, "Engine stopped");
    stats
}
