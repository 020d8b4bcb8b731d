//! Idle read timeout for the live feed socket.
//!
//! A silently dead connection produces no error. Wrapping the read half in a
//! [`TimeoutStream`] ends the stream when nothing arrives for the configured
//! period, which sends the feed loop into its reconnect path.

use futures::Stream;
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::time::Instant;

/// Default idle read timeout for the feed (2 minutes).
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Stream wrapper that terminates if no item is received for `timeout_duration`.
#[derive(Debug)]
pub struct TimeoutStream<S> {
    inner: S,
    timeout_duration: Duration,
    deadline: Pin<Box<tokio::time::Sleep>>,
}

impl<S> TimeoutStream<S> {
    pub fn new(inner: S, timeout_duration: Duration) -> Self {
        Self {
            inner,
            timeout_duration,
            deadline: Box::pin(tokio::time::sleep(timeout_duration)),
        }
    }

    pub fn with_default_timeout(inner: S) -> Self {
        Self::new(inner, DEFAULT_READ_TIMEOUT)
    }
}

impl<S> Stream for TimeoutStream<S>
where
    S: Stream + Unpin,
{
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let timeout_duration = self.timeout_duration;

        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(item)) => {
                self.deadline.as_mut().reset(Instant::now() + timeout_duration);
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => match self.deadline.as_mut().poll(cx) {
                Poll::Ready(()) => {
                    tracing::warn!(
                        timeout_secs = timeout_duration.as_secs(),
                        "feed read timeout - no data received, triggering reconnection"
                    );
                    // Re-arm so a later poll does not time out immediately
                    self.deadline.as_mut().reset(Instant::now() + timeout_duration);
                    Poll::Ready(None)
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

impl<S: Unpin> Unpin for TimeoutStream<S> {}
