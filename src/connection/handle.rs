//! Connection Handle
//!
//! The send side of one client's websocket, shared between the client's own
//! relay loop and every other loop that fans a payload out to it.

use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt};
use tokio::sync::{Mutex, Notify};
use tokio::time::timeout;
use tracing::debug;

use crate::protocol::DeliveryError;

type BoxedSink = Pin<Box<dyn Sink<Message, Error = axum::Error> + Send>>;

/// Cloneable handle to a connection's outbound half
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    sink: Mutex<BoxedSink>,
    closed: AtomicBool,
    /// Set once the sink itself has been closed; independent of `closed`
    sink_released: AtomicBool,
    close_notify: Notify,
    send_timeout: Duration,
}

impl ConnectionHandle {
    /// Wrap a message sink; every send through this handle is bounded by `send_timeout`
    pub fn new<S>(sink: S, send_timeout: Duration) -> Self
    where
        S: Sink<Message, Error = axum::Error> + Send + 'static,
    {
        Self {
            inner: Arc::new(HandleInner {
                sink: Mutex::new(Box::pin(sink)),
                closed: AtomicBool::new(false),
                sink_released: AtomicBool::new(false),
                close_notify: Notify::new(),
                send_timeout,
            }),
        }
    }

    /// Make a single attempt to deliver a text frame
    ///
    /// The timeout covers waiting for a concurrent sender to release the sink
    /// as well as the write itself, so a stalled peer costs each broadcaster
    /// at most one `send_timeout`.
    pub async fn send_text(&self, text: &str) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }

        let attempt = async {
            let mut sink = self.inner.sink.lock().await;
            sink.send(Message::Text(text.to_owned())).await
        };

        match timeout(self.inner.send_timeout, attempt).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(DeliveryError::Transport(e)),
            Err(_) => Err(DeliveryError::Timeout(self.inner.send_timeout)),
        }
    }

    /// Release the transport: mark closed and try to flush a close frame
    ///
    /// Idempotent; only the first call touches the sink, even when the
    /// handle was already marked closed by a broadcaster or a drop guard.
    pub async fn close(&self) {
        self.mark_closed();
        if self.inner.sink_released.swap(true, Ordering::AcqRel) {
            return;
        }

        let attempt = async {
            let mut sink = self.inner.sink.lock().await;
            sink.close().await
        };

        match timeout(self.inner.send_timeout, attempt).await {
            Ok(Ok(())) => debug!("Connection sink closed"),
            Ok(Err(e)) => debug!("Connection sink closed with error: {}", e),
            Err(_) => debug!("Timed out closing connection sink"),
        }
    }

    /// Mark the handle closed without touching the sink
    ///
    /// Used from synchronous cleanup paths (drop guards) where awaiting is not possible.
    pub fn mark_closed(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.close_notify.notify_waiters();
        }
    }

    /// Resolves once the handle has been closed by anyone holding a clone
    pub async fn closed(&self) {
        let notified = self.inner.close_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.is_closed() {
            return;
        }
        notified.await;
    }

    /// Whether the handle has been closed
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("closed", &self.is_closed())
            .field("send_timeout", &self.inner.send_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::test_support::{channel_handle, failing_handle, stalled_handle};
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_send_delivers_text_frame() {
        let (handle, mut rx) = channel_handle(Duration::from_secs(1));

        handle.send_text("candidate").await.unwrap();

        assert_eq!(rx.next().await, Some(Message::Text("candidate".to_string())));
    }

    #[tokio::test]
    async fn test_send_to_dropped_receiver_is_transport_error() {
        let handle = failing_handle(Duration::from_secs(1));

        let err = handle.send_text("offer").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Transport(_)));
    }

    #[tokio::test]
    async fn test_stalled_send_times_out() {
        let handle = stalled_handle(Duration::from_millis(50));

        let err = handle.send_text("offer").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_send_after_close_fails_fast() {
        let (handle, _rx) = channel_handle(Duration::from_secs(1));

        handle.close().await;
        handle.close().await;

        assert!(handle.is_closed());
        let err = handle.send_text("answer").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Closed));
    }

    #[tokio::test]
    async fn test_closed_resolves_for_other_clones() {
        let (handle, _rx) = channel_handle(Duration::from_secs(1));
        let watcher = handle.clone();

        let waiter = tokio::spawn(async move { watcher.closed().await });
        tokio::task::yield_now().await;
        handle.mark_closed();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("closed() should resolve after mark_closed")
            .unwrap();

        // Already closed: resolves immediately
        handle.closed().await;
    }

    #[tokio::test]
    async fn test_close_after_mark_closed_still_releases_sink() {
        let (handle, mut rx) = channel_handle(Duration::from_secs(1));

        handle.mark_closed();
        handle.close().await;

        assert_eq!(rx.next().await, None, "sink should have been closed");
    }

    #[tokio::test]
    async fn test_clones_share_closed_state() {
        let (handle, _rx) = channel_handle(Duration::from_secs(1));
        let other = handle.clone();

        handle.mark_closed();

        assert!(other.is_closed());
    }
}
