//! In-memory connection handles for unit tests

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::ws::Message;
use futures::channel::mpsc;
use futures_util::{Sink, SinkExt};

use super::ConnectionHandle;

/// Handle whose frames land in an unbounded channel
pub fn channel_handle(send_timeout: Duration) -> (ConnectionHandle, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded();
    let handle = ConnectionHandle::new(tx.sink_map_err(axum::Error::new), send_timeout);
    (handle, rx)
}

/// Handle whose peer is already gone; every send fails
pub fn failing_handle(send_timeout: Duration) -> ConnectionHandle {
    let (handle, rx) = channel_handle(send_timeout);
    drop(rx);
    handle
}

/// Handle whose peer never accepts a frame; every send times out
pub fn stalled_handle(send_timeout: Duration) -> ConnectionHandle {
    ConnectionHandle::new(StalledSink, send_timeout)
}

struct StalledSink;

impl Sink<Message> for StalledSink {
    type Error = axum::Error;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Pending
    }

    fn start_send(self: Pin<&mut Self>, _item: Message) -> Result<(), Self::Error> {
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Pending
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Pending
    }
}
