//! Relay Session
//!
//! One instance per websocket connection, driving it through
//! `Handshaking -> Active -> Closed`.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::Message;
use futures_util::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::fanout;
use crate::connection::{ConnectionHandle, ConnectionRegistry, RegistrationGuard, RegistryError};
use crate::metrics::Metrics;
use crate::protocol::{ConnectionId, DeliveryError, Inbound, ReceiveError, ServerMessage};

/// Lifecycle state of a relay session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Handshaking,
    Active,
    Closed,
}

/// Failures that abort a session before it is registered
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("session is no longer handshaking")]
    InvalidState,

    #[error("failed to encode identity announcement: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to announce identity: {0}")]
    Announce(#[from] DeliveryError),

    #[error(transparent)]
    Register(#[from] RegistryError),
}

impl HandshakeError {
    pub fn reason(&self) -> &'static str {
        match self {
            HandshakeError::InvalidState => "invalid_state",
            HandshakeError::Encode(_) => "encode",
            HandshakeError::Announce(_) => "announce",
            HandshakeError::Register(_) => "register",
        }
    }
}

/// Why an active session ended
#[derive(Debug)]
pub enum CloseReason {
    /// Receive failed: the peer closed, timed out or the transport broke
    Receive(ReceiveError),
    /// Another relay loop failed to deliver to this connection and dropped it
    Pruned,
    /// Server is shutting down
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Receive(e) => write!(f, "{}", e),
            CloseReason::Pruned => write!(f, "dropped after failed delivery"),
            CloseReason::Shutdown => write!(f, "server shutdown"),
        }
    }
}

/// Final accounting for a finished session
#[derive(Debug)]
pub struct SessionSummary {
    pub id: ConnectionId,
    pub reason: CloseReason,
    pub messages_relayed: u64,
    pub duration: Duration,
}

/// Per-connection relay state machine
pub struct RelaySession {
    id: ConnectionId,
    handle: ConnectionHandle,
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<Metrics>,
    idle_timeout: Option<Duration>,
    state: SessionState,
    registration: Option<RegistrationGuard>,
    connected_at: Instant,
    messages_relayed: u64,
}

impl RelaySession {
    /// Start a session for a freshly upgraded connection
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        metrics: Arc<Metrics>,
        handle: ConnectionHandle,
        idle_timeout: Option<Duration>,
    ) -> Self {
        Self {
            id: ConnectionId::generate(),
            handle,
            registry,
            metrics,
            idle_timeout,
            state: SessionState::Handshaking,
            registration: None,
            connected_at: Instant::now(),
            messages_relayed: 0,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Announce the identity, then register
    ///
    /// The announcement goes out before the connection becomes visible to
    /// other relay loops, so it is always the first frame the client sees.
    /// On failure nothing has been registered and there is nothing to undo.
    pub async fn handshake(&mut self) -> Result<(), HandshakeError> {
        if self.state != SessionState::Handshaking {
            return Err(HandshakeError::InvalidState);
        }

        let result = self.announce_and_register().await;
        if let Err(e) = &result {
            self.metrics.record_handshake_failure(e.reason());
            self.handle.close().await;
            self.state = SessionState::Closed;
        }
        result
    }

    async fn announce_and_register(&mut self) -> Result<(), HandshakeError> {
        let announcement = ServerMessage::ClientId(self.id).to_text()?;
        self.handle.send_text(&announcement).await?;

        let guard = RegistrationGuard::register(
            Arc::clone(&self.registry),
            self.id,
            self.handle.clone(),
        )?;
        self.registration = Some(guard);
        self.state = SessionState::Active;
        self.metrics.connection_opened();

        info!(
            connection_id = %self.id,
            total_clients = self.registry.len(),
            "Client connected"
        );
        Ok(())
    }

    /// Relay inbound payloads until the connection goes away, then clean up
    ///
    /// `inbound` is the read half of the connection. The loop also ends when
    /// the shutdown channel fires (or its sender is dropped) and when another
    /// loop prunes this connection after a failed delivery.
    pub async fn run<S>(mut self, mut inbound: S, mut shutdown: broadcast::Receiver<()>) -> SessionSummary
    where
        S: Stream<Item = Result<Message, axum::Error>> + Unpin,
    {
        let reason = if self.state == SessionState::Active {
            self.relay_loop(&mut inbound, &mut shutdown).await
        } else {
            CloseReason::Receive(ReceiveError::Closed)
        };

        self.close(&reason).await;

        SessionSummary {
            id: self.id,
            reason,
            messages_relayed: self.messages_relayed,
            duration: self.connected_at.elapsed(),
        }
    }

    async fn relay_loop<S>(&mut self, inbound: &mut S, shutdown: &mut broadcast::Receiver<()>) -> CloseReason
    where
        S: Stream<Item = Result<Message, axum::Error>> + Unpin,
    {
        let handle = self.handle.clone();

        loop {
            // Removal and shutdown win over a frame that is already waiting
            let received = tokio::select! {
                biased;
                _ = handle.closed() => return CloseReason::Pruned,
                _ = shutdown.recv() => return CloseReason::Shutdown,
                received = Self::receive(inbound, self.idle_timeout) => received,
            };

            match received {
                Ok(Inbound::Payload(payload)) => {
                    self.metrics.record_message_received();
                    debug!(connection_id = %self.id, bytes = payload.len(), "Received message");

                    let report = fanout::broadcast(&self.registry, &self.metrics, &self.id, &payload).await;
                    self.messages_relayed += 1;
                    if !report.is_complete() {
                        debug!(
                            connection_id = %self.id,
                            delivered = report.delivered.len(),
                            failed = report.failed.len(),
                            "Partial delivery"
                        );
                    }
                }
                Ok(Inbound::Ignored) => {
                    self.metrics.record_message_ignored();
                    debug!(connection_id = %self.id, "Ignoring non-text frame");
                }
                Ok(Inbound::Closed) => return CloseReason::Receive(ReceiveError::Closed),
                Err(e) => return CloseReason::Receive(e),
            }
        }
    }

    async fn receive<S>(inbound: &mut S, idle_timeout: Option<Duration>) -> Result<Inbound, ReceiveError>
    where
        S: Stream<Item = Result<Message, axum::Error>> + Unpin,
    {
        let next = match idle_timeout {
            Some(limit) => timeout(limit, inbound.next())
                .await
                .map_err(|_| ReceiveError::Timeout(limit))?,
            None => inbound.next().await,
        };

        match next {
            Some(Ok(message)) => Ok(Inbound::classify(message)),
            Some(Err(e)) => Err(ReceiveError::Transport(e)),
            None => Err(ReceiveError::Closed),
        }
    }

    /// Enter the terminal state: unregister and release the transport
    async fn close(&mut self, reason: &CloseReason) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;

        if let Some(guard) = self.registration.take() {
            drop(guard);
            self.metrics.connection_closed(self.connected_at.elapsed());
        }
        self.handle.close().await;

        match reason {
            CloseReason::Receive(ReceiveError::Closed) | CloseReason::Shutdown => info!(
                connection_id = %self.id,
                total_clients = self.registry.len(),
                "Client disconnected ({})",
                reason
            ),
            _ => warn!(
                connection_id = %self.id,
                total_clients = self.registry.len(),
                "Client disconnected ({})",
                reason
            ),
        }
    }
}

impl Drop for RelaySession {
    fn drop(&mut self) {
        // Abnormal exit (task aborted mid-loop): the guard unregisters on drop
        if self.registration.take().is_some() {
            self.handle.mark_closed();
            self.metrics.connection_closed(self.connected_at.elapsed());
        }
    }
}
