//! Signaling Protocol Types

use std::fmt;
use std::time::Duration;

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Unique identity assigned to a client at handshake time
///
/// Backed by a random (v4) UUID, so ids are never reused within or across
/// server runs and no uniqueness check beyond generation is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a fresh identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

/// A single inbound frame after classification
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Opaque text payload to relay verbatim
    Payload(String),
    /// Frame that is not part of the relay protocol (binary, ping, pong)
    Ignored,
    /// Peer sent a close frame
    Closed,
}

impl Inbound {
    /// Classify a websocket message
    pub fn classify(message: Message) -> Self {
        match message {
            Message::Text(text) => Inbound::Payload(text),
            Message::Close(_) => Inbound::Closed,
            Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => Inbound::Ignored,
        }
    }
}

/// Failure of a single send attempt towards one recipient
///
/// All variants mean the same thing to the relay (the recipient is dead);
/// they are kept apart for diagnostics only.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("connection already closed")]
    Closed,

    #[error("send timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(#[source] axum::Error),
}

impl DeliveryError {
    /// Short label used for metrics and structured logs
    pub fn reason(&self) -> &'static str {
        match self {
            DeliveryError::Closed => "closed",
            DeliveryError::Timeout(_) => "timeout",
            DeliveryError::Transport(_) => "transport",
        }
    }
}

/// Failure while waiting for the next inbound frame
#[derive(Debug, Error)]
pub enum ReceiveError {
    #[error("connection closed by peer")]
    Closed,

    #[error("no message received within {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(#[source] axum::Error),
}

impl ReceiveError {
    /// Short label used for structured logs
    pub fn reason(&self) -> &'static str {
        match self {
            ReceiveError::Closed => "closed",
            ReceiveError::Timeout(_) => "timeout",
            ReceiveError::Transport(_) => "transport",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_distinct() {
        let a = ConnectionId::generate();
        let b = ConnectionId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_id_displays_as_hyphenated_uuid() {
        let id = ConnectionId::generate();
        let parsed = Uuid::parse_str(&id.to_string()).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
        assert_eq!(id.to_string().len(), 36);
    }

    #[test]
    fn test_classify_frames() {
        assert_eq!(
            Inbound::classify(Message::Text("offer".to_string())),
            Inbound::Payload("offer".to_string())
        );
        assert_eq!(Inbound::classify(Message::Close(None)), Inbound::Closed);
        assert_eq!(Inbound::classify(Message::Binary(vec![1, 2, 3])), Inbound::Ignored);
        assert_eq!(Inbound::classify(Message::Ping(vec![])), Inbound::Ignored);
    }

    #[test]
    fn test_delivery_error_reasons() {
        assert_eq!(DeliveryError::Closed.reason(), "closed");
        assert_eq!(DeliveryError::Timeout(Duration::from_secs(1)).reason(), "timeout");
        let err = DeliveryError::Transport(axum::Error::new(std::io::Error::other("broken pipe")));
        assert_eq!(err.reason(), "transport");
        assert!(err.to_string().contains("broken pipe"));
    }
}
