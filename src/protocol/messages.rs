//! Server-originated messages

use serde::{Deserialize, Serialize};

use super::ConnectionId;

/// Messages the server sends on its own initiative
///
/// Relayed client payloads are never wrapped in this type; they travel
/// byte-for-byte as the sender wrote them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Identity announcement, sent exactly once right after the handshake
    ClientId(ConnectionId),
}

impl ServerMessage {
    /// Encode as the JSON text frame sent on the wire
    pub fn to_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_client_id_wire_shape() {
        let id = ConnectionId::generate();
        let text = ServerMessage::ClientId(id).to_text().unwrap();

        let value: Value = serde_json::from_str(&text).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 2);
        assert_eq!(value["type"], "client_id");
        assert_eq!(value["data"], id.to_string());
    }

    #[test]
    fn test_client_id_parses_back() {
        let id = ConnectionId::generate();
        let text = format!(r#"{{"type": "client_id", "data": "{}"}}"#, id);
        let parsed: ServerMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, ServerMessage::ClientId(id));
    }
}
