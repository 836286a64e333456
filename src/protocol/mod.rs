//! Signaling Protocol
//!
//! Wire types shared by the registry and the relay loop: connection
//! identity, the identity announcement, and typed I/O outcomes.

pub mod messages;
pub mod types;

pub use messages::ServerMessage;
pub use types::*;
