//! Message Relay Module
//! 
//! Per-connection relay loop and the broadcast fan-out it drives.

pub mod fanout;
pub mod session;

pub use fanout::{broadcast, FanoutReport};
pub use session::{CloseReason, HandshakeError, RelaySession, SessionState, SessionSummary};
