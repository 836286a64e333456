//! sigrelay Library
//!
//! Minimal real-time message relay. Every websocket client is given a
//! fresh id and every text frame it sends is forwarded verbatim to all
//! other connected clients.

pub mod config;
pub mod connection;
pub mod metrics;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod shutdown;

pub use config::Config;
pub use connection::{ConnectionHandle, ConnectionRegistry};
pub use protocol::ConnectionId;
pub use server::RelayServer;
pub use shutdown::ShutdownCoordinator;

/// Common error type for the relay server
pub type Result<T> = anyhow::Result<T>;
