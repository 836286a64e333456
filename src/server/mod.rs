//! Relay Server Module
//! 
//! HTTP surface of the relay: the websocket endpoint, static assets,
//! health, stats and Prometheus routes.

pub mod api;
pub mod handlers;
pub mod server;
pub mod types;

pub use api::RelayApi;
pub use handlers::AppState;
pub use server::RelayServer;
pub use types::*;
