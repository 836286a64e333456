//! Metrics Module
//! 
//! Prometheus counters for connections, relayed messages and delivery failures.

pub mod collector;

pub use collector::{Metrics, RelayCounters, FAILURE_REASONS};
