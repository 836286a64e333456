//! HTTP API Types

use serde::Serialize;
use std::time::SystemTime;

use crate::connection::RegistryStats;
use crate::metrics::RelayCounters;

/// API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub timestamp: SystemTime,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: SystemTime::now(),
        }
    }
}

/// Health check payload
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub connections: usize,
    pub accepting: bool,
}

/// Relay statistics summary
#[derive(Debug, Serialize)]
pub struct StatsSummary {
    pub uptime_seconds: u64,
    pub version: String,
    pub registry: RegistryStats,
    pub relay: RelayCounters,
}
