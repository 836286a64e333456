//! HTTP and WebSocket Handlers

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        State,
    },
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use futures_util::StreamExt;
use tokio::sync::broadcast;
use tracing::{debug, field, instrument, warn, Span};

use super::types::*;
use crate::config::RelayConfig;
use crate::connection::{ConnectionHandle, ConnectionRegistry};
use crate::metrics::Metrics;
use crate::relay::RelaySession;

/// Shared application state for handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub metrics: Arc<Metrics>,
    pub relay: RelayConfig,
    pub shutdown_tx: broadcast::Sender<()>,
    pub shutdown_flag: Arc<AtomicBool>,
    pub start_time: SystemTime,
}

/// Upgrade to a websocket and hand the connection to a relay session
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let metrics = Arc::clone(&state.metrics);

    ws.on_failed_upgrade(move |e| {
        warn!("WebSocket upgrade failed: {}", e);
        metrics.record_handshake_failure("upgrade");
    })
    .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive one upgraded connection from handshake to cleanup
#[instrument(skip_all, fields(connection_id = field::Empty))]
pub async fn handle_socket(socket: WebSocket, state: AppState) {
    // Subscribe before the handshake so a shutdown racing it is not missed
    let shutdown_rx = state.shutdown_tx.subscribe();
    if state.shutdown_flag.load(Ordering::Relaxed) {
        debug!("Rejecting connection during shutdown");
        return;
    }

    let (sink, stream) = socket.split();
    let handle = ConnectionHandle::new(sink, state.relay.send_timeout);
    let mut session = RelaySession::new(
        Arc::clone(&state.registry),
        Arc::clone(&state.metrics),
        handle,
        state.relay.idle_timeout,
    );
    Span::current().record("connection_id", field::display(session.id()));

    if let Err(e) = session.handshake().await {
        warn!("Handshake failed: {}", e);
        return;
    }

    let summary = session.run(stream, shutdown_rx).await;
    debug!(
        messages_relayed = summary.messages_relayed,
        duration_ms = summary.duration.as_millis() as u64,
        "Relay session finished ({})",
        summary.reason
    );
}

/// Health check handler
pub async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<HealthStatus>> {
    let accepting = !state.shutdown_flag.load(Ordering::Relaxed);
    let health = HealthStatus {
        status: if accepting { "healthy" } else { "shutting_down" }.to_string(),
        connections: state.registry.len(),
        accepting,
    };

    Json(ApiResponse::success(health))
}

/// Get relay statistics
pub async fn get_stats(State(state): State<AppState>) -> Json<ApiResponse<StatsSummary>> {
    let uptime = SystemTime::now()
        .duration_since(state.start_time)
        .unwrap_or_default()
        .as_secs();

    let stats = StatsSummary {
        uptime_seconds: uptime,
        version: env!("CARGO_PKG_VERSION").to_string(),
        registry: state.registry.stats(),
        relay: state.metrics.counters(),
    };

    Json(ApiResponse::success(stats))
}

/// Prometheus scrape endpoint
pub async fn export_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.export_prometheus(),
    )
}
