//! Relay Server
//!
//! Binds the listener, serves the router and coordinates draining the
//! registry on shutdown.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use super::{api::RelayApi, handlers::AppState};
use crate::config::Config;
use crate::connection::ConnectionRegistry;
use crate::metrics::Metrics;
use crate::Result;

/// Owns the registry and serves websocket clients
pub struct RelayServer {
    config: Arc<Config>,
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<Metrics>,
    listener: Option<TcpListener>,
    local_addr: Option<SocketAddr>,
    shutdown_flag: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    start_time: SystemTime,
}

impl RelayServer {
    /// Create a server; sending on `shutdown_tx` stops it and every relay session
    pub fn new(config: Arc<Config>, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self {
            config,
            registry: Arc::new(ConnectionRegistry::new()),
            metrics: Arc::new(Metrics::new()),
            listener: None,
            local_addr: None,
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            start_time: SystemTime::now(),
        }
    }

    /// Bind the TCP listener without serving yet
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        let bind_addr = self.config.server.bind_addr;

        info!("Binding TCP listener to {}", bind_addr);
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind relay server to {}", bind_addr))?;
        let local_addr = listener.local_addr()
            .context("Failed to read listener address")?;

        info!("Successfully bound to {}", local_addr);
        self.listener = Some(listener);
        self.local_addr = Some(local_addr);
        Ok(local_addr)
    }

    /// Serve until shutdown is signalled, then drain remaining connections
    pub async fn start(&mut self) -> Result<()> {
        if self.listener.is_none() {
            self.bind().await?;
        }
        let listener = self.listener.take()
            .ok_or_else(|| anyhow::anyhow!("Listener not initialized"))?;

        let app = self.router();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let shutdown_flag = Arc::clone(&self.shutdown_flag);

        info!(
            "Relay accepting websocket clients on ws://{}{}",
            self.local_addr.map(|a| a.to_string()).unwrap_or_default(),
            self.config.server.ws_path
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                shutdown_flag.store(true, Ordering::Relaxed);
                info!("Received shutdown signal, stopping connection acceptance");
            })
            .await
            .context("Relay server failed")?;

        info!("Listener stopped");
        self.wait_for_connections_to_close().await
    }

    /// Build the router over this server's shared state
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: Arc::clone(&self.registry),
            metrics: Arc::clone(&self.metrics),
            relay: self.config.relay.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
            shutdown_flag: Arc::clone(&self.shutdown_flag),
            start_time: self.start_time,
        };
        RelayApi::create_router(state, &self.config)
    }

    /// Get the bind address if listener is initialized
    pub fn get_bind_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Get the number of registered connections
    pub fn get_active_connections(&self) -> usize {
        self.registry.len()
    }

    /// Wait for relay sessions to unregister, force-closing stragglers after the timeout
    pub async fn wait_for_connections_to_close(&self) -> Result<()> {
        let shutdown_timeout = self.config.server.shutdown_timeout;
        let start_time = Instant::now();

        info!("Waiting for {} active connections to close (timeout: {:?})",
              self.get_active_connections(), shutdown_timeout);

        while self.get_active_connections() > 0 && start_time.elapsed() < shutdown_timeout {
            debug!("Waiting for {} active connections to close", self.get_active_connections());
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let elapsed = start_time.elapsed();
        if self.registry.is_empty() {
            info!("All connections closed gracefully in {:?}", elapsed);
        } else {
            warn!("Shutdown timeout reached after {:?} with {} connections still active",
                  elapsed, self.get_active_connections());
            self.registry.close_all().await;
        }

        Ok(())
    }
}
