//! Connection Registry
//!
//! Process-wide map from connection id to its outbound handle. Every
//! operation takes the lock exactly once and never holds it across an
//! await point, so register, unregister and snapshot are each atomic and
//! a broadcast pass never blocks registration of new clients.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::ConnectionHandle;
use crate::protocol::ConnectionId;

/// Registry contract violations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("connection {0} is already registered")]
    AlreadyRegistered(ConnectionId),
}

/// Registry counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub active: usize,
    pub total_registered: u64,
    pub total_unregistered: u64,
}

/// Shared registry of live connections
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, ConnectionHandle>>,
    total_registered: AtomicU64,
    total_unregistered: AtomicU64,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new connection
    pub fn register(&self, id: ConnectionId, handle: ConnectionHandle) -> Result<(), RegistryError> {
        let active = {
            let mut connections = self.write();
            if connections.contains_key(&id) {
                return Err(RegistryError::AlreadyRegistered(id));
            }
            connections.insert(id, handle);
            connections.len()
        };

        self.total_registered.fetch_add(1, Ordering::Relaxed);
        debug!(connection_id = %id, active, "Registered connection");
        Ok(())
    }

    /// Remove a connection; returns the handle if it was present
    ///
    /// Removing an absent id is a no-op: the receive path and any number of
    /// broadcasters may race to clean up the same connection.
    pub fn unregister(&self, id: &ConnectionId) -> Option<ConnectionHandle> {
        let (removed, active) = {
            let mut connections = self.write();
            let removed = connections.remove(id);
            (removed, connections.len())
        };

        if removed.is_some() {
            self.total_unregistered.fetch_add(1, Ordering::Relaxed);
            debug!(connection_id = %id, active, "Unregistered connection");
        }
        removed
    }

    /// Point-in-time copy of every entry except `excluding`
    pub fn snapshot_others(&self, excluding: &ConnectionId) -> Vec<(ConnectionId, ConnectionHandle)> {
        self.read()
            .iter()
            .filter(|(id, _)| *id != excluding)
            .map(|(id, handle)| (*id, handle.clone()))
            .collect()
    }

    /// Whether `id` is currently registered
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.read().contains_key(id)
    }

    /// Ids of all registered connections
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            active: self.len(),
            total_registered: self.total_registered.load(Ordering::Relaxed),
            total_unregistered: self.total_unregistered.load(Ordering::Relaxed),
        }
    }

    /// Remove and close every connection (used during shutdown)
    pub async fn close_all(&self) -> usize {
        let drained: Vec<(ConnectionId, ConnectionHandle)> = self.write().drain().collect();
        let count = drained.len();
        self.total_unregistered.fetch_add(count as u64, Ordering::Relaxed);

        for (id, handle) in drained {
            debug!(connection_id = %id, "Closing connection for shutdown");
            handle.close().await;
        }

        if count > 0 {
            warn!("Force-closed {} connections still registered at shutdown", count);
        }
        count
    }

    // A panic while holding the lock cannot leave the map half-updated
    // (every mutation is a single insert/remove/drain), so poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<ConnectionId, ConnectionHandle>> {
        self.connections.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ConnectionId, ConnectionHandle>> {
        self.connections.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes a registration when dropped
///
/// Owned by the relay loop, so the entry is reclaimed however the loop ends:
/// normal close, early return, or task cancellation/panic.
#[derive(Debug)]
pub struct RegistrationGuard {
    registry: Arc<ConnectionRegistry>,
    id: ConnectionId,
    handle: ConnectionHandle,
}

impl RegistrationGuard {
    /// Register `id` and return a guard that will unregister it
    pub fn register(
        registry: Arc<ConnectionRegistry>,
        id: ConnectionId,
        handle: ConnectionHandle,
    ) -> Result<Self, RegistryError> {
        registry.register(id, handle.clone())?;
        Ok(Self { registry, id, handle })
    }


}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.handle.mark_closed();
        self.registry.unregister(&self.id);
    }
}
