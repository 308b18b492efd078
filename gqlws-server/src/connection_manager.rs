//! Tracking of live connections.
//!
//! [`ConnectionManager`] knows every open transport session, the operations
//! live on each one (through their shared [`SubscriptionRegistry`]) and hands
//! out connection ids. It backs the `/health` endpoint and server shutdown.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use dashmap::DashMap;
use gqlws_executor::ConnectionId;

use crate::{init::ConnectionInfo, registry::SubscriptionRegistry};

// ════════════════════════════════════════════════════════════════════
// Per-connection entry
// ════════════════════════════════════════════════════════════════════

struct ConnectionEntry {
    info: ConnectionInfo,
    registry: SubscriptionRegistry,
    opened_at: Instant,
}

/// Point-in-time view of one connection.
#[derive(Debug, Clone)]
pub struct ConnectionSnapshot {
    pub info: ConnectionInfo,
    pub live_operations: usize,
    pub age: Duration,
}

// ════════════════════════════════════════════════════════════════════
// ConnectionManager
// ════════════════════════════════════════════════════════════════════

/// Shared table of open connections.
///
/// Cloning this type is cheap; all instances share the same table.
#[derive(Clone)]
pub struct ConnectionManager {
    connections: Arc<DashMap<ConnectionId, ConnectionEntry>>,
    next_id: Arc<AtomicU64>,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Allocate a new unique `ConnectionId`.
    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Track a connection and return the registry its operations live in.
    pub fn register(&self, info: ConnectionInfo) -> SubscriptionRegistry {
        let registry = SubscriptionRegistry::new();
        self.connections.insert(
            info.id,
            ConnectionEntry {
                info,
                registry: registry.clone(),
                opened_at: Instant::now(),
            },
        );
        registry
    }

    /// Stop tracking a connection (called when the transport closes).
    pub fn unregister(&self, id: ConnectionId) -> bool {
        self.connections.remove(&id).is_some()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Live operations summed over every connection.
    pub fn subscription_count(&self) -> usize {
        self.connections
            .iter()
            .map(|entry| entry.registry.len())
            .sum()
    }

    pub fn snapshot(&self, id: ConnectionId) -> Option<ConnectionSnapshot> {
        self.connections.get(&id).map(|entry| ConnectionSnapshot {
            info: entry.info.clone(),
            live_operations: entry.registry.len(),
            age: entry.opened_at.elapsed(),
        })
    }

    /// Ids of every open connection, sorted.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.connections.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }
}

// ════════════════════════════════════════════════════════════════════
// Tests
// ════════════════════════════════════════════════════════════════════
