//! Per-connection registry of live operations.
//!
//! The registry maps client-chosen operation ids to the cancel handle of the
//! producer task driving that operation. It is the only state touched both by
//! the connection's reader (create on `subscribe`, remove on `complete`,
//! cancel-all on close) and by producer tasks (release on their terminal
//! message), so every operation takes the same mutex.
//!
//! Producers never hold a reference into the map. They own a
//! [`Subscription`] token carrying the id, the generation of their entry and
//! the receiving half of the cancel signal.

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard},
    task::{Context, Poll},
};

use thiserror::Error;
use tokio::sync::oneshot;

// ════════════════════════════════════════════════════════════════════
// Errors
// ════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The id already maps to a live operation
    #[error("operation id `{id}` is already live")]
    DuplicateId { id: String },

    /// The registry was torn down by `cancel_all`
    #[error("registry is closed")]
    Closed,
}

// ════════════════════════════════════════════════════════════════════
// Cancellation
// ════════════════════════════════════════════════════════════════════

/// Sending half of an operation's cancel signal, stored in the registry.
///
/// Cancelling is idempotent and safe after the producer already finished.
pub struct CancelHandle {
    tx: Option<oneshot::Sender<()>>,
}

impl CancelHandle {
    /// Fire the signal. Returns `true` only on the first call.
    pub fn cancel(&mut self) -> bool {
        match self.tx.take() {
            Some(tx) => {
                // The producer may already be gone; that is fine.
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.tx.is_none()
    }
}

/// Receiving half of the cancel signal, owned by the producer.
///
/// Resolves when the handle fires or is dropped (entry removed, registry
/// gone).
pub struct CancelSignal {
    rx: oneshot::Receiver<()>,
}

impl Future for CancelSignal {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        Pin::new(&mut self.rx).poll(cx).map(|_| ())
    }
}

fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = oneshot::channel();
    (CancelHandle { tx: Some(tx) }, CancelSignal { rx })
}

// ════════════════════════════════════════════════════════════════════
// Subscription token
// ════════════════════════════════════════════════════════════════════

/// Producer-side token for one live operation.
pub struct Subscription {
    id: String,
    generation: u64,
    cancel: CancelSignal,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Future resolving once the operation has been cancelled.
    pub fn cancelled(&mut self) -> &mut CancelSignal {
        &mut self.cancel
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Snapshot of a live registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSubscription {
    pub id: String,
    pub generation: u64,
}

// ════════════════════════════════════════════════════════════════════
// SubscriptionRegistry
// ════════════════════════════════════════════════════════════════════

struct Entry {
    generation: u64,
    cancel: CancelHandle,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    next_generation: u64,
    closed: bool,
}

/// Registry of live operations for one connection.
///
/// Cloning is cheap; clones share the same map.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking producer must not wedge teardown.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a new live operation under `id`.
    ///
    /// Fails with [`RegistryError::DuplicateId`] while a previous operation
    /// with the same id is still live.
    pub fn create(&self, id: &str) -> Result<Subscription, RegistryError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(RegistryError::Closed);
        }
        if inner.entries.contains_key(id) {
            return Err(RegistryError::DuplicateId { id: id.to_string() });
        }

        inner.next_generation += 1;
        let generation = inner.next_generation;
        let (handle, signal) = cancel_pair();
        inner.entries.insert(
            id.to_string(),
            Entry {
                generation,
                cancel: handle,
            },
        );

        Ok(Subscription {
            id: id.to_string(),
            generation,
            cancel: signal,
        })
    }

    pub fn get(&self, id: &str) -> Option<ActiveSubscription> {
        self.lock().entries.get(id).map(|e| ActiveSubscription {
            id: id.to_string(),
            generation: e.generation,
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().entries.contains_key(id)
    }

    /// Cancel and remove the operation `id` (client `complete`).
    ///
    /// Returns `false` if no such operation is live.
    pub fn remove(&self, id: &str) -> bool {
        let entry = self.lock().entries.remove(id);
        match entry {
            Some(mut entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove the entry owned by `subscription` before its terminal message.
    ///
    /// Returns `false` if the entry was already removed (client cancelled,
    /// connection closing) or replaced by a newer operation with the same id;
    /// in that case the producer must not emit a terminal message.
    pub fn release(&self, subscription: &Subscription) -> bool {
        let mut inner = self.lock();
        let owned = inner
            .entries
            .get(&subscription.id)
            .is_some_and(|e| e.generation == subscription.generation);
        if owned {
            inner.entries.remove(&subscription.id);
        }
        owned
    }

    /// Cancel every live operation and refuse further `create` calls.
    ///
    /// Returns the number of operations cancelled.
    pub fn cancel_all(&self) -> usize {
        let mut inner = self.lock();
        inner.closed = true;
        let mut cancelled = 0;
        for (_, mut entry) in inner.entries.drain() {
            entry.cancel.cancel();
            cancelled += 1;
        }
        cancelled
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of all live operations, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().entries.keys().cloned().collect();
        ids.sort();
        ids
    }
}

// ════════════════════════════════════════════════════════════════════
// Tests
// ════════════════════════════════════════════════════════════════════
