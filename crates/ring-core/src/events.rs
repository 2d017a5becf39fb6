//! Event infrastructure for ring nodes.
//!
//! Provides `ClusterEvent` for monitoring and `EventBus` for subscriptions.
//! The daemon console prints events as they happen; tests count them.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Why a member left the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RemovalReason {
    Left,
    Failed,
}

/// Events emitted by a node as its ring and catalog change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClusterEvent {
    /// A member was added to (or refreshed in) the local ring.
    MemberAdded { host: String },
    /// A member was removed from the local ring.
    MemberRemoved { host: String, reason: RemovalReason },
    /// This node's failure detector declared a successor failed.
    FailureDeclared { host: String },
    /// The catalog (authoritative or cached) changed.
    CatalogReplaced {
        /// Number of files in the new catalog.
        files: usize,
    },
    /// The Gateway asked `target` to fetch `file` from `source`.
    ReplicationOrdered {
        file: String,
        source: String,
        target: String,
    },
    /// A file landed in the local store.
    FileStored { file: String },
    /// A file was deleted from the local store.
    FileRemoved { file: String },
}

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Hold this value to keep receiving events, drop it to unsubscribe.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

type Callback = Arc<dyn Fn(ClusterEvent) + Send + Sync>;

/// Event bus for publishing cluster events to subscribers.
///
/// Wrap in `Arc` to enable subscriptions.
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Callback)>>,
    next_id: AtomicUsize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(ClusterEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // try_write: Drop may run while emit holds the read lock during unwinding
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: ClusterEvent) {
        // Snapshot so a callback may subscribe without deadlocking
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }

    /// Emit a batch of events in order.
    pub fn emit_all(&self, events: impl IntoIterator<Item = ClusterEvent>) {
        for event in events {
            self.emit(event);
        }
    }
}
