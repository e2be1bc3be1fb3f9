//! Event infrastructure for the sync engine.
//!
//! Provides `SyncEvent` for status display and monitoring and `EventBus`
//! for subscriptions. Wrap the bus in `Arc` to subscribe.

use crate::block::{BlockId, PageId};
use annotations::TokenCounts;
use serde::Serialize;
use std::fmt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Aggregate save state shown to the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncStatus {
    /// Nothing has changed since the last terminal state.
    #[default]
    Idle,
    /// Edits are waiting on a debounce timer.
    Dirty,
    /// At least one flush is on the wire.
    Saving,
    Saved,
    /// A flush in the last cycle failed or was vetoed.
    Error,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Dirty => "dirty",
            SyncStatus::Saving => "saving",
            SyncStatus::Saved => "saved",
            SyncStatus::Error => "error",
        };
        f.write_str(label)
    }
}

/// Events emitted while editing a page.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// Aggregate status changed.
    StatusChanged {
        status: SyncStatus,
        /// Pending timers plus in-flight flushes.
        pending: usize,
    },
    /// A block patch was confirmed by the server.
    #[serde(rename_all = "camelCase")]
    BlockSaved { block_id: BlockId },
    /// A block patch failed and was dropped.
    #[serde(rename_all = "camelCase")]
    FlushFailed { block_id: BlockId, error: String },
    /// A text edit was refused because it would erase every annotation.
    #[serde(rename_all = "camelCase")]
    DataLossBlocked {
        block_id: BlockId,
        previous: TokenCounts,
    },
    /// A background reorder failed; local order was kept.
    #[serde(rename_all = "camelCase")]
    ReorderFailed {
        page_id: PageId,
        moves: usize,
        error: String,
    },
    /// A background delete failed; the block stays removed locally.
    #[serde(rename_all = "camelCase")]
    DeleteFailed { block_id: BlockId, error: String },
}

/// Keeps a callback registered. Dropping it unsubscribes.
#[must_use = "the callback is removed as soon as the subscription is dropped"]
pub struct Subscription {
    bus: Weak<EventBus>,
    key: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.key);
        }
    }
}

type Listener = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

/// Fan-out of `SyncEvent`s to listeners.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<u64, Listener>>,
    next_key: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        self: &Arc<Self>,
        listener: impl Fn(&SyncEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, Arc::new(listener));
        Subscription {
            bus: Arc::downgrade(self),
            key,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn remove(&self, key: u64) {
        // Drop can run while a panicking listener still holds the read lock.
        if let Ok(mut listeners) = self.listeners.try_write() {
            listeners.remove(&key);
        }
    }

    /// Deliver `event` to every listener registered right now.
    pub fn emit(&self, event: SyncEvent) {
        // Listeners run outside the lock so they may subscribe or unsubscribe.
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();

        for listener in listeners {
            listener(&event);
        }
    }
}

/// Collects every emitted event; handy in tests and for CLI summaries.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<RwLock<Vec<SyncEvent>>>,
}

impl EventLog {
    /// Start recording events from `bus`. Keep the subscription alive while recording.
    pub fn record(bus: &Arc<EventBus>) -> (Self, Subscription) {
        let log = Self::default();
        let sink = log.clone();
        let subscription = bus.subscribe(move |event| {
            sink.events
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .push(event.clone());
        });
        (log, subscription)
    }

    pub fn events(&self) -> Vec<SyncEvent> {
        self.events
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Status values in the order they were announced.
    pub fn statuses(&self) -> Vec<SyncStatus> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SyncEvent::StatusChanged { status, .. } => Some(status),
                _ => None,
            })
            .collect()
    }
}
