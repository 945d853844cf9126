//! In-process publish/subscribe bus.
//!
//! Producers of sync outcomes publish on named channels; the UI and other
//! services subscribe. Dispatch is synchronous and in registration order.
//! A listener that fails or panics is logged and skipped: it never reaches
//! the publisher and never stops the remaining listeners.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::domain::EntityKind;

pub const SYNC_SUCCESS: &str = "sync:success";
pub const SYNC_ERROR: &str = "sync:error";
pub const DATA_RESET: &str = "data:reset";
pub const DATA_PRUNED: &str = "data:pruned";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    Create,
    Update,
    Delete,
}

impl SyncOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOperation::Create => "create",
            SyncOperation::Update => "update",
            SyncOperation::Delete => "delete",
        }
    }
}

impl std::fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BusEvent {
    SyncSuccess {
        entity_kind: EntityKind,
        operation: SyncOperation,
        identifier: String,
        timestamp: DateTime<Utc>,
    },
    SyncError {
        entity_kind: EntityKind,
        operation: SyncOperation,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
    DataReset {
        removed_keys: usize,
        timestamp: DateTime<Utc>,
    },
    DefaultsPruned {
        removed: usize,
        timestamp: DateTime<Utc>,
    },
}

pub type Listener = Arc<dyn Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub struct EventBus {
    channels: Mutex<HashMap<String, Vec<(ListenerId, Listener)>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, channel: &str, listener: F) -> ListenerId
    where
        F: Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock()
            .entry(channel.to_string())
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Returns false if the listener was not registered on that channel.
    pub fn unsubscribe(&self, channel: &str, id: ListenerId) -> bool {
        let mut channels = self.lock();
        let Some(listeners) = channels.get_mut(channel) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        let removed = listeners.len() != before;
        if listeners.is_empty() {
            channels.remove(channel);
        }
        removed
    }

    /// Deliver `event` to every listener currently on `channel`.
    /// Returns how many listeners completed without error.
    pub fn publish(&self, channel: &str, event: &BusEvent) -> usize {
        // Snapshot so listeners may (un)subscribe while being called.
        let listeners: Vec<(ListenerId, Listener)> =
            self.lock().get(channel).cloned().unwrap_or_default();

        debug!(channel, listeners = listeners.len(), "publishing event");

        let mut delivered = 0;
        for (id, listener) in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!(channel, listener = ?id, "listener failed: {e:#}"),
                Err(_) => error!(channel, listener = ?id, "listener panicked"),
            }
        }
        delivered
    }

    /// Drop every listener on `channel`, or on all channels when `None`.
    pub fn clear(&self, channel: Option<&str>) {
        let mut channels = self.lock();
        match channel {
            Some(name) => {
                channels.remove(name);
            }
            None => channels.clear(),
        }
    }

    pub fn listener_count(&self, channel: &str) -> usize {
        self.lock().get(channel).map_or(0, Vec::len)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<(ListenerId, Listener)>>> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }
}
