//! Storage event broadcast.
//!
//! Successful uploads, downloads, deletes, copies and moves are announced
//! to every subscriber of the manager's [`EventBus`]. Delivery is
//! synchronous and in-process; events are not persisted.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::warn;

use crate::storage::StorageMetadata;

/// What happened to the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageEventKind {
    Upload,
    Download,
    Delete,
    Copy,
    Move,
}

impl StorageEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageEventKind::Upload => "upload",
            StorageEventKind::Download => "download",
            StorageEventKind::Delete => "delete",
            StorageEventKind::Copy => "copy",
            StorageEventKind::Move => "move",
        }
    }
}

impl std::fmt::Display for StorageEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification of a successful storage operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageEvent {
    pub kind: StorageEventKind,
    /// Registered provider name the operation ran against
    pub provider: String,
    /// Object key; the destination key for copies and moves
    pub key: String,
    pub size: Option<u64>,
    pub metadata: Option<StorageMetadata>,
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<String>,
    pub tenant_id: Option<String>,
}

impl StorageEvent {
    pub fn new(kind: StorageEventKind, provider: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            kind,
            provider: provider.into(),
            key: key.into(),
            size: None,
            metadata: None,
            timestamp: Utc::now(),
            user_id: None,
            tenant_id: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_metadata(mut self, metadata: Option<StorageMetadata>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_attribution(mut self, user_id: Option<String>, tenant_id: Option<String>) -> Self {
        self.user_id = user_id;
        self.tenant_id = tenant_id;
        self
    }
}

type Handler = Arc<dyn Fn(&StorageEvent) + Send + Sync>;
type Handlers = RwLock<Vec<(u64, Handler)>>;

/// Synchronous fan-out of [`StorageEvent`]s to registered handlers.
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<Handlers>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler`; it stays registered until the returned
    /// [`Subscription`] is unsubscribed.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&StorageEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.write().push((id, Arc::new(handler)));
        Subscription {
            id,
            handlers: Arc::downgrade(&self.handlers),
        }
    }

    /// Deliver `event` to every subscriber.
    ///
    /// Handlers run outside the registry lock, so they may subscribe or
    /// unsubscribe. A panicking handler is logged and skipped.
    pub fn emit(&self, event: &StorageEvent) {
        let handlers: Vec<Handler> = self
            .handlers
            .read()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!(
                    "Storage event subscriber panicked on {} event for {}",
                    event.kind, event.key
                );
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().len()
    }
}

/// Handle returned by [`EventBus::subscribe`].
///
/// Dropping the handle keeps the handler registered; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    handlers: Weak<Handlers>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remove the handler; returns false if it was already gone
    pub fn unsubscribe(self) -> bool {
        let Some(handlers) = self.handlers.upgrade() else {
            return false;
        };
        let mut handlers = handlers.write();
        let before = handlers.len();
        handlers.retain(|(id, _)| *id != self.id);
        handlers.len() != before
    }
}
