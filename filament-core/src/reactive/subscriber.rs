//! Subscriber types for the reactive system.
//!
//! A Subscriber represents any computation that depends on reactive values.
//! This includes computeds, effects, and the reconciler's DOM bindings.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::ReactiveError;

/// Unique identifier for a subscriber.
///
/// Each subscriber (computed, effect, or other reactive computation) gets a
/// unique ID when created. A computation keeps its ID across re-runs, so it
/// is also the key under which a source stores the subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

type NotifyFn = dyn Fn() -> Result<(), ReactiveError> + Send + Sync;

/// A subscriber to reactive values.
///
/// Cloning is cheap; clones share the callback and the ID. Sources snapshot
/// their subscribers by cloning before notifying, so a subscriber may be
/// invoked while the source's table is being edited.
#[derive(Clone)]
pub struct Subscriber {
    id: SubscriberId,
    notify: Arc<NotifyFn>,
}

impl Subscriber {
    /// Create a new subscriber with the given notification callback.
    pub fn new<F>(notify: F) -> Self
    where
        F: Fn() -> Result<(), ReactiveError> + Send + Sync + 'static,
    {
        Self::with_id(SubscriberId::new(), notify)
    }

    /// Create a subscriber that reuses an existing ID.
    pub fn with_id<F>(id: SubscriberId, notify: F) -> Self
    where
        F: Fn() -> Result<(), ReactiveError> + Send + Sync + 'static,
    {
        Self {
            id,
            notify: Arc::new(notify),
        }
    }

    /// Get the subscriber's unique ID.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Notify the subscriber that one of its dependencies changed.
    pub fn notify(&self) -> Result<(), ReactiveError> {
        (self.notify)()
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber").field("id", &self.id).finish()
    }
}
