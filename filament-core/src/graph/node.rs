//! Graph Nodes
//!
//! A [`SourceNode`] is the publishing half of anything that can be read
//! reactively: signals own one, and so do computeds. It holds the ordered
//! subscriber table and implements the snapshot-then-notify pass.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use indexmap::IndexMap;
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::error::{from_panic, ReactiveError};
use crate::reactive::{Subscriber, SubscriberId};

/// Unique identifier for a node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

/// The kind of source node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A writable cell. Roots of the graph.
    Signal,

    /// A memoized derived value. Reads from other nodes and publishes its own.
    Computed,
}

/// Distinguishes successive subscriptions by the same subscriber, so a
/// notification pass never reaches a subscription made after its snapshot.
fn next_generation() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

struct Subscription {
    generation: u64,
    subscriber: Subscriber,
}

/// The subscriber table of a signal or computed.
pub struct SourceNode {
    id: NodeId,
    kind: NodeKind,
    subscribers: Mutex<IndexMap<SubscriberId, Subscription>>,
    disposed: AtomicBool,
}

impl SourceNode {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            id: NodeId::new(),
            kind,
            subscribers: Mutex::new(IndexMap::new()),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Register a subscriber. Re-subscribing the same ID replaces the old
    /// entry and invalidates any in-flight snapshot of it.
    pub fn subscribe(&self, subscriber: Subscriber) {
        if self.is_disposed() {
            tracing::trace!(node = ?self.id, subscriber = ?subscriber.id(), "ignoring subscription to disposed node");
            return;
        }
        let mut subscribers = self.subscribers.lock();
        // Remove first so the entry moves to the end, keeping table order
        // equal to subscription order.
        subscribers.shift_remove(&subscriber.id());
        subscribers.insert(
            subscriber.id(),
            Subscription {
                generation: next_generation(),
                subscriber,
            },
        );
    }

    pub fn unsubscribe(&self, subscriber_id: SubscriberId) {
        self.subscribers.lock().shift_remove(&subscriber_id);
    }

    pub fn is_subscribed(&self, subscriber_id: SubscriberId) -> bool {
        self.subscribers.lock().contains_key(&subscriber_id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    fn is_live(&self, subscriber_id: SubscriberId, generation: u64) -> bool {
        self.subscribers
            .lock()
            .get(&subscriber_id)
            .is_some_and(|entry| entry.generation == generation)
    }

    /// Notify a snapshot of the current subscribers.
    ///
    /// Subscriptions added during the pass are not visited; subscriptions
    /// removed during the pass are skipped. The first failing subscriber
    /// stops the pass, clears the table, and its error is returned.
    pub fn notify(&self) -> Result<(), ReactiveError> {
        let snapshot: SmallVec<[(SubscriberId, u64, Subscriber); 8]> = self
            .subscribers
            .lock()
            .iter()
            .map(|(id, entry)| (*id, entry.generation, entry.subscriber.clone()))
            .collect();

        for (id, generation, subscriber) in snapshot {
            if !self.is_live(id, generation) {
                continue;
            }
            let outcome = catch_unwind(AssertUnwindSafe(|| subscriber.notify()));
            let result = match outcome {
                Ok(result) => result,
                Err(payload) => Err(from_panic(payload, self.id)),
            };
            if let Err(err) = result {
                tracing::error!(node = ?self.id, subscriber = ?id, error = %err, "notification failed; clearing subscribers");
                self.subscribers.lock().clear();
                return Err(err);
            }
        }
        Ok(())
    }

    /// Drop every subscription and refuse new ones.
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.subscribers.lock().clear();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for SourceNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceNode")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("subscriber_count", &self.subscriber_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use std::sync::atomic::AtomicI32;
    use std::sync::Arc;

    fn counting(counter: &Arc<AtomicI32>) -> Subscriber {
        let counter = counter.clone();
        Subscriber::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn node_ids_are_unique() {
        assert_ne!(NodeId::new(), NodeId::new());
    }

    #[test]
    fn notify_reaches_every_subscriber_once() {
        let node = SourceNode::new(NodeKind::Signal);
        let count = Arc::new(AtomicI32::new(0));
        node.subscribe(counting(&count));
        node.subscribe(counting(&count));

        node.notify().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn resubscribing_replaces_the_entry() {
        let node = SourceNode::new(NodeKind::Computed);
        assert_eq!(node.kind(), NodeKind::Computed);

        let id = SubscriberId::new();
        let count = Arc::new(AtomicI32::new(0));
        for _ in 0..2 {
            let count = count.clone();
            node.subscribe(Subscriber::with_id(id, move || {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        }
        assert!(node.is_subscribed(id));
        assert_eq!(node.subscriber_count(), 1);

        node.notify().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        node.unsubscribe(id);
        assert!(!node.is_subscribed(id));
    }

    #[test]
    fn unsubscribe_mid_pass_skips_only_the_removed_sibling() {
        let node = Arc::new(SourceNode::new(NodeKind::Signal));
        let log = Arc::new(PlMutex::new(Vec::new()));

        let second_id = SubscriberId::new();
        let first = {
            let node = node.clone();
            let log = log.clone();
            Subscriber::new(move || {
                log.lock().push("first");
                node.unsubscribe(second_id);
                Ok(())
            })
        };
        let second = {
            let log = log.clone();
            Subscriber::with_id(second_id, move || {
                log.lock().push("second");
                Ok(())
            })
        };
        let third = {
            let log = log.clone();
            Subscriber::new(move || {
                log.lock().push("third");
                Ok(())
            })
        };
        node.subscribe(first);
        node.subscribe(second);
        node.subscribe(third);

        node.notify().unwrap();
        assert_eq!(*log.lock(), vec!["first", "third"]);
    }

    #[test]
    fn subscriptions_added_mid_pass_wait_for_next_pass() {
        let node = Arc::new(SourceNode::new(NodeKind::Signal));
        let late = Arc::new(AtomicI32::new(0));
        let adder = {
            let node = node.clone();
            let late = late.clone();
            Subscriber::new(move || {
                node.subscribe(counting(&late));
                Ok(())
            })
        };
        node.subscribe(adder);

        node.notify().unwrap();
        assert_eq!(late.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_subscriber_poisons_the_table() {
        let node = SourceNode::new(NodeKind::Signal);
        let after = Arc::new(AtomicI32::new(0));
        node.subscribe(Subscriber::new(|| panic!("boom")));
        node.subscribe(counting(&after));

        let err = node.notify().unwrap_err();
        assert!(matches!(err, ReactiveError::SubscriberFault { ref message, .. } if message == "boom"));
        assert_eq!(after.load(Ordering::SeqCst), 0);
        assert_eq!(node.subscriber_count(), 0);
    }

    #[test]
    fn disposed_node_refuses_subscribers() {
        let node = SourceNode::new(NodeKind::Computed);
        let count = Arc::new(AtomicI32::new(0));
        node.subscribe(counting(&count));
        node.dispose();
        node.subscribe(counting(&count));

        assert_eq!(node.subscriber_count(), 0);
        node.notify().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
