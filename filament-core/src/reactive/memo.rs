//! Memo Implementation
//!
//! A Memo (computed) is a cached derived value.
//!
//! # How Memos Work
//!
//! 1. On creation, the memo runs its computation inside a tracking frame,
//!    caches the result, and subscribes to every node it read.
//!
//! 2. When a dependency notifies, the memo recomputes immediately under a
//!    fresh frame. The new dependency set replaces the old one, so a
//!    dependency that was read conditionally and then skipped stops
//!    triggering recomputes right away.
//!
//! 3. If the new value differs from the cached one, the memo stores it and
//!    notifies its own subscribers. Otherwise nothing downstream runs.
//!
//! A notification that arrives while the memo is still computing (a write
//! caused by its own computation) is ignored. Recomputations nested through
//! the memo's own publish chain are capped by
//! [`RuntimeConfig::max_computed_depth`](crate::RuntimeConfig).

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use super::context::Sources;
use super::owner::{Disposable, Owner, WeakOwner};
use super::runtime::{Runtime, WeakRuntime};
use super::subscriber::{Subscriber, SubscriberId};
use crate::error::ReactiveError;
use crate::graph::{NodeId, NodeKind, RerunGuard, SourceNode};

struct MemoInner<T> {
    node: Arc<SourceNode>,
    subscriber: Subscriber,
    compute: Box<dyn Fn() -> T + Send + Sync>,
    value: RwLock<T>,
    dependencies: Mutex<Sources>,
    guard: RerunGuard,
    parent: WeakOwner,
    runtime: WeakRuntime,
    max_depth: usize,
    recomputes: AtomicUsize,
    disposed: AtomicBool,
}

impl<T> MemoInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn replace_dependencies(&self, sources: Sources) {
        let id = self.subscriber.id();
        let mut dependencies = self.dependencies.lock();
        for old in dependencies.drain(..) {
            old.unsubscribe(id);
        }
        for source in &sources {
            source.subscribe(self.subscriber.clone());
        }
        *dependencies = sources;
    }

    fn on_dependency_changed(&self) -> Result<(), ReactiveError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Ok(());
        }
        if self.guard.is_running() {
            tracing::trace!(node = ?self.node.id(), "ignoring write caused by own recompute");
            return Ok(());
        }
        let _depth = self.guard.enter(self.node.id(), self.max_depth)?;

        let runtime = self.runtime.upgrade().unwrap_or_else(Runtime::current);
        let _entered = runtime.enter();

        let next = {
            let Some(_computing) = self.guard.begin() else {
                return Ok(());
            };
            let (next, collected) = runtime.tracked(self.subscriber.id(), || (self.compute)());
            self.replace_dependencies(collected.sources);
            next
        };
        self.recomputes.fetch_add(1, Ordering::Relaxed);

        let changed = {
            let mut current = self.value.write();
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        };

        if changed {
            tracing::trace!(node = ?self.node.id(), "computed value changed");
            runtime.note_write(self.node.id());
            self.node.notify()?;
        }
        Ok(())
    }
}

impl<T> Disposable for MemoInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let id = self.subscriber.id();
        for dependency in self.dependencies.lock().drain(..) {
            dependency.unsubscribe(id);
        }
        self.node.dispose();
        if let Some(parent) = self.parent.upgrade() {
            parent.release_computation(self.node.id());
        }
    }
}

/// A memoized derived value.
///
/// ```rust
/// use filament_core::{Memo, Signal};
///
/// let count = Signal::new(2);
/// let doubled = Memo::new({
///     let count = count.clone();
///     move || count.get() * 2
/// });
/// assert_eq!(doubled.get(), 4);
///
/// count.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Memo<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    inner: Arc<MemoInner<T>>,
}

impl<T> Memo<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a memo, computing its initial value and dependencies now.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let runtime = Runtime::current();
        let owner = Owner::current();
        let subscriber_id = SubscriberId::new();
        let (initial, collected) = runtime.tracked(subscriber_id, &compute);

        let inner = Arc::new_cyclic(|weak: &Weak<MemoInner<T>>| {
            let weak = weak.clone();
            MemoInner {
                node: Arc::new(SourceNode::new(NodeKind::Computed)),
                subscriber: Subscriber::with_id(subscriber_id, move || match weak.upgrade() {
                    Some(memo) => memo.on_dependency_changed(),
                    None => Ok(()),
                }),
                compute: Box::new(compute),
                value: RwLock::new(initial),
                dependencies: Mutex::new(Sources::new()),
                guard: RerunGuard::new(),
                parent: owner.downgrade(),
                runtime: runtime.downgrade(),
                max_depth: runtime.config().max_computed_depth,
                recomputes: AtomicUsize::new(0),
                disposed: AtomicBool::new(false),
            }
        });
        inner.replace_dependencies(collected.sources);
        owner.adopt_computation(inner.node.id(), inner.clone());

        tracing::trace!(node = ?inner.node.id(), "created computed");
        Self { inner }
    }

    /// Get the memo's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.node.id()
    }

    /// Get the cached value, registering a dependency if tracking.
    pub fn get(&self) -> T {
        Runtime::current().track(&self.inner.node);
        self.get_untracked()
    }

    pub fn get_untracked(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Call `f` with a snapshot of the cached value. `f` may write the
    /// memo's own dependencies.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        Runtime::current().track(&self.inner.node);
        f(&self.get_untracked())
    }

    /// How many times the value has been recomputed after creation.
    pub fn recompute_count(&self) -> usize {
        self.inner.recomputes.load(Ordering::Relaxed)
    }

    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.lock().len()
    }

    /// Get the number of dependents.
    pub fn subscriber_count(&self) -> usize {
        self.inner.node.subscriber_count()
    }

    /// Stop tracking dependencies. The last value stays readable.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }
}

impl<T> Clone for Memo<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Memo<T>
where
    T: Clone + PartialEq + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memo")
            .field("id", &self.id())
            .field("value", &self.get_untracked())
            .field("dependency_count", &self.dependency_count())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// Create a memoized derived value.
pub fn create_memo<T, F>(compute: F) -> Memo<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    Memo::new(compute)
}

/// Alias of [`create_memo`].
pub fn create_computed<T, F>(compute: F) -> Memo<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    Memo::new(compute)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
