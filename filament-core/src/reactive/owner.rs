//! Ownership Tree
//!
//! Every signal, computed, effect and cleanup is recorded by the owner that
//! was active when it was created. Owners form a tree rooted at render or
//! mount entry points, so disposing one owner tears down everything created
//! beneath it.
//!
//! Disposal order is fixed:
//!
//! 1. child owners, newest first
//! 2. computations (effects and computeds), newest first
//! 3. signals, newest first (their subscriber tables are cleared)
//! 4. mount-lifecycle cleanups registered with [`on_unmount`]
//! 5. generic cleanups registered with [`on_cleanup`]
//! 6. unlink from the parent
//!
//! A panicking cleanup is logged and skipped; it never stops the rest of
//! the teardown. Disposing twice is a no-op, and disposing from inside an
//! ancestor's cleanup is safe.
//!
//! Owners only keep what is still alive. A computation disposed on its own
//! unlinks itself, and signals are held weakly, so a long-lived owner does
//! not accumulate dead entries.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::runtime::Runtime;
use crate::error::panic_message;
use crate::graph::{NodeId, SourceNode};

/// A teardown callback.
pub type Cleanup = Box<dyn FnOnce() + Send>;

/// Anything an owner can dispose in bulk.
pub(crate) trait Disposable: Send + Sync {
    fn dispose(&self);
}

/// Unique identifier for an owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(u64);

impl OwnerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

struct OwnerInner {
    id: OwnerId,
    parent: Mutex<Option<Weak<OwnerInner>>>,
    children: Mutex<Vec<Arc<OwnerInner>>>,
    computations: Mutex<IndexMap<NodeId, Arc<dyn Disposable>>>,
    signals: Mutex<Vec<Weak<SourceNode>>>,
    unmount_cleanups: Mutex<Vec<Cleanup>>,
    cleanups: Mutex<Vec<Cleanup>>,
    /// Set on the scope an effect creates for one run.
    run_scope: bool,
    disposed: AtomicBool,
}

/// A disposal scope. Cloning shares the same scope.
#[derive(Clone)]
pub struct Owner {
    inner: Arc<OwnerInner>,
}

/// Non-owning owner handle, held by computations that also live in the
/// owner's own lists.
#[derive(Clone)]
pub(crate) struct WeakOwner(Weak<OwnerInner>);

impl WeakOwner {
    pub(crate) fn upgrade(&self) -> Option<Owner> {
        self.0.upgrade().map(|inner| Owner { inner })
    }
}

fn run_guarded(owner: OwnerId, what: &'static str, f: impl FnOnce()) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        tracing::error!(owner = ?owner, what, error = %panic_message(payload.as_ref()), "disposal fault; continuing teardown");
    }
}

impl Owner {
    fn from_parent(parent: Option<&Owner>, run_scope: bool) -> Self {
        Self {
            inner: Arc::new(OwnerInner {
                id: OwnerId::new(),
                parent: Mutex::new(parent.map(|p| Arc::downgrade(&p.inner))),
                children: Mutex::new(Vec::new()),
                computations: Mutex::new(IndexMap::new()),
                signals: Mutex::new(Vec::new()),
                unmount_cleanups: Mutex::new(Vec::new()),
                cleanups: Mutex::new(Vec::new()),
                run_scope,
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// A detached owner with no parent.
    pub fn new_root() -> Self {
        Self::from_parent(None, false)
    }

    /// A new owner disposed together with `self`.
    ///
    /// A child of an already disposed owner is returned detached.
    pub fn child(&self) -> Owner {
        self.attach_child(false)
    }

    /// The scope of one effect run, disposed before the effect's next run.
    pub(crate) fn run_scope(&self) -> Owner {
        self.attach_child(true)
    }

    fn attach_child(&self, run_scope: bool) -> Owner {
        if self.is_disposed() {
            tracing::trace!(owner = ?self.id(), "creating child of disposed owner; it will be detached");
            return Self::from_parent(None, run_scope);
        }
        let child = Self::from_parent(Some(self), run_scope);
        self.inner.children.lock().push(child.inner.clone());
        child
    }

    /// `self`, or its nearest ancestor that outlives a single effect run.
    ///
    /// Work that has to survive the effect re-running, such as the bindings
    /// of a tree the effect mounts and later patches, belongs here.
    pub fn stable(&self) -> Owner {
        let mut owner = self.clone();
        while owner.inner.run_scope {
            match owner.parent() {
                Some(parent) => owner = parent,
                None => break,
            }
        }
        owner
    }

    /// The innermost active owner of the current runtime.
    pub fn current() -> Owner {
        Runtime::current().current_owner()
    }

    pub fn id(&self) -> OwnerId {
        self.inner.id
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    pub fn child_count(&self) -> usize {
        self.inner.children.lock().len()
    }

    /// Live effects and computeds created directly under this owner.
    pub fn computation_count(&self) -> usize {
        self.inner.computations.lock().len()
    }

    /// Signals created directly under this owner that are still referenced.
    pub fn signal_count(&self) -> usize {
        self.inner
            .signals
            .lock()
            .iter()
            .filter(|node| node.strong_count() > 0)
            .count()
    }

    pub fn parent(&self) -> Option<Owner> {
        self.inner
            .parent
            .lock()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Owner { inner })
    }

    pub(crate) fn downgrade(&self) -> WeakOwner {
        WeakOwner(Arc::downgrade(&self.inner))
    }

    /// Run `f` with `self` as the active owner of the current runtime.
    pub fn run_in<R>(&self, f: impl FnOnce() -> R) -> R {
        struct Pop(Runtime);
        impl Drop for Pop {
            fn drop(&mut self) {
                self.0.pop_owner();
            }
        }

        let runtime = Runtime::current();
        runtime.push_owner(self.clone());
        let _pop = Pop(runtime);
        f()
    }

    pub(crate) fn adopt_computation(&self, id: NodeId, computation: Arc<dyn Disposable>) {
        if self.is_disposed() {
            tracing::trace!(owner = ?self.id(), "computation created under disposed owner; disposing it");
            computation.dispose();
            return;
        }
        self.inner.computations.lock().insert(id, computation);
    }

    /// Forget a computation that was disposed on its own.
    pub(crate) fn release_computation(&self, id: NodeId) {
        self.inner.computations.lock().shift_remove(&id);
    }

    pub(crate) fn adopt_signal(&self, node: &Arc<SourceNode>) {
        if self.is_disposed() {
            node.dispose();
            return;
        }
        let mut signals = self.inner.signals.lock();
        // Prune before the vector would grow, so dropped signals cost
        // amortized constant time.
        if signals.len() == signals.capacity() {
            signals.retain(|node| node.strong_count() > 0);
        }
        signals.push(Arc::downgrade(node));
    }

    /// Register a cleanup that runs when this owner is disposed.
    pub fn on_cleanup(&self, f: impl FnOnce() + Send + 'static) {
        if self.is_disposed() {
            run_guarded(self.id(), "cleanup", f);
            return;
        }
        self.inner.cleanups.lock().push(Box::new(f));
    }

    /// Register a mount-lifecycle cleanup. These run before generic cleanups.
    pub fn on_unmount(&self, f: impl FnOnce() + Send + 'static) {
        if self.is_disposed() {
            run_guarded(self.id(), "unmount", f);
            return;
        }
        self.inner.unmount_cleanups.lock().push(Box::new(f));
    }

    /// Tear down this owner and everything beneath it.
    pub fn dispose(&self) {
        Self::dispose_inner(&self.inner);
    }

    fn dispose_inner(inner: &Arc<OwnerInner>) {
        if inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let id = inner.id;
        tracing::debug!(owner = ?id, "disposing owner");

        // Drain each list before running anything, so callbacks may touch
        // this owner (or dispose it again) without deadlocking.
        let children = std::mem::take(&mut *inner.children.lock());
        for child in children.into_iter().rev() {
            Self::dispose_inner(&child);
        }

        let computations = std::mem::take(&mut *inner.computations.lock());
        for (_, computation) in computations.into_iter().rev() {
            run_guarded(id, "computation", || computation.dispose());
        }

        let signals = std::mem::take(&mut *inner.signals.lock());
        for node in signals.into_iter().rev().filter_map(|node| node.upgrade()) {
            node.dispose();
        }

        let unmount = std::mem::take(&mut *inner.unmount_cleanups.lock());
        for cleanup in unmount.into_iter().rev() {
            run_guarded(id, "unmount", cleanup);
        }

        let cleanups = std::mem::take(&mut *inner.cleanups.lock());
        for cleanup in cleanups.into_iter().rev() {
            run_guarded(id, "cleanup", cleanup);
        }

        let parent = inner.parent.lock().take().and_then(|weak| weak.upgrade());
        if let Some(parent) = parent {
            parent.children.lock().retain(|child| !Arc::ptr_eq(child, inner));
        }
    }
}

impl PartialEq for Owner {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Owner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Owner")
            .field("id", &self.inner.id)
            .field("children", &self.child_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Run `f` under a new detached owner and return both.
///
/// Nothing created inside `f` is disposed until the returned owner is.
pub fn create_root<R>(f: impl FnOnce(&Owner) -> R) -> (R, Owner) {
    let owner = Owner::new_root();
    let value = owner.run_in(|| f(&owner));
    (value, owner)
}

/// Register a cleanup on the current owner.
///
/// Inside an effect this runs before the effect's next run and when the
/// effect is disposed.
pub fn on_cleanup(f: impl FnOnce() + Send + 'static) {
    Owner::current().on_cleanup(f);
}

/// Register a mount-lifecycle cleanup on the current owner.
pub fn on_unmount(f: impl FnOnce() + Send + 'static) {
    Owner::current().on_unmount(f);
}
