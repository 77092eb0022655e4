//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a tracking frame (computed/effect), the
//!    read is recorded in that frame. The computation subscribes once its
//!    run finishes.
//!
//! 2. When a signal is written with a value that differs from the current
//!    one, a snapshot of its subscribers is notified synchronously.
//!
//! 3. Writing an equal value does nothing.
//!
//! # Thread Safety
//!
//! Signals are `Send + Sync`: the value sits behind a `RwLock`, the
//! subscriber table behind a `Mutex`, and neither lock is held while a
//! subscriber or a caller's closure runs. Closures passed to `with` and
//! `update` see a snapshot, so they may write the signal they were given.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::RwLock;

use super::owner::Owner;
use super::runtime::Runtime;
use crate::error::{raise, ReactiveError};
use crate::graph::{NodeId, NodeKind, SourceNode};

struct SignalInner<T> {
    node: Arc<SourceNode>,
    value: RwLock<T>,
}

/// A reactive signal holding a value of type T.
///
/// # Example
///
/// ```rust
/// use filament_core::Signal;
///
/// let count = Signal::new(0);
/// assert_eq!(count.get(), 0);
///
/// count.set(5);
/// count.update(|n| n + 1);
/// assert_eq!(count.get(), 6);
/// ```
pub struct Signal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    inner: Arc<SignalInner<T>>,
}

impl<T> Signal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a new signal owned by the current owner.
    pub fn new(value: T) -> Self {
        let node = Arc::new(SourceNode::new(NodeKind::Signal));
        Owner::current().adopt_signal(&node);
        Self {
            inner: Arc::new(SignalInner {
                node,
                value: RwLock::new(value),
            }),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.node.id()
    }

    /// Record a read in the current tracking frame without cloning the value.
    pub fn track(&self) {
        Runtime::current().track(&self.inner.node);
    }

    /// Get the current value, registering a dependency if tracking.
    pub fn get(&self) -> T {
        self.track();
        self.get_untracked()
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Call `f` with a snapshot of the current value, registering a
    /// dependency if tracking.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        self.with_untracked(f)
    }

    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.get_untracked())
    }

    /// Store `value` and notify subscribers if it differs from the current
    /// value. A failing subscriber's error is returned here.
    pub fn try_set(&self, value: T) -> Result<(), ReactiveError> {
        {
            let mut current = self.inner.value.write();
            if *current == value {
                return Ok(());
            }
            *current = value;
        }
        if self.inner.node.is_disposed() {
            tracing::trace!(node = ?self.id(), "write to disposed signal");
        }
        Runtime::current().note_write(self.id());
        self.inner.node.notify()
    }

    /// Like [`Signal::try_set`], but a fault unwinds to the nearest
    /// `try_*` caller.
    pub fn set(&self, value: T) {
        if let Err(err) = self.try_set(value) {
            raise(err);
        }
    }

    /// Write a value derived from the current one.
    pub fn try_update(&self, f: impl FnOnce(&T) -> T) -> Result<(), ReactiveError> {
        let next = f(&self.get_untracked());
        self.try_set(next)
    }

    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        if let Err(err) = self.try_update(f) {
            raise(err);
        }
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.node.subscriber_count()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.node.is_disposed()
    }

    /// Split into read-only and write-only halves sharing this signal.
    pub fn split(&self) -> (ReadSignal<T>, WriteSignal<T>) {
        (self.read_only(), self.write_only())
    }

    pub fn read_only(&self) -> ReadSignal<T> {
        ReadSignal(self.clone())
    }

    pub fn write_only(&self) -> WriteSignal<T> {
        WriteSignal(self.clone())
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + PartialEq + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id())
            .field("value", &self.get_untracked())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// The readable half of a signal.
pub struct ReadSignal<T>(Signal<T>)
where
    T: Clone + PartialEq + Send + Sync + 'static;

impl<T> ReadSignal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn id(&self) -> NodeId {
        self.0.id()
    }

    pub fn get(&self) -> T {
        self.0.get()
    }

    pub fn get_untracked(&self) -> T {
        self.0.get_untracked()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.0.with(f)
    }

    pub fn track(&self) {
        self.0.track()
    }

    pub fn subscriber_count(&self) -> usize {
        self.0.subscriber_count()
    }
}

impl<T> Clone for ReadSignal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

/// The writable half of a signal.
pub struct WriteSignal<T>(Signal<T>)
where
    T: Clone + PartialEq + Send + Sync + 'static;

impl<T> WriteSignal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn set(&self, value: T) {
        self.0.set(value)
    }

    pub fn try_set(&self, value: T) -> Result<(), ReactiveError> {
        self.0.try_set(value)
    }

    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        self.0.update(f)
    }

    pub fn try_update(&self, f: impl FnOnce(&T) -> T) -> Result<(), ReactiveError> {
        self.0.try_update(f)
    }
}

impl<T> Clone for WriteSignal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

/// Create a signal and return its read and write halves.
///
/// ```rust
/// use filament_core::create_signal;
///
/// let (count, set_count) = create_signal(1);
/// set_count.update(|n| n * 10);
/// assert_eq!(count.get(), 10);
/// ```
pub fn create_signal<T>(value: T) -> (ReadSignal<T>, WriteSignal<T>)
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    Signal::new(value).split()
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
