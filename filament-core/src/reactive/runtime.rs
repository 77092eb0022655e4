//! Reactive Runtime
//!
//! The runtime is the ambient state a reactive computation runs against:
//! the tracking frame stack, the active owner stack, the string-keyed
//! signal registry, pending hydration seeds, and the limits from
//! [`RuntimeConfig`].
//!
//! # Context Isolation
//!
//! There is no process-global reactive state. Every read of ambient state
//! goes through [`Runtime::current`], which resolves, in order:
//!
//! 1. the innermost runtime entered on this thread with [`Runtime::enter`]
//!    (or [`Runtime::run`]),
//! 2. the runtime bound to the current tokio task with [`Runtime::scope`],
//! 3. this thread's default runtime.
//!
//! Two server renders interleaving on one thread therefore never share a
//! tracking frame, an owner, or a keyed signal, as long as each runs inside
//! its own runtime. Client code that never creates a runtime just uses the
//! thread default.
//!
//! Effects and computeds remember the runtime they were created in and
//! re-enter it whenever they re-run, so a write from outside still runs
//! them against their own ambient state.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::context::{Collected, Frame, ReactiveContext};
use super::owner::Owner;
use super::signal::Signal;
use super::SubscriberId;
use crate::config::RuntimeConfig;
use crate::error::ReactiveError;
use crate::graph::{NodeId, SourceNode};

thread_local! {
    static ENTERED: RefCell<Vec<Runtime>> = const { RefCell::new(Vec::new()) };
    static THREAD_DEFAULT: Runtime = Runtime::new();
}

tokio::task_local! {
    static TASK_RUNTIME: Runtime;
}

/// Unique identifier for a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuntimeId(u64);

impl RuntimeId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A keyed registry entry: a signal that can snapshot itself as JSON.
pub(crate) trait KeyedEntry: Send + Sync {
    fn snapshot(&self) -> Result<serde_json::Value, serde_json::Error>;
    fn as_any(&self) -> &dyn Any;
}

impl<T> KeyedEntry for Signal<T>
where
    T: Clone + PartialEq + Send + Sync + Serialize + 'static,
{
    fn snapshot(&self) -> Result<serde_json::Value, serde_json::Error> {
        self.with_untracked(|value| serde_json::to_value(value))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct RuntimeInner {
    id: RuntimeId,
    config: RuntimeConfig,
    frames: Mutex<Vec<Frame>>,
    owners: Mutex<Vec<Owner>>,
    root: Owner,
    keyed: DashMap<String, Arc<dyn KeyedEntry>>,
    seeds: Mutex<HashMap<String, serde_json::Value>>,
}

/// Per-render-task reactive state. Cloning shares the same runtime.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

/// Non-owning handle held by computations, so a runtime and the effects
/// rooted in it do not keep each other alive.
#[derive(Clone)]
pub(crate) struct WeakRuntime(Weak<RuntimeInner>);

impl WeakRuntime {
    pub(crate) fn upgrade(&self) -> Option<Runtime> {
        self.0.upgrade().map(|inner| Runtime { inner })
    }
}

/// Keeps a runtime current on this thread until dropped.
#[must_use = "the runtime is only current while the guard is alive"]
pub struct RuntimeGuard {
    id: RuntimeId,
    _not_send: PhantomData<*const ()>,
}

impl Drop for RuntimeGuard {
    fn drop(&mut self) {
        ENTERED.with(|stack| {
            let popped = stack.borrow_mut().pop();
            debug_assert_eq!(popped.map(|r| r.id()), Some(self.id), "RuntimeGuard dropped out of order");
        });
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// A runtime with its own limits. Caps below 1 are raised to 1.
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                id: RuntimeId::new(),
                config: config.clamped(),
                frames: Mutex::new(Vec::new()),
                owners: Mutex::new(Vec::new()),
                root: Owner::new_root(),
                keyed: DashMap::new(),
                seeds: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The runtime ambient reads resolve to right now.
    pub fn current() -> Runtime {
        if let Some(runtime) = ENTERED.with(|stack| stack.borrow().last().cloned()) {
            return runtime;
        }
        if let Ok(runtime) = TASK_RUNTIME.try_with(Runtime::clone) {
            return runtime;
        }
        THREAD_DEFAULT.with(Runtime::clone)
    }

    /// Make this runtime current on this thread until the guard drops.
    ///
    /// Do not hold the guard across an `.await`; use [`Runtime::scope`].
    pub fn enter(&self) -> RuntimeGuard {
        ENTERED.with(|stack| stack.borrow_mut().push(self.clone()));
        RuntimeGuard {
            id: self.id(),
            _not_send: PhantomData,
        }
    }

    /// Run `f` with this runtime current.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.enter();
        f()
    }

    /// Make this runtime current for every poll of `fut`.
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        TASK_RUNTIME.scope(self, fut).await
    }

    pub fn id(&self) -> RuntimeId {
        self.inner.id
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub(crate) fn downgrade(&self) -> WeakRuntime {
        WeakRuntime(Arc::downgrade(&self.inner))
    }

    // ------------------------------------------------------------------
    // Tracking frames
    // ------------------------------------------------------------------

    pub(crate) fn push_frame(&self, frame: Frame) {
        self.inner.frames.lock().push(frame);
    }

    pub(crate) fn pop_frame(&self) -> Option<Frame> {
        self.inner.frames.lock().pop()
    }

    /// Whether a read right now would register a dependency.
    pub fn is_tracking(&self) -> bool {
        matches!(self.inner.frames.lock().last(), Some(Frame::Tracked(_)))
    }

    /// The subscriber whose frame is innermost, if reads are being tracked.
    pub fn current_subscriber(&self) -> Option<SubscriberId> {
        match self.inner.frames.lock().last() {
            Some(Frame::Tracked(frame)) => Some(frame.subscriber_id),
            _ => None,
        }
    }

    /// Record a read of `node` in the innermost frame.
    pub(crate) fn track(&self, node: &Arc<SourceNode>) {
        if let Some(Frame::Tracked(frame)) = self.inner.frames.lock().last_mut() {
            tracing::trace!(node = ?node.id(), subscriber = ?frame.subscriber_id, "tracked read");
            frame.record(node);
        }
    }

    /// Mark every open frame that already read `node` as invalidated.
    pub(crate) fn note_write(&self, node: NodeId) {
        for frame in self.inner.frames.lock().iter_mut() {
            if let Frame::Tracked(frame) = frame {
                if frame.has_read(node) {
                    frame.invalidated = true;
                }
            }
        }
    }

    /// Run `f` inside a fresh tracking frame for `subscriber_id`.
    pub(crate) fn tracked<R>(&self, subscriber_id: SubscriberId, f: impl FnOnce() -> R) -> (R, Collected) {
        let ctx = ReactiveContext::enter(self, subscriber_id);
        let value = f();
        (value, ctx.finish())
    }

    // ------------------------------------------------------------------
    // Owners
    // ------------------------------------------------------------------

    /// The owner that is never disposed except by [`Runtime::dispose`].
    pub fn root_owner(&self) -> Owner {
        self.inner.root.clone()
    }

    /// The innermost active owner, or the root.
    pub fn current_owner(&self) -> Owner {
        self.inner
            .owners
            .lock()
            .last()
            .cloned()
            .unwrap_or_else(|| self.inner.root.clone())
    }

    pub(crate) fn push_owner(&self, owner: Owner) {
        self.inner.owners.lock().push(owner);
    }

    pub(crate) fn pop_owner(&self) {
        self.inner.owners.lock().pop();
    }

    /// Dispose everything created in this runtime and clear its registry.
    pub fn dispose(&self) {
        self.inner.root.dispose();
        self.inner.keyed.clear();
        self.inner.seeds.lock().clear();
    }

    // ------------------------------------------------------------------
    // Keyed signals
    // ------------------------------------------------------------------

    /// The signal registered under `key` in this runtime, created from
    /// `init` (or from a hydration seed) on first use.
    ///
    /// Keyed signals belong to the runtime's root owner and are what
    /// [`HydrationPayload`](crate::hydration::HydrationPayload) transfers.
    pub fn keyed_signal<T>(&self, key: &str, init: impl FnOnce() -> T) -> Result<Signal<T>, ReactiveError>
    where
        T: Clone + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static,
    {
        if let Some(entry) = self.inner.keyed.get(key) {
            return entry
                .as_any()
                .downcast_ref::<Signal<T>>()
                .cloned()
                .ok_or_else(|| ReactiveError::KeyedTypeMismatch {
                    key: key.to_string(),
                    expected: std::any::type_name::<T>(),
                });
        }

        let seeded = self.inner.seeds.lock().remove(key).and_then(|value| {
            serde_json::from_value::<T>(value)
                .map_err(|err| {
                    tracing::warn!(key, error = %err, "hydration seed does not fit keyed signal; using initial value");
                })
                .ok()
        });
        let value = seeded.unwrap_or_else(init);
        let signal = self.run(|| self.inner.root.run_in(|| Signal::new(value)));

        let entry = self
            .inner
            .keyed
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(signal.clone()) as Arc<dyn KeyedEntry>);
        entry
            .as_any()
            .downcast_ref::<Signal<T>>()
            .cloned()
            .ok_or_else(|| ReactiveError::KeyedTypeMismatch {
                key: key.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// Shorthand for [`Runtime::keyed_signal`] on the current runtime.
    pub fn use_keyed<T>(key: &str, init: impl FnOnce() -> T) -> Result<Signal<T>, ReactiveError>
    where
        T: Clone + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static,
    {
        Runtime::current().keyed_signal(key, init)
    }

    pub fn keyed_len(&self) -> usize {
        self.inner.keyed.len()
    }

    /// Snapshot every keyed signal as JSON, sorted by key.
    pub(crate) fn snapshot_keyed(&self) -> Vec<(String, serde_json::Value)> {
        let mut out: Vec<_> = self
            .inner
            .keyed
            .iter()
            .filter_map(|entry| match entry.value().snapshot() {
                Ok(value) => Some((entry.key().clone(), value)),
                Err(err) => {
                    tracing::warn!(key = %entry.key(), error = %err, "keyed signal is not serializable; skipping");
                    None
                }
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Stage values for keyed signals that have not been created yet.
    pub(crate) fn stage_seeds(&self, seeds: impl IntoIterator<Item = (String, serde_json::Value)>) {
        let mut staged = self.inner.seeds.lock();
        for (key, value) in seeds {
            if self.inner.keyed.contains_key(&key) {
                tracing::debug!(key = %key, "keyed signal already exists; ignoring hydration seed");
                continue;
            }
            staged.insert(key, value);
        }
    }

    pub fn pending_seed_count(&self) -> usize {
        self.inner.seeds.lock().len()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("id", &self.inner.id)
            .field("keyed", &self.inner.keyed.len())
            .finish()
    }
}
