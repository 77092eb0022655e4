//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, memos, and effects,
//! plus the ownership tree that disposes them and the runtime that scopes them.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a tracking frame (such as a memo or effect), the read is recorded.
//! When the signal's value changes, a snapshot of its dependents is notified
//! synchronously.
//!
//! ## Memos
//!
//! A Memo is a derived value that caches its result. It recomputes as soon as
//! one of its dependencies changes, and only notifies its own dependents when
//! the result differs.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its dependencies
//! change. Effects are used to synchronize reactive state with external systems,
//! such as updating the DOM or logging.
//!
//! ## Owners
//!
//! Every signal, memo, effect and cleanup belongs to the owner that was active
//! when it was created. Disposing an owner tears down its whole subtree.
//!
//! # Implementation Notes
//!
//! Ambient state (tracking frames, the owner stack, keyed signals) lives on a
//! [`Runtime`], never in a process global. See [`Runtime::current`] for how
//! the current runtime is resolved.

mod context;
mod effect;
mod memo;
mod owner;
mod runtime;
mod signal;
mod subscriber;

pub use context::{untrack, Collected, ReactiveContext, Sources};
pub use effect::{create_effect, Effect, EffectOutput};
pub use memo::{create_computed, create_memo, Memo};
pub use owner::{create_root, on_cleanup, on_unmount, Cleanup, Owner, OwnerId};
pub use runtime::{Runtime, RuntimeGuard, RuntimeId};
pub use signal::{create_signal, ReadSignal, Signal, WriteSignal};
pub use subscriber::{Subscriber, SubscriberId};
