//! Filament Core
//!
//! This crate provides the core runtime for the Filament UI framework.
//! It implements:
//!
//! - Fine-grained reactive primitives (signals, memos, effects)
//! - An ownership tree that disposes computations and runs cleanups
//! - Request-scoped runtimes so concurrent server renders stay isolated
//! - A DOM reconciler with keyed list diffing
//! - Server rendering and hydration
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Core reactive primitives, owners and the runtime
//! - `graph`: Per-node subscriber tables and re-run bookkeeping
//! - `render`: Virtual nodes, the reconciler and keyed lists
//! - `hydration`: State transfer from server renders to the client
//!
//! # Example
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//! use filament_core::{create_effect, Memo, Signal};
//!
//! // Create a signal
//! let count = Signal::new(0);
//!
//! // Create a derived value
//! let doubled = {
//!     let count = count.clone();
//!     Memo::new(move || count.get() * 2)
//! };
//!
//! // Create an effect
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let log = seen.clone();
//! let _effect = create_effect(move || log.lock().unwrap().push(doubled.get()));
//!
//! // Update the signal; the effect runs synchronously
//! count.set(5);
//! assert_eq!(*seen.lock().unwrap(), vec![0, 10]);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod hydration;
pub mod reactive;
pub mod render;

pub use config::RuntimeConfig;
pub use error::{ComputationKind, DomError, HydrationError, ReactiveError, RenderError, RenderResult};
pub use hydration::HydrationPayload;
pub use reactive::{
    create_computed, create_effect, create_memo, create_root, create_signal, on_cleanup, on_unmount, untrack, Cleanup,
    Effect, EffectOutput, Memo, Owner, ReadSignal, Runtime, Signal, WriteSignal,
};
pub use render::{DomBackend, KeyedList, MemoryDom, NodeRef, Reconciler, VNode};
