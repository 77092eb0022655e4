//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a signal is read,
//! it is recorded in the innermost tracking frame.
//!
//! # Implementation
//!
//! Each [`Runtime`] keeps a stack of frames. Entering a computation pushes
//! a tracked frame; [`untrack`] pushes an untracked one that swallows reads.
//! The stack lives on the runtime rather than in a process global, so two
//! render tasks interleaving on one thread never see each other's frames.
//!
//! A frame also notices writes to nodes it already read. That is how an
//! effect learns that its own run invalidated one of its dependencies.

use std::sync::Arc;

use smallvec::SmallVec;

use super::runtime::Runtime;
use super::SubscriberId;
use crate::graph::{NodeId, SourceNode};

/// The dependency list collected by one frame.
pub type Sources = SmallVec<[Arc<SourceNode>; 4]>;

/// An entry on a runtime's frame stack.
pub(crate) enum Frame {
    Tracked(TrackingFrame),
    Untracked,
}

/// The set of nodes read during one execution of a computation.
pub(crate) struct TrackingFrame {
    pub(crate) subscriber_id: SubscriberId,
    pub(crate) sources: Sources,
    pub(crate) invalidated: bool,
}

impl TrackingFrame {
    pub(crate) fn new(subscriber_id: SubscriberId) -> Self {
        Self {
            subscriber_id,
            sources: SmallVec::new(),
            invalidated: false,
        }
    }

    pub(crate) fn record(&mut self, node: &Arc<SourceNode>) {
        if !self.sources.iter().any(|s| s.id() == node.id()) {
            self.sources.push(node.clone());
        }
    }

    pub(crate) fn has_read(&self, node_id: NodeId) -> bool {
        self.sources.iter().any(|s| s.id() == node_id)
    }
}

/// What a finished frame observed.
#[derive(Debug, Default)]
pub struct Collected {
    /// Nodes read during the run, in first-read order, without duplicates.
    pub sources: Sources,
    /// A node in `sources` was written after being read.
    pub invalidated: bool,
}

/// Guard that pops the frame when dropped.
///
/// This ensures the frame stack is properly maintained even if
/// the computation panics.
pub struct ReactiveContext {
    runtime: Runtime,
    subscriber_id: Option<SubscriberId>,
    finished: bool,
}

impl ReactiveContext {
    /// Enter a new tracking frame for the given subscriber.
    pub fn enter(runtime: &Runtime, subscriber_id: SubscriberId) -> Self {
        runtime.push_frame(Frame::Tracked(TrackingFrame::new(subscriber_id)));
        Self {
            runtime: runtime.clone(),
            subscriber_id: Some(subscriber_id),
            finished: false,
        }
    }

    /// Enter a frame in which reads register nothing.
    pub fn untracked(runtime: &Runtime) -> Self {
        runtime.push_frame(Frame::Untracked);
        Self {
            runtime: runtime.clone(),
            subscriber_id: None,
            finished: false,
        }
    }

    /// Pop the frame and return what it collected.
    pub fn finish(mut self) -> Collected {
        self.finished = true;
        self.pop()
    }

    fn pop(&self) -> Collected {
        match self.runtime.pop_frame() {
            Some(Frame::Tracked(frame)) => {
                debug_assert_eq!(
                    Some(frame.subscriber_id),
                    self.subscriber_id,
                    "ReactiveContext mismatch: expected {:?}, got {:?}",
                    self.subscriber_id,
                    frame.subscriber_id
                );
                Collected {
                    sources: frame.sources,
                    invalidated: frame.invalidated,
                }
            }
            Some(Frame::Untracked) => {
                debug_assert!(self.subscriber_id.is_none(), "ReactiveContext mismatch: popped an untracked frame");
                Collected::default()
            }
            None => Collected::default(),
        }
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        if !self.finished {
            self.pop();
        }
    }
}

/// Run `f` with dependency tracking disabled.
///
/// Reads inside `f` never register dependencies, even when called from
/// inside an effect or computed. The previous tracking state is restored
/// however `f` exits.
///
/// ```rust
/// use filament_core::{create_effect, untrack, Signal};
///
/// let a = Signal::new(1);
/// let b = Signal::new(2);
/// let effect = create_effect({
///     let (a, b) = (a.clone(), b.clone());
///     move || {
///         a.get();
///         untrack(|| b.get());
///     }
/// });
/// assert_eq!(effect.dependency_count(), 1);
/// ```
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    let runtime = Runtime::current();
    let _ctx = ReactiveContext::untracked(&runtime);
    f()
}
