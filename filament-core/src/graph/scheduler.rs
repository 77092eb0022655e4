//! Re-run Scheduling
//!
//! Propagation is synchronous: a write runs every affected computation to
//! completion before it returns. The only scheduling state a computation
//! needs is a [`RerunGuard`]:
//!
//! - Effects use [`RerunGuard::drive`]. A notification that arrives while the
//!   effect is already running only sets a pending flag; the running pass
//!   loops until the flag stays clear, bounded by the configured cap.
//!
//! - Computeds use [`RerunGuard::enter`]. A notification while the computed
//!   is evaluating is dropped (re-entrancy guard), and nested recomputations
//!   through its own publish chain are bounded by a depth cap.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::error::{ComputationKind, ReactiveError};
use crate::graph::NodeId;

/// Per-computation re-entrancy and fixed-point state.
#[derive(Debug, Default)]
pub struct RerunGuard {
    running: AtomicBool,
    pending: AtomicBool,
    depth: AtomicUsize,
}

/// Clears the running flag when dropped, including during unwinding.
struct RunToken<'a>(&'a RerunGuard);

impl Drop for RunToken<'_> {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::SeqCst);
    }
}

/// Decrements the nesting depth when dropped.
pub struct DepthToken<'a>(&'a RerunGuard);

impl Drop for DepthToken<'_> {
    fn drop(&mut self) {
        self.0.depth.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RerunGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Request another pass from the currently running one.
    pub fn mark_pending(&self) {
        self.pending.store(true, Ordering::SeqCst);
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// Run `step` until no pass leaves the guard pending.
    ///
    /// If the guard is already running, the call is coalesced into the
    /// running pass and returns immediately. More than `limit` passes is a
    /// [`ReactiveError::DependencyCycle`].
    pub fn drive<F>(&self, node: NodeId, limit: usize, mut step: F) -> Result<usize, ReactiveError>
    where
        F: FnMut() -> Result<(), ReactiveError>,
    {
        if self.running.swap(true, Ordering::SeqCst) {
            self.mark_pending();
            return Ok(0);
        }
        let _token = RunToken(self);

        let mut passes = 0;
        loop {
            self.pending.store(false, Ordering::SeqCst);
            if passes == limit {
                tracing::error!(node = ?node, limit, "effect did not settle");
                return Err(ReactiveError::DependencyCycle {
                    node,
                    kind: ComputationKind::Effect,
                    limit,
                });
            }
            passes += 1;
            step()?;
            if !self.is_pending() {
                return Ok(passes);
            }
        }
    }

    /// Enter one level of nested recomputation.
    pub fn enter(&self, node: NodeId, limit: usize) -> Result<DepthToken<'_>, ReactiveError> {
        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        let token = DepthToken(self);
        if depth > limit {
            tracing::error!(node = ?node, limit, "computed re-entered past its depth cap");
            return Err(ReactiveError::DependencyCycle {
                node,
                kind: ComputationKind::Computed,
                limit,
            });
        }
        Ok(token)
    }

    /// Mark the computation as evaluating for the lifetime of the returned
    /// token. Returns `None` if it already is.
    pub fn begin(&self) -> Option<impl Drop + '_> {
        if self.running.swap(true, Ordering::SeqCst) {
            None
        } else {
            Some(RunToken(self))
        }
    }
}
