//! Dependency Graph
//!
//! The graph is distributed rather than centralized: every readable value
//! owns a [`SourceNode`] holding its subscribers, and every computation
//! remembers the nodes it subscribed to on its last run.
//!
//! - Edges are created by reads inside a tracking frame and committed when
//!   the frame closes.
//! - A computation's edges are fully replaced on every run, never merged.
//! - A write notifies a snapshot of the node's subscribers in subscription
//!   order, synchronously.
//!
//! [`RerunGuard`] carries the per-computation state that keeps this
//! synchronous push model bounded.

mod node;
mod scheduler;

pub use node::{NodeId, NodeKind, SourceNode};
pub use scheduler::{DepthToken, RerunGuard};
