//! Rendering
//!
//! The reconciler and everything it drives:
//!
//! - `dom`: the [`DomBackend`] trait and the in-memory [`MemoryDom`]
//! - `vnode`: [`VNode`] trees with explicitly tagged reactive values
//! - `reconciler`: mount, patch, unmount and hydration
//! - `keyed` / `list`: keyed list diffing and the [`KeyedList`] node
//! - [`ssr`]: rendering to an HTML string plus a hydration payload
//!
//! Reactive props and text become effects owned by whatever owner is
//! current at mount time, so disposing that owner stops every binding.

mod dom;
mod keyed;
mod list;
mod reconciler;
pub mod ssr;
mod vnode;

pub use dom::{DomBackend, DomEvent, DomOps, EventHandler, HostKind, ListenerId, MemoryDom, NodeRef};
pub use keyed::{DiffPlan, DiffStats, InstanceId, KeyedDiffer, Slot};
pub use list::KeyedList;
pub use reconciler::Reconciler;
pub use ssr::{render_into, render_to_string, SsrOutput};
pub use vnode::{ListNode, MaybeReactive, Prop, VNode, VNodeKind};
