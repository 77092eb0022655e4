//! Keyed Lists
//!
//! A [`KeyedList`] renders one instance per item of a reactive vector and
//! keeps them in step with it.
//!
//! # How Lists Update
//!
//! The list mounts an end marker and an effect that reads the items. On
//! every change:
//!
//! 1. Items are keyed and matched against live instances by
//!    [`KeyedDiffer`].
//! 2. Instances without a place in the new list are unmounted and their
//!    owners disposed.
//! 3. Reused instances receive their new item through their own signal,
//!    so only the bindings that read it update. They are never re-rendered.
//! 4. New instances are rendered under their own owner.
//! 5. One backward pass puts everything in order: each instance is placed
//!    before the first root of its successor (or the end marker), and a
//!    reused instance is only moved if its last root is not already there.
//!
//! Items are rendered with tracking disabled, so reads inside `render`
//! never make the list itself re-run.

use std::any::Any;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

use super::dom::{HostKind, NodeRef};
use super::keyed::{DiffStats, InstanceId, KeyedDiffer, Slot};
use super::reconciler::Reconciler;
use super::vnode::{ListNode, VNode};
use crate::error::RenderResult;
use crate::reactive::{untrack, Effect, Owner, ReadSignal, Signal};

type ItemsFn<T> = Arc<dyn Fn() -> Vec<T> + Send + Sync>;
type KeyFn<T, K> = Arc<dyn Fn(usize, &T) -> K + Send + Sync>;
type RenderFn<T> = Arc<dyn Fn(ReadSignal<T>) -> VNode + Send + Sync>;

struct Instance<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    item: Signal<T>,
    vnode: VNode,
    owner: Owner,
}

struct ListState<T, K>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    differ: KeyedDiffer<K>,
    instances: HashMap<InstanceId, Instance<T>>,
    order: Vec<InstanceId>,
    parent: Option<NodeRef>,
    end: Option<NodeRef>,
    owner: Option<Owner>,
    effect: Option<Effect>,
    stats: DiffStats,
}

impl<T, K> Default for ListState<T, K>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn default() -> Self {
        Self {
            differ: KeyedDiffer::default(),
            instances: HashMap::new(),
            order: Vec::new(),
            parent: None,
            end: None,
            owner: None,
            effect: None,
            stats: DiffStats::default(),
        }
    }
}

/// A list of items rendered by key.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use filament_core::render::{DomBackend, KeyedList, MemoryDom, Reconciler, VNode};
/// use filament_core::Signal;
///
/// let dom = Arc::new(MemoryDom::new());
/// let reconciler = Reconciler::new(dom.clone());
/// let container = dom.create_element("ul");
///
/// let names = Signal::new(vec!["a".to_string(), "b".to_string()]);
/// let list = KeyedList::new(
///     { let names = names.clone(); move || names.get() },
///     |name: &String| name.clone(),
///     |name| VNode::element("li").child(VNode::text(name)),
/// );
/// let mut view = VNode::list(list.clone());
/// reconciler.mount(&mut view, container, None).unwrap();
/// assert_eq!(dom.text_content(container), "ab");
///
/// names.set(vec!["b".to_string(), "a".to_string()]);
/// assert_eq!(dom.text_content(container), "ba");
/// assert_eq!(list.stats().created, 2);
/// ```
pub struct KeyedList<T, K>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    items: ItemsFn<T>,
    key: KeyFn<T, K>,
    render: RenderFn<T>,
    state: Arc<Mutex<ListState<T, K>>>,
}

impl<T, K> KeyedList<T, K>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// A list keyed by `key`.
    pub fn new(
        items: impl Fn() -> Vec<T> + Send + Sync + 'static,
        key: impl Fn(&T) -> K + Send + Sync + 'static,
        render: impl Fn(ReadSignal<T>) -> VNode + Send + Sync + 'static,
    ) -> Self {
        Self {
            items: Arc::new(items),
            key: Arc::new(move |_, item: &T| key(item)),
            render: Arc::new(render),
            state: Arc::new(Mutex::new(ListState::default())),
        }
    }

    /// Cumulative counters since the list was first mounted.
    pub fn stats(&self) -> DiffStats {
        self.state.lock().stats
    }

    /// Number of live instances.
    pub fn len(&self) -> usize {
        self.state.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn start(&self, reconciler: &Reconciler) -> RenderResult<()> {
        let Some(owner) = self.state.lock().owner.clone() else {
            return Ok(());
        };
        let items = Arc::clone(&self.items);
        let this = self.clone();
        let reconciler = reconciler.clone();
        let effect = owner.run_in(|| {
            Effect::try_new(move || {
                let items = items();
                untrack(|| {
                    if let Err(err) = this.reconcile(&reconciler, items) {
                        tracing::error!(error = %err, "keyed list update failed");
                    }
                });
            })
        })?;
        self.state.lock().effect = Some(effect);
        Ok(())
    }

    fn key_all(&self, items: &[T]) -> Vec<K> {
        items.iter().enumerate().map(|(i, item)| (self.key)(i, item)).collect()
    }

    fn create_instance(&self, list_owner: &Owner, item: T) -> Instance<T> {
        let owner = list_owner.child();
        let (item, vnode) = owner.run_in(|| {
            let signal = Signal::new(item);
            let vnode = (self.render)(signal.read_only());
            (signal, vnode)
        });
        Instance { item, vnode, owner }
    }

    fn reconcile(&self, reconciler: &Reconciler, items: Vec<T>) -> RenderResult<()> {
        let keys = self.key_all(&items);
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let (Some(parent), Some(end), Some(list_owner)) = (state.parent, state.end, state.owner.clone()) else {
            return Ok(());
        };

        let plan = state.differ.plan(&keys);
        let stats = plan.stats();

        for id in &plan.removed {
            if let Some(mut instance) = state.instances.remove(id) {
                reconciler.teardown(&mut instance.vnode, true);
                instance.owner.dispose();
            }
        }

        for (slot, item) in plan.slots.iter().zip(items) {
            match slot {
                Slot::Reuse(id) => {
                    if let Some(instance) = state.instances.get(id) {
                        if let Err(err) = instance.item.try_set(item) {
                            tracing::error!(instance = ?id, error = %err, "failed to update list item");
                        }
                    }
                }
                Slot::Create(id) => {
                    let instance = self.create_instance(&list_owner, item);
                    state.instances.insert(*id, instance);
                }
            }
        }

        // The differ has committed the new live set; record it before any
        // DOM work that can fail.
        state.order = plan.slots.iter().map(Slot::id).collect();
        state.stats += stats;

        let dom = reconciler.dom();
        let mut moved = 0;
        let mut next_anchor = end;
        for slot in plan.slots.iter().rev() {
            let Some(instance) = state.instances.get_mut(&slot.id()) else {
                continue;
            };
            match slot {
                Slot::Create(_) => {
                    let owner = instance.owner.clone();
                    owner.run_in(|| reconciler.mount(&mut instance.vnode, parent, Some(next_anchor)))?;
                }
                Slot::Reuse(_) => {
                    let roots = reconciler.roots(&instance.vnode);
                    let in_place = roots
                        .last()
                        .is_some_and(|last| dom.next_sibling(*last) == Some(next_anchor));
                    if !in_place {
                        for root in &roots {
                            dom.insert_before(parent, *root, Some(next_anchor))?;
                        }
                        moved += 1;
                        state.stats.moved += 1;
                    }
                }
            }
            if let Some(first) = reconciler.first_root(&instance.vnode) {
                next_anchor = first;
            }
        }

        tracing::debug!(
            created = stats.created,
            reused = stats.reused,
            removed = stats.removed,
            moved,
            "keyed list reconciled"
        );
        Ok(())
    }
}

impl<T, K> KeyedList<T, K>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Hydrate one instance per item in order, then the end marker.
    fn claim_items(
        &self,
        reconciler: &Reconciler,
        parent: NodeRef,
        cursor: &mut Option<NodeRef>,
        list_owner: &Owner,
    ) -> RenderResult<NodeRef> {
        let items = untrack(|| (self.items)());
        let keys = self.key_all(&items);
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.owner = Some(list_owner.clone());
            let plan = state.differ.plan(&keys);
            state.order = plan.slots.iter().map(Slot::id).collect();
            state.stats += plan.stats();
            for (slot, item) in plan.slots.iter().zip(items) {
                let mut instance = self.create_instance(list_owner, item);
                let owner = instance.owner.clone();
                let claimed = owner.run_in(|| reconciler.hydrate_node(&mut instance.vnode, parent, cursor));
                state.instances.insert(slot.id(), instance);
                claimed?;
            }
        }

        let end = reconciler.claim(cursor, |kind| matches!(kind, HostKind::Marker), || {
            "list end marker".to_string()
        })?;
        {
            let mut state = self.state.lock();
            state.parent = Some(parent);
            state.end = Some(end);
        }
        self.start(reconciler)?;
        Ok(end)
    }

    /// Dispose the list effect, every instance and the list owner.
    fn dispose_state(reconciler: &Reconciler, state: ListState<T, K>, detach: bool) {
        let ListState {
            instances,
            order,
            end,
            owner,
            effect,
            ..
        } = state;
        if let Some(effect) = effect {
            effect.dispose();
        }
        let mut instances = instances;
        for id in order {
            if let Some(mut instance) = instances.remove(&id) {
                reconciler.teardown(&mut instance.vnode, detach);
                instance.owner.dispose();
            }
        }
        if let (Some(end), true) = (end, detach) {
            if let Err(err) = reconciler.dom().remove(end) {
                tracing::warn!(node = ?end, error = %err, "failed to detach list end marker");
            }
        }
        if let Some(owner) = owner {
            owner.dispose();
        }
    }
}

impl<T> KeyedList<T, usize>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// A list keyed by position. Items that change at an index update that
    /// instance in place.
    pub fn indexed(
        items: impl Fn() -> Vec<T> + Send + Sync + 'static,
        render: impl Fn(ReadSignal<T>) -> VNode + Send + Sync + 'static,
    ) -> Self {
        Self {
            items: Arc::new(items),
            key: Arc::new(|index, _: &T| index),
            render: Arc::new(render),
            state: Arc::new(Mutex::new(ListState::default())),
        }
    }
}

impl<T, K> Clone for KeyedList<T, K>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
            key: Arc::clone(&self.key),
            render: Arc::clone(&self.render),
            state: Arc::clone(&self.state),
        }
    }
}

impl<T, K> ListNode for KeyedList<T, K>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn mount(&self, reconciler: &Reconciler, parent: NodeRef, anchor: Option<NodeRef>) -> RenderResult<NodeRef> {
        let end = reconciler.dom().create_marker("/list");
        reconciler.dom().insert_before(parent, end, anchor)?;
        {
            let mut state = self.state.lock();
            state.parent = Some(parent);
            state.end = Some(end);
            state.owner = Some(Owner::current().stable().child());
        }
        self.start(reconciler)?;
        Ok(end)
    }

    fn hydrate(&self, reconciler: &Reconciler, parent: NodeRef, cursor: &mut Option<NodeRef>) -> RenderResult<NodeRef> {
        let list_owner = Owner::current().stable().child();
        let claimed = self.claim_items(reconciler, parent, cursor, &list_owner);
        if claimed.is_err() {
            self.unmount(reconciler, false);
            list_owner.dispose();
        }
        claimed
    }

    fn unmount(&self, reconciler: &Reconciler, detach: bool) {
        let state = std::mem::take(&mut *self.state.lock());
        Self::dispose_state(reconciler, state, detach);
    }

    fn roots(&self, reconciler: &Reconciler) -> Vec<NodeRef> {
        let state = self.state.lock();
        let mut roots = Vec::new();
        for id in &state.order {
            if let Some(instance) = state.instances.get(id) {
                roots.extend(reconciler.roots(&instance.vnode));
            }
        }
        roots.extend(state.end);
        roots
    }

    fn first_root(&self, reconciler: &Reconciler) -> Option<NodeRef> {
        let state = self.state.lock();
        state
            .order
            .iter()
            .filter_map(|id| state.instances.get(id))
            .find_map(|instance| reconciler.first_root(&instance.vnode))
            .or(state.end)
    }

    fn adopt(&self, reconciler: &Reconciler, old: &dyn ListNode) -> RenderResult<bool> {
        let Some(old) = old.as_any().downcast_ref::<KeyedList<T, K>>() else {
            return Ok(false);
        };
        if Arc::ptr_eq(&self.state, &old.state) {
            return Ok(true);
        }
        let taken = std::mem::take(&mut *old.state.lock());
        let previous = {
            let mut state = self.state.lock();
            std::mem::replace(&mut *state, taken)
        };
        if previous.end.is_some() {
            tracing::warn!("adopting into a list that was already mounted; unmounting its items");
            Self::dispose_state(reconciler, previous, true);
        }
        let effect = self.state.lock().effect.take();
        if let Some(effect) = effect {
            effect.dispose();
        }
        self.start(reconciler)?;
        Ok(true)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T, K> std::fmt::Debug for KeyedList<T, K>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("KeyedList")
            .field("len", &state.order.len())
            .field("stats", &state.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Runtime;
    use crate::render::{DomBackend, MemoryDom};

    fn letters(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn mounted(items: &Signal<Vec<String>>) -> (Arc<MemoryDom>, NodeRef, KeyedList<String, String>, VNode) {
        let dom = Arc::new(MemoryDom::new());
        let reconciler = Reconciler::new(dom.clone());
        let container = dom.create_element("ul");
        let list = KeyedList::new(
            {
                let items = items.clone();
                move || items.get()
            },
            |item: &String| item.clone(),
            |item| VNode::element("li").child(VNode::text(item)),
        );
        let mut view = VNode::list(list.clone());
        reconciler.mount(&mut view, container, None).unwrap();
        (dom, container, list, view)
    }

    #[test]
    fn rotation_moves_without_recreating() {
        Runtime::new().run(|| {
            let items = Signal::new(letters(&["a", "b", "c"]));
            let (dom, container, list, _view) = mounted(&items);
            assert_eq!(dom.text_content(container), "abc");
            dom.reset_ops();

            items.set(letters(&["c", "a", "b"]));
            assert_eq!(dom.text_content(container), "cab");
            assert_eq!(dom.ops().nodes_created(), 0);
            assert_eq!(dom.ops().removals, 0);

            let stats = list.stats();
            assert_eq!(stats.created, 3);
            assert_eq!(stats.reused, 3);
            assert_eq!(stats.removed, 0);
            assert_eq!(stats.moved, dom.ops().moves);
            assert!(stats.moved <= 2);
        });
    }

    #[test]
    fn appending_does_not_move_existing_items() {
        Runtime::new().run(|| {
            let items = Signal::new(letters(&["a", "b"]));
            let (dom, container, list, _view) = mounted(&items);
            dom.reset_ops();

            items.set(letters(&["a", "b", "c"]));
            assert_eq!(dom.text_content(container), "abc");
            assert_eq!(dom.ops().moves, 0);
            assert_eq!(list.stats().moved, 0);
        });
    }

    #[test]
    fn removed_items_are_detached_and_disposed() {
        Runtime::new().run(|| {
            let items = Signal::new(letters(&["a", "b", "c"]));
            let (dom, container, list, _view) = mounted(&items);

            items.set(letters(&["a", "c"]));
            assert_eq!(dom.text_content(container), "ac");
            assert_eq!(list.stats().removed, 1);
            assert_eq!(list.len(), 2);
        });
    }

    #[test]
    fn indexed_list_updates_items_in_place() {
        Runtime::new().run(|| {
            let dom = Arc::new(MemoryDom::new());
            let reconciler = Reconciler::new(dom.clone());
            let container = dom.create_element("ol");
            let items = Signal::new(vec![1, 2, 3]);
            let list = KeyedList::indexed(
                {
                    let items = items.clone();
                    move || items.get()
                },
                |n| VNode::dynamic_text(move || n.get().to_string()),
            );
            let mut view = VNode::list(list.clone());
            reconciler.mount(&mut view, container, None).unwrap();
            dom.reset_ops();

            items.set(vec![3, 2, 1]);
            assert_eq!(dom.text_content(container), "321");
            assert_eq!(dom.ops().nodes_created(), 0);
            assert_eq!(dom.ops().moves, 0);
            assert_eq!(dom.ops().text_updates, 2);
        });
    }

    #[test]
    fn unmount_disposes_the_list() {
        Runtime::new().run(|| {
            let items = Signal::new(letters(&["a", "b"]));
            let (dom, container, list, mut view) = mounted(&items);
            let reconciler = Reconciler::new(dom.clone());

            reconciler.unmount(&mut view);
            assert_eq!(dom.child_count(container), 0);
            assert_eq!(items.subscriber_count(), 0);
            assert!(list.is_empty());
        });
    }
}
