//! Reconciler
//!
//! Maps a [`VNode`] tree onto live host nodes and keeps it up to date.
//!
//! # Lifecycle
//!
//! Every subtree goes `Unmounted -> Mounted -> (Patched)* -> Unmounted`.
//!
//! - [`Reconciler::mount`] creates host nodes, applies static props, wires
//!   one effect per reactive prop or text, and inserts before an anchor.
//! - [`Reconciler::patch`] moves the live state of an old tree into a new
//!   one. Same-kind nodes are updated in place: props are diffed key by key
//!   and children positionally. A different kind or tag replaces the whole
//!   subtree. Keyed lists diff themselves.
//! - [`Reconciler::unmount`] disposes bindings and detaches the subtree's
//!   roots. Nodes nested inside a detached element are not detached one by
//!   one.
//!
//! # Bindings
//!
//! A binding is an [`Effect`] created under the stable owner that is current
//! when the node is mounted (see [`Owner::stable`]). A tree mounted or
//! patched from inside an effect therefore keeps its bindings when that
//! effect re-runs; they go away with the tree or with the enclosing owner.
//! DOM failures inside a binding are logged, not raised, since there is no
//! caller to return them to.

use std::sync::Arc;

use indexmap::IndexMap;

use super::dom::{DomBackend, HostKind, ListenerId, NodeRef};
use super::vnode::{MaybeReactive, Prop, VNode, VNodeKind, TEXT_BINDING};
use crate::error::{HydrationError, RenderError, RenderResult};
use crate::reactive::{Effect, Owner};

/// Drives a [`DomBackend`] from virtual nodes. Cloning shares the backend.
#[derive(Clone)]
pub struct Reconciler {
    dom: Arc<dyn DomBackend>,
}

impl Reconciler {
    pub fn new(dom: Arc<dyn DomBackend>) -> Self {
        Self { dom }
    }

    pub fn dom(&self) -> &Arc<dyn DomBackend> {
        &self.dom
    }

    // ------------------------------------------------------------------
    // Mount
    // ------------------------------------------------------------------

    /// Mount `node` into `container` before `anchor` (last if `None`).
    ///
    /// Returns the live handle. Mounting a mounted node is a no-op.
    pub fn mount(&self, node: &mut VNode, container: NodeRef, anchor: Option<NodeRef>) -> RenderResult<NodeRef> {
        if let Some(live) = node.live {
            tracing::warn!(node = ?live, "mount called on a mounted vnode");
            return Ok(live);
        }
        let live = match &mut node.kind {
            VNodeKind::Text(text) => {
                let host = self.dom.create_text(&text.initial_text());
                if let MaybeReactive::Dynamic(f) = text {
                    let binding = self.bind_text(host, f.clone())?;
                    node.bindings.insert(TEXT_BINDING.to_string(), binding);
                }
                self.dom.insert_before(container, host, anchor)?;
                host
            }
            VNodeKind::Element { tag, props, children } => {
                let host = self.dom.create_element(tag);
                for (name, prop) in props.iter() {
                    self.apply_prop(host, name, prop, &mut node.bindings, &mut node.listeners)?;
                }
                for child in children.iter_mut() {
                    self.mount(child, host, None)?;
                }
                self.dom.insert_before(container, host, anchor)?;
                host
            }
            VNodeKind::Fragment(children) => {
                let marker = self.dom.create_marker("fragment");
                self.dom.insert_before(container, marker, anchor)?;
                for child in children.iter_mut() {
                    self.mount(child, container, anchor)?;
                }
                marker
            }
            VNodeKind::List(list) => list.mount(self, container, anchor)?,
        };
        node.live = Some(live);
        tracing::debug!(node = ?live, kind = %node.kind.describe(), "mounted");
        Ok(live)
    }

    fn bind_text(&self, host: NodeRef, text: Arc<dyn Fn() -> String + Send + Sync>) -> RenderResult<Effect> {
        let dom = Arc::clone(&self.dom);
        let effect = Owner::current().stable().run_in(|| {
            Effect::try_new(move || {
                let value = text();
                if let Err(err) = dom.set_text(host, &value) {
                    tracing::error!(node = ?host, error = %err, "failed to update text");
                }
            })
        })?;
        Ok(effect)
    }

    fn bind_attribute(
        &self,
        host: NodeRef,
        name: &str,
        value: Arc<dyn Fn() -> String + Send + Sync>,
    ) -> RenderResult<Effect> {
        let dom = Arc::clone(&self.dom);
        let name = name.to_string();
        let effect = Owner::current().stable().run_in(|| {
            Effect::try_new(move || {
                let value = value();
                if let Err(err) = dom.set_attribute(host, &name, &value) {
                    tracing::error!(node = ?host, attribute = %name, error = %err, "failed to update attribute");
                }
            })
        })?;
        Ok(effect)
    }

    fn apply_prop(
        &self,
        host: NodeRef,
        name: &str,
        prop: &Prop,
        bindings: &mut IndexMap<String, Effect>,
        listeners: &mut IndexMap<String, ListenerId>,
    ) -> RenderResult<()> {
        match prop {
            Prop::Attr(MaybeReactive::Static(value)) => self.dom.set_attribute(host, name, value)?,
            Prop::Attr(MaybeReactive::Dynamic(f)) => {
                let binding = self.bind_attribute(host, name, f.clone())?;
                bindings.insert(name.to_string(), binding);
            }
            Prop::Event(handler) => {
                let id = self.dom.add_listener(host, name, handler.clone())?;
                listeners.insert(name.to_string(), id);
            }
        }
        Ok(())
    }

    /// Undo one prop on a live element.
    fn clear_prop(
        &self,
        host: NodeRef,
        name: &str,
        prop: &Prop,
        bindings: &mut IndexMap<String, Effect>,
        listeners: &mut IndexMap<String, ListenerId>,
    ) -> RenderResult<()> {
        match prop {
            Prop::Attr(_) => {
                if let Some(binding) = bindings.shift_remove(name) {
                    binding.dispose();
                }
                self.dom.remove_attribute(host, name)?;
            }
            Prop::Event(_) => {
                if let Some(id) = listeners.shift_remove(name) {
                    self.dom.remove_listener(host, id)?;
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Patch
    // ------------------------------------------------------------------

    /// Bring the live tree of `old` in line with `new`.
    ///
    /// Afterwards `new` holds the live state and `old` is left unmounted
    /// with nothing to dispose. `container` is used when `old` is not
    /// mounted, in which case `new` is mounted before `anchor`.
    pub fn patch(
        &self,
        old: &mut VNode,
        new: &mut VNode,
        container: NodeRef,
        anchor: Option<NodeRef>,
    ) -> RenderResult<Option<NodeRef>> {
        let Some(live) = old.live else {
            return self.mount(new, container, anchor).map(Some);
        };
        if new.live.is_some() {
            tracing::warn!(node = ?new.live, "patch target is already mounted; leaving it");
            return Ok(new.live);
        }

        let same_kind = match (&old.kind, &new.kind) {
            (VNodeKind::Text(_), VNodeKind::Text(_)) => true,
            (VNodeKind::Element { tag: a, .. }, VNodeKind::Element { tag: b, .. }) => a == b,
            (VNodeKind::Fragment(_), VNodeKind::Fragment(_)) => true,
            (VNodeKind::List(a), VNodeKind::List(b)) => Arc::ptr_eq(a, b) || b.adopt(self, a.as_ref())?,
            _ => false,
        };
        if !same_kind {
            return self.replace(old, new, container).map(Some);
        }

        new.live = old.live.take();
        match (&mut old.kind, &mut new.kind) {
            (VNodeKind::Text(before), VNodeKind::Text(after)) => {
                if before.same(after) && bound(&old.bindings, TEXT_BINDING) {
                    new.bindings = std::mem::take(&mut old.bindings);
                } else {
                    dispose_bindings(&mut old.bindings);
                    match after {
                        MaybeReactive::Static(text) => self.dom.set_text(live, text)?,
                        MaybeReactive::Dynamic(f) => {
                            let binding = self.bind_text(live, f.clone())?;
                            new.bindings.insert(TEXT_BINDING.to_string(), binding);
                        }
                    }
                }
            }
            (
                VNodeKind::Element {
                    props: old_props,
                    children: old_children,
                    ..
                },
                VNodeKind::Element {
                    props: new_props,
                    children: new_children,
                    ..
                },
            ) => {
                let mut bindings = std::mem::take(&mut old.bindings);
                let mut listeners = std::mem::take(&mut old.listeners);

                for (name, prop) in old_props.iter() {
                    if !new_props.contains_key(name) {
                        self.clear_prop(live, name, prop, &mut bindings, &mut listeners)?;
                    }
                }
                for (name, after) in new_props.iter() {
                    match old_props.get(name) {
                        Some(Prop::Attr(before))
                            if matches!(after, Prop::Attr(a) if a.same(before)) && bound(&bindings, name) => {}
                        Some(Prop::Event(before)) if matches!(after, Prop::Event(a) if Arc::ptr_eq(a, before)) => {}
                        Some(Prop::Attr(_)) if matches!(after, Prop::Attr(_)) => {
                            if let Some(binding) = bindings.shift_remove(name) {
                                binding.dispose();
                            }
                            self.apply_prop(live, name, after, &mut bindings, &mut listeners)?;
                        }
                        Some(before) => {
                            self.clear_prop(live, name, before, &mut bindings, &mut listeners)?;
                            self.apply_prop(live, name, after, &mut bindings, &mut listeners)?;
                        }
                        None => self.apply_prop(live, name, after, &mut bindings, &mut listeners)?,
                    }
                }
                new.bindings = bindings;
                new.listeners = listeners;

                self.patch_children(old_children, new_children, live, None)?;
            }
            (VNodeKind::Fragment(old_children), VNodeKind::Fragment(new_children)) => {
                let parent = self.dom.parent(live).unwrap_or(container);
                let last = old_children
                    .iter()
                    .rev()
                    .find_map(|child| self.roots(child).last().copied())
                    .unwrap_or(live);
                let tail = self.dom.next_sibling(last);
                self.patch_children(old_children, new_children, parent, tail)?;
            }
            (VNodeKind::List(_), VNodeKind::List(_)) => {}
            _ => unreachable!("kinds were checked above"),
        }
        tracing::debug!(node = ?live, kind = %new.kind.describe(), "patched");
        Ok(new.live)
    }

    fn replace(&self, old: &mut VNode, new: &mut VNode, container: NodeRef) -> RenderResult<NodeRef> {
        let anchor = self.first_root(old);
        let parent = anchor.and_then(|a| self.dom.parent(a)).unwrap_or(container);
        tracing::debug!(from = %old.kind.describe(), to = %new.kind.describe(), "replacing subtree");
        let live = self.mount(new, parent, anchor)?;
        self.teardown(old, true);
        Ok(live)
    }

    /// Positional child diff: pairs are patched, extra old children are
    /// unmounted, extra new children are mounted before `tail`.
    fn patch_children(
        &self,
        old: &mut [VNode],
        new: &mut [VNode],
        parent: NodeRef,
        tail: Option<NodeRef>,
    ) -> RenderResult<()> {
        let shared = old.len().min(new.len());
        for (before, after) in old.iter_mut().zip(new.iter_mut()) {
            self.patch(before, after, parent, tail)?;
        }
        for extra in old[shared..].iter_mut() {
            self.teardown(extra, true);
        }
        for extra in new[shared..].iter_mut() {
            self.mount(extra, parent, tail)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Unmount
    // ------------------------------------------------------------------

    /// Dispose every binding under `node` and detach its roots.
    pub fn unmount(&self, node: &mut VNode) {
        self.teardown(node, true);
    }

    pub(crate) fn teardown(&self, node: &mut VNode, detach: bool) {
        dispose_bindings(&mut node.bindings);
        let live = node.live.take();
        let listeners = std::mem::take(&mut node.listeners);
        if let Some(host) = live {
            for (_, id) in listeners {
                if let Err(err) = self.dom.remove_listener(host, id) {
                    tracing::warn!(node = ?host, error = %err, "failed to remove listener");
                }
            }
        }

        match &mut node.kind {
            VNodeKind::Text(_) => self.detach(live, detach),
            VNodeKind::Element { children, .. } => {
                for child in children.iter_mut() {
                    self.teardown(child, false);
                }
                self.detach(live, detach);
            }
            VNodeKind::Fragment(children) => {
                for child in children.iter_mut() {
                    self.teardown(child, detach);
                }
                self.detach(live, detach);
            }
            VNodeKind::List(list) => {
                if live.is_some() {
                    list.unmount(self, detach);
                }
            }
        }
    }

    fn detach(&self, node: Option<NodeRef>, detach: bool) {
        let Some(node) = node.filter(|_| detach) else {
            return;
        };
        if let Err(err) = self.dom.remove(node) {
            tracing::warn!(node = ?node, error = %err, "failed to detach node");
        }
    }

    // ------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------

    /// The host nodes `node` contributes to its parent, in order.
    pub fn roots(&self, node: &VNode) -> Vec<NodeRef> {
        let Some(live) = node.live else {
            return Vec::new();
        };
        match &node.kind {
            VNodeKind::Text(_) | VNodeKind::Element { .. } => vec![live],
            VNodeKind::Fragment(children) => {
                let mut roots = vec![live];
                for child in children {
                    roots.extend(self.roots(child));
                }
                roots
            }
            VNodeKind::List(list) => list.roots(self),
        }
    }

    pub fn first_root(&self, node: &VNode) -> Option<NodeRef> {
        match &node.kind {
            VNodeKind::List(list) if node.live.is_some() => list.first_root(self),
            _ => node.live,
        }
    }

    // ------------------------------------------------------------------
    // Hydration
    // ------------------------------------------------------------------

    /// Attach `node` to markup already inside `container` without creating
    /// nodes. Every child of `container` must be claimed.
    pub fn hydrate(&self, node: &mut VNode, container: NodeRef) -> RenderResult<NodeRef> {
        let mut cursor = self.dom.first_child(container);
        let live = self.hydrate_node(node, container, &mut cursor)?;
        if let Some(extra) = cursor {
            return Err(mismatch("end of container", self.describe_host(Some(extra))));
        }
        Ok(live)
    }

    /// [`Reconciler::hydrate`], falling back to clearing `container` and
    /// mounting fresh on a mismatch.
    pub fn hydrate_or_mount(&self, node: &mut VNode, container: NodeRef) -> RenderResult<NodeRef> {
        match self.hydrate(node, container) {
            Ok(live) => Ok(live),
            Err(RenderError::Hydration(err)) => {
                tracing::warn!(error = %err, "hydration failed; mounting fresh");
                self.teardown(node, false);
                for child in self.dom.children(container) {
                    self.dom.remove(child)?;
                }
                self.mount(node, container, None)
            }
            Err(err) => Err(err),
        }
    }

    pub(crate) fn hydrate_node(
        &self,
        node: &mut VNode,
        parent: NodeRef,
        cursor: &mut Option<NodeRef>,
    ) -> RenderResult<NodeRef> {
        let live = match &mut node.kind {
            VNodeKind::Text(text) => {
                let host = self.claim(cursor, |kind| matches!(kind, HostKind::Text), || "text".to_string())?;
                node.live = Some(host);
                match text {
                    MaybeReactive::Static(value) => self.dom.set_text(host, value)?,
                    MaybeReactive::Dynamic(f) => {
                        let binding = self.bind_text(host, f.clone())?;
                        node.bindings.insert(TEXT_BINDING.to_string(), binding);
                    }
                }
                host
            }
            VNodeKind::Element { tag, props, children } => {
                let host = self.claim(
                    cursor,
                    |kind| matches!(kind, HostKind::Element(t) if t.as_str() == tag.as_str()),
                    || format!("<{tag}>"),
                )?;
                node.live = Some(host);
                for (name, prop) in props.iter() {
                    self.apply_prop(host, name, prop, &mut node.bindings, &mut node.listeners)?;
                }
                let mut inner = self.dom.first_child(host);
                for child in children.iter_mut() {
                    self.hydrate_node(child, host, &mut inner)?;
                }
                if let Some(extra) = inner {
                    return Err(mismatch(format!("end of <{tag}>"), self.describe_host(Some(extra))));
                }
                host
            }
            VNodeKind::Fragment(children) => {
                let marker = self.claim(cursor, |kind| matches!(kind, HostKind::Marker), || {
                    "fragment marker".to_string()
                })?;
                node.live = Some(marker);
                for child in children.iter_mut() {
                    self.hydrate_node(child, parent, cursor)?;
                }
                marker
            }
            VNodeKind::List(list) => {
                let end = list.hydrate(self, parent, cursor)?;
                node.live = Some(end);
                end
            }
        };
        Ok(live)
    }

    /// Take the node at `cursor` if it has the expected kind.
    pub(crate) fn claim(
        &self,
        cursor: &mut Option<NodeRef>,
        accepts: impl Fn(&HostKind) -> bool,
        expected: impl Fn() -> String,
    ) -> RenderResult<NodeRef> {
        let found = *cursor;
        match found.and_then(|node| self.dom.kind(node)) {
            Some(kind) if accepts(&kind) => {
                let node = found.ok_or_else(|| mismatch(expected(), "nothing"))?;
                *cursor = self.dom.next_sibling(node);
                Ok(node)
            }
            _ => Err(mismatch(expected(), self.describe_host(found))),
        }
    }

    fn describe_host(&self, node: Option<NodeRef>) -> String {
        match node.and_then(|n| self.dom.kind(n)) {
            Some(kind) => kind.to_string(),
            None => "nothing".to_string(),
        }
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler").finish_non_exhaustive()
    }
}

/// False when `name` has a binding that was disposed out from under the
/// tree. Unbound (static) props count as bound.
fn bound(bindings: &IndexMap<String, Effect>, name: &str) -> bool {
    bindings.get(name).map_or(true, |binding| !binding.is_disposed())
}

fn dispose_bindings(bindings: &mut IndexMap<String, Effect>) {
    for (_, binding) in bindings.drain(..) {
        binding.dispose();
    }
}

fn mismatch(expected: impl Into<String>, found: impl Into<String>) -> RenderError {
    HydrationError::Mismatch {
        expected: expected.into(),
        found: found.into(),
    }
    .into()
}

impl MaybeReactive<String> {
    /// The initial text a node is created with. Dynamic text starts empty
    /// and is filled in by its binding's first run.
    fn initial_text(&self) -> String {
        match self {
            Self::Static(value) => value.clone(),
            Self::Dynamic(_) => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Runtime, Signal};
    use crate::render::{DomOps, MemoryDom};

    fn setup() -> (Arc<MemoryDom>, Reconciler, NodeRef) {
        let dom = Arc::new(MemoryDom::new());
        let reconciler = Reconciler::new(dom.clone());
        let container = dom.create_element("main");
        (dom, reconciler, container)
    }

    #[test]
    fn mount_inserts_before_anchor() {
        let (dom, reconciler, container) = setup();
        let mut last = VNode::text("c");
        let end = reconciler.mount(&mut last, container, None).unwrap();
        let mut first = VNode::element("b").child(VNode::text("x"));
        reconciler.mount(&mut first, container, Some(end)).unwrap();

        assert_eq!(dom.inner_html(container), "<b>x</b>c");
    }

    #[test]
    fn reactive_text_tracks_its_signal() {
        Runtime::new().run(|| {
            let (dom, reconciler, container) = setup();
            let name = Signal::new("ada".to_string());
            let mut node = VNode::element("p").child(VNode::text(name.clone()));
            reconciler.mount(&mut node, container, None).unwrap();
            assert_eq!(dom.text_content(container), "ada");

            name.set("grace".into());
            assert_eq!(dom.text_content(container), "grace");

            reconciler.unmount(&mut node);
            assert_eq!(name.subscriber_count(), 0);
            assert_eq!(dom.child_count(container), 0);
        });
    }

    #[test]
    fn fragment_mounts_marker_then_children() {
        let (dom, reconciler, container) = setup();
        let mut node = VNode::fragment([VNode::text("a"), VNode::text("b")]);
        let marker = reconciler.mount(&mut node, container, None).unwrap();

        assert_eq!(dom.children(container).first(), Some(&marker));
        assert_eq!(dom.inner_html(container), "<!--fragment-->ab");
        assert_eq!(reconciler.roots(&node).len(), 3);

        reconciler.unmount(&mut node);
        assert_eq!(dom.child_count(container), 0);
    }

    #[test]
    fn patch_with_identical_tree_touches_nothing() {
        let (dom, reconciler, container) = setup();
        let view = || VNode::element("div").attr("id", "a").child(VNode::text("x"));
        let mut old = view();
        reconciler.mount(&mut old, container, None).unwrap();
        dom.reset_ops();

        let mut new = view();
        reconciler.patch(&mut old, &mut new, container, None).unwrap();
        assert_eq!(dom.ops(), DomOps::default());
        assert!(new.is_mounted());
        assert!(!old.is_mounted());
    }

    #[test]
    fn changed_tag_replaces_in_place() {
        let (dom, reconciler, container) = setup();
        let mut old = VNode::fragment([VNode::element("span"), VNode::text("tail")]);
        reconciler.mount(&mut old, container, None).unwrap();

        let mut new = VNode::fragment([VNode::element("em"), VNode::text("tail")]);
        reconciler.patch(&mut old, &mut new, container, None).unwrap();
        assert_eq!(dom.inner_html(container), "<!--fragment--><em></em>tail");
    }

    #[test]
    fn props_are_diffed_key_by_key() {
        let (dom, reconciler, container) = setup();
        let mut old = VNode::element("a").attr("href", "/one").attr("title", "t");
        let live = reconciler.mount(&mut old, container, None).unwrap();
        dom.reset_ops();

        let mut new = VNode::element("a").attr("href", "/two").attr("rel", "next");
        reconciler.patch(&mut old, &mut new, container, None).unwrap();

        assert_eq!(dom.attribute(live, "href").as_deref(), Some("/two"));
        assert_eq!(dom.attribute(live, "title"), None);
        assert_eq!(dom.attribute(live, "rel").as_deref(), Some("next"));
        assert_eq!(dom.ops().nodes_created(), 0);
    }

    #[test]
    fn trailing_children_are_added_and_removed() {
        let (dom, reconciler, container) = setup();
        let mut old = VNode::element("ul").children([VNode::text("1"), VNode::text("2"), VNode::text("3")]);
        reconciler.mount(&mut old, container, None).unwrap();

        let mut shorter = VNode::element("ul").child(VNode::text("1"));
        reconciler.patch(&mut old, &mut shorter, container, None).unwrap();
        assert_eq!(dom.text_content(container), "1");

        let mut longer = VNode::element("ul").children([VNode::text("1"), VNode::text("4")]);
        reconciler.patch(&mut shorter, &mut longer, container, None).unwrap();
        assert_eq!(dom.text_content(container), "14");
    }
}
