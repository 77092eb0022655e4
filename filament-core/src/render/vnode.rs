//! Virtual Nodes
//!
//! A [`VNode`] describes a piece of UI: a text leaf, an element with props
//! and children, a fragment, or a keyed list. Reactive values are tagged
//! explicitly with [`MaybeReactive::Dynamic`] instead of being guessed from
//! their type, so the reconciler knows exactly which props need a binding.
//!
//! Once mounted, a VNode also records its live host node, one effect per
//! reactive prop or text, and its listener handles. [`Reconciler::patch`]
//! moves that live state from the old tree into the new one.
//!
//! [`Reconciler::patch`]: super::Reconciler::patch

use std::any::Any;
use std::sync::Arc;

use indexmap::IndexMap;

use super::dom::{DomEvent, EventHandler, ListenerId, NodeRef};
use super::reconciler::Reconciler;
use crate::error::RenderResult;
use crate::reactive::{Effect, Memo, ReadSignal, Signal};

/// A value that is either fixed or recomputed reactively.
pub enum MaybeReactive<T> {
    Static(T),
    Dynamic(Arc<dyn Fn() -> T + Send + Sync>),
}

impl<T: Clone> MaybeReactive<T> {
    pub fn dynamic(f: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self::Dynamic(Arc::new(f))
    }

    pub fn is_reactive(&self) -> bool {
        matches!(self, Self::Dynamic(_))
    }

    /// The current value. Reads inside a dynamic value are tracked.
    pub fn get(&self) -> T {
        match self {
            Self::Static(value) => value.clone(),
            Self::Dynamic(f) => f(),
        }
    }
}

impl<T: PartialEq> MaybeReactive<T> {
    /// Equal statics, or the same reactive closure.
    pub fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Static(a), Self::Static(b)) => a == b,
            (Self::Dynamic(a), Self::Dynamic(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl<T: Clone> Clone for MaybeReactive<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Static(value) => Self::Static(value.clone()),
            Self::Dynamic(f) => Self::Dynamic(Arc::clone(f)),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for MaybeReactive<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(value) => f.debug_tuple("Static").field(value).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

impl From<&str> for MaybeReactive<String> {
    fn from(value: &str) -> Self {
        Self::Static(value.to_string())
    }
}

impl From<String> for MaybeReactive<String> {
    fn from(value: String) -> Self {
        Self::Static(value)
    }
}

impl From<Signal<String>> for MaybeReactive<String> {
    fn from(signal: Signal<String>) -> Self {
        Self::dynamic(move || signal.get())
    }
}

impl From<ReadSignal<String>> for MaybeReactive<String> {
    fn from(signal: ReadSignal<String>) -> Self {
        Self::dynamic(move || signal.get())
    }
}

impl From<Memo<String>> for MaybeReactive<String> {
    fn from(memo: Memo<String>) -> Self {
        Self::dynamic(move || memo.get())
    }
}

/// An element prop.
#[derive(Clone)]
pub enum Prop {
    Attr(MaybeReactive<String>),
    Event(EventHandler),
}

impl std::fmt::Debug for Prop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Attr(value) => f.debug_tuple("Attr").field(value).finish(),
            Self::Event(_) => f.write_str("Event(..)"),
        }
    }
}

/// A list region rendered by the reconciler but diffed by its own logic.
///
/// Implemented by [`KeyedList`](super::KeyedList).
pub trait ListNode: Send + Sync + 'static {
    /// Mount the list before `anchor`. Returns the list's end marker.
    fn mount(&self, reconciler: &Reconciler, parent: NodeRef, anchor: Option<NodeRef>) -> RenderResult<NodeRef>;

    /// Claim already rendered items starting at `cursor`, then the end marker.
    fn hydrate(&self, reconciler: &Reconciler, parent: NodeRef, cursor: &mut Option<NodeRef>) -> RenderResult<NodeRef>;

    /// Dispose every item. With `detach`, also remove their nodes.
    fn unmount(&self, reconciler: &Reconciler, detach: bool);

    /// Every live root in document order, ending with the end marker.
    fn roots(&self, reconciler: &Reconciler) -> Vec<NodeRef>;

    fn first_root(&self, reconciler: &Reconciler) -> Option<NodeRef>;

    /// Take over the live state of `old` if it is the same kind of list.
    fn adopt(&self, reconciler: &Reconciler, old: &dyn ListNode) -> RenderResult<bool>;

    fn as_any(&self) -> &dyn Any;
}

/// The shape of a virtual node.
pub enum VNodeKind {
    Text(MaybeReactive<String>),
    Element {
        tag: String,
        props: IndexMap<String, Prop>,
        children: Vec<VNode>,
    },
    /// A marker followed by the children, flattened into the parent.
    Fragment(Vec<VNode>),
    List(Arc<dyn ListNode>),
}

impl VNodeKind {
    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Text(_) => "text".to_string(),
            Self::Element { tag, .. } => format!("<{tag}>"),
            Self::Fragment(_) => "fragment marker".to_string(),
            Self::List(_) => "list".to_string(),
        }
    }
}

/// A node in the virtual tree.
pub struct VNode {
    pub(crate) kind: VNodeKind,
    pub(crate) live: Option<NodeRef>,
    pub(crate) bindings: IndexMap<String, Effect>,
    pub(crate) listeners: IndexMap<String, ListenerId>,
}

/// Binding key of a reactive text leaf.
pub(crate) const TEXT_BINDING: &str = "#text";

impl VNode {
    fn from_kind(kind: VNodeKind) -> Self {
        Self {
            kind,
            live: None,
            bindings: IndexMap::new(),
            listeners: IndexMap::new(),
        }
    }

    pub fn text(value: impl Into<MaybeReactive<String>>) -> Self {
        Self::from_kind(VNodeKind::Text(value.into()))
    }

    /// A text leaf kept in sync with `f`.
    pub fn dynamic_text(f: impl Fn() -> String + Send + Sync + 'static) -> Self {
        Self::from_kind(VNodeKind::Text(MaybeReactive::dynamic(f)))
    }

    pub fn element(tag: impl Into<String>) -> Self {
        Self::from_kind(VNodeKind::Element {
            tag: tag.into(),
            props: IndexMap::new(),
            children: Vec::new(),
        })
    }

    pub fn fragment(children: impl IntoIterator<Item = VNode>) -> Self {
        Self::from_kind(VNodeKind::Fragment(children.into_iter().collect()))
    }

    pub fn list(list: impl ListNode) -> Self {
        Self::from_kind(VNodeKind::List(Arc::new(list)))
    }

    /// Set an attribute. Ignored on anything but elements.
    pub fn attr(self, name: impl Into<String>, value: impl Into<MaybeReactive<String>>) -> Self {
        self.prop(name, Prop::Attr(value.into()))
    }

    /// Attach an event handler. Ignored on anything but elements.
    pub fn on(self, event: impl Into<String>, handler: impl Fn(&DomEvent) + Send + Sync + 'static) -> Self {
        self.prop(event, Prop::Event(Arc::new(handler)))
    }

    pub fn prop(mut self, name: impl Into<String>, prop: Prop) -> Self {
        if let VNodeKind::Element { props, .. } = &mut self.kind {
            props.insert(name.into(), prop);
        }
        self
    }

    pub fn child(mut self, child: VNode) -> Self {
        match &mut self.kind {
            VNodeKind::Element { children, .. } | VNodeKind::Fragment(children) => children.push(child),
            _ => {}
        }
        self
    }

    pub fn children(self, children: impl IntoIterator<Item = VNode>) -> Self {
        children.into_iter().fold(self, VNode::child)
    }

    pub fn kind(&self) -> &VNodeKind {
        &self.kind
    }

    /// The live handle: the node for text and elements, the marker for
    /// fragments, the end marker for lists.
    pub fn live(&self) -> Option<NodeRef> {
        self.live
    }

    pub fn is_mounted(&self) -> bool {
        self.live.is_some()
    }

    /// Number of reactive bindings attached to this node (not its children).
    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }
}

impl std::fmt::Debug for VNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("VNode");
        match &self.kind {
            VNodeKind::Text(text) => s.field("text", text),
            VNodeKind::Element { tag, props, children } => {
                s.field("tag", tag).field("props", props).field("children", children)
            }
            VNodeKind::Fragment(children) => s.field("fragment", children),
            VNodeKind::List(_) => s.field("list", &".."),
        };
        s.field("live", &self.live).finish()
    }
}
