//! Host DOM Abstraction
//!
//! The reconciler never touches a concrete DOM. It drives a [`DomBackend`],
//! which hands out opaque [`NodeRef`] handles and performs the handful of
//! mutations the reconciler needs: create, set text/attribute, attach and
//! detach listeners, ordered insertion, removal, and sibling navigation.
//!
//! [`MemoryDom`] is the in-process backend used for server rendering and
//! tests. It keeps an arena of nodes, counts every mutation in [`DomOps`],
//! and serializes subtrees to HTML.
//!
//! Detached nodes stay in the arena. Like a browser DOM, a removed node can
//! be inserted again later.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::error::DomError;

/// Opaque handle to a live host node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef(u64);

impl NodeRef {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Handle for a registered event listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// What a host node is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKind {
    Element(String),
    Text,
    /// A comment node used as a stable position marker.
    Marker,
}

impl std::fmt::Display for HostKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Element(tag) => write!(f, "<{tag}>"),
            Self::Text => f.write_str("text"),
            Self::Marker => f.write_str("marker"),
        }
    }
}

/// An event delivered to a listener.
#[derive(Debug, Clone)]
pub struct DomEvent {
    pub name: String,
    pub target: NodeRef,
}

pub type EventHandler = Arc<dyn Fn(&DomEvent) + Send + Sync>;

/// The host operations the reconciler needs.
pub trait DomBackend: Send + Sync {
    fn create_element(&self, tag: &str) -> NodeRef;
    fn create_text(&self, text: &str) -> NodeRef;
    fn create_marker(&self, label: &str) -> NodeRef;

    fn set_text(&self, node: NodeRef, text: &str) -> Result<(), DomError>;
    fn set_attribute(&self, node: NodeRef, name: &str, value: &str) -> Result<(), DomError>;
    fn remove_attribute(&self, node: NodeRef, name: &str) -> Result<(), DomError>;

    fn add_listener(&self, node: NodeRef, event: &str, handler: EventHandler) -> Result<ListenerId, DomError>;
    fn remove_listener(&self, node: NodeRef, listener: ListenerId) -> Result<(), DomError>;

    /// Insert `child` into `parent` before `anchor`, or last if `anchor` is
    /// `None`. A child that is already attached somewhere is moved.
    fn insert_before(&self, parent: NodeRef, child: NodeRef, anchor: Option<NodeRef>) -> Result<(), DomError>;

    /// Detach `node` from its parent. Detaching a detached node is a no-op.
    fn remove(&self, node: NodeRef) -> Result<(), DomError>;

    fn parent(&self, node: NodeRef) -> Option<NodeRef>;
    fn next_sibling(&self, node: NodeRef) -> Option<NodeRef>;
    fn first_child(&self, node: NodeRef) -> Option<NodeRef>;
    fn children(&self, node: NodeRef) -> Vec<NodeRef>;
    fn kind(&self, node: NodeRef) -> Option<HostKind>;
}

/// Mutation counters of a [`MemoryDom`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DomOps {
    pub elements_created: usize,
    pub texts_created: usize,
    pub markers_created: usize,
    /// Insertions of nodes that had no parent.
    pub inserts: usize,
    /// Insertions of nodes that were already attached.
    pub moves: usize,
    pub removals: usize,
    pub text_updates: usize,
    pub attribute_updates: usize,
}

impl DomOps {
    pub fn nodes_created(&self) -> usize {
        self.elements_created + self.texts_created + self.markers_created
    }
}

struct HostNode {
    kind: HostKind,
    text: String,
    attributes: IndexMap<String, String>,
    listeners: IndexMap<ListenerId, (String, EventHandler)>,
    parent: Option<NodeRef>,
    children: Vec<NodeRef>,
}

impl HostNode {
    fn new(kind: HostKind, text: &str) -> Self {
        Self {
            kind,
            text: text.to_string(),
            attributes: IndexMap::new(),
            listeners: IndexMap::new(),
            parent: None,
            children: Vec::new(),
        }
    }
}

#[derive(Default)]
struct Arena {
    nodes: Vec<HostNode>,
    ops: DomOps,
}

impl Arena {
    fn get(&self, node: NodeRef) -> Result<&HostNode, DomError> {
        self.nodes.get(node.0 as usize).ok_or(DomError::UnknownNode(node))
    }

    fn get_mut(&mut self, node: NodeRef) -> Result<&mut HostNode, DomError> {
        self.nodes.get_mut(node.0 as usize).ok_or(DomError::UnknownNode(node))
    }

    fn push(&mut self, node: HostNode) -> NodeRef {
        self.nodes.push(node);
        NodeRef(self.nodes.len() as u64 - 1)
    }

    fn detach(&mut self, node: NodeRef) -> Result<bool, DomError> {
        let Some(parent) = self.get(node)?.parent else {
            return Ok(false);
        };
        self.get_mut(parent)?.children.retain(|c| *c != node);
        self.get_mut(node)?.parent = None;
        Ok(true)
    }

    fn write_html(&self, node: NodeRef, out: &mut String) {
        let Ok(host) = self.get(node) else {
            return;
        };
        match &host.kind {
            HostKind::Text => out.push_str(&escape(&host.text, false)),
            HostKind::Marker => {
                let _ = write!(out, "<!--{}-->", host.text);
            }
            HostKind::Element(tag) => {
                let _ = write!(out, "<{tag}");
                for (name, value) in &host.attributes {
                    let _ = write!(out, " {name}=\"{}\"", escape(value, true));
                }
                out.push('>');
                for child in &host.children {
                    self.write_html(*child, out);
                }
                let _ = write!(out, "</{tag}>");
            }
        }
    }

    fn write_text(&self, node: NodeRef, out: &mut String) {
        let Ok(host) = self.get(node) else {
            return;
        };
        match host.kind {
            HostKind::Text => out.push_str(&host.text),
            HostKind::Marker => {}
            HostKind::Element(_) => {
                for child in &host.children {
                    self.write_text(*child, out);
                }
            }
        }
    }
}

fn escape(text: &str, attribute: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

/// An in-memory DOM.
///
/// # Example
///
/// ```rust
/// use filament_core::render::{DomBackend, MemoryDom};
///
/// let dom = MemoryDom::new();
/// let root = dom.create_element("ul");
/// let item = dom.create_element("li");
/// let text = dom.create_text("one");
/// dom.insert_before(item, text, None).unwrap();
/// dom.insert_before(root, item, None).unwrap();
/// assert_eq!(dom.outer_html(root), "<ul><li>one</li></ul>");
/// ```
#[derive(Default)]
pub struct MemoryDom {
    arena: Mutex<Arena>,
}

impl MemoryDom {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> DomOps {
        self.arena.lock().ops
    }

    pub fn reset_ops(&self) {
        self.arena.lock().ops = DomOps::default();
    }

    /// Serialize `node` and its subtree.
    pub fn outer_html(&self, node: NodeRef) -> String {
        let mut out = String::new();
        self.arena.lock().write_html(node, &mut out);
        out
    }

    /// Serialize the children of `node`.
    pub fn inner_html(&self, node: NodeRef) -> String {
        let arena = self.arena.lock();
        let mut out = String::new();
        if let Ok(host) = arena.get(node) {
            for child in &host.children {
                arena.write_html(*child, &mut out);
            }
        }
        out
    }

    /// Concatenated text of every text node under `node`.
    pub fn text_content(&self, node: NodeRef) -> String {
        let mut out = String::new();
        self.arena.lock().write_text(node, &mut out);
        out
    }

    /// The text of a text or marker node.
    pub fn text(&self, node: NodeRef) -> Option<String> {
        self.arena.lock().get(node).ok().map(|host| host.text.clone())
    }

    pub fn attribute(&self, node: NodeRef, name: &str) -> Option<String> {
        self.arena
            .lock()
            .get(node)
            .ok()
            .and_then(|host| host.attributes.get(name).cloned())
    }

    pub fn child_count(&self, node: NodeRef) -> usize {
        self.arena.lock().get(node).map_or(0, |host| host.children.len())
    }

    pub fn listener_count(&self, node: NodeRef) -> usize {
        self.arena.lock().get(node).map_or(0, |host| host.listeners.len())
    }

    /// Invoke every listener for `event` on `node`. Returns how many ran.
    ///
    /// Handlers run without the arena locked, so they may mutate the DOM.
    pub fn dispatch(&self, node: NodeRef, event: &str) -> usize {
        let handlers: Vec<EventHandler> = match self.arena.lock().get(node) {
            Ok(host) => host
                .listeners
                .values()
                .filter(|(name, _)| name == event)
                .map(|(_, handler)| handler.clone())
                .collect(),
            Err(_) => return 0,
        };
        let payload = DomEvent {
            name: event.to_string(),
            target: node,
        };
        for handler in &handlers {
            handler(&payload);
        }
        handlers.len()
    }
}

impl DomBackend for MemoryDom {
    fn create_element(&self, tag: &str) -> NodeRef {
        let mut arena = self.arena.lock();
        arena.ops.elements_created += 1;
        arena.push(HostNode::new(HostKind::Element(tag.to_string()), ""))
    }

    fn create_text(&self, text: &str) -> NodeRef {
        let mut arena = self.arena.lock();
        arena.ops.texts_created += 1;
        arena.push(HostNode::new(HostKind::Text, text))
    }

    fn create_marker(&self, label: &str) -> NodeRef {
        let mut arena = self.arena.lock();
        arena.ops.markers_created += 1;
        arena.push(HostNode::new(HostKind::Marker, label))
    }

    fn set_text(&self, node: NodeRef, text: &str) -> Result<(), DomError> {
        let mut arena = self.arena.lock();
        let host = arena.get_mut(node)?;
        if matches!(host.kind, HostKind::Element(_)) {
            return Err(DomError::WrongKind { node, what: "text" });
        }
        host.text = text.to_string();
        arena.ops.text_updates += 1;
        Ok(())
    }

    fn set_attribute(&self, node: NodeRef, name: &str, value: &str) -> Result<(), DomError> {
        let mut arena = self.arena.lock();
        let host = arena.get_mut(node)?;
        if !matches!(host.kind, HostKind::Element(_)) {
            return Err(DomError::WrongKind { node, what: "attributes" });
        }
        host.attributes.insert(name.to_string(), value.to_string());
        arena.ops.attribute_updates += 1;
        Ok(())
    }

    fn remove_attribute(&self, node: NodeRef, name: &str) -> Result<(), DomError> {
        let mut arena = self.arena.lock();
        if arena.get_mut(node)?.attributes.shift_remove(name).is_some() {
            arena.ops.attribute_updates += 1;
        }
        Ok(())
    }

    fn add_listener(&self, node: NodeRef, event: &str, handler: EventHandler) -> Result<ListenerId, DomError> {
        let mut arena = self.arena.lock();
        let host = arena.get_mut(node)?;
        if !matches!(host.kind, HostKind::Element(_)) {
            return Err(DomError::WrongKind { node, what: "listeners" });
        }
        let id = ListenerId::new();
        host.listeners.insert(id, (event.to_string(), handler));
        Ok(id)
    }

    fn remove_listener(&self, node: NodeRef, listener: ListenerId) -> Result<(), DomError> {
        self.arena.lock().get_mut(node)?.listeners.shift_remove(&listener);
        Ok(())
    }

    fn insert_before(&self, parent: NodeRef, child: NodeRef, anchor: Option<NodeRef>) -> Result<(), DomError> {
        if anchor == Some(child) {
            return Ok(());
        }
        let mut arena = self.arena.lock();
        if !matches!(arena.get(parent)?.kind, HostKind::Element(_)) {
            return Err(DomError::WrongKind { node: parent, what: "children" });
        }
        arena.get(child)?;
        if let Some(anchor) = anchor {
            if arena.get(anchor)?.parent != Some(parent) {
                return Err(DomError::NotAChild { parent, child: anchor });
            }
        }

        let moved = arena.detach(child)?;
        let position = match anchor {
            Some(anchor) => arena
                .get(parent)?
                .children
                .iter()
                .position(|c| *c == anchor)
                .ok_or(DomError::NotAChild { parent, child: anchor })?,
            None => arena.get(parent)?.children.len(),
        };
        arena.get_mut(parent)?.children.insert(position, child);
        arena.get_mut(child)?.parent = Some(parent);
        if moved {
            arena.ops.moves += 1;
        } else {
            arena.ops.inserts += 1;
        }
        Ok(())
    }

    fn remove(&self, node: NodeRef) -> Result<(), DomError> {
        let mut arena = self.arena.lock();
        if arena.detach(node)? {
            arena.ops.removals += 1;
        }
        Ok(())
    }

    fn parent(&self, node: NodeRef) -> Option<NodeRef> {
        self.arena.lock().get(node).ok().and_then(|host| host.parent)
    }

    fn next_sibling(&self, node: NodeRef) -> Option<NodeRef> {
        let arena = self.arena.lock();
        let parent = arena.get(node).ok()?.parent?;
        let siblings = &arena.get(parent).ok()?.children;
        let index = siblings.iter().position(|c| *c == node)?;
        siblings.get(index + 1).copied()
    }

    fn first_child(&self, node: NodeRef) -> Option<NodeRef> {
        self.arena.lock().get(node).ok()?.children.first().copied()
    }

    fn children(&self, node: NodeRef) -> Vec<NodeRef> {
        self.arena
            .lock()
            .get(node)
            .map(|host| host.children.clone())
            .unwrap_or_default()
    }

    fn kind(&self, node: NodeRef) -> Option<HostKind> {
        self.arena.lock().get(node).ok().map(|host| host.kind.clone())
    }
}

impl std::fmt::Debug for MemoryDom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let arena = self.arena.lock();
        f.debug_struct("MemoryDom")
            .field("nodes", &arena.nodes.len())
            .field("ops", &arena.ops)
            .finish()
    }
}
