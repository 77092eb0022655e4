//! Error types shared across the reactive core and the reconciler.

use thiserror::Error;

use crate::graph::NodeId;
use crate::render::NodeRef;

/// What kind of computation tripped a re-run limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputationKind {
    Effect,
    Computed,
}

impl std::fmt::Display for ComputationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Effect => f.write_str("effect"),
            Self::Computed => f.write_str("computed"),
        }
    }
}

/// Faults raised while propagating a change through the graph.
#[derive(Debug, Clone, Error)]
pub enum ReactiveError {
    /// An effect kept re-triggering itself, or a computed kept being
    /// re-entered, past the configured cap.
    #[error("circular {kind} {node:?}: still dirty after {limit} runs")]
    DependencyCycle {
        node: NodeId,
        kind: ComputationKind,
        limit: usize,
    },

    /// A subscriber panicked while being notified. The source's subscriber
    /// table has been cleared.
    #[error("subscriber of {source_node:?} panicked: {message}")]
    SubscriberFault { source_node: NodeId, message: String },

    /// A keyed signal was requested with a different value type than the
    /// one it was created with.
    #[error("keyed signal {key:?} holds a different type than {expected}")]
    KeyedTypeMismatch { key: String, expected: &'static str },
}

/// Failures reported by a [`DomBackend`](crate::render::DomBackend).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomError {
    #[error("unknown node {0:?}")]
    UnknownNode(NodeRef),

    #[error("{child:?} is not a child of {parent:?}")]
    NotAChild { parent: NodeRef, child: NodeRef },

    #[error("{node:?} cannot hold {what}")]
    WrongKind { node: NodeRef, what: &'static str },
}

/// Failures while seeding or claiming server-rendered state.
#[derive(Debug, Error)]
pub enum HydrationError {
    #[error("hydration payload version {found} does not match runtime version {expected}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("hydration mismatch: expected {expected}, found {found}")]
    Mismatch { expected: String, found: String },

    #[error("failed to decode hydration payload: {0}")]
    Decode(String),

    #[error("failed to encode hydration payload: {0}")]
    Encode(String),
}

impl From<serde_json::Error> for HydrationError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for HydrationError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for HydrationError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Encode(err.to_string())
    }
}

/// Anything the reconciler can fail with.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Reactive(#[from] ReactiveError),

    #[error(transparent)]
    Dom(#[from] DomError),

    #[error(transparent)]
    Hydration(#[from] HydrationError),
}

pub type RenderResult<T> = std::result::Result<T, RenderError>;

/// Turn a caught panic payload back into a typed error.
///
/// Fatal errors raised through [`raise`] keep their type; any other panic
/// becomes a [`ReactiveError::SubscriberFault`] against `source_node`.
pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>, source_node: NodeId) -> ReactiveError {
    match payload.downcast::<ReactiveError>() {
        Ok(err) => *err,
        Err(payload) => {
            let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
                (*s).to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "non-string panic payload".to_string()
            };
            ReactiveError::SubscriberFault { source_node, message }
        }
    }
}

/// Unwind with a typed error so an enclosing `try_*` call can recover it.
pub(crate) fn raise(err: ReactiveError) -> ! {
    std::panic::panic_any(err)
}

/// Best-effort text for a panic payload, used when logging disposal faults.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(err) = payload.downcast_ref::<ReactiveError>() {
        err.to_string()
    } else if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
