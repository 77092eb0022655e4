//! Server Rendering
//!
//! A server render runs inside its own [`Runtime`], so concurrent requests
//! never share keyed signals or tracking state. The view is mounted once,
//! the keyed signals are snapshotted into a [`HydrationPayload`], and then
//! every reactive binding is disposed. The markup stays behind.

use std::sync::Arc;

use super::dom::{DomBackend, MemoryDom, NodeRef};
use super::reconciler::Reconciler;
use super::vnode::VNode;
use crate::config::RuntimeConfig;
use crate::error::RenderResult;
use crate::hydration::HydrationPayload;
use crate::reactive::{create_root, Runtime};

/// The result of [`render_to_string`].
#[derive(Debug, Clone)]
pub struct SsrOutput {
    pub html: String,
    pub payload: HydrationPayload,
}

/// Render `view` to HTML in a fresh runtime.
///
/// # Example
///
/// ```rust
/// use filament_core::render::{render_to_string, VNode};
/// use filament_core::{Runtime, RuntimeConfig};
///
/// let output = render_to_string(RuntimeConfig::default(), || {
///     let count = Runtime::use_keyed("count", || 3).unwrap();
///     VNode::element("p").child(VNode::dynamic_text(move || count.get().to_string()))
/// })
/// .unwrap();
///
/// assert_eq!(output.html, "<p>3</p>");
/// assert_eq!(output.payload.signals["count"], 3);
/// ```
pub fn render_to_string<F>(config: RuntimeConfig, view: F) -> RenderResult<SsrOutput>
where
    F: FnOnce() -> VNode,
{
    let dom = Arc::new(MemoryDom::new());
    let container = dom.create_element("body");
    let payload = render_into(config, dom.clone(), container, view)?;
    Ok(SsrOutput {
        html: dom.inner_html(container),
        payload,
    })
}

/// Render `view` into `container` in a fresh runtime and leave the markup
/// there, detached from any reactivity.
pub fn render_into<F>(
    config: RuntimeConfig,
    dom: Arc<dyn DomBackend>,
    container: NodeRef,
    view: F,
) -> RenderResult<HydrationPayload>
where
    F: FnOnce() -> VNode,
{
    let runtime = Runtime::with_config(config);
    runtime.run(|| {
        let (mounted, owner) = create_root(|_| {
            let mut node = view();
            Reconciler::new(dom).mount(&mut node, container, None).map(|_| node)
        });
        let payload = HydrationPayload::collect(&runtime);
        owner.dispose();
        runtime.dispose();

        let node = mounted?;
        tracing::debug!(
            kind = %node.kind().describe(),
            signals = payload.signals.len(),
            "server render finished"
        );
        Ok(payload)
    })
}
