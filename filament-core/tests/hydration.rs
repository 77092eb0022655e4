//! Hydration Tests
//!
//! Server render, ship the payload, then attach a client to the same markup.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use filament_core::render::{render_into, DomBackend, KeyedList, MaybeReactive, MemoryDom, NodeRef, Reconciler, VNode};
use filament_core::{HydrationError, HydrationPayload, RenderError, Runtime, RuntimeConfig};

/// The todo view shared by server and client.
fn todo_view(clicks: Arc<AtomicUsize>) -> VNode {
    let title = Runtime::use_keyed("title", || "untitled".to_string()).unwrap();
    let todos = Runtime::use_keyed("todos", Vec::<String>::new).unwrap();

    VNode::element("section")
        .attr("data-title", MaybeReactive::from(title.clone()))
        .child(VNode::element("h1").child(VNode::text(title)))
        .child(
            VNode::element("ul").child(VNode::list(KeyedList::new(
                {
                    let todos = todos.clone();
                    move || todos.get()
                },
                |todo: &String| todo.clone(),
                |todo| VNode::element("li").child(VNode::text(todo)),
            ))),
        )
        .child(VNode::element("button").on("click", move |_| {
            clicks.fetch_add(1, Ordering::SeqCst);
        }))
}

/// Server-render the todo view into a fresh DOM.
fn server_render() -> (Arc<MemoryDom>, NodeRef, HydrationPayload) {
    let dom = Arc::new(MemoryDom::new());
    let container = dom.create_element("body");
    let payload = render_into(RuntimeConfig::default(), dom.clone(), container, || {
        let title = Runtime::use_keyed("title", || "untitled".to_string()).unwrap();
        let todos = Runtime::use_keyed("todos", Vec::<String>::new).unwrap();
        title.set("groceries".into());
        todos.set(vec!["milk".into(), "eggs".into()]);
        todo_view(Arc::new(AtomicUsize::new(0)))
    })
    .unwrap();
    (dom, container, payload)
}

#[test]
fn client_hydrates_without_creating_nodes() {
    let (dom, container, payload) = server_render();
    let html = dom.inner_html(container);
    assert!(html.contains("<h1>groceries</h1>"));
    assert!(html.contains("<li>milk</li><li>eggs</li>"));

    // Ship the payload as JSON, like a page would
    let payload = HydrationPayload::from_json(&payload.to_json().unwrap()).unwrap();

    let client = Runtime::new();
    let clicks = Arc::new(AtomicUsize::new(0));
    client.run(|| {
        assert_eq!(client.hydrate(&payload), 2);
        dom.reset_ops();

        let reconciler = Reconciler::new(dom.clone());
        let mut view = todo_view(clicks.clone());
        reconciler.hydrate(&mut view, container).unwrap();

        assert_eq!(dom.ops().nodes_created(), 0);
        assert_eq!(dom.inner_html(container), html);

        // Reactivity is live on the claimed nodes
        let todos = Runtime::use_keyed("todos", Vec::<String>::new).unwrap();
        todos.update(|t| {
            let mut t = t.clone();
            t.insert(0, "bread".into());
            t
        });
        assert!(dom.inner_html(container).contains("<li>bread</li><li>milk</li><li>eggs</li>"));
        assert_eq!(dom.ops().elements_created, 1);

        let title = Runtime::use_keyed("title", String::new).unwrap();
        title.set("errands".into());
        assert!(dom.inner_html(container).contains("<section data-title=\"errands\"><h1>errands</h1>"));

        let button = dom
            .children(dom.children(container)[0])
            .into_iter()
            .last()
            .unwrap();
        dom.dispatch(button, "click");
        assert_eq!(clicks.load(Ordering::SeqCst), 1);
    });
}

#[test]
fn msgpack_payload_seeds_the_client() {
    let (_, _, payload) = server_render();
    let bytes = payload.to_msgpack().unwrap();
    let payload = HydrationPayload::from_msgpack(&bytes).unwrap();

    let client = Runtime::new();
    client.hydrate(&payload);
    let todos = client.keyed_signal("todos", Vec::<String>::new).unwrap();
    assert_eq!(todos.get_untracked(), vec!["milk".to_string(), "eggs".to_string()]);
}

#[test]
fn mismatched_markup_falls_back_to_fresh_mount() {
    let (dom, container, payload) = server_render();

    let client = Runtime::new();
    client.run(|| {
        client.hydrate(&payload);
        let reconciler = Reconciler::new(dom.clone());

        let mut wrong = VNode::element("article").child(VNode::text("hello"));
        let err = reconciler.hydrate(&mut wrong, container).unwrap_err();
        assert!(matches!(err, RenderError::Hydration(HydrationError::Mismatch { .. })));

        let mut view = VNode::element("article").child(VNode::text("hello"));
        reconciler.hydrate_or_mount(&mut view, container).unwrap();
        assert_eq!(dom.inner_html(container), "<article>hello</article>");
    });
}

#[test]
fn extra_markup_is_a_mismatch() {
    let dom = Arc::new(MemoryDom::new());
    let container = dom.create_element("body");
    for text in ["a", "b"] {
        let node = dom.create_text(text);
        dom.insert_before(container, node, None).unwrap();
    }

    let reconciler = Reconciler::new(dom.clone());
    let mut view = VNode::text("a");
    assert!(matches!(
        reconciler.hydrate(&mut view, container),
        Err(RenderError::Hydration(HydrationError::Mismatch { .. }))
    ));

    reconciler.hydrate_or_mount(&mut view, container).unwrap();
    assert_eq!(dom.inner_html(container), "a");
}

#[test]
fn payload_from_another_version_is_ignored() {
    let (_, _, mut payload) = server_render();
    payload.version += 1;

    let client = Runtime::new();
    assert!(matches!(
        client.try_hydrate(&payload),
        Err(HydrationError::VersionMismatch { .. })
    ));
    assert_eq!(client.hydrate(&payload), 0);
    let title = client.keyed_signal("title", || "untitled".to_string()).unwrap();
    assert_eq!(title.get_untracked(), "untitled");
}
