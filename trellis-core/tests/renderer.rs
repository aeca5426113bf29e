//! Integration Tests for the Patch Engine
//!
//! These tests drive the reconciler against a recording host backend and
//! assert both the final tree shape and the exact host operations
//! performed - the move-minimization guarantees are about operation
//! counts, not just end states.

mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use common::{HostOp, RecordingHost};
use trellis_core::error::RuntimeError;
use trellis_core::reactive::{ObjRef, Value};
use trellis_core::render::{
    props, Children, ComponentDef, HostOps, Instance, PatchFlags, Props, Renderer, VKey,
    VNode, VNodeKind,
};
use trellis_core::scheduler::flush_jobs;

fn setup() -> (Rc<RecordingHost>, Rc<Renderer>, trellis_core::render::AppRoot) {
    let host = RecordingHost::new();
    let ops: Rc<dyn HostOps> = host.clone();
    let renderer = Renderer::new(ops);
    let container = host.create_container("root");
    let root = renderer.create_root(container);
    (host, renderer, root)
}

fn li(key: i64, text: &str) -> VNode {
    VNode::keyed_element("li", key, Props::new(), Children::text(text))
}

#[test]
fn mounts_a_simple_tree() {
    let (host, renderer, root) = setup();

    let tree = VNode::element(
        "div",
        props([("class", Value::str("box"))]),
        Children::Nodes(vec![VNode::text("hi")]),
    );
    renderer.render(Some(tree), &root);

    assert_eq!(host.children_labels(root.container()), vec!["div"]);
    assert!(host
        .ops()
        .iter()
        .any(|op| matches!(op, HostOp::PatchProp { key, .. } if key == "class")));
}

#[test]
fn identical_tree_patch_performs_zero_host_operations() {
    let (host, renderer, root) = setup();

    let tree = VNode::element(
        "div",
        Props::new(),
        Children::Nodes(vec![VNode::text("hi"), VNode::element("span", Props::new(), Children::None)]),
    );
    renderer.render(Some(tree.clone()), &root);

    host.clear_ops();
    renderer.render(Some(tree), &root);
    assert_eq!(host.op_count(), 0, "re-rendering the same tree must be free");
}

#[test]
fn keyed_swap_performs_exactly_one_move() {
    let (host, renderer, root) = setup();

    let t1 = VNode::fragment(vec![li(1, "a"), li(2, "b"), li(3, "c"), li(4, "d")]);
    renderer.render(Some(t1), &root);
    assert_eq!(host.child_texts(root.container()), vec!["a", "b", "c", "d"]);

    host.clear_ops();
    let t2 = VNode::fragment(vec![li(1, "a"), li(3, "c"), li(2, "b"), li(4, "d")]);
    renderer.render(Some(t2), &root);

    assert_eq!(host.child_texts(root.container()), vec!["a", "c", "b", "d"]);
    assert_eq!(host.count_moves(), 1, "swapping one pair needs one move");
    assert_eq!(host.count_creates(), 0);
    assert_eq!(host.count_removes(), 0);
}

#[test]
fn mixed_reorder_never_remounts() {
    let (host, renderer, root) = setup();

    // [text "a", li#1, li#2] -> [li#2, li#1, text "a"]
    let t1 = VNode::fragment(vec![VNode::text("a"), li(1, "one"), li(2, "two")]);
    renderer.render(Some(t1), &root);
    assert_eq!(
        host.children_labels(root.container()),
        vec!["text:a", "li", "li"]
    );

    host.clear_ops();
    let t2 = VNode::fragment(vec![li(2, "two"), li(1, "one"), VNode::text("a")]);
    renderer.render(Some(t2), &root);

    assert_eq!(
        host.children_labels(root.container()),
        vec!["li", "li", "text:a"]
    );
    assert_eq!(host.child_texts(root.container()), vec!["two", "one"]);
    assert_eq!(host.count_creates(), 0, "no node may be remounted");
    assert_eq!(host.count_removes(), 0, "no node may be unmounted");
    assert_eq!(host.count_moves(), 2, "two lis move; the text is the stable tail");
}

#[test]
fn keyed_diff_mounts_insertions_and_unmounts_removals() {
    let (host, renderer, root) = setup();

    let t1 = VNode::fragment(vec![li(1, "a"), li(2, "b"), li(3, "c")]);
    renderer.render(Some(t1), &root);

    host.clear_ops();
    // Drop #2, insert #4 in the middle.
    let t2 = VNode::fragment(vec![li(1, "a"), li(4, "d"), li(3, "c")]);
    renderer.render(Some(t2), &root);

    assert_eq!(host.child_texts(root.container()), vec!["a", "d", "c"]);
    assert_eq!(host.count_removes(), 1);
    assert_eq!(host.count_creates(), 1);
}

#[test]
fn unkeyed_children_patch_positionally() {
    let (host, renderer, root) = setup();

    let make = |texts: &[&str]| {
        VNode::new(
            VNodeKind::Fragment,
            None,
            Props::new(),
            Children::Nodes(texts.iter().map(|t| VNode::text(t)).collect()),
            PatchFlags::UNKEYED_FRAGMENT,
            None,
            None,
        )
    };

    renderer.render(Some(make(&["a", "b", "c"])), &root);
    host.clear_ops();

    renderer.render(Some(make(&["x", "b"])), &root);
    assert_eq!(
        host.children_labels(root.container()),
        vec!["text:x", "text:b"]
    );
    // One text update, one removal; position two is untouched.
    assert_eq!(host.count_removes(), 1);
    assert!(host
        .ops()
        .iter()
        .any(|op| matches!(op, HostOp::SetText { text, .. } if text == "x")));
}

#[test]
fn full_props_diff_adds_updates_and_removes() {
    let (host, renderer, root) = setup();

    let t1 = VNode::element(
        "div",
        props([("class", Value::str("a")), ("id", Value::str("x"))]),
        Children::None,
    );
    renderer.render(Some(t1), &root);
    host.clear_ops();

    let t2 = VNode::element(
        "div",
        props([("class", Value::str("b")), ("title", Value::str("t"))]),
        Children::None,
    );
    renderer.render(Some(t2), &root);

    let patched: Vec<&str> = host
        .ops()
        .iter()
        .filter_map(|op| match op {
            HostOp::PatchProp { key, .. } => Some(key.as_str()),
            _ => None,
        })
        .map(|k| match k {
            "class" => "class",
            "id" => "id",
            "title" => "title",
            other => panic!("unexpected prop patch: {other}"),
        })
        .collect();
    assert!(patched.contains(&"class"));
    assert!(patched.contains(&"id"), "removed props must be unset");
    assert!(patched.contains(&"title"));
}

#[test]
fn props_patch_flag_limits_diff_to_dynamic_keys() {
    let (host, renderer, root) = setup();

    let make = |class: &str, title: &str| {
        VNode::new(
            VNodeKind::Element(Rc::from("div")),
            None,
            props([("class", Value::str(class)), ("title", Value::str(title))]),
            Children::None,
            PatchFlags::PROPS,
            Some(vec![Rc::from("title")]),
            None,
        )
    };

    renderer.render(Some(make("a", "t1")), &root);
    host.clear_ops();

    // `class` changed too, but only `title` is declared dynamic.
    renderer.render(Some(make("b", "t2")), &root);
    let patched: Vec<String> = host
        .ops()
        .iter()
        .filter_map(|op| match op {
            HostOp::PatchProp { key, .. } => Some(key.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(patched, vec!["title".to_string()]);
}

#[test]
fn dynamic_children_block_skips_static_siblings() {
    let (host, renderer, root) = setup();

    let make = |static_text: &str, dynamic_text: &str| {
        let dynamic = VNode::text(dynamic_text);
        VNode::element_block(
            "div",
            Props::new(),
            Children::Nodes(vec![VNode::text(static_text), dynamic.clone()]),
            PatchFlags::empty(),
            vec![dynamic],
        )
    };

    renderer.render(Some(make("static", "n=0")), &root);
    host.clear_ops();

    // The static sibling's text differs, but only the recorded dynamic
    // child is walked.
    renderer.render(Some(make("static-stale", "n=1")), &root);
    let ops = host.ops();
    assert_eq!(ops.len(), 1, "block patch must touch only the dynamic child");
    assert!(matches!(&ops[0], HostOp::SetText { text, .. } if text == "n=1"));
}

#[test]
fn bail_flag_discards_block_metadata_and_forces_a_full_diff() {
    let (host, renderer, root) = setup();

    let make = |static_text: &str, dynamic_text: &str| {
        let dynamic = VNode::text(dynamic_text);
        VNode::element_block(
            "div",
            Props::new(),
            Children::Nodes(vec![VNode::text(static_text), dynamic.clone()]),
            PatchFlags::BAIL,
            vec![dynamic],
        )
    };

    renderer.render(Some(make("before", "n=0")), &root);
    host.clear_ops();

    // With BAIL set, the stale "static" sibling must be diffed too.
    renderer.render(Some(make("after", "n=1")), &root);
    assert!(host
        .ops()
        .iter()
        .any(|op| matches!(op, HostOp::SetText { text, .. } if text == "after")));
    assert!(host
        .ops()
        .iter()
        .any(|op| matches!(op, HostOp::SetText { text, .. } if text == "n=1")));
}

// ----------------------------------------------------------------------------
// Components
// ----------------------------------------------------------------------------

struct CounterHandles {
    state: Rc<RefCell<Option<ObjRef>>>,
    renders: Rc<Cell<i32>>,
}

fn counter_component() -> (Rc<ComponentDef>, CounterHandles) {
    let state_slot: Rc<RefCell<Option<ObjRef>>> = Rc::new(RefCell::new(None));
    let renders = Rc::new(Cell::new(0));

    let slot = Rc::clone(&state_slot);
    let render_count = Rc::clone(&renders);
    let def = ComponentDef::with_setup(
        "counter",
        move |instance: &Instance| {
            let state = instance.state();
            state.set("count", 0);
            *slot.borrow_mut() = Some(state);
        },
        move |instance: &Instance| {
            render_count.set(render_count.get() + 1);
            let count = instance.state().get("count");
            Ok(VNode::element(
                "div",
                Props::new(),
                Children::text(&format!("count={count:?}")),
            ))
        },
    );
    (def, CounterHandles { state: state_slot, renders })
}

#[test]
fn component_mounts_and_batches_updates_per_tick() {
    let (host, renderer, root) = setup();
    let (def, handles) = counter_component();

    renderer.render(Some(VNode::component(def, Props::new())), &root);
    assert_eq!(host.child_texts(root.container()), vec!["count=0"]);
    assert_eq!(handles.renders.get(), 1);

    let state = handles.state.borrow().clone().expect("setup ran");

    // Two same-tick mutations coalesce into one re-render.
    state.set("count", 1);
    state.set("count", 2);
    assert_eq!(handles.renders.get(), 1, "updates are deferred to the flush");

    flush_jobs();
    assert_eq!(handles.renders.get(), 2);
    assert_eq!(host.child_texts(root.container()), vec!["count=2"]);

    // A later tick flushes again.
    state.set("count", 3);
    flush_jobs();
    assert_eq!(handles.renders.get(), 3);
    assert_eq!(host.child_texts(root.container()), vec!["count=3"]);
}

#[test]
fn parent_update_flows_props_into_child_once() {
    let (host, renderer, root) = setup();

    let child_renders = Rc::new(Cell::new(0));
    let child_count = Rc::clone(&child_renders);
    let child = ComponentDef::with_declared_props(
        "label",
        &["label"],
        None::<fn(&Instance)>,
        move |instance: &Instance| {
            child_count.set(child_count.get() + 1);
            let label = instance.prop("label");
            Ok(VNode::element(
                "span",
                Props::new(),
                Children::text(&format!("{label:?}")),
            ))
        },
    );

    let parent_state: Rc<RefCell<Option<ObjRef>>> = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&parent_state);
    let child_def = Rc::clone(&child);
    let parent = ComponentDef::with_setup(
        "parent",
        move |instance: &Instance| {
            let state = instance.state();
            state.set("msg", "a");
            *slot.borrow_mut() = Some(state);
        },
        move |instance: &Instance| {
            let msg = instance.state().get("msg");
            Ok(VNode::component(
                Rc::clone(&child_def),
                props([("label", msg)]),
            ))
        },
    );

    renderer.render(Some(VNode::component(parent, Props::new())), &root);
    assert_eq!(host.child_texts(root.container()), vec!["\"a\""]);
    assert_eq!(child_renders.get(), 1);

    let state = parent_state.borrow().clone().expect("setup ran");
    state.set("msg", "b");
    flush_jobs();

    assert_eq!(host.child_texts(root.container()), vec!["\"b\""]);
    assert_eq!(child_renders.get(), 2, "child re-renders exactly once");
}

#[test]
fn unmount_stops_the_component_and_runs_teardown_hooks_detached() {
    let (host, renderer, root) = setup();

    let log: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let state_slot: Rc<RefCell<Option<ObjRef>>> = Rc::new(RefCell::new(None));
    let renders = Rc::new(Cell::new(0));

    let hook_log = Rc::clone(&log);
    let slot = Rc::clone(&state_slot);
    let render_count = Rc::clone(&renders);
    let host_probe = Rc::clone(&host);
    let container_probe = root.container().clone();
    let def = ComponentDef::with_setup(
        "ephemeral",
        move |instance: &Instance| {
            let state = instance.state();
            state.set("n", 0);
            *slot.borrow_mut() = Some(state);

            let mounted_log = Rc::clone(&hook_log);
            instance.on_mounted(move || mounted_log.borrow_mut().push("mounted".into()));

            let unmounted_log = Rc::clone(&hook_log);
            let host = Rc::clone(&host_probe);
            let container = container_probe.clone();
            instance.on_unmounted(move || {
                // Teardown hooks observe a fully detached tree.
                assert!(host.children_labels(&container).is_empty());
                unmounted_log.borrow_mut().push("unmounted".into());
            });
        },
        move |instance: &Instance| {
            render_count.set(render_count.get() + 1);
            let n = instance.state().get("n");
            Ok(VNode::element(
                "div",
                Props::new(),
                Children::text(&format!("{n:?}")),
            ))
        },
    );

    renderer.render(Some(VNode::component(def, Props::new())), &root);
    assert_eq!(*log.borrow(), vec!["mounted"]);

    renderer.render(None, &root);
    assert_eq!(*log.borrow(), vec!["mounted", "unmounted"]);
    assert!(host.children_labels(root.container()).is_empty());

    // The scope is stopped: further mutations re-render nothing.
    let state = state_slot.borrow().clone().expect("setup ran");
    let before = renders.get();
    state.set("n", 99);
    flush_jobs();
    assert_eq!(renders.get(), before);
}

#[test]
fn render_errors_route_to_the_handler_and_spare_siblings() {
    let (host, renderer, root) = setup();

    let errors: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&errors);
    renderer.set_error_handler(Rc::new(move |err: &RuntimeError| {
        sink.borrow_mut().push(err.to_string());
    }));

    let failing = ComponentDef::new("broken", |_| {
        Err(RuntimeError::Render {
            component: "broken".into(),
            message: "boom".into(),
        })
    });

    let tree = VNode::fragment(vec![
        VNode::component(failing, Props::new()),
        VNode::element("span", Props::new(), Children::text("ok")),
    ]);
    renderer.render(Some(tree), &root);

    assert_eq!(errors.borrow().len(), 1);
    assert!(errors.borrow()[0].contains("boom"));
    // The sibling mounted despite the failure.
    assert_eq!(host.children_labels(root.container()), vec!["span"]);
}

#[test]
fn teleport_renders_children_into_the_target() {
    let (host, renderer, root) = setup();
    let target = host.create_container("portal");

    let make = |text: &str| {
        VNode::fragment(vec![
            VNode::element("div", Props::new(), Children::text("main")),
            VNode::teleport(
                target.clone(),
                vec![VNode::element("p", Props::new(), Children::text(text))],
            ),
        ])
    };

    renderer.render(Some(make("tele")), &root);
    assert_eq!(host.children_labels(root.container()), vec!["div"]);
    assert_eq!(host.children_labels(&target), vec!["p"]);
    assert_eq!(host.child_texts(&target), vec!["tele"]);

    // Only the placeholder pair holds the teleport's spot in the main
    // tree.
    let raw = host.raw_children_labels(root.container());
    assert!(raw.contains(&"comment:teleport start".to_string()));
    assert!(raw.contains(&"comment:teleport end".to_string()));

    renderer.render(Some(make("tele2")), &root);
    assert_eq!(host.child_texts(&target), vec!["tele2"]);

    renderer.render(None, &root);
    assert!(host.children_labels(&target).is_empty());
    assert!(host.children_labels(root.container()).is_empty());
}

#[test]
fn a_keyed_fragment_moves_with_its_anchors_and_children() {
    let (host, renderer, root) = setup();

    let item = |t: &str| VNode::element("li", Props::new(), Children::text(t));
    let frag = |key: i64, a: &str, b: &str| {
        VNode::new(
            VNodeKind::Fragment,
            Some(VKey::Int(key)),
            Props::new(),
            Children::Nodes(vec![item(a), item(b)]),
            PatchFlags::empty(),
            None,
            None,
        )
    };

    let t1 = VNode::fragment(vec![frag(1, "a1", "a2"), frag(2, "b1", "b2")]);
    renderer.render(Some(t1), &root);
    assert_eq!(host.child_texts(root.container()), vec!["a1", "a2", "b1", "b2"]);

    host.clear_ops();
    let t2 = VNode::fragment(vec![frag(2, "b1", "b2"), frag(1, "a1", "a2")]);
    renderer.render(Some(t2), &root);

    assert_eq!(host.child_texts(root.container()), vec!["b1", "b2", "a1", "a2"]);
    assert_eq!(host.count_creates(), 0, "fragments relocate, never remount");
    assert_eq!(host.count_removes(), 0);
    // One fragment moves as a unit: both anchors plus both children.
    assert_eq!(host.count_moves(), 4);
}

#[test]
fn static_content_mounts_and_removes_as_a_unit() {
    let (host, renderer, root) = setup();

    let tree = VNode::fragment(vec![
        VNode::static_content("<b>hi</b>"),
        VNode::text("x"),
    ]);
    renderer.render(Some(tree), &root);
    assert_eq!(
        host.children_labels(root.container()),
        vec!["text:<b>hi</b>", "text:x"]
    );

    renderer.render(None, &root);
    assert!(host.children_labels(root.container()).is_empty());
}

#[test]
fn replacing_a_node_of_different_type_remounts_in_place() {
    let (host, renderer, root) = setup();

    let t1 = VNode::fragment(vec![
        VNode::element("div", Props::new(), Children::text("a")),
        VNode::element("span", Props::new(), Children::text("tail")),
    ]);
    renderer.render(Some(t1), &root);
    host.clear_ops();

    // div -> p at the same position; the span stays put.
    let t2 = VNode::fragment(vec![
        VNode::element("p", Props::new(), Children::text("a")),
        VNode::element("span", Props::new(), Children::text("tail")),
    ]);
    renderer.render(Some(t2), &root);

    assert_eq!(host.children_labels(root.container()), vec!["p", "span"]);
    assert_eq!(host.count_removes(), 1);
    assert_eq!(
        host.ops()
            .iter()
            .filter(|op| matches!(op, HostOp::CreateElement(tag) if tag == "p"))
            .count(),
        1
    );
}
