//! Recording host backend for reconciler tests.
//!
//! Models a real node tree (parents, ordered children, anchors) so that
//! anchor-based insertion and sibling queries behave like an actual
//! backend, and records every operation the reconciler performs.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use trellis_core::reactive::Value;
use trellis_core::render::{HostNode, HostOps};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestNodeKind {
    Element,
    Text,
    Comment,
}

pub struct TestNode {
    pub id: usize,
    pub kind: TestNodeKind,
    pub tag: String,
    pub text: RefCell<String>,
    children: RefCell<Vec<Rc<TestNode>>>,
    parent: RefCell<Weak<TestNode>>,
}

impl TestNode {
    /// Short label used in tree snapshots.
    pub fn label(&self) -> String {
        match self.kind {
            TestNodeKind::Element => self.tag.clone(),
            TestNodeKind::Text => format!("text:{}", self.text.borrow()),
            TestNodeKind::Comment => format!("comment:{}", self.text.borrow()),
        }
    }
}

/// One recorded host operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostOp {
    CreateElement(String),
    CreateText(String),
    CreateComment(String),
    /// First attachment of a node.
    Insert { node: usize },
    /// Re-attachment of a node that already had a parent.
    Move { node: usize },
    Remove { node: usize },
    SetText { node: usize, text: String },
    SetElementText { node: usize, text: String },
    PatchProp { node: usize, key: String },
}

pub struct RecordingHost {
    next_id: Cell<usize>,
    ops: RefCell<Vec<HostOp>>,
}

impl RecordingHost {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            next_id: Cell::new(0),
            ops: RefCell::new(Vec::new()),
        })
    }

    fn make_node(&self, kind: TestNodeKind, tag: &str, text: &str) -> Rc<TestNode> {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        Rc::new(TestNode {
            id,
            kind,
            tag: tag.to_string(),
            text: RefCell::new(text.to_string()),
            children: RefCell::new(Vec::new()),
            parent: RefCell::new(Weak::new()),
        })
    }

    /// A detached element usable as a render root or teleport target.
    pub fn create_container(&self, tag: &str) -> HostNode {
        HostNode::from_rc(self.make_node(TestNodeKind::Element, tag, ""))
    }

    pub fn ops(&self) -> Vec<HostOp> {
        self.ops.borrow().clone()
    }

    pub fn clear_ops(&self) {
        self.ops.borrow_mut().clear();
    }

    pub fn op_count(&self) -> usize {
        self.ops.borrow().len()
    }

    pub fn count_moves(&self) -> usize {
        self.ops
            .borrow()
            .iter()
            .filter(|op| matches!(op, HostOp::Move { .. }))
            .count()
    }

    pub fn count_removes(&self) -> usize {
        self.ops
            .borrow()
            .iter()
            .filter(|op| matches!(op, HostOp::Remove { .. }))
            .count()
    }

    pub fn count_creates(&self) -> usize {
        self.ops
            .borrow()
            .iter()
            .filter(|op| {
                matches!(
                    op,
                    HostOp::CreateElement(_) | HostOp::CreateText(_) | HostOp::CreateComment(_)
                )
            })
            .count()
    }

    /// Labels of a container's children, anchors (empty text nodes)
    /// filtered out.
    pub fn children_labels(&self, container: &HostNode) -> Vec<String> {
        node_of(container)
            .children
            .borrow()
            .iter()
            .filter(|child| {
                !(child.kind == TestNodeKind::Text && child.text.borrow().is_empty())
                    && child.kind != TestNodeKind::Comment
            })
            .map(|child| child.label())
            .collect()
    }

    /// Text content of a container's element children, in order.
    pub fn child_texts(&self, container: &HostNode) -> Vec<String> {
        node_of(container)
            .children
            .borrow()
            .iter()
            .filter(|child| child.kind == TestNodeKind::Element)
            .map(|child| child.text.borrow().clone())
            .collect()
    }

    /// Labels of all children, placeholders included.
    pub fn raw_children_labels(&self, container: &HostNode) -> Vec<String> {
        node_of(container)
            .children
            .borrow()
            .iter()
            .map(|child| child.label())
            .collect()
    }

    fn record(&self, op: HostOp) {
        self.ops.borrow_mut().push(op);
    }

    fn detach(&self, node: &Rc<TestNode>) -> bool {
        let parent = node.parent.borrow().upgrade();
        if let Some(parent) = parent {
            parent
                .children
                .borrow_mut()
                .retain(|child| !Rc::ptr_eq(child, node));
            *node.parent.borrow_mut() = Weak::new();
            true
        } else {
            false
        }
    }
}

pub fn node_of(handle: &HostNode) -> Rc<TestNode> {
    handle
        .downcast::<TestNode>()
        .expect("host handle is not a TestNode")
}

impl HostOps for RecordingHost {
    fn insert(&self, el: &HostNode, parent: &HostNode, anchor: Option<&HostNode>) {
        let el = node_of(el);
        let parent = node_of(parent);

        let was_attached = self.detach(&el);

        let mut children = parent.children.borrow_mut();
        let index = match anchor {
            Some(anchor) => {
                let anchor = node_of(anchor);
                children
                    .iter()
                    .position(|child| Rc::ptr_eq(child, &anchor))
                    .expect("anchor is not a child of the target parent")
            }
            None => children.len(),
        };
        children.insert(index, Rc::clone(&el));
        *el.parent.borrow_mut() = Rc::downgrade(&parent);

        if was_attached {
            self.record(HostOp::Move { node: el.id });
        } else {
            self.record(HostOp::Insert { node: el.id });
        }
    }

    fn remove(&self, el: &HostNode) {
        let el = node_of(el);
        self.detach(&el);
        self.record(HostOp::Remove { node: el.id });
    }

    fn create_element(&self, tag: &str) -> HostNode {
        self.record(HostOp::CreateElement(tag.to_string()));
        HostNode::from_rc(self.make_node(TestNodeKind::Element, tag, ""))
    }

    fn create_text(&self, text: &str) -> HostNode {
        self.record(HostOp::CreateText(text.to_string()));
        HostNode::from_rc(self.make_node(TestNodeKind::Text, "", text))
    }

    fn create_comment(&self, text: &str) -> HostNode {
        self.record(HostOp::CreateComment(text.to_string()));
        HostNode::from_rc(self.make_node(TestNodeKind::Comment, "", text))
    }

    fn set_text(&self, node: &HostNode, text: &str) {
        let node = node_of(node);
        *node.text.borrow_mut() = text.to_string();
        self.record(HostOp::SetText {
            node: node.id,
            text: text.to_string(),
        });
    }

    fn set_element_text(&self, el: &HostNode, text: &str) {
        let el = node_of(el);
        el.children.borrow_mut().clear();
        *el.text.borrow_mut() = text.to_string();
        self.record(HostOp::SetElementText {
            node: el.id,
            text: text.to_string(),
        });
    }

    fn parent_node(&self, node: &HostNode) -> Option<HostNode> {
        node_of(node)
            .parent
            .borrow()
            .upgrade()
            .map(HostNode::from_rc)
    }

    fn next_sibling(&self, node: &HostNode) -> Option<HostNode> {
        let node = node_of(node);
        let parent = node.parent.borrow().upgrade()?;
        let children = parent.children.borrow();
        let index = children.iter().position(|child| Rc::ptr_eq(child, &node))?;
        children.get(index + 1).map(|n| HostNode::from_rc(Rc::clone(n)))
    }

    fn patch_prop(&self, el: &HostNode, key: &str, _prev: Option<&Value>, _next: Option<&Value>) {
        self.record(HostOp::PatchProp {
            node: node_of(el).id,
            key: key.to_string(),
        });
    }
}
