//! Host Operations Contract
//!
//! The reconciler never touches a concrete backend; every physical
//! mutation goes through [`HostOps`]. Host node handles are opaque to the
//! core - they are created by the host, threaded through vnodes, and
//! handed back to host operations, but never inspected.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::reactive::Value;

/// An opaque handle to a host backend node.
///
/// The core only clones handles and compares them by identity; the host
/// downcasts them back to its concrete node type.
#[derive(Clone)]
pub struct HostNode(Rc<dyn Any>);

impl HostNode {
    pub fn new<T: 'static>(node: T) -> Self {
        Self(Rc::new(node))
    }

    pub fn from_rc<T: 'static>(node: Rc<T>) -> Self {
        Self(node)
    }

    /// Recover the host's concrete node type.
    pub fn downcast<T: 'static>(&self) -> Option<Rc<T>> {
        Rc::clone(&self.0).downcast::<T>().ok()
    }
}

impl PartialEq for HostNode {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for HostNode {}

impl fmt::Debug for HostNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostNode({:p})", Rc::as_ptr(&self.0))
    }
}

/// The operations a host backend supplies to the reconciler.
pub trait HostOps {
    /// Insert `el` into `parent`, before `anchor` (append when `None`).
    fn insert(&self, el: &HostNode, parent: &HostNode, anchor: Option<&HostNode>);

    /// Detach `el` from its parent.
    fn remove(&self, el: &HostNode);

    fn create_element(&self, tag: &str) -> HostNode;

    fn create_text(&self, text: &str) -> HostNode;

    fn create_comment(&self, text: &str) -> HostNode;

    /// Update the text of a text node.
    fn set_text(&self, node: &HostNode, text: &str);

    /// Replace an element's entire text content.
    fn set_element_text(&self, el: &HostNode, text: &str);

    fn parent_node(&self, node: &HostNode) -> Option<HostNode>;

    fn next_sibling(&self, node: &HostNode) -> Option<HostNode>;

    /// Apply one property given its old and new values. `None` means the
    /// property is absent on that side.
    fn patch_prop(&self, el: &HostNode, key: &str, prev: Option<&Value>, next: Option<&Value>);

    /// Insert pre-rendered static content, returning its first and last
    /// nodes. Hosts with a batch path override this; the default inserts
    /// one text node.
    fn insert_static_content(
        &self,
        content: &str,
        parent: &HostNode,
        anchor: Option<&HostNode>,
    ) -> (HostNode, HostNode) {
        let node = self.create_text(content);
        self.insert(&node, parent, anchor);
        (node.clone(), node)
    }
}
