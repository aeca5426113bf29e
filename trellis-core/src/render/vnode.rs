//! Virtual Tree Nodes
//!
//! A `VNode` is an immutable-per-render description of one rendered unit.
//! Handles are cheap to clone (reference-counted); the only fields the
//! reconciler mutates are the host-backend slots (`el`, `anchor`) and the
//! component-instance link, which are filled in as the node mounts.
//!
//! Two vnodes are "the same type" for diffing purposes iff their kind
//! discriminator matches (element tags compare by name, component
//! definitions by identity) and their keys match. Same-type pairs are
//! patched in place; everything else is replaced wholesale.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;
use indexmap::IndexMap;

use super::component::{ComponentDef, Instance};
use super::host::HostNode;
use crate::reactive::Value;

bitflags! {
    /// What a vnode is and what its children are.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ShapeFlags: u32 {
        const ELEMENT = 1;
        const FUNCTIONAL_COMPONENT = 1 << 1;
        const STATEFUL_COMPONENT = 1 << 2;
        const TEXT_CHILDREN = 1 << 3;
        const ARRAY_CHILDREN = 1 << 4;
        const TELEPORT = 1 << 6;
        const COMPONENT = Self::STATEFUL_COMPONENT.bits() | Self::FUNCTIONAL_COMPONENT.bits();
    }

    /// Compile-time knowledge about which parts of a vnode are dynamic,
    /// enabling targeted re-patching instead of a full diff.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PatchFlags: u32 {
        /// Dynamic text children only.
        const TEXT = 1;
        /// Dynamic `class` binding.
        const CLASS = 1 << 1;
        /// Dynamic `style` binding.
        const STYLE = 1 << 2;
        /// Dynamic non-class/style props, listed in `dynamic_props`.
        const PROPS = 1 << 3;
        /// Props with dynamic keys: every prop must be diffed.
        const FULL_PROPS = 1 << 4;
        /// Fragment whose children never change order.
        const STABLE_FRAGMENT = 1 << 6;
        /// Fragment with keyed (or partially keyed) children.
        const KEYED_FRAGMENT = 1 << 7;
        /// Fragment whose children are unkeyed.
        const UNKEYED_FRAGMENT = 1 << 8;
        /// Opt out of every optimization: force a full diff (set on
        /// hand-written or cloned trees with no compiler guarantees).
        const BAIL = 1 << 15;
    }
}

/// Identity key for list diffing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VKey {
    Int(i64),
    Str(Rc<str>),
}

impl From<i64> for VKey {
    fn from(key: i64) -> Self {
        VKey::Int(key)
    }
}

impl From<i32> for VKey {
    fn from(key: i32) -> Self {
        VKey::Int(key as i64)
    }
}

impl From<&str> for VKey {
    fn from(key: &str) -> Self {
        VKey::Str(Rc::from(key))
    }
}

/// The kind discriminator of a vnode.
#[derive(Clone)]
pub enum VNodeKind {
    Text,
    Comment,
    /// Pre-rendered static content, inserted as a unit.
    Static,
    Fragment,
    Element(Rc<str>),
    Component(Rc<ComponentDef>),
    /// Children render into the given host container; the node leaves
    /// only placeholder anchors in the main tree.
    Teleport(HostNode),
}

impl fmt::Debug for VNodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VNodeKind::Text => write!(f, "Text"),
            VNodeKind::Comment => write!(f, "Comment"),
            VNodeKind::Static => write!(f, "Static"),
            VNodeKind::Fragment => write!(f, "Fragment"),
            VNodeKind::Element(tag) => write!(f, "Element({tag})"),
            VNodeKind::Component(def) => {
                write!(f, "Component({})", def.name().unwrap_or("anonymous"))
            }
            VNodeKind::Teleport(_) => write!(f, "Teleport"),
        }
    }
}

/// A vnode's children.
#[derive(Clone)]
pub enum Children {
    None,
    Text(Rc<str>),
    Nodes(Vec<VNode>),
}

impl Children {
    pub fn text(s: &str) -> Self {
        Children::Text(Rc::from(s))
    }

    fn shape(&self) -> ShapeFlags {
        match self {
            Children::None => ShapeFlags::empty(),
            Children::Text(_) => ShapeFlags::TEXT_CHILDREN,
            Children::Nodes(_) => ShapeFlags::ARRAY_CHILDREN,
        }
    }
}

/// Property map carried by element and component vnodes.
pub type Props = IndexMap<Rc<str>, Value>;

/// Build a props map from key/value pairs.
pub fn props<const N: usize>(pairs: [(&str, Value); N]) -> Props {
    pairs
        .into_iter()
        .map(|(k, v)| (Rc::from(k), v))
        .collect()
}

struct VNodeInner {
    kind: VNodeKind,
    key: Option<VKey>,
    props: Props,
    /// Keys known dynamic at compile time, for `PatchFlags::PROPS`.
    dynamic_props: Option<Vec<Rc<str>>>,
    children: Children,
    patch_flag: PatchFlags,
    shape_flag: ShapeFlags,
    /// Dynamic descendants of a structurally stable subtree; when
    /// present, patching walks only these instead of diffing children.
    dynamic_children: Option<Vec<VNode>>,

    el: RefCell<Option<HostNode>>,
    /// Fragment end anchor, teleport end placeholder, or static end node.
    anchor: RefCell<Option<HostNode>>,
    component: RefCell<Option<Instance>>,
}

/// One node of the declarative tree. Cloning shares the node.
#[derive(Clone)]
pub struct VNode {
    inner: Rc<VNodeInner>,
}

impl VNode {
    /// Full-control constructor; the convenience constructors below cover
    /// the common shapes.
    pub fn new(
        kind: VNodeKind,
        key: Option<VKey>,
        props: Props,
        children: Children,
        patch_flag: PatchFlags,
        dynamic_props: Option<Vec<Rc<str>>>,
        dynamic_children: Option<Vec<VNode>>,
    ) -> Self {
        let base_shape = match &kind {
            VNodeKind::Element(_) => ShapeFlags::ELEMENT,
            VNodeKind::Component(_) => ShapeFlags::STATEFUL_COMPONENT,
            VNodeKind::Teleport(_) => ShapeFlags::TELEPORT,
            _ => ShapeFlags::empty(),
        };
        let shape_flag = base_shape | children.shape();
        Self {
            inner: Rc::new(VNodeInner {
                kind,
                key,
                props,
                dynamic_props,
                children,
                patch_flag,
                shape_flag,
                dynamic_children,
                el: RefCell::new(None),
                anchor: RefCell::new(None),
                component: RefCell::new(None),
            }),
        }
    }

    pub fn text(text: &str) -> Self {
        Self::new(
            VNodeKind::Text,
            None,
            Props::new(),
            Children::text(text),
            PatchFlags::empty(),
            None,
            None,
        )
    }

    pub fn comment(text: &str) -> Self {
        Self::new(
            VNodeKind::Comment,
            None,
            Props::new(),
            Children::text(text),
            PatchFlags::empty(),
            None,
            None,
        )
    }

    pub fn static_content(content: &str) -> Self {
        Self::new(
            VNodeKind::Static,
            None,
            Props::new(),
            Children::text(content),
            PatchFlags::empty(),
            None,
            None,
        )
    }

    pub fn element(tag: &str, props: Props, children: Children) -> Self {
        Self::new(
            VNodeKind::Element(Rc::from(tag)),
            None,
            props,
            children,
            PatchFlags::empty(),
            None,
            None,
        )
    }

    pub fn keyed_element(
        tag: &str,
        key: impl Into<VKey>,
        props: Props,
        children: Children,
    ) -> Self {
        Self::new(
            VNodeKind::Element(Rc::from(tag)),
            Some(key.into()),
            props,
            children,
            PatchFlags::empty(),
            None,
            None,
        )
    }

    /// An element whose subtree shape is statically stable: only the
    /// recorded dynamic descendants are walked when patching.
    pub fn element_block(
        tag: &str,
        props: Props,
        children: Children,
        patch_flag: PatchFlags,
        dynamic_children: Vec<VNode>,
    ) -> Self {
        Self::new(
            VNodeKind::Element(Rc::from(tag)),
            None,
            props,
            children,
            patch_flag,
            None,
            Some(dynamic_children),
        )
    }

    pub fn fragment(children: Vec<VNode>) -> Self {
        Self::new(
            VNodeKind::Fragment,
            None,
            Props::new(),
            Children::Nodes(children),
            PatchFlags::empty(),
            None,
            None,
        )
    }

    pub fn component(def: Rc<ComponentDef>, props: Props) -> Self {
        Self::new(
            VNodeKind::Component(def),
            None,
            props,
            Children::None,
            PatchFlags::empty(),
            None,
            None,
        )
    }

    pub fn keyed_component(
        def: Rc<ComponentDef>,
        key: impl Into<VKey>,
        props: Props,
    ) -> Self {
        Self::new(
            VNodeKind::Component(def),
            Some(key.into()),
            props,
            Children::None,
            PatchFlags::empty(),
            None,
            None,
        )
    }

    pub fn teleport(target: HostNode, children: Vec<VNode>) -> Self {
        Self::new(
            VNodeKind::Teleport(target),
            None,
            Props::new(),
            Children::Nodes(children),
            PatchFlags::empty(),
            None,
            None,
        )
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn kind(&self) -> &VNodeKind {
        &self.inner.kind
    }

    pub fn key(&self) -> Option<&VKey> {
        self.inner.key.as_ref()
    }

    pub fn props(&self) -> &Props {
        &self.inner.props
    }

    pub fn dynamic_props(&self) -> Option<&[Rc<str>]> {
        self.inner.dynamic_props.as_deref()
    }

    pub fn children(&self) -> &Children {
        &self.inner.children
    }

    /// Child nodes, empty for text/none children.
    pub fn child_nodes(&self) -> &[VNode] {
        match &self.inner.children {
            Children::Nodes(nodes) => nodes,
            _ => &[],
        }
    }

    /// Text content of text-like children.
    pub fn text_content(&self) -> Option<&str> {
        match &self.inner.children {
            Children::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn patch_flag(&self) -> PatchFlags {
        self.inner.patch_flag
    }

    pub fn shape_flag(&self) -> ShapeFlags {
        self.inner.shape_flag
    }

    pub fn dynamic_children(&self) -> Option<&[VNode]> {
        self.inner.dynamic_children.as_deref()
    }

    pub fn el(&self) -> Option<HostNode> {
        self.inner.el.borrow().clone()
    }

    pub fn set_el(&self, el: Option<HostNode>) {
        *self.inner.el.borrow_mut() = el;
    }

    pub fn anchor(&self) -> Option<HostNode> {
        self.inner.anchor.borrow().clone()
    }

    pub fn set_anchor(&self, anchor: Option<HostNode>) {
        *self.inner.anchor.borrow_mut() = anchor;
    }

    pub fn component_instance(&self) -> Option<Instance> {
        self.inner.component.borrow().clone()
    }

    pub fn set_component(&self, instance: Option<Instance>) {
        *self.inner.component.borrow_mut() = instance;
    }

    /// Whether two handles are the same node.
    pub fn same_node(&self, other: &VNode) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for VNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VNode")
            .field("kind", &self.inner.kind)
            .field("key", &self.inner.key)
            .field("shape", &self.inner.shape_flag)
            .finish()
    }
}

/// The same-type predicate governing patch-in-place vs. replace: kind
/// discriminator and key must both match.
pub fn is_same_vnode_type(n1: &VNode, n2: &VNode) -> bool {
    let kinds_match = match (n1.kind(), n2.kind()) {
        (VNodeKind::Text, VNodeKind::Text) => true,
        (VNodeKind::Comment, VNodeKind::Comment) => true,
        (VNodeKind::Static, VNodeKind::Static) => true,
        (VNodeKind::Fragment, VNodeKind::Fragment) => true,
        (VNodeKind::Element(a), VNodeKind::Element(b)) => a == b,
        (VNodeKind::Component(a), VNodeKind::Component(b)) => Rc::ptr_eq(a, b),
        (VNodeKind::Teleport(_), VNodeKind::Teleport(_)) => true,
        _ => false,
    };
    kinds_match && n1.key() == n2.key()
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::component::ComponentDef;

    #[test]
    fn shape_flags_follow_kind_and_children() {
        let el = VNode::element("div", Props::new(), Children::text("hi"));
        assert!(el.shape_flag().contains(ShapeFlags::ELEMENT));
        assert!(el.shape_flag().contains(ShapeFlags::TEXT_CHILDREN));

        let frag = VNode::fragment(vec![VNode::text("a")]);
        assert!(frag.shape_flag().contains(ShapeFlags::ARRAY_CHILDREN));
        assert!(!frag.shape_flag().contains(ShapeFlags::ELEMENT));
    }

    #[test]
    fn same_type_requires_matching_tag_and_key() {
        let a = VNode::keyed_element("li", 1, Props::new(), Children::None);
        let b = VNode::keyed_element("li", 1, Props::new(), Children::None);
        let c = VNode::keyed_element("li", 2, Props::new(), Children::None);
        let d = VNode::keyed_element("div", 1, Props::new(), Children::None);

        assert!(is_same_vnode_type(&a, &b));
        assert!(!is_same_vnode_type(&a, &c));
        assert!(!is_same_vnode_type(&a, &d));
        assert!(!is_same_vnode_type(&a, &VNode::text("li")));
    }

    #[test]
    fn component_identity_is_by_definition() {
        let def_a = ComponentDef::new("a", |_| Ok(VNode::text("a")));
        let def_b = ComponentDef::new("b", |_| Ok(VNode::text("b")));

        let n1 = VNode::component(Rc::clone(&def_a), Props::new());
        let n2 = VNode::component(Rc::clone(&def_a), Props::new());
        let n3 = VNode::component(def_b, Props::new());

        assert!(is_same_vnode_type(&n1, &n2));
        assert!(!is_same_vnode_type(&n1, &n3));
        drop(def_a);
    }

    #[test]
    fn host_slots_are_shared_across_clones() {
        let node = VNode::text("x");
        let alias = node.clone();
        assert!(node.same_node(&alias));

        let handle = HostNode::new(1u32);
        node.set_el(Some(handle.clone()));
        assert_eq!(alias.el(), Some(handle));
    }
}
