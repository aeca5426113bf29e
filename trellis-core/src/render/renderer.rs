//! Patch Engine
//!
//! The reconciler transforms an old declarative tree into a new one with
//! minimal host mutations. Dispatch is by vnode kind; same-type pairs are
//! patched in place, mismatches unmount the old subtree and mount fresh.
//!
//! Children reconciliation has three strategies:
//!
//! 1. **Block fast path**: when a subtree's shape is statically stable,
//!    only its recorded dynamic children are walked and matched
//!    positionally - no list diffing at all.
//! 2. **Unkeyed diff**: patch common prefixes positionally, then mount or
//!    unmount the tail.
//! 3. **Keyed diff**: sync matching prefixes and suffixes, handle pure
//!    insertions/removals, then resolve the unknown middle with a
//!    key-to-index map. Moves are applied only when a longest increasing
//!    subsequence of matched old indices says a node is genuinely out of
//!    relative order, which minimizes physical move operations.
//!
//! Component render effects are created here: the update function renders
//! the subtree and patches it against the previous one; its scheduler
//! enqueues the instance's update job (id = uid) so the scheduler flushes
//! parents before children.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use tracing::warn;

use super::component::{ComponentDef, Hook, Instance};
use super::host::{HostNode, HostOps};
use super::vnode::{is_same_vnode_type, Children, PatchFlags, ShapeFlags, VKey, VNode, VNodeKind};
use crate::error::{ErrorHandler, RuntimeError};
use crate::reactive::{pause_tracking, reset_tracking, ReactiveEffect};
use crate::scheduler::{
    flush_post_flush_cbs, flush_pre_flush_cbs, flush_pre_flush_cbs_for,
    invalidate_job, queue_job, queue_post_flush_cb, Job,
};

/// A mount point: the host container plus the tree currently rendered
/// into it.
pub struct AppRoot {
    container: HostNode,
    tree: RefCell<Option<VNode>>,
}

impl AppRoot {
    pub fn container(&self) -> &HostNode {
        &self.container
    }

    pub fn tree(&self) -> Option<VNode> {
        self.tree.borrow().clone()
    }
}

/// The reconciler. All host mutations go through the supplied
/// [`HostOps`]; errors raised by user code route to the error handler.
pub struct Renderer {
    ops: Rc<dyn HostOps>,
    error_handler: RefCell<Option<ErrorHandler>>,
    /// Self-reference handed to render-effect closures, which must be
    /// able to re-enter the patch cycle long after this call stack is
    /// gone.
    self_ref: Weak<Renderer>,
}

impl Renderer {
    pub fn new(ops: Rc<dyn HostOps>) -> Rc<Self> {
        Rc::new_cyclic(|self_ref| Self {
            ops,
            error_handler: RefCell::new(None),
            self_ref: self_ref.clone(),
        })
    }

    fn shared(&self) -> Rc<Renderer> {
        self.self_ref.upgrade().expect("renderer is alive")
    }

    /// Install the externally supplied error-handling policy.
    pub fn set_error_handler(&self, handler: ErrorHandler) {
        *self.error_handler.borrow_mut() = Some(handler);
    }

    fn handle_error(&self, err: &RuntimeError) {
        match &*self.error_handler.borrow() {
            Some(handler) => handler(err),
            None => tracing::error!(error = %err, "unhandled runtime error"),
        }
    }

    pub fn create_root(&self, container: HostNode) -> AppRoot {
        AppRoot {
            container,
            tree: RefCell::new(None),
        }
    }

    /// Render `vnode` into the root, diffing against whatever the root
    /// currently shows; `None` unmounts. Pre- and post-phase callbacks
    /// produced by the patch are drained before returning.
    pub fn render(&self, vnode: Option<VNode>, root: &AppRoot) {
        match vnode {
            None => {
                if let Some(prev) = root.tree.borrow_mut().take() {
                    self.unmount(&prev, None, true);
                }
            }
            Some(next) => {
                let prev = root.tree.borrow().clone();
                let optimized = next.dynamic_children().is_some();
                self.patch(prev, &next, &root.container, None, None, optimized);
                *root.tree.borrow_mut() = Some(next);
            }
        }
        flush_pre_flush_cbs();
        flush_post_flush_cbs();
    }

    // ------------------------------------------------------------------
    // Patch dispatch
    // ------------------------------------------------------------------

    /// Patch `n1` into `n2` inside `container`. `None` means mount.
    pub fn patch(
        &self,
        mut n1: Option<VNode>,
        n2: &VNode,
        container: &HostNode,
        anchor: Option<&HostNode>,
        parent_component: Option<&Instance>,
        mut optimized: bool,
    ) {
        if let Some(prev) = &n1 {
            // Identical reference: nothing can have changed.
            if prev.same_node(n2) {
                return;
            }
        }

        let mut own_anchor = anchor.cloned();
        if let Some(prev) = &n1 {
            if !is_same_vnode_type(prev, n2) {
                // Not the same type: replace wholesale, anchored where the
                // old subtree ended.
                own_anchor = self.get_next_host_node(prev);
                self.unmount(prev, parent_component, true);
                n1 = None;
            }
        }

        if n2.patch_flag().contains(PatchFlags::BAIL) {
            optimized = false;
        }

        let anchor = own_anchor.as_ref();
        match n2.kind() {
            VNodeKind::Text => self.process_text(n1.as_ref(), n2, container, anchor),
            VNodeKind::Comment => self.process_comment(n1.as_ref(), n2, container, anchor),
            VNodeKind::Static => match n1 {
                None => self.mount_static(n2, container, anchor),
                Some(prev) => {
                    // Static content never changes after compilation.
                    n2.set_el(prev.el());
                    n2.set_anchor(prev.anchor());
                }
            },
            VNodeKind::Fragment => self.process_fragment(
                n1.as_ref(),
                n2,
                container,
                anchor,
                parent_component,
                optimized,
            ),
            VNodeKind::Element(_) => self.process_element(
                n1.as_ref(),
                n2,
                container,
                anchor,
                parent_component,
                optimized,
            ),
            VNodeKind::Component(_) => self.process_component(
                n1.as_ref(),
                n2,
                container,
                anchor,
                parent_component,
                optimized,
            ),
            VNodeKind::Teleport(target) => {
                let target = target.clone();
                self.process_teleport(
                    n1.as_ref(),
                    n2,
                    &target,
                    container,
                    anchor,
                    parent_component,
                    optimized,
                );
            }
        }
    }

    fn process_text(
        &self,
        n1: Option<&VNode>,
        n2: &VNode,
        container: &HostNode,
        anchor: Option<&HostNode>,
    ) {
        match n1 {
            None => {
                let el = self.ops.create_text(n2.text_content().unwrap_or(""));
                n2.set_el(Some(el.clone()));
                self.ops.insert(&el, container, anchor);
            }
            Some(prev) => {
                let el = prev.el().expect("mounted text node lost its host handle");
                n2.set_el(Some(el.clone()));
                if n2.text_content() != prev.text_content() {
                    self.ops.set_text(&el, n2.text_content().unwrap_or(""));
                }
            }
        }
    }

    fn process_comment(
        &self,
        n1: Option<&VNode>,
        n2: &VNode,
        container: &HostNode,
        anchor: Option<&HostNode>,
    ) {
        match n1 {
            None => {
                let el = self.ops.create_comment(n2.text_content().unwrap_or(""));
                n2.set_el(Some(el.clone()));
                self.ops.insert(&el, container, anchor);
            }
            Some(prev) => {
                // Dynamic comments are not supported.
                n2.set_el(prev.el());
            }
        }
    }

    fn mount_static(&self, n2: &VNode, container: &HostNode, anchor: Option<&HostNode>) {
        let (start, end) = self.ops.insert_static_content(
            n2.text_content().unwrap_or(""),
            container,
            anchor,
        );
        n2.set_el(Some(start));
        n2.set_anchor(Some(end));
    }

    fn remove_static(&self, vnode: &VNode) {
        let end = vnode.anchor();
        let mut cursor = vnode.el();
        while let Some(node) = cursor {
            let next = self.ops.next_sibling(&node);
            self.ops.remove(&node);
            if Some(&node) == end.as_ref() {
                break;
            }
            cursor = next;
        }
    }

    fn move_static(&self, vnode: &VNode, container: &HostNode, anchor: Option<&HostNode>) {
        let end = vnode.anchor();
        let mut cursor = vnode.el();
        while let Some(node) = cursor {
            let next = self.ops.next_sibling(&node);
            self.ops.insert(&node, container, anchor);
            if Some(&node) == end.as_ref() {
                break;
            }
            cursor = next;
        }
    }

    // ------------------------------------------------------------------
    // Elements
    // ------------------------------------------------------------------

    fn process_element(
        &self,
        n1: Option<&VNode>,
        n2: &VNode,
        container: &HostNode,
        anchor: Option<&HostNode>,
        parent_component: Option<&Instance>,
        optimized: bool,
    ) {
        match n1 {
            None => self.mount_element(n2, container, anchor, parent_component, optimized),
            Some(prev) => self.patch_element(prev, n2, parent_component, optimized),
        }
    }

    fn mount_element(
        &self,
        vnode: &VNode,
        container: &HostNode,
        anchor: Option<&HostNode>,
        parent_component: Option<&Instance>,
        optimized: bool,
    ) {
        let VNodeKind::Element(tag) = vnode.kind() else {
            unreachable!("mount_element on a non-element vnode");
        };
        let el = self.ops.create_element(tag);
        vnode.set_el(Some(el.clone()));

        // Children first: some property semantics depend on already
        // rendered content.
        match vnode.children() {
            Children::Text(text) => self.ops.set_element_text(&el, text),
            Children::Nodes(_) => {
                self.mount_children(
                    vnode.child_nodes(),
                    &el,
                    None,
                    parent_component,
                    optimized,
                    0,
                );
            }
            Children::None => {}
        }

        for (key, value) in vnode.props() {
            self.ops.patch_prop(&el, key, None, Some(value));
        }

        self.ops.insert(&el, container, anchor);
    }

    fn mount_children(
        &self,
        children: &[VNode],
        container: &HostNode,
        anchor: Option<&HostNode>,
        parent_component: Option<&Instance>,
        optimized: bool,
        start: usize,
    ) {
        for child in &children[start..] {
            self.patch(None, child, container, anchor, parent_component, optimized);
        }
    }

    fn patch_element(
        &self,
        n1: &VNode,
        n2: &VNode,
        parent_component: Option<&Instance>,
        optimized: bool,
    ) {
        let el = n1.el().expect("mounted element lost its host handle");
        n2.set_el(Some(el.clone()));

        // A cloned compiler vnode may have de-opted to FULL_PROPS; honor
        // the old node's flag as well.
        let flags =
            n2.patch_flag() | (n1.patch_flag() & PatchFlags::FULL_PROPS);
        let bail = flags.contains(PatchFlags::BAIL);

        // Children before props. BAIL discards all compiler metadata,
        // dynamic-children records included.
        if let (false, Some(old_dyn), Some(new_dyn)) =
            (bail, n1.dynamic_children(), n2.dynamic_children())
        {
            self.patch_block_children(old_dyn, new_dyn, &el, parent_component);
        } else if !optimized {
            self.patch_children(n1, n2, &el, None, parent_component, false);
        }

        let targeted = PatchFlags::TEXT
            | PatchFlags::CLASS
            | PatchFlags::STYLE
            | PatchFlags::PROPS
            | PatchFlags::FULL_PROPS;
        if bail {
            self.patch_props(&el, n1, n2);
        } else if flags.intersects(targeted) {
            if flags.contains(PatchFlags::FULL_PROPS) {
                // Dynamic prop keys: only a full diff is sound.
                self.patch_props(&el, n1, n2);
            } else {
                if flags.contains(PatchFlags::CLASS)
                    && n1.props().get("class") != n2.props().get("class")
                {
                    self.ops.patch_prop(
                        &el,
                        "class",
                        n1.props().get("class"),
                        n2.props().get("class"),
                    );
                }
                if flags.contains(PatchFlags::STYLE) {
                    self.ops.patch_prop(
                        &el,
                        "style",
                        n1.props().get("style"),
                        n2.props().get("style"),
                    );
                }
                if flags.contains(PatchFlags::PROPS) {
                    for key in n2.dynamic_props().unwrap_or(&[]) {
                        let prev = n1.props().get(key);
                        let next = n2.props().get(key);
                        if prev != next {
                            self.ops.patch_prop(&el, key, prev, next);
                        }
                    }
                }
            }
            if flags.contains(PatchFlags::TEXT) && n1.text_content() != n2.text_content()
            {
                self.ops
                    .set_element_text(&el, n2.text_content().unwrap_or(""));
            }
        } else if !optimized && n2.dynamic_children().is_none() {
            self.patch_props(&el, n1, n2);
        }
    }

    fn patch_props(&self, el: &HostNode, n1: &VNode, n2: &VNode) {
        let old_props = n1.props();
        let new_props = n2.props();

        for (key, old_value) in old_props {
            if !new_props.contains_key(key) {
                self.ops.patch_prop(el, key, Some(old_value), None);
            }
        }
        for (key, new_value) in new_props {
            let prev = old_props.get(key);
            if prev != Some(new_value) {
                self.ops.patch_prop(el, key, prev, Some(new_value));
            }
        }
    }

    /// Positional fast path over recorded dynamic children of a stable
    /// subtree.
    fn patch_block_children(
        &self,
        old_children: &[VNode],
        new_children: &[VNode],
        fallback_container: &HostNode,
        parent_component: Option<&Instance>,
    ) {
        for (old, new) in old_children.iter().zip(new_children) {
            // Fragments, replacements, and components may move or replace
            // nodes, which needs the real parent; everything else patches
            // in place and the fallback container is never consulted.
            let needs_real_parent = matches!(
                old.kind(),
                VNodeKind::Fragment | VNodeKind::Component(_) | VNodeKind::Teleport(_)
            ) || !is_same_vnode_type(old, new);
            let container = match (old.el(), needs_real_parent) {
                (Some(el), true) => self
                    .ops
                    .parent_node(&el)
                    .unwrap_or_else(|| fallback_container.clone()),
                _ => fallback_container.clone(),
            };
            self.patch(Some(old.clone()), new, &container, None, parent_component, true);
        }
    }

    // ------------------------------------------------------------------
    // Fragments
    // ------------------------------------------------------------------

    fn process_fragment(
        &self,
        n1: Option<&VNode>,
        n2: &VNode,
        container: &HostNode,
        anchor: Option<&HostNode>,
        parent_component: Option<&Instance>,
        optimized: bool,
    ) {
        match n1 {
            None => {
                // A fragment has no container of its own: two text
                // anchors bound the span its children occupy.
                let start = self.ops.create_text("");
                let end = self.ops.create_text("");
                n2.set_el(Some(start.clone()));
                n2.set_anchor(Some(end.clone()));
                self.ops.insert(&start, container, anchor);
                self.ops.insert(&end, container, anchor);
                self.mount_children(
                    n2.child_nodes(),
                    container,
                    Some(&end),
                    parent_component,
                    optimized,
                    0,
                );
            }
            Some(prev) => {
                let end = prev.anchor().expect("mounted fragment lost its end anchor");
                n2.set_el(prev.el());
                n2.set_anchor(Some(end.clone()));

                let stable = n2.patch_flag().contains(PatchFlags::STABLE_FRAGMENT);
                if let (true, Some(old_dyn), Some(new_dyn)) =
                    (stable, prev.dynamic_children(), n2.dynamic_children())
                {
                    // Stable fragments never reorder children; only the
                    // recorded dynamic descendants need patching.
                    self.patch_block_children(old_dyn, new_dyn, container, parent_component);
                } else {
                    self.patch_children(
                        prev,
                        n2,
                        container,
                        Some(&end),
                        parent_component,
                        optimized,
                    );
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Children diffing
    // ------------------------------------------------------------------

    fn patch_children(
        &self,
        n1: &VNode,
        n2: &VNode,
        container: &HostNode,
        anchor: Option<&HostNode>,
        parent_component: Option<&Instance>,
        optimized: bool,
    ) {
        let c1 = n1.child_nodes();
        let c2 = n2.child_nodes();
        let prev_shape = n1.shape_flag();
        let shape = n2.shape_flag();

        if n2.patch_flag().contains(PatchFlags::KEYED_FRAGMENT) {
            return self.patch_keyed_children(
                c1,
                c2,
                container,
                anchor,
                parent_component,
                optimized,
            );
        }
        if n2.patch_flag().contains(PatchFlags::UNKEYED_FRAGMENT) {
            return self.patch_unkeyed_children(
                c1,
                c2,
                container,
                anchor,
                parent_component,
                optimized,
            );
        }

        if shape.contains(ShapeFlags::TEXT_CHILDREN) {
            if prev_shape.contains(ShapeFlags::ARRAY_CHILDREN) {
                self.unmount_children(c1, parent_component, false, 0);
            }
            if n1.text_content() != n2.text_content() {
                self.ops
                    .set_element_text(container, n2.text_content().unwrap_or(""));
            }
        } else if prev_shape.contains(ShapeFlags::ARRAY_CHILDREN) {
            if shape.contains(ShapeFlags::ARRAY_CHILDREN) {
                // Two arrays with no compiler hints: full keyed diff.
                self.patch_keyed_children(
                    c1,
                    c2,
                    container,
                    anchor,
                    parent_component,
                    optimized,
                );
            } else {
                self.unmount_children(c1, parent_component, true, 0);
            }
        } else {
            if prev_shape.contains(ShapeFlags::TEXT_CHILDREN) {
                self.ops.set_element_text(container, "");
            }
            if shape.contains(ShapeFlags::ARRAY_CHILDREN) {
                self.mount_children(c2, container, anchor, parent_component, optimized, 0);
            }
        }
    }

    fn patch_unkeyed_children(
        &self,
        c1: &[VNode],
        c2: &[VNode],
        container: &HostNode,
        anchor: Option<&HostNode>,
        parent_component: Option<&Instance>,
        optimized: bool,
    ) {
        let common = c1.len().min(c2.len());
        for i in 0..common {
            self.patch(
                Some(c1[i].clone()),
                &c2[i],
                container,
                None,
                parent_component,
                optimized,
            );
        }
        if c1.len() > c2.len() {
            self.unmount_children(c1, parent_component, true, common);
        } else {
            self.mount_children(c2, container, anchor, parent_component, optimized, common);
        }
    }

    /// Keyed (or mixed) children reconciliation.
    fn patch_keyed_children(
        &self,
        c1: &[VNode],
        c2: &[VNode],
        container: &HostNode,
        parent_anchor: Option<&HostNode>,
        parent_component: Option<&Instance>,
        optimized: bool,
    ) {
        let l2 = c2.len();
        let mut i: usize = 0;
        let mut e1 = c1.len() as isize - 1;
        let mut e2 = l2 as isize - 1;

        // 1. Sync from start:
        // (a b) c
        // (a b) d e
        while (i as isize) <= e1 && (i as isize) <= e2 {
            let n1 = &c1[i];
            let n2 = &c2[i];
            if !is_same_vnode_type(n1, n2) {
                break;
            }
            self.patch(
                Some(n1.clone()),
                n2,
                container,
                None,
                parent_component,
                optimized,
            );
            i += 1;
        }

        // 2. Sync from end:
        // a (b c)
        // d e (b c)
        while (i as isize) <= e1 && (i as isize) <= e2 {
            let n1 = &c1[e1 as usize];
            let n2 = &c2[e2 as usize];
            if !is_same_vnode_type(n1, n2) {
                break;
            }
            self.patch(
                Some(n1.clone()),
                n2,
                container,
                None,
                parent_component,
                optimized,
            );
            e1 -= 1;
            e2 -= 1;
        }

        if (i as isize) > e1 {
            // 3. Old side exhausted: the remaining new nodes are pure
            // insertions, anchored before the first already-synced node.
            if (i as isize) <= e2 {
                let next_pos = (e2 + 1) as usize;
                let anchor = if next_pos < l2 {
                    c2[next_pos].el()
                } else {
                    parent_anchor.cloned()
                };
                while (i as isize) <= e2 {
                    self.patch(
                        None,
                        &c2[i],
                        container,
                        anchor.as_ref(),
                        parent_component,
                        optimized,
                    );
                    i += 1;
                }
            }
        } else if (i as isize) > e2 {
            // 4. New side exhausted: the remaining old nodes are pure
            // removals.
            while (i as isize) <= e1 {
                self.unmount(&c1[i], parent_component, true);
                i += 1;
            }
        } else {
            // 5. Unknown middle on both sides.
            let s1 = i;
            let s2 = i;
            let e1 = e1 as usize;
            let e2 = e2 as usize;

            // 5.1 Key -> new index map for the unresolved range.
            let mut key_to_new_index: HashMap<VKey, usize> = HashMap::new();
            for (j, child) in c2.iter().enumerate().take(e2 + 1).skip(s2) {
                if let Some(key) = child.key() {
                    if cfg!(debug_assertions) && key_to_new_index.contains_key(key) {
                        warn!(
                            ?key,
                            "duplicate keys found during update; make sure keys are unique"
                        );
                    }
                    key_to_new_index.insert(key.clone(), j);
                }
            }

            // 5.2 Match old children against new slots; patch matches,
            // remove the unmatched, and record new->old index pairs
            // (offset by one; zero means "no old counterpart").
            let to_be_patched = e2 - s2 + 1;
            let mut patched = 0;
            let mut moved = false;
            let mut max_new_index_so_far = 0usize;
            let mut new_index_to_old_index = vec![0usize; to_be_patched];

            for (j, prev_child) in c1.iter().enumerate().take(e1 + 1).skip(s1) {
                if patched >= to_be_patched {
                    // Every new slot is matched; leftovers can only be
                    // removals.
                    self.unmount(prev_child, parent_component, true);
                    continue;
                }

                let new_index = if let Some(key) = prev_child.key() {
                    key_to_new_index.get(key).copied()
                } else {
                    // Keyless node: first unused new slot of the same
                    // type.
                    (s2..=e2).find(|&k| {
                        new_index_to_old_index[k - s2] == 0
                            && is_same_vnode_type(prev_child, &c2[k])
                    })
                };

                match new_index {
                    None => self.unmount(prev_child, parent_component, true),
                    Some(new_index) => {
                        new_index_to_old_index[new_index - s2] = j + 1;
                        if new_index >= max_new_index_so_far {
                            max_new_index_so_far = new_index;
                        } else {
                            // Matched indices stopped increasing: the
                            // children were reordered, not just patched.
                            moved = true;
                        }
                        self.patch(
                            Some(prev_child.clone()),
                            &c2[new_index],
                            container,
                            None,
                            parent_component,
                            optimized,
                        );
                        patched += 1;
                    }
                }
            }

            // 5.3 Mount new nodes and move the reordered ones, walking
            // backwards so each node can anchor on its already-finalized
            // successor. The longest increasing subsequence of matched
            // old indices marks the nodes whose relative order is already
            // correct; only nodes outside it are physically moved.
            let increasing = if moved {
                longest_increasing_subsequence(&new_index_to_old_index)
            } else {
                Vec::new()
            };
            let mut j = increasing.len() as isize - 1;

            for idx in (0..to_be_patched).rev() {
                let next_index = s2 + idx;
                let next_child = &c2[next_index];
                let anchor = if next_index + 1 < l2 {
                    c2[next_index + 1].el()
                } else {
                    parent_anchor.cloned()
                };

                if new_index_to_old_index[idx] == 0 {
                    // No old counterpart: brand new, mount it.
                    self.patch(
                        None,
                        next_child,
                        container,
                        anchor.as_ref(),
                        parent_component,
                        optimized,
                    );
                } else if moved {
                    if j < 0 || idx != increasing[j as usize] {
                        self.move_vnode(next_child, container, anchor.as_ref());
                    } else {
                        j -= 1;
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Move / unmount
    // ------------------------------------------------------------------

    /// Relocate a mounted node without unmount/remount.
    pub fn move_vnode(
        &self,
        vnode: &VNode,
        container: &HostNode,
        anchor: Option<&HostNode>,
    ) {
        match vnode.kind() {
            VNodeKind::Component(_) => {
                // A component moves by moving its rendered subtree.
                if let Some(subtree) = vnode.component_instance().and_then(|c| c.subtree()) {
                    self.move_vnode(&subtree, container, anchor);
                }
            }
            VNodeKind::Fragment => {
                let start = vnode.el().expect("moved fragment lost its start anchor");
                self.ops.insert(&start, container, anchor);
                for child in vnode.child_nodes() {
                    self.move_vnode(child, container, anchor);
                }
                let end = vnode.anchor().expect("moved fragment lost its end anchor");
                self.ops.insert(&end, container, anchor);
            }
            VNodeKind::Static => self.move_static(vnode, container, anchor),
            VNodeKind::Teleport(_) => {
                // Children live in the teleport target; only the
                // placeholders move within the main tree.
                if let Some(start) = vnode.el() {
                    self.ops.insert(&start, container, anchor);
                }
                if let Some(end) = vnode.anchor() {
                    self.ops.insert(&end, container, anchor);
                }
            }
            _ => {
                let el = vnode.el().expect("moved node lost its host handle");
                self.ops.insert(&el, container, anchor);
            }
        }
    }

    /// Tear down a mounted subtree. `do_remove` detaches host nodes;
    /// nested calls pass `false` when an ancestor is removed wholesale.
    pub fn unmount(
        &self,
        vnode: &VNode,
        parent_component: Option<&Instance>,
        do_remove: bool,
    ) {
        match vnode.kind() {
            VNodeKind::Component(_) => {
                if let Some(instance) = vnode.component_instance() {
                    self.unmount_component(&instance, do_remove);
                }
            }
            VNodeKind::Teleport(_) => {
                // Children were rendered into the target and always need
                // physical removal there.
                self.unmount_children(vnode.child_nodes(), parent_component, true, 0);
                if do_remove {
                    if let Some(start) = vnode.el() {
                        self.ops.remove(&start);
                    }
                    if let Some(end) = vnode.anchor() {
                        self.ops.remove(&end);
                    }
                }
            }
            _ => {
                let stable_fragment = matches!(vnode.kind(), VNodeKind::Fragment)
                    && vnode.patch_flag().contains(PatchFlags::STABLE_FRAGMENT);
                if let (Some(dynamic_children), true) = (
                    vnode.dynamic_children(),
                    !matches!(vnode.kind(), VNodeKind::Fragment) || stable_fragment,
                ) {
                    // Block fast path: only dynamic children can own
                    // resources needing teardown.
                    self.unmount_children(dynamic_children, parent_component, false, 0);
                } else if matches!(vnode.kind(), VNodeKind::Fragment)
                    || vnode.shape_flag().contains(ShapeFlags::ARRAY_CHILDREN)
                {
                    self.unmount_children(vnode.child_nodes(), parent_component, false, 0);
                }

                if do_remove {
                    self.remove_vnode(vnode);
                }
            }
        }
    }

    fn remove_vnode(&self, vnode: &VNode) {
        match vnode.kind() {
            VNodeKind::Fragment => {
                let start = vnode.el().expect("removed fragment lost its start anchor");
                let end = vnode.anchor().expect("removed fragment lost its end anchor");
                self.remove_fragment(start, end);
            }
            VNodeKind::Static => self.remove_static(vnode),
            _ => {
                if let Some(el) = vnode.el() {
                    self.ops.remove(&el);
                }
            }
        }
    }

    fn remove_fragment(&self, start: HostNode, end: HostNode) {
        let mut cursor = start;
        while cursor != end {
            let next = self
                .ops
                .next_sibling(&cursor)
                .expect("fragment span broken before its end anchor");
            self.ops.remove(&cursor);
            cursor = next;
        }
        self.ops.remove(&end);
    }

    fn unmount_children(
        &self,
        children: &[VNode],
        parent_component: Option<&Instance>,
        do_remove: bool,
        start: usize,
    ) {
        for child in &children[start..] {
            self.unmount(child, parent_component, do_remove);
        }
    }

    fn unmount_component(&self, instance: &Instance, do_remove: bool) {
        instance.invoke_hooks(Hook::BeforeUnmount);

        // Stop every effect the component owns, render effect included.
        instance.scope().stop();

        if let Some(job) = instance.update_job() {
            // The scheduler skips inactive jobs; a queued update for this
            // instance dies here.
            job.set_active(false);
            invalidate_job(&job);
        }

        if let Some(subtree) = instance.subtree() {
            self.unmount(&subtree, Some(instance), do_remove);
        }

        // Unmounted hooks observe a fully detached tree: they run in the
        // post-flush phase.
        if instance.has_hooks(Hook::Unmounted) {
            let inst = instance.clone();
            queue_post_flush_cb(&Job::with_id(instance.uid(), move || {
                inst.invoke_hooks(Hook::Unmounted);
            }));
        }
        instance.set_unmounted();
    }

    /// The host node immediately after a vnode's rendered span.
    pub fn get_next_host_node(&self, vnode: &VNode) -> Option<HostNode> {
        if let VNodeKind::Component(_) = vnode.kind() {
            let subtree = vnode.component_instance().and_then(|c| c.subtree());
            return subtree.and_then(|s| self.get_next_host_node(&s));
        }
        let edge = vnode.anchor().or_else(|| vnode.el());
        edge.and_then(|node| self.ops.next_sibling(&node))
    }

    // ------------------------------------------------------------------
    // Components
    // ------------------------------------------------------------------

    fn process_component(
        &self,
        n1: Option<&VNode>,
        n2: &VNode,
        container: &HostNode,
        anchor: Option<&HostNode>,
        parent_component: Option<&Instance>,
        optimized: bool,
    ) {
        match n1 {
            None => self.mount_component(n2, container, anchor, parent_component, optimized),
            Some(prev) => self.update_component(prev, n2),
        }
    }

    fn mount_component(
        &self,
        vnode: &VNode,
        container: &HostNode,
        anchor: Option<&HostNode>,
        parent_component: Option<&Instance>,
        _optimized: bool,
    ) {
        let VNodeKind::Component(def) = vnode.kind() else {
            unreachable!("mount_component on a non-component vnode");
        };
        let def: Rc<ComponentDef> = Rc::clone(def);

        let instance = Instance::new(def, vnode.clone(), parent_component);
        vnode.set_component(Some(instance.clone()));

        instance.run_setup();
        self.setup_render_effect(&instance, container, anchor);
    }

    fn update_component(&self, n1: &VNode, n2: &VNode) {
        let instance = n1
            .component_instance()
            .expect("updated component vnode has no instance");
        n2.set_component(Some(instance.clone()));

        if should_update_component(n1, n2) {
            instance.set_next_vnode(Some(n2.clone()));
            // The child may already be queued; its pending job is
            // subsumed by this synchronous update.
            if let Some(job) = instance.update_job() {
                invalidate_job(&job);
            }
            if let Some(effect) = instance.render_effect() {
                effect.run();
            }
        } else {
            // Nothing observable changed: adopt the new vnode as-is.
            n2.set_el(n1.el());
            instance.set_vnode(n2.clone());
        }
    }

    fn setup_render_effect(
        &self,
        instance: &Instance,
        container: &HostNode,
        anchor: Option<&HostNode>,
    ) {
        let renderer = self.shared();
        let weak = instance.downgrade();
        let container = container.clone();
        let anchor = anchor.cloned();

        let update_fn = move || {
            let Some(instance) = weak.upgrade() else {
                return;
            };
            if instance.is_unmounted() {
                return;
            }

            if !instance.is_mounted() {
                instance.toggle_recurse(false);
                instance.invoke_hooks(Hook::BeforeMount);
                instance.toggle_recurse(true);

                let subtree = renderer.render_component_root(&instance);
                let optimized = subtree.dynamic_children().is_some();
                renderer.patch(
                    None,
                    &subtree,
                    &container,
                    anchor.as_ref(),
                    Some(&instance),
                    optimized,
                );
                instance.vnode().set_el(subtree.el());
                instance.set_subtree(subtree);

                if instance.has_hooks(Hook::Mounted) {
                    let inst = instance.clone();
                    queue_post_flush_cb(&Job::with_id(instance.uid(), move || {
                        inst.invoke_hooks(Hook::Mounted);
                    }));
                }
                instance.set_mounted();
            } else {
                // Triggered by own state (next: None) or by the parent
                // passing a new component vnode (next: Some).
                let next = instance.take_next_vnode();

                instance.toggle_recurse(false);
                let represented = match &next {
                    Some(next_vnode) => {
                        next_vnode.set_el(instance.vnode().el());
                        renderer.update_component_pre_render(&instance, next_vnode);
                        next_vnode.clone()
                    }
                    None => instance.vnode(),
                };
                instance.invoke_hooks(Hook::BeforeUpdate);
                instance.toggle_recurse(true);

                let next_tree = renderer.render_component_root(&instance);
                let prev_tree = instance
                    .subtree()
                    .expect("updating component has no previous subtree");
                instance.set_subtree(next_tree.clone());

                // Parent and anchor may have changed if the subtree sits
                // inside a fragment.
                let host_container = prev_tree
                    .el()
                    .and_then(|el| renderer.ops.parent_node(&el))
                    .unwrap_or_else(|| container.clone());
                let host_anchor = renderer.get_next_host_node(&prev_tree);

                let optimized = next_tree.dynamic_children().is_some();
                renderer.patch(
                    Some(prev_tree),
                    &next_tree,
                    &host_container,
                    host_anchor.as_ref(),
                    Some(&instance),
                    optimized,
                );
                represented.set_el(next_tree.el());

                if instance.has_hooks(Hook::Updated) {
                    let inst = instance.clone();
                    queue_post_flush_cb(&Job::with_id(instance.uid(), move || {
                        inst.invoke_hooks(Hook::Updated);
                    }));
                }
            }
        };

        let effect = instance
            .scope()
            .run(|| ReactiveEffect::new(update_fn))
            .expect("component scope is active during mount");

        let run_effect = effect.clone();
        let job = Job::with_id(instance.uid(), move || run_effect.run());

        // Component updates intentionally mutate state their own render
        // depends on (child props); they must be allowed to re-trigger.
        job.set_allow_recurse(true);
        effect.set_allow_recurse(true);

        let scheduled = job.clone();
        effect.set_scheduler(move || queue_job(&scheduled));

        instance.set_update_job(job);
        instance.set_render_effect(effect.clone());

        // First run renders and mounts the subtree, collecting the
        // render dependencies as it goes.
        effect.run();
    }

    fn update_component_pre_render(&self, instance: &Instance, next_vnode: &VNode) {
        next_vnode.set_component(Some(instance.clone()));
        instance.set_vnode(next_vnode.clone());
        instance.update_from_vnode(next_vnode);

        // Prop updates may have produced pre-phase watcher work; it must
        // observe state before this render, must not leak deps into the
        // render effect, and must not re-queue the update running right
        // now on its behalf.
        pause_tracking();
        match instance.update_job() {
            Some(job) => flush_pre_flush_cbs_for(&job),
            None => flush_pre_flush_cbs(),
        }
        reset_tracking();
    }

    fn render_component_root(&self, instance: &Instance) -> VNode {
        match instance.invoke_render() {
            Ok(subtree) => subtree,
            Err(err) => {
                // Routed out; a placeholder keeps sibling reconciliation
                // going.
                self.handle_error(&err);
                VNode::comment("render error")
            }
        }
    }

    // ------------------------------------------------------------------
    // Teleport
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn process_teleport(
        &self,
        n1: Option<&VNode>,
        n2: &VNode,
        target: &HostNode,
        container: &HostNode,
        anchor: Option<&HostNode>,
        parent_component: Option<&Instance>,
        optimized: bool,
    ) {
        match n1 {
            None => {
                // Placeholders hold the teleport's place in the main
                // tree; children render into the target.
                let start = self.ops.create_comment("teleport start");
                let end = self.ops.create_comment("teleport end");
                self.ops.insert(&start, container, anchor);
                self.ops.insert(&end, container, anchor);
                n2.set_el(Some(start));
                n2.set_anchor(Some(end));
                self.mount_children(
                    n2.child_nodes(),
                    target,
                    None,
                    parent_component,
                    optimized,
                    0,
                );
            }
            Some(prev) => {
                n2.set_el(prev.el());
                n2.set_anchor(prev.anchor());

                let VNodeKind::Teleport(old_target) = prev.kind() else {
                    unreachable!("teleport patched against a non-teleport");
                };
                self.patch_children(
                    prev,
                    n2,
                    old_target,
                    None,
                    parent_component,
                    optimized,
                );
                if old_target != target {
                    for child in n2.child_nodes() {
                        self.move_vnode(child, target, None);
                    }
                }
            }
        }
    }
}

/// Whether a new component vnode warrants re-rendering the instance.
fn should_update_component(n1: &VNode, n2: &VNode) -> bool {
    if props_changed(n1, n2) {
        return true;
    }
    match (n1.children(), n2.children()) {
        (Children::None, Children::None) => false,
        (Children::Nodes(a), Children::Nodes(b)) => {
            a.len() != b.len()
                || a.iter().zip(b).any(|(x, y)| !x.same_node(y))
        }
        _ => true,
    }
}

fn props_changed(n1: &VNode, n2: &VNode) -> bool {
    let p1 = n1.props();
    let p2 = n2.props();
    if p1.len() != p2.len() {
        return true;
    }
    p2.iter().any(|(key, value)| p1.get(key) != Some(value))
}

/// Longest increasing subsequence of the non-zero entries of `arr`,
/// returned as indices into `arr` in increasing order.
///
/// Patience sorting with back-pointers: `result` holds, for each pile
/// height, the index of the smallest known tail; `p[i]` remembers the
/// predecessor chosen when index `i` was placed, and a final backward
/// walk reconstructs the subsequence. Zero entries mark slots with no
/// old counterpart and never participate.
pub(crate) fn longest_increasing_subsequence(arr: &[usize]) -> Vec<usize> {
    if arr.is_empty() {
        return Vec::new();
    }
    let mut p = arr.to_vec();
    let mut result: Vec<usize> = vec![0];

    for i in 0..arr.len() {
        let arr_i = arr[i];
        if arr_i == 0 {
            continue;
        }
        let j = *result.last().expect("result is never empty");
        if arr[j] < arr_i {
            p[i] = j;
            result.push(i);
            continue;
        }
        // Binary search for the first tail >= arr_i.
        let mut u = 0usize;
        let mut v = result.len() - 1;
        while u < v {
            let c = (u + v) >> 1;
            if arr[result[c]] < arr_i {
                u = c + 1;
            } else {
                v = c;
            }
        }
        if arr_i < arr[result[u]] {
            if u > 0 {
                p[i] = result[u - 1];
            }
            result[u] = i;
        }
    }

    // Backtrack: only the last element is guaranteed correct; the
    // predecessor chain repairs the rest.
    let mut u = result.len();
    let mut v = *result.last().expect("result is never empty");
    while u > 0 {
        u -= 1;
        result[u] = v;
        v = p[v];
    }
    result
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lis_of_increasing_input_is_identity() {
        assert_eq!(longest_increasing_subsequence(&[1, 2, 3, 4]), vec![0, 1, 2, 3]);
    }

    #[test]
    fn lis_finds_longest_chain() {
        // Values 1, 3, 4, 8, 9 at indices 1, 3, 5, 6, 7.
        let arr = [2, 1, 5, 3, 6, 4, 8, 9, 7];
        let lis = longest_increasing_subsequence(&arr);
        assert_eq!(lis.len(), 5);
        // Strictly increasing indices and values.
        for pair in lis.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(arr[pair[0]] < arr[pair[1]]);
        }
    }

    #[test]
    fn lis_skips_zero_entries() {
        // A swapped pair [A,B,C,D] -> [A,C,B,D] maps to old indices
        // [1,3,2,4]: the stable chain keeps three of four nodes.
        let lis = longest_increasing_subsequence(&[1, 3, 2, 4]);
        assert_eq!(lis.len(), 3);

        // Zeroes (newly inserted slots) never join the chain.
        let lis = longest_increasing_subsequence(&[0, 2, 0, 4]);
        assert_eq!(lis, vec![1, 3]);
    }

    #[test]
    fn lis_of_reversed_input_is_single_element() {
        let lis = longest_increasing_subsequence(&[4, 3, 2, 1]);
        assert_eq!(lis.len(), 1);
    }
}
