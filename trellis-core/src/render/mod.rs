//! Virtual Tree and Reconciliation
//!
//! This module implements the declarative tree layer: vnodes, component
//! instances, the host operations contract, and the patch engine that
//! maps tree differences onto minimal host mutations.
//!
//! The render layer is driven by the reactive layer: each mounted
//! component owns a render effect whose re-runs re-render and re-patch
//! its subtree, and whose scheduling goes through the shared job queue so
//! that updates batch per tick and flush parent-before-child.

mod component;
mod host;
mod renderer;
mod vnode;

pub use component::{ComponentDef, Hook, Instance, RenderFn, SetupFn, WeakInstance};
pub use host::{HostNode, HostOps};
pub use renderer::{AppRoot, Renderer};
pub use vnode::{
    is_same_vnode_type, props, Children, PatchFlags, Props, ShapeFlags, VKey, VNode,
    VNodeKind,
};
