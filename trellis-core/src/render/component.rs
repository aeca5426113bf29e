//! Component Instances
//!
//! A component definition is a named bundle of setup and render
//! functions. Mounting a component vnode creates an instance: the glue
//! object holding resolved props and attrs, the setup-produced state bag,
//! the render effect and its scheduler job, the current rendered subtree,
//! lifecycle hook registries, and an effect scope owning every effect the
//! component creates.
//!
//! Instances are created once on first mount and updated in place across
//! re-renders; only unmounting destroys them. Instance uids increase
//! monotonically, and since parents are always created before their
//! descendants, a parent's uid - and therefore its update job id - is
//! always smaller than any descendant's. The scheduler's ascending-id
//! flush order turns that into top-down update propagation.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU32, Ordering};

use super::vnode::{Props, VNode};
use crate::error::RuntimeError;
use crate::reactive::{observe, observe_shallow, EffectScope, ObjRef, ReactiveEffect, Value};
use crate::scheduler::Job;

/// Counter for component instance uids. Parents mount before children,
/// so uids order parents first.
static UID_COUNTER: AtomicU32 = AtomicU32::new(0);

fn next_uid() -> u32 {
    UID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// The render function of a component: produces the subtree for the
/// instance's current state. Errors route to the renderer's error
/// handler.
pub type RenderFn = dyn Fn(&Instance) -> Result<VNode, RuntimeError>;

/// Runs once before the first render, inside the instance's effect
/// scope. Typically creates the state bag and registers lifecycle hooks.
pub type SetupFn = dyn Fn(&Instance);

/// A component definition. Identity (not name) is what the reconciler
/// compares: two vnodes referencing the same definition are the same
/// component type.
pub struct ComponentDef {
    name: Option<String>,
    /// Declared prop names; anything else lands in `attrs`. `None`
    /// declares everything.
    prop_names: Option<Vec<Rc<str>>>,
    setup: Option<Box<SetupFn>>,
    render: Box<RenderFn>,
}

impl ComponentDef {
    pub fn new<R>(name: &str, render: R) -> Rc<Self>
    where
        R: Fn(&Instance) -> Result<VNode, RuntimeError> + 'static,
    {
        Rc::new(Self {
            name: Some(name.to_string()),
            prop_names: None,
            setup: None,
            render: Box::new(render),
        })
    }

    pub fn with_setup<S, R>(name: &str, setup: S, render: R) -> Rc<Self>
    where
        S: Fn(&Instance) + 'static,
        R: Fn(&Instance) -> Result<VNode, RuntimeError> + 'static,
    {
        Rc::new(Self {
            name: Some(name.to_string()),
            prop_names: None,
            setup: Some(Box::new(setup)),
            render: Box::new(render),
        })
    }

    /// Restrict which props resolve into `props`; the rest become attrs.
    pub fn with_declared_props<S, R>(
        name: &str,
        prop_names: &[&str],
        setup: Option<S>,
        render: R,
    ) -> Rc<Self>
    where
        S: Fn(&Instance) + 'static,
        R: Fn(&Instance) -> Result<VNode, RuntimeError> + 'static,
    {
        Rc::new(Self {
            name: Some(name.to_string()),
            prop_names: Some(prop_names.iter().map(|n| Rc::from(*n)).collect()),
            setup: setup.map(|s| Box::new(s) as Box<SetupFn>),
            render: Box::new(render),
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn declares(&self, key: &str) -> bool {
        match &self.prop_names {
            None => true,
            Some(names) => names.iter().any(|n| &**n == key),
        }
    }
}

#[derive(Default)]
struct HookRegistries {
    before_mount: RefCell<Vec<Rc<dyn Fn()>>>,
    mounted: RefCell<Vec<Rc<dyn Fn()>>>,
    before_update: RefCell<Vec<Rc<dyn Fn()>>>,
    updated: RefCell<Vec<Rc<dyn Fn()>>>,
    before_unmount: RefCell<Vec<Rc<dyn Fn()>>>,
    unmounted: RefCell<Vec<Rc<dyn Fn()>>>,
}

/// Lifecycle phases with hook registries on the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    BeforeMount,
    Mounted,
    BeforeUpdate,
    Updated,
    BeforeUnmount,
    Unmounted,
}

struct InstanceInner {
    uid: u32,
    def: Rc<ComponentDef>,
    /// The component vnode this instance currently represents.
    vnode: RefCell<VNode>,
    /// Pending component vnode from a parent-driven update.
    next: RefCell<Option<VNode>>,
    /// The currently rendered subtree.
    subtree: RefCell<Option<VNode>>,
    update_job: RefCell<Option<Job>>,
    render_effect: RefCell<Option<ReactiveEffect>>,
    scope: EffectScope,
    /// Declared props, shallow-observed so prop writes re-render.
    props: ObjRef,
    /// Undeclared props fall through here.
    attrs: ObjRef,
    /// Default slot content passed by the parent.
    slot: RefCell<Vec<VNode>>,
    /// Setup-produced state bag.
    state: RefCell<Option<ObjRef>>,
    hooks: HookRegistries,
    parent: Option<Weak<InstanceInner>>,
    is_mounted: Cell<bool>,
    is_unmounted: Cell<bool>,
}

/// A live component. Cloning shares the instance.
#[derive(Clone)]
pub struct Instance {
    inner: Rc<InstanceInner>,
}

impl Instance {
    /// Create the instance for a component vnode. Resolves the vnode's
    /// props into props/attrs and captures its default slot.
    pub fn new(def: Rc<ComponentDef>, vnode: VNode, parent: Option<&Instance>) -> Self {
        let instance = Self {
            inner: Rc::new(InstanceInner {
                uid: next_uid(),
                def,
                vnode: RefCell::new(vnode.clone()),
                next: RefCell::new(None),
                subtree: RefCell::new(None),
                update_job: RefCell::new(None),
                render_effect: RefCell::new(None),
                scope: EffectScope::new(true),
                props: observe_shallow(&ObjRef::new_map()),
                attrs: ObjRef::new_map(),
                slot: RefCell::new(vnode.child_nodes().to_vec()),
                state: RefCell::new(None),
                hooks: HookRegistries::default(),
                parent: parent.map(|p| Rc::downgrade(&p.inner)),
                is_mounted: Cell::new(false),
                is_unmounted: Cell::new(false),
            }),
        };
        instance.resolve_props(vnode.props());
        instance
    }

    pub fn uid(&self) -> u32 {
        self.inner.uid
    }

    pub fn def(&self) -> &Rc<ComponentDef> {
        &self.inner.def
    }

    pub fn parent(&self) -> Option<Instance> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Instance { inner })
    }

    pub fn downgrade(&self) -> WeakInstance {
        WeakInstance {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Run the definition's setup function inside this instance's scope,
    /// so every effect it creates is owned by the component.
    pub fn run_setup(&self) {
        if let Some(setup) = &self.inner.def.setup {
            let this = self.clone();
            self.inner.scope.run(|| setup(&this));
        }
    }

    /// Invoke the render function. Dependency tracking is active because
    /// this runs inside the render effect.
    pub fn invoke_render(&self) -> Result<VNode, RuntimeError> {
        (self.inner.def.render)(self)
    }

    // ------------------------------------------------------------------
    // Props, attrs, slots, state
    // ------------------------------------------------------------------

    /// Shallow-observed declared props.
    pub fn props(&self) -> &ObjRef {
        &self.inner.props
    }

    /// Read one prop.
    pub fn prop(&self, name: &str) -> Value {
        self.inner.props.get(name)
    }

    /// Undeclared pass-through props.
    pub fn attrs(&self) -> &ObjRef {
        &self.inner.attrs
    }

    /// Default slot content supplied by the parent.
    pub fn slot(&self) -> Vec<VNode> {
        self.inner.slot.borrow().clone()
    }

    /// Install the setup-produced state bag (conventionally a deep
    /// observed object).
    pub fn set_state(&self, state: ObjRef) {
        *self.inner.state.borrow_mut() = Some(state);
    }

    /// The state bag, creating a deep observed one on first access.
    pub fn state(&self) -> ObjRef {
        let mut slot = self.inner.state.borrow_mut();
        slot.get_or_insert_with(|| observe(&ObjRef::new_map())).clone()
    }

    /// Re-resolve props/attrs/slot from a new component vnode (parent
    /// update path). Prop writes go through the shallow-observed handle,
    /// so changed props invalidate the render effect.
    pub fn update_from_vnode(&self, vnode: &VNode) {
        *self.inner.slot.borrow_mut() = vnode.child_nodes().to_vec();
        self.resolve_props(vnode.props());
    }

    fn resolve_props(&self, incoming: &Props) {
        let props = &self.inner.props;
        let attrs = &self.inner.attrs;

        for (key, value) in incoming {
            if self.inner.def.declares(key) {
                props.set(&**key, value.clone());
            } else {
                attrs.set(&**key, value.clone());
            }
        }

        // Drop keys the new vnode no longer passes.
        for key in props.to_raw().keys() {
            if let crate::reactive::PropKey::Name(name) = key {
                if !incoming.contains_key(&name) {
                    props.delete(&*name);
                }
            }
        }
        for key in attrs.to_raw().keys() {
            if let crate::reactive::PropKey::Name(name) = key {
                if !incoming.contains_key(&name) {
                    attrs.delete(&*name);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Render machinery wiring (used by the renderer)
    // ------------------------------------------------------------------

    pub fn vnode(&self) -> VNode {
        self.inner.vnode.borrow().clone()
    }

    pub fn set_vnode(&self, vnode: VNode) {
        *self.inner.vnode.borrow_mut() = vnode;
    }

    pub fn next_vnode(&self) -> Option<VNode> {
        self.inner.next.borrow().clone()
    }

    pub fn set_next_vnode(&self, vnode: Option<VNode>) {
        *self.inner.next.borrow_mut() = vnode;
    }

    pub fn take_next_vnode(&self) -> Option<VNode> {
        self.inner.next.borrow_mut().take()
    }

    pub fn subtree(&self) -> Option<VNode> {
        self.inner.subtree.borrow().clone()
    }

    pub fn set_subtree(&self, subtree: VNode) {
        *self.inner.subtree.borrow_mut() = Some(subtree);
    }

    pub fn update_job(&self) -> Option<Job> {
        self.inner.update_job.borrow().clone()
    }

    pub fn set_update_job(&self, job: Job) {
        *self.inner.update_job.borrow_mut() = Some(job);
    }

    pub fn render_effect(&self) -> Option<ReactiveEffect> {
        self.inner.render_effect.borrow().clone()
    }

    pub fn set_render_effect(&self, effect: ReactiveEffect) {
        *self.inner.render_effect.borrow_mut() = Some(effect);
    }

    pub fn scope(&self) -> &EffectScope {
        &self.inner.scope
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.is_mounted.get()
    }

    pub fn set_mounted(&self) {
        self.inner.is_mounted.set(true);
    }

    pub fn is_unmounted(&self) -> bool {
        self.inner.is_unmounted.get()
    }

    pub fn set_unmounted(&self) {
        self.inner.is_unmounted.set(true);
    }

    /// Gate recursive self-triggering of the render effect and its job,
    /// off around before-hooks and on for the update function itself.
    pub fn toggle_recurse(&self, allowed: bool) {
        if let Some(effect) = &*self.inner.render_effect.borrow() {
            effect.set_allow_recurse(allowed);
        }
        if let Some(job) = &*self.inner.update_job.borrow() {
            job.set_allow_recurse(allowed);
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle hooks
    // ------------------------------------------------------------------

    pub fn on_hook<F: Fn() + 'static>(&self, hook: Hook, f: F) {
        self.registry(hook).borrow_mut().push(Rc::new(f));
    }

    pub fn on_before_mount<F: Fn() + 'static>(&self, f: F) {
        self.on_hook(Hook::BeforeMount, f);
    }

    pub fn on_mounted<F: Fn() + 'static>(&self, f: F) {
        self.on_hook(Hook::Mounted, f);
    }

    pub fn on_before_update<F: Fn() + 'static>(&self, f: F) {
        self.on_hook(Hook::BeforeUpdate, f);
    }

    pub fn on_updated<F: Fn() + 'static>(&self, f: F) {
        self.on_hook(Hook::Updated, f);
    }

    pub fn on_before_unmount<F: Fn() + 'static>(&self, f: F) {
        self.on_hook(Hook::BeforeUnmount, f);
    }

    pub fn on_unmounted<F: Fn() + 'static>(&self, f: F) {
        self.on_hook(Hook::Unmounted, f);
    }

    /// Invoke a hook registry synchronously.
    pub fn invoke_hooks(&self, hook: Hook) {
        let hooks: Vec<Rc<dyn Fn()>> = self.registry(hook).borrow().clone();
        for f in hooks {
            f();
        }
    }

    pub fn has_hooks(&self, hook: Hook) -> bool {
        !self.registry(hook).borrow().is_empty()
    }

    fn registry(&self, hook: Hook) -> &RefCell<Vec<Rc<dyn Fn()>>> {
        let hooks = &self.inner.hooks;
        match hook {
            Hook::BeforeMount => &hooks.before_mount,
            Hook::Mounted => &hooks.mounted,
            Hook::BeforeUpdate => &hooks.before_update,
            Hook::Updated => &hooks.updated,
            Hook::BeforeUnmount => &hooks.before_unmount,
            Hook::Unmounted => &hooks.unmounted,
        }
    }
}

/// Weak handle used by render-effect closures, so an instance does not
/// keep itself alive through its own effect.
#[derive(Clone)]
pub struct WeakInstance {
    inner: Weak<InstanceInner>,
}

impl WeakInstance {
    pub fn upgrade(&self) -> Option<Instance> {
        self.inner.upgrade().map(|inner| Instance { inner })
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
