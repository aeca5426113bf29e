//! Effect Scopes
//!
//! A scope collects every effect (and child scope) created while it is
//! running, so that stopping the scope stops them all at once. Component
//! instances own one scope each; unmounting a component stops its scope
//! and with it every watcher, computed, and render effect the component
//! created.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::warn;

use super::effect::ReactiveEffect;

thread_local! {
    /// Stack of currently running scopes; effects register with the top.
    static ACTIVE_SCOPE: RefCell<Vec<EffectScope>> = const { RefCell::new(Vec::new()) };
}

struct ScopeInner {
    active: Cell<bool>,
    effects: RefCell<Vec<ReactiveEffect>>,
    scopes: RefCell<Vec<EffectScope>>,
    cleanups: RefCell<Vec<Box<dyn FnOnce()>>>,
}

/// Owns a set of effects with a common lifetime.
#[derive(Clone)]
pub struct EffectScope {
    inner: Rc<ScopeInner>,
}

impl EffectScope {
    /// Create a scope. Unless `detached`, it registers as a child of the
    /// currently running scope and is stopped along with it.
    pub fn new(detached: bool) -> Self {
        let scope = Self {
            inner: Rc::new(ScopeInner {
                active: Cell::new(true),
                effects: RefCell::new(Vec::new()),
                scopes: RefCell::new(Vec::new()),
                cleanups: RefCell::new(Vec::new()),
            }),
        };
        if !detached {
            ACTIVE_SCOPE.with(|stack| {
                if let Some(parent) = stack.borrow().last() {
                    parent.inner.scopes.borrow_mut().push(scope.clone());
                }
            });
        }
        scope
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    /// Run `f` with this scope collecting created effects. Returns `None`
    /// if the scope has been stopped.
    pub fn run<T>(&self, f: impl FnOnce() -> T) -> Option<T> {
        if !self.inner.active.get() {
            warn!("cannot run an inactive effect scope");
            return None;
        }
        ACTIVE_SCOPE.with(|stack| stack.borrow_mut().push(self.clone()));
        let result = f();
        ACTIVE_SCOPE.with(|stack| {
            stack.borrow_mut().pop();
        });
        Some(result)
    }

    /// Register a callback to run when the scope stops.
    pub fn on_cleanup<F: FnOnce() + 'static>(&self, f: F) {
        if self.inner.active.get() {
            self.inner.cleanups.borrow_mut().push(Box::new(f));
        }
    }

    /// Stop every owned effect, run cleanups, and stop child scopes.
    pub fn stop(&self) {
        if !self.inner.active.get() {
            return;
        }
        self.inner.active.set(false);

        for effect in self.inner.effects.borrow_mut().drain(..) {
            effect.stop();
        }
        for cleanup in self.inner.cleanups.borrow_mut().drain(..) {
            cleanup();
        }
        for child in self.inner.scopes.borrow_mut().drain(..) {
            child.stop();
        }
    }

    /// Number of effects currently owned.
    pub fn effect_count(&self) -> usize {
        self.inner.effects.borrow().len()
    }
}

impl Default for EffectScope {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Register a freshly created effect with the scope currently running,
/// if any.
pub(crate) fn record_effect_to_active_scope(effect: &ReactiveEffect) {
    ACTIVE_SCOPE.with(|stack| {
        if let Some(scope) = stack.borrow().last() {
            if scope.inner.active.get() {
                scope.inner.effects.borrow_mut().push(effect.clone());
            }
        }
    });
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::effect::{effect, trigger, TriggerOp};
    use crate::reactive::value::{DepKey, ObjRef};
    use std::cell::Cell as StdCell;
    use std::rc::Rc;

    fn prop(name: &str) -> DepKey {
        DepKey::Prop(Rc::from(name))
    }

    #[test]
    fn stopping_a_scope_stops_owned_effects() {
        let obj = ObjRef::new_map();
        let runs = Rc::new(StdCell::new(0));
        let scope = EffectScope::new(false);

        let runs_inner = Rc::clone(&runs);
        let target = obj.clone();
        scope.run(|| {
            effect(move || {
                crate::reactive::effect::track(target.raw(), prop("x"));
                runs_inner.set(runs_inner.get() + 1);
            });
        });
        assert_eq!(scope.effect_count(), 1);
        assert_eq!(runs.get(), 1);

        trigger(obj.raw(), TriggerOp::Set, Some(prop("x")), None);
        assert_eq!(runs.get(), 2);

        scope.stop();
        trigger(obj.raw(), TriggerOp::Set, Some(prop("x")), None);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn nested_scopes_stop_with_their_parent() {
        let obj = ObjRef::new_map();
        let runs = Rc::new(StdCell::new(0));
        let outer = EffectScope::new(false);

        let runs_inner = Rc::clone(&runs);
        let target = obj.clone();
        outer.run(|| {
            let inner_scope = EffectScope::new(false);
            inner_scope.run(|| {
                effect(move || {
                    crate::reactive::effect::track(target.raw(), prop("x"));
                    runs_inner.set(runs_inner.get() + 1);
                });
            });
        });

        outer.stop();
        trigger(obj.raw(), TriggerOp::Set, Some(prop("x")), None);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn detached_scope_survives_parent_stop() {
        let obj = ObjRef::new_map();
        let runs = Rc::new(StdCell::new(0));
        let outer = EffectScope::new(false);
        let mut detached = None;

        let runs_inner = Rc::clone(&runs);
        let target = obj.clone();
        outer.run(|| {
            let scope = EffectScope::new(true);
            scope.run(|| {
                effect(move || {
                    crate::reactive::effect::track(target.raw(), prop("x"));
                    runs_inner.set(runs_inner.get() + 1);
                });
            });
            detached = Some(scope);
        });

        outer.stop();
        trigger(obj.raw(), TriggerOp::Set, Some(prop("x")), None);
        assert_eq!(runs.get(), 2, "detached scope must keep its effects");

        detached.unwrap().stop();
        trigger(obj.raw(), TriggerOp::Set, Some(prop("x")), None);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn cleanups_run_on_stop() {
        let cleaned = Rc::new(StdCell::new(false));
        let scope = EffectScope::new(false);

        let cleaned_inner = Rc::clone(&cleaned);
        scope.on_cleanup(move || cleaned_inner.set(true));

        assert!(!cleaned.get());
        scope.stop();
        assert!(cleaned.get());

        // A stopped scope refuses to run.
        assert!(scope.run(|| 1).is_none());
    }
}
