//! Cells and Computed Values
//!
//! A cell is a boxed single-value reference with its own dependency: the
//! reactive primitive for standalone state. Cells stored inside a deep
//! observed object auto-unwrap on named-key reads (but not list-by-index
//! reads), and a non-cell assignment to a key holding a cell writes
//! through into the cell.
//!
//! A computed value is a lazily evaluated cell backed by an effect: reads
//! track the computed's own dependency, the first read after invalidation
//! re-runs the getter, and invalidation itself is just the backing
//! effect's scheduler marking it dirty and re-firing its dependency.
//! Effects backing computed values run before plain effects when a
//! dependency fires, so plain effects always observe settled results.

use std::cell::{Cell as StdCell, RefCell};
use std::rc::{Rc, Weak};

use tracing::warn;

use super::dep::Dep;
use super::effect::{track, track_effects, trigger, trigger_effects, ReactiveEffect, TriggerOp};
use super::observe::observe;
use super::value::{DepKey, ObjData, ObjKind, ObjRef, Value};

/// Create a cell holding `value` (stored raw).
pub fn cell(value: impl Into<Value>) -> ObjRef {
    ObjRef::new_cell(value.into().to_raw())
}

/// Read a cell, optionally registering its dependency, wrapping an
/// object-valued inner in a deep observable handle.
pub(crate) fn cell_read(obj: &ObjRef, track_deps: bool) -> Value {
    if track_deps {
        track(obj.raw(), DepKey::CellValue);
    }
    let inner = match &*obj.raw().data().borrow() {
        ObjData::Cell(value) => value.clone(),
        _ => Value::Null,
    };
    match inner {
        Value::Obj(nested) => Value::Obj(observe(&nested)),
        scalar => scalar,
    }
}

/// Write a cell, firing its dependency when the value changed
/// (same-value-zero).
pub(crate) fn cell_write(obj: &ObjRef, value: Value) {
    let value = value.to_raw();
    let changed = {
        let mut data = obj.raw().data().borrow_mut();
        match &mut *data {
            ObjData::Cell(slot) => {
                if *slot != value {
                    *slot = value;
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    };
    if changed {
        trigger(obj.raw(), TriggerOp::Set, Some(DepKey::CellValue), None);
    }
}

impl ObjRef {
    /// Read this cell's value. Tracks unless the handle is read-only.
    pub fn value(&self) -> Value {
        if self.kind() != ObjKind::Cell {
            return Value::Null;
        }
        cell_read(self, !self.mode().is_read_only())
    }

    /// Replace this cell's value.
    pub fn set_value(&self, value: impl Into<Value>) {
        if self.kind() != ObjKind::Cell {
            return;
        }
        if self.mode().is_read_only() {
            warn!("set operation failed: cell is read-only");
            return;
        }
        cell_write(self, value.into());
    }
}

struct ComputedInner {
    dep: Rc<Dep>,
    value: RefCell<Value>,
    dirty: StdCell<bool>,
    effect: ReactiveEffect,
}

/// A lazily evaluated, cached derived value.
///
/// The getter runs on first read and again on the first read after any of
/// its dependencies changed. Writes to dependencies between reads cost
/// one dirty-bit flip, not a recomputation.
#[derive(Clone)]
pub struct Computed {
    inner: Rc<ComputedInner>,
}

impl Computed {
    pub fn new<F: Fn() -> Value + 'static>(getter: F) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<ComputedInner>| {
            let run_slot = weak.clone();
            let effect = ReactiveEffect::new(move || {
                if let Some(inner) = run_slot.upgrade() {
                    let value = getter();
                    *inner.value.borrow_mut() = value;
                }
            });

            let invalidate = weak.clone();
            effect.set_scheduler(move || {
                if let Some(inner) = invalidate.upgrade() {
                    if !inner.dirty.get() {
                        inner.dirty.set(true);
                        trigger_effects(inner.dep.effects());
                    }
                }
            });
            effect.set_computed_marker(true);

            ComputedInner {
                dep: Dep::new(),
                value: RefCell::new(Value::Null),
                dirty: StdCell::new(true),
                effect,
            }
        });
        Self { inner }
    }

    /// Current value, recomputing if a dependency changed since the last
    /// read. Tracks the computed's dependency for the running effect.
    pub fn get(&self) -> Value {
        track_effects(&self.inner.dep);
        if self.inner.dirty.get() {
            self.inner.dirty.set(false);
            self.inner.effect.run();
        }
        self.inner.value.borrow().clone()
    }

    /// Whether the next read will recompute.
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.get()
    }

    /// Stop the backing effect; the last computed value is frozen.
    pub fn stop(&self) {
        self.inner.effect.stop();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
