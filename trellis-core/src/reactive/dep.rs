//! Dependency Sets
//!
//! A `Dep` is the subscriber set associated with one observed aspect of an
//! object (a property, an index, the length, an iteration). Effects that
//! read the aspect are recorded here; mutating the aspect fires them.
//!
//! # Generation markers
//!
//! Each dep carries two bitmasks, `w` ("was tracked") and `n` ("newly
//! tracked"), with one bit per level of effect-run recursion. Before an
//! effect re-runs, every dep it holds gets its `w` bit set for the current
//! level; deps read during the run get their `n` bit set. When the run
//! finishes, a dep whose `w` bit is set but whose `n` bit is not was read
//! by the previous run only - it is stale and the effect is removed from
//! it. This prunes dead dependencies without rebuilding the set.
//!
//! The markers support a bounded recursion depth; past it, tracking falls
//! back to a linear membership check and a full clear-and-rebuild per run.
//!
//! # Liveness
//!
//! Subscriber entries hold weak references. An effect is kept alive by its
//! runner, its scope, or its owning component instance; entries left
//! behind by a dropped effect are pruned when the dep is next walked.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use super::effect::EffectInner;

/// The subscriber set for one observed aspect of an object.
pub struct Dep {
    /// Subscribed effects, identified by effect id. Weak so a dep never
    /// keeps an abandoned effect alive.
    subscribers: RefCell<SmallVec<[(u64, Weak<EffectInner>); 4]>>,

    /// "Was tracked" marker bits, one per active recursion level.
    w: Cell<u32>,

    /// "Newly tracked" marker bits, one per active recursion level.
    n: Cell<u32>,
}

impl Dep {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            subscribers: RefCell::new(SmallVec::new()),
            w: Cell::new(0),
            n: Cell::new(0),
        })
    }

    /// Whether the dep was tracked at the recursion level `bit` before the
    /// current run.
    pub fn was_tracked(&self, bit: u32) -> bool {
        self.w.get() & bit > 0
    }

    /// Whether the dep has been tracked at the recursion level `bit`
    /// during the current run.
    pub fn new_tracked(&self, bit: u32) -> bool {
        self.n.get() & bit > 0
    }

    /// Set the "was tracked" bit for a recursion level.
    pub fn mark_was_tracked(&self, bit: u32) {
        self.w.set(self.w.get() | bit);
    }

    /// Set the "newly tracked" bit for a recursion level.
    pub fn mark_new_tracked(&self, bit: u32) {
        self.n.set(self.n.get() | bit);
    }

    /// Clear both marker bits for a recursion level.
    pub fn clear_markers(&self, bit: u32) {
        self.w.set(self.w.get() & !bit);
        self.n.set(self.n.get() & !bit);
    }

    /// Whether the effect is currently subscribed.
    pub fn has(&self, effect_id: u64) -> bool {
        self.subscribers
            .borrow()
            .iter()
            .any(|(id, _)| *id == effect_id)
    }

    /// Subscribe an effect. Callers check membership first; this does not
    /// deduplicate.
    pub fn add(&self, effect: &Rc<EffectInner>) {
        self.subscribers
            .borrow_mut()
            .push((effect.id(), Rc::downgrade(effect)));
    }

    /// Unsubscribe an effect.
    pub fn delete(&self, effect_id: u64) {
        self.subscribers
            .borrow_mut()
            .retain(|(id, _)| *id != effect_id);
    }

    /// Snapshot the live subscribers, pruning entries whose effect has
    /// been dropped.
    pub fn effects(&self) -> Vec<Rc<EffectInner>> {
        let mut subscribers = self.subscribers.borrow_mut();
        let mut live = Vec::with_capacity(subscribers.len());
        subscribers.retain(|(_, weak)| match weak.upgrade() {
            Some(effect) => {
                live.push(effect);
                true
            }
            None => false,
        });
        live
    }

    /// Number of recorded subscribers, dead entries included.
    pub fn len(&self) -> usize {
        self.subscribers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.borrow().is_empty()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
