//! Reactive Effects
//!
//! An effect is a re-runnable computation whose reads are tracked and
//! whose re-execution is triggered by writes to those reads. This module
//! owns the running-effect stack, the `track`/`trigger` pair at the heart
//! of the dependency engine, and the global tracking switch.
//!
//! # How tracking works
//!
//! While an effect runs it is the *current* effect (a thread-local, with
//! parent links forming a stack for nested runs). Reading an observed
//! aspect calls [`track`], which records the current effect into that
//! aspect's [`Dep`]. Writing calls [`trigger`], which resolves the deps
//! affected by the operation and re-runs (or schedules) their effects.
//!
//! # Marker bits and the depth limit
//!
//! Each recursion level of effect execution owns one marker bit (see
//! [`Dep`](super::dep::Dep)). The bit width caps supported recursion at
//! [`MAX_MARKER_BITS`] levels; deeper nesting falls back to clearing all
//! of the effect's deps up front and re-collecting from scratch, trading
//! the incremental pruning for unconditional correctness.
//!
//! # Self-triggering
//!
//! An effect that writes to its own dependency would re-enter itself
//! forever. By default such triggers are ignored; effects that genuinely
//! need it (component update jobs, self-mutating watchers) opt in with
//! `allow_recurse`.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

use super::dep::Dep;
use super::scope::record_effect_to_active_scope;
use super::value::{DepKey, ObjKind, RawObj};

/// The bitwise markers support at most this many levels of effect
/// recursion; deeper runs degrade to full cleanup-and-rebuild.
pub const MAX_MARKER_BITS: u32 = 30;

/// Counter for generating unique effect IDs.
static EFFECT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_effect_id() -> u64 {
    EFFECT_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

thread_local! {
    /// The effect currently collecting dependencies, if any.
    static ACTIVE_EFFECT: RefCell<Option<Rc<EffectInner>>> = const { RefCell::new(None) };

    /// Depth of nested effect runs.
    static EFFECT_TRACK_DEPTH: Cell<u32> = const { Cell::new(0) };

    /// The marker bit owned by the current recursion level.
    static TRACK_OP_BIT: Cell<u32> = const { Cell::new(1) };

    /// Global tracking switch, with a stack for pause/reset nesting.
    static SHOULD_TRACK: Cell<bool> = const { Cell::new(true) };
    static TRACK_STACK: RefCell<Vec<bool>> = const { RefCell::new(Vec::new()) };
}

/// Mutation categories distinguished by [`trigger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOp {
    /// An existing key changed value.
    Set,
    /// A key was added.
    Add,
    /// A key was removed.
    Delete,
    /// The whole collection was cleared.
    Clear,
}

/// Shared state of one effect.
pub struct EffectInner {
    id: u64,
    active: Cell<bool>,
    f: Box<dyn Fn()>,
    scheduler: RefCell<Option<Rc<dyn Fn()>>>,
    /// Marks effects backing computed values; they fire before plain
    /// effects so downstream readers observe fresh results.
    computed: Cell<bool>,
    allow_recurse: Cell<bool>,
    defer_stop: Cell<bool>,
    on_stop: RefCell<Option<Box<dyn FnOnce()>>>,
    deps: RefCell<SmallVec<[Rc<Dep>; 8]>>,
    /// The effect that was running when this one started, for nested runs
    /// and self-recursion detection.
    parent: RefCell<Option<Rc<EffectInner>>>,
}

impl EffectInner {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    pub fn is_computed(&self) -> bool {
        self.computed.get()
    }

    pub fn allows_recurse(&self) -> bool {
        self.allow_recurse.get()
    }
}

/// A re-runnable tracked computation.
///
/// Creating the effect does not run it; call [`run`](Self::run) (or use
/// the [`effect`] helper, which runs immediately). Cloning shares state.
#[derive(Clone)]
pub struct ReactiveEffect {
    inner: Rc<EffectInner>,
}

impl ReactiveEffect {
    /// Create a new effect around `f`, registered with the active effect
    /// scope if one exists.
    pub fn new<F: Fn() + 'static>(f: F) -> Self {
        let effect = Self {
            inner: Rc::new(EffectInner {
                id: next_effect_id(),
                active: Cell::new(true),
                f: Box::new(f),
                scheduler: RefCell::new(None),
                computed: Cell::new(false),
                allow_recurse: Cell::new(false),
                defer_stop: Cell::new(false),
                on_stop: RefCell::new(None),
                deps: RefCell::new(SmallVec::new()),
                parent: RefCell::new(None),
            }),
        };
        record_effect_to_active_scope(&effect);
        effect
    }

    /// Create an effect whose triggers invoke `scheduler` instead of
    /// re-running the closure synchronously.
    pub fn with_scheduler<F, S>(f: F, scheduler: S) -> Self
    where
        F: Fn() + 'static,
        S: Fn() + 'static,
    {
        let effect = Self::new(f);
        effect.set_scheduler(scheduler);
        effect
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn inner(&self) -> &Rc<EffectInner> {
        &self.inner
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    pub fn set_scheduler<S: Fn() + 'static>(&self, scheduler: S) {
        *self.inner.scheduler.borrow_mut() = Some(Rc::new(scheduler));
    }

    pub fn set_allow_recurse(&self, allowed: bool) {
        self.inner.allow_recurse.set(allowed);
    }

    pub(crate) fn set_computed_marker(&self, computed: bool) {
        self.inner.computed.set(computed);
    }

    /// Register a callback invoked once when the effect is stopped.
    pub fn set_on_stop<F: FnOnce() + 'static>(&self, on_stop: F) {
        *self.inner.on_stop.borrow_mut() = Some(Box::new(on_stop));
    }

    /// Number of deps currently subscribed to.
    pub fn dep_count(&self) -> usize {
        self.inner.deps.borrow().len()
    }

    /// Execute the effect, collecting its dependencies.
    ///
    /// A stopped effect runs its closure untracked. Re-entering an effect
    /// already on the run stack is a no-op.
    pub fn run(&self) {
        let inner = &self.inner;
        if !inner.active.get() {
            return (inner.f)();
        }

        // Ignore a run request for an effect already on the stack.
        let mut parent = current_effect();
        while let Some(p) = parent {
            if Rc::ptr_eq(&p, inner) {
                return;
            }
            parent = p.parent.borrow().clone();
        }

        let _guard = RunGuard::enter(inner);

        let depth = EFFECT_TRACK_DEPTH.with(|d| d.get());
        if depth <= MAX_MARKER_BITS {
            init_dep_markers(inner);
        } else {
            cleanup_effect(inner);
        }

        (inner.f)();
    }

    /// Stop the effect: sever every dep link and deactivate it.
    ///
    /// Stopping an effect from inside its own run defers the cleanup to
    /// the end of that run.
    pub fn stop(&self) {
        let inner = &self.inner;
        let running_self =
            current_effect().is_some_and(|active| Rc::ptr_eq(&active, inner));
        if running_self {
            inner.defer_stop.set(true);
        } else if inner.active.get() {
            cleanup_effect(inner);
            if let Some(on_stop) = inner.on_stop.borrow_mut().take() {
                on_stop();
            }
            inner.active.set(false);
        }
    }
}

/// Restores the run stack and tracking state when an effect run unwinds,
/// and finalizes dep markers for the level that is ending.
struct RunGuard {
    inner: Rc<EffectInner>,
    prev_should_track: bool,
}

impl RunGuard {
    fn enter(inner: &Rc<EffectInner>) -> Self {
        let prev_active = ACTIVE_EFFECT
            .with(|active| active.borrow_mut().replace(Rc::clone(inner)));
        *inner.parent.borrow_mut() = prev_active;

        let prev_should_track = SHOULD_TRACK.with(|t| t.replace(true));

        let depth = EFFECT_TRACK_DEPTH.with(|d| {
            let depth = d.get() + 1;
            d.set(depth);
            depth
        });
        TRACK_OP_BIT.with(|bit| bit.set(1 << depth.min(31)));

        Self {
            inner: Rc::clone(inner),
            prev_should_track,
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let depth = EFFECT_TRACK_DEPTH.with(|d| d.get());
        if depth <= MAX_MARKER_BITS {
            finalize_dep_markers(&self.inner);
        }

        EFFECT_TRACK_DEPTH.with(|d| d.set(depth - 1));
        TRACK_OP_BIT.with(|bit| bit.set(1 << (depth - 1).min(31)));

        let parent = self.inner.parent.borrow_mut().take();
        ACTIVE_EFFECT.with(|active| *active.borrow_mut() = parent);
        SHOULD_TRACK.with(|t| t.set(self.prev_should_track));

        if self.inner.defer_stop.get() {
            self.inner.defer_stop.set(false);
            ReactiveEffect {
                inner: Rc::clone(&self.inner),
            }
            .stop();
        }
    }
}

/// Remove the effect from every dep it subscribes to.
fn cleanup_effect(inner: &EffectInner) {
    let mut deps = inner.deps.borrow_mut();
    for dep in deps.iter() {
        dep.delete(inner.id);
    }
    deps.clear();
}

/// Mark every currently held dep as "was tracked" for this run's level.
fn init_dep_markers(inner: &EffectInner) {
    let bit = TRACK_OP_BIT.with(|b| b.get());
    for dep in inner.deps.borrow().iter() {
        dep.mark_was_tracked(bit);
    }
}

/// Drop deps that were held before the run but not re-read during it, and
/// clear this level's marker bits.
fn finalize_dep_markers(inner: &EffectInner) {
    let bit = TRACK_OP_BIT.with(|b| b.get());
    let mut deps = inner.deps.borrow_mut();
    let mut kept = 0;
    for i in 0..deps.len() {
        let dep = Rc::clone(&deps[i]);
        if dep.was_tracked(bit) && !dep.new_tracked(bit) {
            dep.delete(inner.id);
        } else {
            deps.swap(kept, i);
            kept += 1;
        }
        dep.clear_markers(bit);
    }
    deps.truncate(kept);
}

/// The effect currently collecting dependencies, if any.
pub fn current_effect() -> Option<Rc<EffectInner>> {
    ACTIVE_EFFECT.with(|active| active.borrow().clone())
}

/// Whether reads should currently register dependencies.
pub fn is_tracking() -> bool {
    SHOULD_TRACK.with(|t| t.get()) && ACTIVE_EFFECT.with(|a| a.borrow().is_some())
}

/// Temporarily pause dependency tracking.
pub fn pause_tracking() {
    SHOULD_TRACK.with(|t| {
        TRACK_STACK.with(|stack| stack.borrow_mut().push(t.get()));
        t.set(false);
    });
}

/// Re-enable dependency tracking (if it was paused).
pub fn enable_tracking() {
    SHOULD_TRACK.with(|t| {
        TRACK_STACK.with(|stack| stack.borrow_mut().push(t.get()));
        t.set(true);
    });
}

/// Restore the previous tracking state.
pub fn reset_tracking() {
    let last = TRACK_STACK.with(|stack| stack.borrow_mut().pop());
    SHOULD_TRACK.with(|t| t.set(last.unwrap_or(true)));
}

/// Record that the current effect read `key` of `target`.
///
/// No-op unless tracking is enabled and an effect is running. The dep for
/// the key is created lazily in the target's own dep table.
pub fn track(target: &RawObj, key: DepKey) {
    if !is_tracking() {
        return;
    }
    let dep = {
        let mut deps = target.deps().borrow_mut();
        Rc::clone(deps.entry(key).or_insert_with(Dep::new))
    };
    track_effects(&dep);
}

/// Record the current effect into `dep` directly (used by cells and
/// computed values, which own their dep).
pub fn track_effects(dep: &Rc<Dep>) {
    if !is_tracking() {
        return;
    }
    let Some(effect) = current_effect() else {
        return;
    };

    let depth = EFFECT_TRACK_DEPTH.with(|d| d.get());
    let should_track = if depth <= MAX_MARKER_BITS {
        let bit = TRACK_OP_BIT.with(|b| b.get());
        if !dep.new_tracked(bit) {
            dep.mark_new_tracked(bit);
            // Already present from the previous run at this level; the
            // marker alone keeps it alive through finalization.
            !dep.was_tracked(bit)
        } else {
            false
        }
    } else {
        // Past the marker depth: fall back to a linear membership check.
        !dep.has(effect.id())
    };

    if should_track {
        dep.add(&effect);
        effect.deps.borrow_mut().push(Rc::clone(dep));
    }
}

/// Fire the effects affected by a mutation of `target`.
///
/// `new_len` accompanies explicit list-length writes and selects which
/// index deps fall beyond the new length.
pub fn trigger(target: &RawObj, op: TriggerOp, key: Option<DepKey>, new_len: Option<usize>) {
    let mut to_fire: Vec<Rc<Dep>> = Vec::new();
    {
        let deps_map = target.deps().borrow();
        if deps_map.is_empty() {
            // Never been tracked.
            return;
        }

        if op == TriggerOp::Clear {
            // Collection cleared: every dep of the target fires.
            to_fire.extend(deps_map.values().cloned());
        } else if matches!(key, Some(DepKey::Length)) {
            // Explicit length shrink: the length dep plus every index at
            // or beyond the new length.
            let new_len = new_len.unwrap_or(0);
            for (dep_key, dep) in deps_map.iter() {
                match dep_key {
                    DepKey::Length => to_fire.push(Rc::clone(dep)),
                    DepKey::Index(i) if *i >= new_len => to_fire.push(Rc::clone(dep)),
                    _ => {}
                }
            }
        } else {
            if let Some(key) = &key {
                if let Some(dep) = deps_map.get(key) {
                    to_fire.push(Rc::clone(dep));
                }
            }

            let kind = target.kind();
            match op {
                TriggerOp::Add => {
                    if kind != ObjKind::List {
                        // Enumeration results change on key addition.
                        if let Some(dep) = deps_map.get(&DepKey::Iterate) {
                            to_fire.push(Rc::clone(dep));
                        }
                        if kind == ObjKind::Dict {
                            if let Some(dep) = deps_map.get(&DepKey::MapKeyIterate) {
                                to_fire.push(Rc::clone(dep));
                            }
                        }
                    } else if matches!(key, Some(DepKey::Index(_))) {
                        // New index added to a list: the length changed.
                        if let Some(dep) = deps_map.get(&DepKey::Length) {
                            to_fire.push(Rc::clone(dep));
                        }
                    }
                }
                TriggerOp::Delete => {
                    if kind != ObjKind::List {
                        if let Some(dep) = deps_map.get(&DepKey::Iterate) {
                            to_fire.push(Rc::clone(dep));
                        }
                        if kind == ObjKind::Dict {
                            if let Some(dep) = deps_map.get(&DepKey::MapKeyIterate) {
                                to_fire.push(Rc::clone(dep));
                            }
                        }
                    }
                }
                TriggerOp::Set => {
                    // Dict iteration observes values, not just keys.
                    if kind == ObjKind::Dict {
                        if let Some(dep) = deps_map.get(&DepKey::Iterate) {
                            to_fire.push(Rc::clone(dep));
                        }
                    }
                }
                TriggerOp::Clear => unreachable!(),
            }
        }
    }

    // Merge into one batch, deduplicating effects reached through
    // multiple deps.
    let mut seen = HashSet::new();
    let mut effects = Vec::new();
    for dep in &to_fire {
        for effect in dep.effects() {
            if seen.insert(effect.id()) {
                effects.push(effect);
            }
        }
    }
    trigger_effects(effects);
}

/// Run or schedule a batch of effects. Computed-backed effects go first so
/// plain effects reading them observe fresh values.
pub fn trigger_effects(effects: Vec<Rc<EffectInner>>) {
    for effect in effects.iter().filter(|e| e.is_computed()) {
        trigger_effect(effect);
    }
    for effect in effects.iter().filter(|e| !e.is_computed()) {
        trigger_effect(effect);
    }
}

fn trigger_effect(effect: &Rc<EffectInner>) {
    let is_self =
        current_effect().is_some_and(|active| Rc::ptr_eq(&active, effect));
    if is_self && !effect.allows_recurse() {
        return;
    }
    let scheduler = effect.scheduler.borrow().clone();
    match scheduler {
        Some(scheduler) => scheduler(),
        None => ReactiveEffect {
            inner: Rc::clone(effect),
        }
        .run(),
    }
}

/// A stoppable handle to a running effect.
pub struct EffectRunner {
    effect: ReactiveEffect,
}

impl EffectRunner {
    /// Re-run the effect manually.
    pub fn run(&self) {
        self.effect.run();
    }

    /// Stop the effect.
    pub fn stop(&self) {
        self.effect.stop();
    }

    pub fn effect(&self) -> &ReactiveEffect {
        &self.effect
    }
}

/// Register `f` as a tracked computation and run it once immediately.
/// Re-runs whenever any observed value it read is mutated.
pub fn effect<F: Fn() + 'static>(f: F) -> EffectRunner {
    let effect = ReactiveEffect::new(f);
    effect.run();
    EffectRunner { effect }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
