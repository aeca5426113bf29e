//! Reactive Primitives
//!
//! This module implements the observable data system: dynamic values,
//! dependency sets, effects, and the accessor layer that ties them
//! together.
//!
//! # Concepts
//!
//! ## Observed objects
//!
//! Wrapping an object with [`observe`] yields a handle whose reads
//! register the running computation as a subscriber and whose writes
//! notify subscribers. Nested objects wrap lazily on access; collections
//! (dicts and sets) are instrumented at the method level.
//!
//! ## Effects
//!
//! An [`effect`] is a computation that re-runs whenever any observed
//! value it read is mutated. Dependency collection is automatic: whatever
//! the closure actually reads on a given run is exactly what it is
//! subscribed to afterwards.
//!
//! ## Cells and computed values
//!
//! A [`cell`] is standalone reactive state; a [`Computed`] is a cached,
//! lazily evaluated derivation.
//!
//! # Implementation Notes
//!
//! The running effect lives in a thread-local stack, so reads can find
//! their subscriber without any plumbing. Writes resolve the affected
//! dependency sets and fire them synchronously - or through each
//! effect's scheduler, which is how the render layer batches re-runs.

mod cell;
mod collections;
mod dep;
mod effect;
mod observe;
mod scope;
mod value;

pub use cell::{cell, Computed};
pub use dep::Dep;
pub use effect::{
    current_effect, effect, enable_tracking, is_tracking, pause_tracking,
    reset_tracking, track, track_effects, trigger, trigger_effects, EffectInner,
    EffectRunner, ReactiveEffect, TriggerOp, MAX_MARKER_BITS,
};
pub use observe::{frozen, frozen_shallow, observe, observe_shallow};
pub use scope::EffectScope;
pub use value::{DepKey, Mode, ObjData, ObjKind, ObjRef, PropKey, RawObj, Value};
