//! Trellis Core
//!
//! This crate provides the core runtime for the Trellis reactive UI
//! framework. It implements:
//!
//! - Reactive primitives (observed objects, cells, computed values,
//!   effects)
//! - Fine-grained dependency tracking with precise invalidation
//! - A batched, priority-ordered update scheduler
//! - A virtual-tree reconciler with keyed diffing and move minimization
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: observable values and automatic dependency tracking
//! - `scheduler`: the tick-batched job queue driving deferred re-runs
//! - `render`: vnodes, component instances, and the patch engine
//! - `error`: errors routed to the embedder's error handler
//!
//! Template compilation, concrete host backends, and render-orchestration
//! policy live outside this crate; the render layer reaches its backend
//! exclusively through the [`render::HostOps`] contract.
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::reactive::{cell, effect, Value};
//!
//! let count = cell(0);
//!
//! let watcher = count.clone();
//! effect(move || {
//!     println!("count: {:?}", watcher.value());
//! });
//!
//! count.set_value(5);
//! // Effect automatically re-runs, prints: "count: 5"
//! ```

pub mod error;
pub mod reactive;
pub mod render;
pub mod scheduler;
