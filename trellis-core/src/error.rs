//! Runtime Errors
//!
//! Errors raised by user-supplied code (render functions, lifecycle
//! hooks). The core performs no recovery: the reconciler routes these to
//! the externally supplied error handler and carries on reconciling
//! siblings. Internal invariants are `debug_assert!`s, not errors.

use std::rc::Rc;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A render function failed; the failed node is replaced with a
    /// placeholder so sibling reconciliation continues.
    #[error("render function of component `{component}` failed: {message}")]
    Render { component: String, message: String },

    /// A lifecycle hook failed.
    #[error("lifecycle hook `{hook}` failed: {message}")]
    Hook { hook: &'static str, message: String },

    /// A scheduled job failed.
    #[error("scheduler job failed: {message}")]
    Scheduler { message: String },
}

/// Externally supplied error-handling policy.
pub type ErrorHandler = Rc<dyn Fn(&RuntimeError)>;
