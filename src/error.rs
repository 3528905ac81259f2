//! Error types used by the scope runtime and its synchronization primitives.
//!
//! This module defines:
//!
//! - [`CancelReason`] — why a scope was cancelled; cheap to clone and shared
//!   between descendants, callbacks, and waiters.
//! - [`ScopeError`] — errors raised by scope operations and primitives.
//! - [`ValueOrError`] — alias carrying a success payload or a captured error
//!   across an asynchronous boundary (e.g. through a
//!   [`SignalController`](crate::SignalController)) without losing the error.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Why a scope was cancelled.
///
/// Recorded at most once per cancellation cell (the first `cancel` wins) and
/// handed, by clone, to every callback and woken waiter of that cell and its
/// descendants.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CancelReason {
    message: Arc<str>,
}

impl CancelReason {
    /// Creates a reason from an arbitrary message.
    pub fn new(message: impl Into<Arc<str>>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Reason used when a deadline attachment fires.
    pub fn timeout(after: Duration) -> Self {
        Self::new(format!("timed out after {after:?}"))
    }

    /// Reason used when a parent scope tears down its background children.
    pub(crate) fn scope_leaving() -> Self {
        Self::new("parent scope is leaving")
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// # Errors produced by scope operations.
///
/// Application failures travel as [`ScopeError::Fail`] and are propagated
/// unchanged through scope teardown; everything else is raised by the runtime
/// itself.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScopeError {
    /// An operation observed its scope cancelled; carries the original reason.
    #[error("scope cancelled: {reason}")]
    Cancelled {
        /// The reason recorded by the first `cancel` call.
        reason: CancelReason,
    },

    /// A second `emit` on a [`SignalController`](crate::SignalController).
    #[error("signal already emitted")]
    DoubleEmit,

    /// A required capability is missing or the target can no longer accept the
    /// operation (no cancellation attachment, closed queue, exited scope).
    #[error("invalid state: {message}")]
    InvalidState {
        /// What was wrong.
        message: Arc<str>,
    },

    /// Opaque application failure produced by a scope body.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: Arc<str>,
    },
}

impl ScopeError {
    /// Creates a cancellation error from a reason.
    pub fn cancelled(reason: CancelReason) -> Self {
        ScopeError::Cancelled { reason }
    }

    /// Creates an invalid-state error.
    pub fn invalid_state(message: impl Into<Arc<str>>) -> Self {
        ScopeError::InvalidState {
            message: message.into(),
        }
    }

    /// Creates an opaque application failure.
    pub fn fail(error: impl Into<Arc<str>>) -> Self {
        ScopeError::Fail {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ScopeError::Cancelled { .. } => "scope_cancelled",
            ScopeError::DoubleEmit => "signal_double_emit",
            ScopeError::InvalidState { .. } => "invalid_state",
            ScopeError::Fail { .. } => "execution_failed",
        }
    }

    /// True if this error is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ScopeError::Cancelled { .. })
    }

    /// The cancellation reason, if this error is a cancellation.
    pub fn cancel_reason(&self) -> Option<&CancelReason> {
        match self {
            ScopeError::Cancelled { reason } => Some(reason),
            _ => None,
        }
    }
}

/// A success payload or a captured error.
///
/// `Result` is the tagged union this crate uses to move either outcome of a
/// scope body across an asynchronous boundary (typically through a
/// [`SignalController`](crate::SignalController)) without losing the error.
pub type ValueOrError<T> = Result<T, ScopeError>;
