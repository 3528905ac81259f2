//! Scope tree: cancellation, attachments, teardown, and orchestration.
//!
//! Internal modules:
//! - [`cancel`]: reason-carrying cancellation cell, tokens, handles;
//! - [`attachment`]: cancellation/timeout/teardown attachments;
//! - [`core`]: the [`Scope`] node and the create/teardown lifecycle;
//! - [`time`]: cancellable sleeps and rate limiting;
//! - [`parallel`]: parallel child scopes, supervised background launch,
//!   fire-and-forget scheduling.

mod attachment;
mod cancel;
mod core;
mod parallel;
mod time;

pub use attachment::Attachment;
pub use cancel::{CancelHandle, CancelToken, ScopeState};
pub use self::core::Scope;
pub use parallel::{
    flying_promise, launch_background_scope, run_cancellable_scope, run_parallel_scopes,
    transform_concurrent,
};
pub use time::{RateLimiter, sleep_for, sleep_until_cancel};
