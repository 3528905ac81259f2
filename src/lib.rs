//! # scopevisor
//!
//! **Scopevisor** is a structured-concurrency library for tokio.
//!
//! It provides a tree of cancellation-bearing scopes with deterministic
//! resource teardown, synchronization primitives bound to scope lifetime, and
//! the process/request lifecycles that put one root scope under everything
//! else. The crate performs no network or file I/O of its own; collaborators
//! receive a [`Scope`] and honor its cancellation contract.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!                 run_main_scope (process entry, OS signals)
//!                        │
//!                        ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  root Scope  (cancellation attachment, teardown at exit)          │
//! └──────┬───────────────────────┬───────────────────────┬────────────┘
//!        ▼                       ▼                       ▼
//!  Scope::create(...)     run_parallel_scopes      launch_background_scope
//!  (child per call)       (child per body,         (supervised, joined at
//!        │                 cancel-on-failure)       parent teardown)
//!        ▼
//!  body(scope) ── uses ──► SignalController / BroadcastController /
//!                          HandlingQueue / ResourcePool / sleep_*
//!
//! Cancellation flows down the tree (cancel → descendants); failures flow up
//! only to the failing call's own caller. run_request_scope bridges a
//! call-per-invocation serving model onto one shared root with per-call
//! failure isolation.
//! ```
//!
//! ### Lifecycle of one scope
//! ```text
//! Scope::create(parent, attachments, body)
//!   ├─► install attachments, in order
//!   ├─► run body(scope)
//!   └─► teardown, always, before returning:
//!         cancel + join background children,
//!         run teardown hooks in reverse registration order
//! ```
//!
//! ## Features
//! | Area              | Description                                                       | Key types / functions                               |
//! |-------------------|-------------------------------------------------------------------|-----------------------------------------------------|
//! | **Scopes**        | Cancellation tree with deterministic, reverse-order teardown.     | [`Scope`], [`Attachment`], [`ScopeState`]           |
//! | **Cancellation**  | Reason-carrying, cooperative, idempotent, observer callbacks.     | [`CancelHandle`], [`CancelToken`], [`CancelReason`] |
//! | **Primitives**    | Scope-bound synchronization.                                      | [`SignalController`], [`BroadcastController`], [`HandlingQueue`] |
//! | **Orchestration** | Parallel children, supervised background work, fire-and-forget.   | [`run_parallel_scopes`], [`launch_background_scope`], [`flying_promise`] |
//! | **Lifecycles**    | Process root with OS signals; per-call bridge onto a shared root. | [`run_main_scope`], [`run_request_scope`]           |
//! | **Errors**        | Typed cancellation/state errors; opaque application failures.     | [`ScopeError`], [`ValueOrError`]                    |
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use scopevisor::{Attachment, CancelReason, Scope, ScopeError, sleep_until_cancel};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), ScopeError> {
//!     let (cancel, cancellation) = Attachment::cancellation(true);
//!     let canceller = cancel.clone();
//!     tokio::spawn(async move {
//!         tokio::time::sleep(Duration::from_millis(10)).await;
//!         canceller.cancel(CancelReason::new("done"));
//!     });
//!
//!     let teardown = Attachment::teardown(|| async {
//!         // release resources here; runs exactly once, after the body settles
//!     });
//!
//!     Scope::create(None, vec![cancellation, teardown], |scope| async move {
//!         let reason = sleep_until_cancel(&scope).await?;
//!         assert_eq!(reason.message(), "done");
//!         Ok(())
//!     })
//!     .await
//! }
//! ```

mod error;
mod runtime;
mod scope;
mod sync;

// ---- Public re-exports ----

pub use error::{CancelReason, ScopeError, ValueOrError};
pub use runtime::{run_main_scope, run_request_scope};
pub use scope::{
    Attachment, CancelHandle, CancelToken, RateLimiter, Scope, ScopeState, flying_promise,
    launch_background_scope, run_cancellable_scope, run_parallel_scopes, sleep_for,
    sleep_until_cancel, transform_concurrent,
};
pub use sync::{
    Allocated, BroadcastController, HandlingQueue, ResourcePool, SignalController, Subscription,
};
