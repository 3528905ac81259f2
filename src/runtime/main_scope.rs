//! # Root scope lifecycle.
//!
//! [`run_main_scope`] creates the one process-wide root scope, wires OS
//! termination signals to its cancellation, runs the caller's body, and tears
//! down before the result propagates.
//!
//! ```text
//! run_main_scope(body)
//!   ├─► install cancellation attachment, spawn signal listener
//!   ├─► body(scope, cancel)
//!   │     └─ first SIGINT/SIGTERM/SIGQUIT ──► cancel(signal name)
//!   │        (later signals are no-ops: cancel is idempotent)
//!   └─► teardown, then return the body's result
//! ```
//!
//! An error from the body is fatal at process scope: it propagates to the
//! caller after teardown, and a binary entry point is expected to turn it into
//! a non-zero exit status.

use crate::error::{CancelReason, ScopeError};
use crate::runtime::shutdown;
use crate::scope::{Attachment, CancelHandle, Scope};

/// Runs `body` inside the process root scope with OS-signal cancellation.
pub async fn run_main_scope<T, F, Fut>(body: F) -> Result<T, ScopeError>
where
    F: FnOnce(Scope, CancelHandle) -> Fut,
    Fut: std::future::Future<Output = Result<T, ScopeError>>,
{
    let (cancel, attachment) = Attachment::cancellation(true);
    let signal_cancel = cancel.clone();
    let signals = tokio::spawn(async move {
        match shutdown::wait_for_shutdown_signal().await {
            Ok(name) => {
                tracing::info!(signal = name, "received shutdown signal, cancelling the main scope");
                signal_cancel.cancel(CancelReason::new(name));
            }
            Err(error) => {
                tracing::error!(error = %error, "failed to install signal handlers");
            }
        }
    });

    tracing::info!(pid = std::process::id(), "main scope started");
    let result = Scope::create(None, vec![attachment], |scope| body(scope, cancel)).await;
    signals.abort();

    match &result {
        Ok(_) => tracing::info!("main scope ran to completion"),
        Err(error) => tracing::error!(error = %error, label = error.as_label(), "main scope failed"),
    }
    result
}
