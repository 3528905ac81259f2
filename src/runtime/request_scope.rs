//! # Request scope bridge.
//!
//! Adapts a call-per-invocation serving model (one handler invocation at a
//! time, no process entry point of its own) onto a single shared root scope.
//!
//! ```text
//! run_request_scope(body)                       (any number of concurrent calls)
//!   ├─► first caller, exactly once (race-safe):
//!   │     flying_promise ──► run_main_scope:
//!   │        publish global Scope handle, then sleep_until_cancel
//!   │        (keeps the root alive for the life of the process)
//!   ├─► per call: SignalController<ValueOrError<T>>
//!   │     launch_background_scope(global) ──► body(scope) ──► emit(outcome)
//!   └─► wait_until_ready(global), unwrap the outcome
//! ```
//!
//! ## Isolation guarantees
//! - A request body's failure (or internal cancellation) reaches only its own
//!   caller; the global scope and sibling requests are untouched.
//! - Only cancellation of the global scope itself (process shutdown) cancels
//!   in-flight requests, and a request still waiting at that moment fails
//!   with a cancellation error instead of hanging.

use tokio::sync::{OnceCell, watch};

use crate::error::{ScopeError, ValueOrError};
use crate::runtime::main_scope::run_main_scope;
use crate::scope::{Scope, flying_promise, launch_background_scope, sleep_until_cancel};
use crate::sync::SignalController;

/// The process-wide root scope shared by all bridged requests.
static GLOBAL_SCOPE: OnceCell<Scope> = OnceCell::const_new();

async fn global_scope() -> Result<Scope, ScopeError> {
    GLOBAL_SCOPE
        .get_or_try_init(|| async {
            let (tx, mut rx) = watch::channel(None::<Scope>);
            flying_promise(async move {
                run_main_scope(|scope, _cancel| async move {
                    let _ = tx.send(Some(scope.clone()));
                    sleep_until_cancel(&scope).await?;
                    Ok(())
                })
                .await
            });
            let result = rx
                .wait_for(|slot| slot.is_some())
                .await
                .map_err(|_| ScopeError::invalid_state("global scope failed to start"))?
                .clone()
                .ok_or_else(|| ScopeError::invalid_state("global scope failed to start"));
            result
        })
        .await
        .map(Scope::clone)
}

/// Runs `body` in its own child scope under the lazily-initialized global
/// root scope and returns its outcome to this caller only.
pub async fn run_request_scope<T, F, Fut>(body: F) -> Result<T, ScopeError>
where
    T: Clone + Send + Sync + 'static,
    F: FnOnce(Scope) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<T, ScopeError>> + Send + 'static,
{
    let global = global_scope().await?;
    let controller = SignalController::<ValueOrError<T>>::new();
    let emitter = controller.clone();
    launch_background_scope(&global, move |scope| async move {
        let outcome = body(scope).await;
        let _ = emitter.emit(outcome);
        Ok(())
    });
    controller.wait_until_ready(&global).await?
}
