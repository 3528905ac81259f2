//! # Parallel orchestration and supervised background launch.
//!
//! ## Shapes
//! ```text
//! run_parallel_scopes(scope, bodies)
//!   body[0] body[1] ... body[N-1]        (one child scope each, JoinSet)
//!      └── first failure ──► cancel remaining siblings (reason = the failure)
//!                            wait for every teardown, return the failure
//!
//! launch_background_scope(scope, body)   (spawned, not awaited by the caller)
//!      └── parent teardown ──► cancel(scope-leaving) + join
//!      └── failures land in the launch-site supervisor (logged), never on an
//!          unrelated call stack
//!
//! flyingPromise-style fire-and-forget: flying_promise(future)
//!      └── no owning scope; rejection caught and logged where scheduled
//! ```

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::{CancelReason, ScopeError};
use crate::scope::attachment::Attachment;
use crate::scope::cancel::CancelHandle;
use crate::scope::core::{BackgroundChild, Scope};

/// Runs every body in its own child scope under `scope`, concurrently, and
/// waits for all of them to settle.
///
/// If any body fails, the remaining siblings are cancelled with that failure
/// as the reason, their teardown still completes, and the first failure is
/// returned. On success the results come back in body order.
pub async fn run_parallel_scopes<T, F, Fut>(
    scope: &Scope,
    bodies: Vec<F>,
) -> Result<Vec<T>, ScopeError>
where
    T: Send + 'static,
    F: FnOnce(Scope) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<T, ScopeError>> + Send + 'static,
{
    let total = bodies.len();
    let mut set = JoinSet::new();
    let mut handles = Vec::with_capacity(total);

    for (index, body) in bodies.into_iter().enumerate() {
        let (handle, attachment) = Attachment::cancellation(true);
        handles.push(handle);
        let parent = scope.clone();
        set.spawn(async move {
            let result = Scope::create(Some(&parent), vec![attachment], body).await;
            (index, result)
        });
    }

    let mut results: Vec<Option<T>> = std::iter::repeat_with(|| None).take(total).collect();
    let mut first_failure: Option<ScopeError> = None;

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, Ok(value))) => results[index] = Some(value),
            Ok((_, Err(error))) => fail_siblings(&handles, &mut first_failure, error),
            Err(join_error) => fail_siblings(
                &handles,
                &mut first_failure,
                ScopeError::fail(format!("parallel scope panicked: {join_error}")),
            ),
        }
    }

    if let Some(error) = first_failure {
        return Err(error);
    }
    results
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| ScopeError::invalid_state("parallel scope produced no result"))
}

fn fail_siblings(
    handles: &[CancelHandle],
    first_failure: &mut Option<ScopeError>,
    error: ScopeError,
) {
    if first_failure.is_some() {
        return;
    }
    let reason = CancelReason::new(format!("sibling scope failed: {error}"));
    for handle in handles {
        handle.cancel(reason.clone());
    }
    *first_failure = Some(error);
}

/// Starts a child scope the caller does not await.
///
/// The child's cell does not inherit the parent's cancellation; instead the
/// parent's teardown cancels it with a scope-leaving reason and joins it, so
/// the parent never exits while the child is alive. A body failure is consumed
/// by the supervisor here: a scope-leaving cancellation is expected and
/// silent, anything else is logged. Nothing ever propagates to an unrelated
/// call stack.
///
/// The returned [`CancelHandle`] allows cancelling the child early (or
/// escalating a failure into cancelling a wider scope at the call site).
pub fn launch_background_scope<F, Fut>(scope: &Scope, body: F) -> CancelHandle
where
    F: FnOnce(Scope) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<(), ScopeError>> + Send + 'static,
{
    let (handle, attachment) = Attachment::cancellation(false);
    let parent = scope.clone();
    let leaving = CancelReason::scope_leaving();
    let task = tokio::spawn(async move {
        match Scope::create(Some(&parent), vec![attachment], body).await {
            Ok(()) => {}
            Err(ScopeError::Cancelled { reason }) if reason == leaving => {}
            Err(error) => {
                tracing::error!(error = %error, label = error.as_label(), "background scope failed");
            }
        }
    });
    scope.push_background_child(BackgroundChild {
        cancel: handle.clone(),
        handle: task,
    });
    handle
}

/// Schedules a future with no owning scope and no awaiting caller.
///
/// Best-effort bootstrap side effects only. A rejection is caught and logged
/// right here, where it was scheduled.
pub fn flying_promise<F>(future: F)
where
    F: std::future::Future<Output = Result<(), ScopeError>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(error) = future.await {
            tracing::error!(error = %error, label = error.as_label(), "flying promise failed");
        }
    });
}

/// Runs `body` in a child scope that also receives its own [`CancelHandle`].
///
/// A cancellation the body inflicted on itself is swallowed and reported as
/// `Ok(None)`; cancellations inherited from `scope` (and every other error)
/// propagate unchanged.
pub async fn run_cancellable_scope<T, F, Fut>(
    scope: &Scope,
    body: F,
) -> Result<Option<T>, ScopeError>
where
    F: FnOnce(Scope, CancelHandle) -> Fut,
    Fut: std::future::Future<Output = Result<T, ScopeError>>,
{
    let (handle, attachment) = Attachment::cancellation(true);
    let own = handle.clone();
    let result = Scope::create(Some(scope), vec![attachment], move |child| body(child, own)).await;
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ScopeError::Cancelled { reason })
            if handle.cancel_reason().as_ref() == Some(&reason)
                && scope.cancel_reason().as_ref() != Some(&reason) =>
        {
            Ok(None)
        }
        Err(error) => Err(error),
    }
}

/// Concurrency-limited parallel map: every item gets its own child scope, at
/// most `limit` transforms run at once, results come back in input order, and
/// the first failure cancels the rest (see [`run_parallel_scopes`]).
pub async fn transform_concurrent<In, Out, F, Fut>(
    scope: &Scope,
    items: Vec<In>,
    limit: usize,
    transform: F,
) -> Result<Vec<Out>, ScopeError>
where
    In: Send + 'static,
    Out: Send + 'static,
    F: Fn(Scope, In) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Out, ScopeError>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let transform = Arc::new(transform);
    let bodies: Vec<_> = items
        .into_iter()
        .map(|item| {
            let semaphore = Arc::clone(&semaphore);
            let transform = Arc::clone(&transform);
            move |child: Scope| async move {
                let token = child.cancel_token()?;
                let _permit = tokio::select! {
                    permit = semaphore.acquire_owned() => permit
                        .map_err(|_| ScopeError::invalid_state("concurrency limiter closed"))?,
                    reason = token.cancelled() => return Err(ScopeError::cancelled(reason)),
                };
                (*transform)(child, item).await
            }
        })
        .collect();
    run_parallel_scopes(scope, bodies).await
}
