//! # Scope: tree node bounding attachment and task lifetime.
//!
//! A [`Scope`] owns the attachments registered when it was created and the
//! background children launched under it; it carries the nearest cancellation
//! cell (its own or an ancestor's). Handles are cheap clones over a shared
//! inner; the parent link is weak and used only for state queries, so no
//! ownership cycle exists.
//!
//! ## Lifecycle of one `create` call
//! ```text
//! Scope::create(parent, attachments, body)
//!   ├─► install attachments, in order
//!   │     ├─ cancellation: adopt cell, link parent cell if inheriting
//!   │     ├─ timeout: inheriting cell + deadline timer
//!   │     └─ teardown: queue exit hook
//!   ├─► run body(scope)            (Ok / Err / panic / cancelled mid-flight)
//!   └─► teardown, always, before returning:
//!         ├─ cancel + join background children
//!         ├─ run exit hooks in reverse registration order
//!         └─ drop callback registrations held on ancestor cells
//! ```
//!
//! ## Rules
//! - Attachments are fixed at creation time; nothing is installed after the
//!   body starts.
//! - Teardown order is exactly the reverse of registration order, regardless
//!   of how the body settled.
//! - Cancellation never preempts the body; it flips state, fires callbacks,
//!   and wakes suspension points. The body observes and exits.
//! - A scope that already exited refuses new children.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures::FutureExt;
use tokio::task::JoinHandle;

use crate::error::{CancelReason, ScopeError};
use crate::scope::attachment::{Attachment, AttachmentKind, TeardownFn};
use crate::scope::cancel::{CancelCell, CancelHandle, CancelToken, ScopeState};

/// Global scope id counter.
static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(0);

/// A supervised background scope to drive down at parent exit.
pub(crate) struct BackgroundChild {
    pub(crate) cancel: CancelHandle,
    pub(crate) handle: JoinHandle<()>,
}

struct ScopeInner {
    id: u64,
    parent: Weak<ScopeInner>,
    cancel: Option<Arc<CancelCell>>,
    left: AtomicBool,
    registrations: Arc<Mutex<Vec<(Arc<CancelCell>, u64)>>>,
    children: Mutex<Vec<BackgroundChild>>,
}

/// A node in the cancellation/ownership tree.
///
/// Every asynchronous operation in a program built on this crate receives a
/// `Scope` as its first argument and must not retain it beyond the call it was
/// given for.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    /// Creates a child scope (or a fresh root when `parent` is `None`),
    /// installs `attachments` in order, runs `body`, and tears everything down
    /// before returning the body's result or re-raising its error.
    ///
    /// Teardown covers every way the body can settle: resolution, an error,
    /// cancellation observed mid-body, or a panic (which resumes after
    /// teardown completes).
    pub async fn create<T, F, Fut>(
        parent: Option<&Scope>,
        attachments: Vec<Attachment>,
        body: F,
    ) -> Result<T, ScopeError>
    where
        F: FnOnce(Scope) -> Fut,
        Fut: std::future::Future<Output = Result<T, ScopeError>>,
    {
        if let Some(parent) = parent {
            if parent.inner.left.load(Ordering::SeqCst) {
                return Err(ScopeError::invalid_state(
                    "cannot create a child of a scope that already exited",
                ));
            }
        }

        let parent_cell = parent.and_then(|p| p.inner.cancel.clone());
        let mut cell = parent_cell;
        let mut exit_hooks: Vec<TeardownFn> = Vec::new();
        let mut links: Vec<(Arc<CancelCell>, u64)> = Vec::new();

        for attachment in attachments {
            match attachment.kind {
                AttachmentKind::Cancellation { cell: own, inherit } => {
                    if inherit {
                        link_cells(&mut links, cell.as_ref(), &own);
                    }
                    cell = Some(own);
                }
                AttachmentKind::Timeout { after } => {
                    let own = CancelCell::new();
                    link_cells(&mut links, cell.as_ref(), &own);
                    let timer_cell = Arc::clone(&own);
                    let timer = tokio::spawn(async move {
                        tokio::select! {
                            _ = tokio::time::sleep(after) => {
                                CancelCell::cancel(&timer_cell, CancelReason::timeout(after));
                            }
                            _ = timer_cell.cancelled() => {}
                        }
                    });
                    exit_hooks.push(Box::new(move || {
                        timer.abort();
                        futures::future::ready(()).boxed()
                    }));
                    cell = Some(own);
                }
                AttachmentKind::Teardown { action } => exit_hooks.push(action),
            }
        }

        let scope = Scope {
            inner: Arc::new(ScopeInner {
                id: NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed),
                parent: parent
                    .map(|p| Arc::downgrade(&p.inner))
                    .unwrap_or_else(Weak::new),
                cancel: cell,
                left: AtomicBool::new(false),
                registrations: Arc::new(Mutex::new(links)),
                children: Mutex::new(Vec::new()),
            }),
        };

        let result = std::panic::AssertUnwindSafe(body(scope.clone()))
            .catch_unwind()
            .await;

        let children = std::mem::take(&mut *scope.inner.children.lock().unwrap());
        let leaving = CancelReason::scope_leaving();
        for child in &children {
            child.cancel.cancel(leaving.clone());
        }
        for child in children {
            let _ = child.handle.await;
        }

        while let Some(hook) = exit_hooks.pop() {
            hook().await;
        }

        for (cell, id) in scope.inner.registrations.lock().unwrap().drain(..) {
            cell.remove(id);
        }
        scope.inner.left.store(true, Ordering::SeqCst);

        match result {
            Ok(outcome) => outcome,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Unique id of this scope.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The parent scope, while it is still alive. Non-owning; for state
    /// queries only.
    pub fn parent(&self) -> Option<Scope> {
        self.inner.parent.upgrade().map(|inner| Scope { inner })
    }

    /// Cancellation state of the nearest cancellation-capable scope, or
    /// [`ScopeState::Active`] when no such attachment exists.
    pub fn state(&self) -> ScopeState {
        match &self.inner.cancel {
            Some(cell) => cell.state(),
            None => ScopeState::Active,
        }
    }

    /// True once the nearest cancellation cell has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner
            .cancel
            .as_ref()
            .is_some_and(|cell| cell.is_cancelled())
    }

    /// The recorded cancellation reason, if any.
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.inner.cancel.as_ref().and_then(|cell| cell.reason())
    }

    /// Returns the token of the nearest cancellation-capable scope.
    ///
    /// Fails with [`ScopeError::InvalidState`] when neither this scope nor an
    /// ancestor installed a cancellation attachment.
    pub fn cancel_token(&self) -> Result<CancelToken, ScopeError> {
        match &self.inner.cancel {
            Some(cell) => Ok(CancelToken {
                cell: Arc::clone(cell),
                registrations: Arc::clone(&self.inner.registrations),
            }),
            None => Err(ScopeError::invalid_state(
                "no cancellation attachment on this scope or any ancestor",
            )),
        }
    }

    pub(crate) fn push_background_child(&self, child: BackgroundChild) {
        if self.inner.left.load(Ordering::SeqCst) {
            child.cancel.cancel(CancelReason::scope_leaving());
            return;
        }
        let mut children = self.inner.children.lock().unwrap();
        // Long-lived scopes (the request bridge's root) launch children for
        // the whole process life; keep only the ones still running.
        children.retain(|existing| !existing.handle.is_finished());
        children.push(child);
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scope[{}]", self.inner.id)
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Registers downward propagation from `parent` into `child`, recording the
/// registration for removal at scope exit. A parent already cancelled still
/// propagates, via the next-tick scheduling of `on_cancel`.
fn link_cells(
    links: &mut Vec<(Arc<CancelCell>, u64)>,
    parent: Option<&Arc<CancelCell>>,
    child: &Arc<CancelCell>,
) {
    let Some(parent) = parent else {
        return;
    };
    let target = Arc::clone(child);
    if let Some(id) = parent.on_cancel(Box::new(move |reason| {
        CancelCell::cancel(&target, reason);
    })) {
        links.push((Arc::clone(parent), id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::time::sleep_until_cancel;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Attachment) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let make = move |label: &'static str| {
            let sink = Arc::clone(&sink);
            Attachment::teardown(move || async move {
                sink.lock().unwrap().push(label);
            })
        };
        (log, make)
    }

    #[tokio::test]
    async fn test_teardown_is_reverse_of_registration_on_success() {
        let (log, make) = recorder();
        let value = Scope::create(
            None,
            vec![make("first"), make("second"), make("third")],
            |_scope| async move { Ok(42) },
        )
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(*log.lock().unwrap(), vec!["third", "second", "first"]);
    }

    #[tokio::test]
    async fn test_teardown_is_reverse_of_registration_on_error() {
        let (log, make) = recorder();
        let result: Result<(), _> =
            Scope::create(None, vec![make("a"), make("b")], |_scope| async move {
                Err(ScopeError::fail("boom"))
            })
            .await;

        assert_eq!(result, Err(ScopeError::fail("boom")));
        assert_eq!(*log.lock().unwrap(), vec!["b", "a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_runs_on_mid_body_cancellation() {
        let (log, make) = recorder();
        let (handle, cancellation) = Attachment::cancellation(true);
        let canceller = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel(CancelReason::new("X"));
        });

        let started = tokio::time::Instant::now();
        let result: Result<(), _> =
            Scope::create(None, vec![cancellation, make("cleanup")], |scope| async move {
                let reason = sleep_until_cancel(&scope).await?;
                Err(ScopeError::cancelled(reason))
            })
            .await;

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(10), "resumed too early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(100), "resumed too late: {elapsed:?}");
        assert_eq!(
            result.unwrap_err().cancel_reason().map(|r| r.message().to_string()),
            Some("X".to_string())
        );
        assert_eq!(*log.lock().unwrap(), vec!["cleanup"]);
    }

    #[tokio::test]
    async fn test_exited_scope_refuses_new_children() {
        let escaped: Arc<Mutex<Option<Scope>>> = Arc::new(Mutex::new(None));
        let stash = Arc::clone(&escaped);
        Scope::create(None, vec![], |scope| async move {
            *stash.lock().unwrap() = Some(scope);
            Ok(())
        })
        .await
        .unwrap();

        let stale = escaped.lock().unwrap().take().unwrap();
        let result = Scope::create(Some(&stale), vec![], |_scope| async move { Ok(()) }).await;
        assert!(matches!(result, Err(ScopeError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_child_reaches_cancelled_promptly_after_parent() {
        let (parent_handle, parent_attachment) = Attachment::cancellation(true);
        let canceller = parent_handle.clone();

        Scope::create(None, vec![parent_attachment], |parent| async move {
            let (child_handle, child_attachment) = Attachment::cancellation(true);
            Scope::create(Some(&parent), vec![child_attachment], |child| async move {
                canceller.cancel(CancelReason::new("parent going down"));
                let reason = sleep_until_cancel(&child).await?;
                assert_eq!(reason.message(), "parent going down");
                Ok(())
            })
            .await?;

            // Downward propagation only: the child handle saw the reason.
            assert_eq!(
                child_handle.cancel_reason().map(|r| r.message().to_string()),
                Some("parent going down".to_string())
            );
            Ok(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_token_requires_capability() {
        Scope::create(None, vec![], |scope| async move {
            assert!(matches!(
                scope.cancel_token(),
                Err(ScopeError::InvalidState { .. })
            ));
            Ok(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_child_inherits_nearest_token() {
        let (_handle, cancellation) = Attachment::cancellation(true);
        Scope::create(None, vec![cancellation], |parent| async move {
            let parent_id = parent.id();
            Scope::create(Some(&parent), vec![], move |child| async move {
                assert!(child.cancel_token().is_ok());
                assert_eq!(child.parent().map(|p| p.id()), Some(parent_id));
                Ok(())
            })
            .await
        })
        .await
        .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_attachment_cancels_with_timeout_reason() {
        let started = tokio::time::Instant::now();
        let result: Result<(), _> = Scope::create(
            None,
            vec![Attachment::timeout(Duration::from_millis(50))],
            |scope| async move {
                let reason = sleep_until_cancel(&scope).await?;
                Err(ScopeError::cancelled(reason))
            },
        )
        .await;

        assert!(started.elapsed() >= Duration::from_millis(50));
        let err = result.unwrap_err();
        assert!(
            err.cancel_reason().unwrap().message().contains("timed out"),
            "unexpected reason: {err}"
        );
    }

    #[tokio::test]
    async fn test_timeout_timer_dropped_on_normal_exit() {
        let value = Scope::create(
            None,
            vec![Attachment::timeout(Duration::from_secs(3600))],
            |_scope| async move { Ok("done") },
        )
        .await
        .unwrap();
        assert_eq!(value, "done");
    }

    #[tokio::test]
    async fn test_token_on_cancel_fires_with_reason() {
        let (handle, cancellation) = Attachment::cancellation(true);
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        Scope::create(None, vec![cancellation], |scope| async move {
            scope.cancel_token()?.on_cancel(move |reason| {
                sink.lock().unwrap().push(reason.message().to_string());
            });
            handle.cancel(CancelReason::new("observed"));
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["observed".to_string()]);
    }

    #[tokio::test]
    async fn test_token_registrations_dropped_at_scope_exit() {
        let fired = Arc::new(AtomicUsize::new(0));
        let in_child = Arc::clone(&fired);
        let (handle, cancellation) = Attachment::cancellation(true);

        Scope::create(None, vec![cancellation], |parent| async move {
            Scope::create(Some(&parent), vec![], |child| async move {
                let counter = Arc::clone(&in_child);
                child.cancel_token()?.on_cancel(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
                Ok(())
            })
            .await?;

            handle.cancel(CancelReason::new("after the child left"));
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_already_cancelled_parent_propagates_into_new_child() {
        let (handle, parent_attachment) = Attachment::cancellation(true);
        handle.cancel(CancelReason::new("early"));

        let result: Result<(), _> =
            Scope::create(None, vec![parent_attachment], |parent| async move {
                let (_child_handle, child_attachment) = Attachment::cancellation(true);
                Scope::create(Some(&parent), vec![child_attachment], |child| async move {
                    let reason = sleep_until_cancel(&child).await?;
                    Err(ScopeError::cancelled(reason))
                })
                .await
            })
            .await;

        assert_eq!(
            result.unwrap_err().cancel_reason().map(|r| r.message().to_string()),
            Some("early".to_string())
        );
    }
}
