//! # Reason-carrying cooperative cancellation.
//!
//! The cancellation cell is the shared state behind a cancellation-capable
//! attachment: it records the reason (first `cancel` wins), wakes every bound
//! waiter through a [`CancellationToken`], and runs registered callbacks off
//! the canceller's stack, in registration order.
//!
//! ## Rules
//! - **First caller wins**: the reason is recorded at most once; later calls
//!   are no-ops, including under concurrent invocation.
//! - **Never inline**: callbacks are scheduled onto the runtime, so `cancel`
//!   never re-enters caller code. Registering on an already-cancelled cell
//!   still schedules the callback (next tick) with the recorded reason.
//! - **Monotonic state**: `Active → Cancelling → Cancelled`, never backwards.
//!   `Cancelling` covers the window between reason recording and callback
//!   completion.
//!
//! Public handles: [`CancelToken`] (observe and react), [`CancelHandle`]
//! (trigger). Both are bound to one cell; a scope without its own cell shares
//! the nearest ancestor's.

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::error::CancelReason;

/// Lifecycle of a cancellation-capable scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ScopeState {
    /// Not cancelled.
    Active,
    /// Reason recorded; callbacks scheduled but not yet finished.
    Cancelling,
    /// Reason recorded and all callbacks registered before cancellation ran.
    Cancelled,
}

pub(crate) type CancelCallback = Box<dyn FnOnce(CancelReason) + Send + 'static>;

/// Shared state of one cancellation-capable attachment.
pub(crate) struct CancelCell {
    token: CancellationToken,
    inner: Mutex<CellInner>,
}

struct CellInner {
    state: ScopeState,
    reason: Option<CancelReason>,
    callbacks: Vec<(u64, CancelCallback)>,
    next_id: u64,
}

impl CancelCell {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            token: CancellationToken::new(),
            inner: Mutex::new(CellInner {
                state: ScopeState::Active,
                reason: None,
                callbacks: Vec::new(),
                next_id: 0,
            }),
        })
    }

    /// Records the reason (first caller wins), wakes waiters, and schedules
    /// callbacks in registration order on a fresh task.
    pub(crate) fn cancel(cell: &Arc<Self>, reason: CancelReason) {
        let callbacks = {
            let mut inner = cell.inner.lock().unwrap();
            if inner.reason.is_some() {
                return;
            }
            inner.reason = Some(reason.clone());
            inner.state = ScopeState::Cancelling;
            std::mem::take(&mut inner.callbacks)
        };
        cell.token.cancel();

        let cell = Arc::clone(cell);
        tokio::spawn(async move {
            for (_, callback) in callbacks {
                callback(reason.clone());
            }
            cell.inner.lock().unwrap().state = ScopeState::Cancelled;
        });
    }

    /// Registers a one-shot callback. Returns the registration id while the
    /// cell is active; on an already-cancelled cell the callback is scheduled
    /// on the next tick instead and `None` is returned.
    pub(crate) fn on_cancel(&self, callback: CancelCallback) -> Option<u64> {
        let mut inner = self.inner.lock().unwrap();
        match inner.reason.clone() {
            Some(reason) => {
                drop(inner);
                tokio::spawn(async move {
                    callback(reason);
                });
                None
            }
            None => {
                let id = inner.next_id;
                inner.next_id += 1;
                inner.callbacks.push((id, callback));
                Some(id)
            }
        }
    }

    /// Drops a registration made by [`CancelCell::on_cancel`].
    pub(crate) fn remove(&self, id: u64) {
        self.inner
            .lock()
            .unwrap()
            .callbacks
            .retain(|(registered, _)| *registered != id);
    }

    pub(crate) fn reason(&self) -> Option<CancelReason> {
        self.inner.lock().unwrap().reason.clone()
    }

    pub(crate) fn state(&self) -> ScopeState {
        self.inner.lock().unwrap().state
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Suspends until the cell is cancelled and returns the recorded reason.
    pub(crate) async fn cancelled(&self) -> CancelReason {
        self.token.cancelled().await;
        // The reason is recorded before the token flips, so it is present here.
        self.reason()
            .unwrap_or_else(|| CancelReason::new("cancelled"))
    }
}

/// Observer handle for the nearest cancellation-capable scope.
///
/// Obtained via [`Scope::cancel_token`](crate::Scope::cancel_token). Callback
/// registrations made through this token are dropped automatically when the
/// querying scope exits.
pub struct CancelToken {
    pub(crate) cell: Arc<CancelCell>,
    pub(crate) registrations: Arc<Mutex<Vec<(Arc<CancelCell>, u64)>>>,
}

impl CancelToken {
    /// The recorded reason, if cancellation has happened.
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.cell.reason()
    }

    /// True once `cancel` has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cell.is_cancelled()
    }

    /// Current cancellation state of the bound cell.
    pub fn state(&self) -> ScopeState {
        self.cell.state()
    }

    /// Registers a one-shot callback, fired strictly after the reason is
    /// recorded, in registration order, never inline. If the cell is already
    /// cancelled the callback is still scheduled (next tick) with the existing
    /// reason.
    pub fn on_cancel(&self, callback: impl FnOnce(CancelReason) + Send + 'static) {
        if let Some(id) = self.cell.on_cancel(Box::new(callback)) {
            self.registrations
                .lock()
                .unwrap()
                .push((Arc::clone(&self.cell), id));
        }
    }

    /// Suspends until cancellation and returns the recorded reason.
    pub async fn cancelled(&self) -> CancelReason {
        self.cell.cancelled().await
    }
}

/// Trigger handle for a cancellation-capable attachment.
///
/// Returned by [`Attachment::cancellation`](crate::Attachment::cancellation).
/// Cheap to clone; `cancel` is idempotent and safe under concurrent callers.
#[derive(Clone)]
pub struct CancelHandle {
    pub(crate) cell: Arc<CancelCell>,
}

impl CancelHandle {
    /// Cancels the attached scope and its inheriting descendants. First caller
    /// wins; later calls are no-ops.
    pub fn cancel(&self, reason: CancelReason) {
        CancelCell::cancel(&self.cell, reason);
    }

    /// True once the cell has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cell.is_cancelled()
    }

    /// The recorded reason, if any.
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.cell.reason()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_is_idempotent_first_reason_wins() {
        let cell = CancelCell::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        cell.on_cancel(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        CancelCell::cancel(&cell, CancelReason::new("first"));
        CancelCell::cancel(&cell, CancelReason::new("second"));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(cell.reason(), Some(CancelReason::new("first")));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(cell.state(), ScopeState::Cancelled);
    }

    #[tokio::test]
    async fn test_concurrent_cancel_records_one_reason() {
        let cell = CancelCell::new();
        let a = Arc::clone(&cell);
        let b = Arc::clone(&cell);
        let t1 = tokio::spawn(async move { CancelCell::cancel(&a, CancelReason::new("a")) });
        let t2 = tokio::spawn(async move { CancelCell::cancel(&b, CancelReason::new("b")) });
        let _ = t1.await;
        let _ = t2.await;

        let reason = cell.reason().unwrap();
        assert!(reason.message() == "a" || reason.message() == "b");
    }

    #[tokio::test]
    async fn test_callbacks_fire_in_registration_order() {
        let cell = CancelCell::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for label in ["one", "two", "three"] {
            let order = Arc::clone(&order);
            cell.on_cancel(Box::new(move |_| {
                order.lock().unwrap().push(label);
            }));
        }

        CancelCell::cancel(&cell, CancelReason::new("stop"));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(*order.lock().unwrap(), vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_on_cancel_after_cancelled_is_not_inline() {
        let cell = CancelCell::new();
        CancelCell::cancel(&cell, CancelReason::new("gone"));

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        cell.on_cancel(Box::new(move |reason| {
            assert_eq!(reason.message(), "gone");
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        // Scheduled, not inline.
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_removed_registration_does_not_fire() {
        let cell = CancelCell::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let id = cell
            .on_cancel(Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        cell.remove(id);

        CancelCell::cancel(&cell, CancelReason::new("stop"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
