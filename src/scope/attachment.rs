//! # Attachments: resources a scope owns and tears down deterministically.
//!
//! An [`Attachment`] is installed by [`Scope::create`](crate::Scope::create)
//! before the body runs and released exactly once after the body settles, in
//! reverse registration order. Three kinds exist:
//!
//! - [`Attachment::cancellation`] — installs a cancellation cell and returns
//!   the [`CancelHandle`] that triggers it. With `inherit`, the parent's
//!   cancellation propagates into this cell.
//! - [`Attachment::timeout`] — derived attachment: an inheriting cancellation
//!   cell plus a timer that cancels with a timeout reason when the deadline
//!   elapses before the scope exits.
//! - [`Attachment::teardown`] — an async action run at scope exit.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::scope::cancel::{CancelCell, CancelHandle};

pub(crate) type TeardownFn = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send + 'static>;

pub(crate) enum AttachmentKind {
    Cancellation { cell: Arc<CancelCell>, inherit: bool },
    Timeout { after: Duration },
    Teardown { action: TeardownFn },
}

/// A resource with deterministic teardown, owned by exactly one scope.
pub struct Attachment {
    pub(crate) kind: AttachmentKind,
}

impl Attachment {
    /// Builds a cancellation-capable attachment and the handle that triggers
    /// it. With `inherit`, cancelling the parent scope propagates the parent's
    /// reason into this cell; without it, only the returned handle (or the
    /// owning runtime) cancels the scope.
    ///
    /// The handle is live immediately: cancelling before the attachment is
    /// installed leaves the scope cancelled from the start.
    pub fn cancellation(inherit: bool) -> (CancelHandle, Attachment) {
        let cell = CancelCell::new();
        (
            CancelHandle {
                cell: Arc::clone(&cell),
            },
            Attachment {
                kind: AttachmentKind::Cancellation { cell, inherit },
            },
        )
    }

    /// Builds a deadline attachment: an inheriting cancellation cell whose
    /// scope is cancelled with [`CancelReason::timeout`](crate::CancelReason::timeout)
    /// once `after` elapses. The timer is dropped at scope exit.
    pub fn timeout(after: Duration) -> Attachment {
        Attachment {
            kind: AttachmentKind::Timeout { after },
        }
    }

    /// Builds a teardown attachment running `action` exactly once at scope
    /// exit, whether the body resolved, failed, or was cancelled mid-flight.
    pub fn teardown<F, Fut>(action: F) -> Attachment
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        Attachment {
            kind: AttachmentKind::Teardown {
                action: Box::new(move || action().boxed()),
            },
        }
    }
}
