//! # BroadcastController: multi-subscriber, no-replay event fan-out.
//!
//! Thin wrapper over [`tokio::sync::broadcast`] bound to the scope model.
//!
//! ## Rules
//! - **No replay**: a subscriber only observes values emitted strictly after
//!   it subscribed. Nothing emitted earlier is buffered for it.
//! - **Per-subscriber order**: each subscriber sees its values in emission
//!   order. Relative delivery order *across* subscribers for one emitted
//!   value is unspecified.
//! - **Bounded ring**: the channel keeps the most recent `capacity` values;
//!   a lagging subscriber skips the overwritten ones and a warning is logged.
//! - **Scope-bound**: a [`Subscription`] is created against a caller-held
//!   scope; receiving fails with that scope's cancellation reason once the
//!   scope cancels, and dropping the subscription (at scope exit) is the
//!   unsubscribe.

use tokio::sync::broadcast;

use crate::error::ScopeError;
use crate::scope::{CancelToken, Scope};

/// Multi-subscriber, no-replay event fan-out bound to subscriber scope
/// lifetime.
pub struct BroadcastController<T> {
    tx: broadcast::Sender<T>,
}

impl<T> Clone for BroadcastController<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> BroadcastController<T> {
    /// Creates a controller with the given ring capacity (clamped to 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Delivers `value` to every currently-subscribed consumer. With no
    /// subscribers the value is dropped.
    pub fn emit(&self, value: T) {
        let _ = self.tx.send(value);
    }

    /// Subscribes relative to `scope`: the subscription observes values
    /// emitted after this call and its `recv` is woken by the scope's
    /// cancellation. Requires a cancellation-capable scope.
    pub fn subscribe(&self, scope: &Scope) -> Result<Subscription<T>, ScopeError> {
        Ok(Subscription {
            rx: self.tx.subscribe(),
            token: scope.cancel_token()?,
        })
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// One consumer's view of a [`BroadcastController`]. Dropping it
/// unsubscribes.
pub struct Subscription<T> {
    rx: broadcast::Receiver<T>,
    token: CancelToken,
}

impl<T: Clone> Subscription<T> {
    /// Receives the next value emitted after subscription.
    ///
    /// Returns `Ok(None)` once the controller is gone and the backlog is
    /// drained; fails with the scope's reason once the bound scope cancels.
    pub async fn recv(&mut self) -> Result<Option<T>, ScopeError> {
        loop {
            tokio::select! {
                reason = self.token.cancelled() => {
                    return Err(ScopeError::cancelled(reason));
                }
                received = self.rx.recv() => match received {
                    Ok(value) => return Ok(Some(value)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "broadcast subscriber lagged, skipping oldest values");
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(None),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CancelReason;
    use crate::scope::Attachment;
    use std::time::Duration;

    #[tokio::test]
    async fn test_no_replay_for_late_subscribers() {
        let (_cancel, cancellation) = Attachment::cancellation(true);
        let bus = BroadcastController::new(16);

        Scope::create(None, vec![cancellation], |scope| async move {
            bus.emit("before-1");
            bus.emit("before-2");

            let mut sub = bus.subscribe(&scope)?;
            bus.emit("after-1");
            bus.emit("after-2");

            assert_eq!(sub.recv().await?, Some("after-1"));
            assert_eq!(sub.recv().await?, Some("after-2"));
            Ok(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_each_subscriber_sees_emission_order() {
        let (_cancel, cancellation) = Attachment::cancellation(true);
        let bus = BroadcastController::new(16);

        Scope::create(None, vec![cancellation], |scope| async move {
            let mut first = bus.subscribe(&scope)?;
            let mut second = bus.subscribe(&scope)?;
            for n in 0..4 {
                bus.emit(n);
            }
            for n in 0..4 {
                assert_eq!(first.recv().await?, Some(n));
                assert_eq!(second.recv().await?, Some(n));
            }
            Ok(())
        })
        .await
        .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_recv_fails_on_scope_cancellation() {
        let (cancel, cancellation) = Attachment::cancellation(true);
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel(CancelReason::new("closing"));
        });

        let bus: BroadcastController<i32> = BroadcastController::new(4);
        let result: Result<(), _> = Scope::create(None, vec![cancellation], |scope| async move {
            let mut sub = bus.subscribe(&scope)?;
            sub.recv().await?;
            Ok(())
        })
        .await;

        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_recv_ends_after_controller_dropped_and_drained() {
        let (_cancel, cancellation) = Attachment::cancellation(true);
        Scope::create(None, vec![cancellation], |scope| async move {
            let bus = BroadcastController::new(4);
            let mut sub = bus.subscribe(&scope)?;
            bus.emit(1);
            drop(bus);
            assert_eq!(sub.recv().await?, Some(1));
            assert_eq!(sub.recv().await?, None);
            Ok(())
        })
        .await
        .unwrap();
    }
}
