//! # SignalController: a single-assignment future.
//!
//! The controller starts `Empty`, transitions to `Ready` exactly once on
//! [`emit`](SignalController::emit), and hands the value to any number of
//! waiters. Waiting is always bound to a scope: the wait resolves with the
//! value, or fails with a cancellation error carrying the scope's reason.
//! It never hangs.
//!
//! ## Example
//! ```rust
//! use scopevisor::{Attachment, Scope, SignalController};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), scopevisor::ScopeError> {
//!     let (_cancel, cancellation) = Attachment::cancellation(true);
//!     let signal = SignalController::new();
//!     let emitter = signal.clone();
//!
//!     Scope::create(None, vec![cancellation], |scope| async move {
//!         emitter.emit("ready")?;
//!         let value = signal.wait_until_ready(&scope).await?;
//!         assert_eq!(value, "ready");
//!         Ok(())
//!     })
//!     .await
//! }
//! ```

use tokio::sync::watch;

use crate::error::ScopeError;
use crate::scope::Scope;

/// Single-assignment future usable across scope and task boundaries.
///
/// Cheap to clone; all clones share the same slot. Waiters receive clones of
/// the emitted value.
pub struct SignalController<T> {
    tx: watch::Sender<Option<T>>,
}

impl<T> Clone for SignalController<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> SignalController<T> {
    /// Creates an empty controller.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Stores the value and wakes every waiter. A second emit fails with
    /// [`ScopeError::DoubleEmit`].
    pub fn emit(&self, value: T) -> Result<(), ScopeError> {
        let stored = self.tx.send_if_modified(|slot| match slot {
            None => {
                *slot = Some(value);
                true
            }
            Some(_) => false,
        });
        if stored { Ok(()) } else { Err(ScopeError::DoubleEmit) }
    }

    /// True once a value has been emitted.
    pub fn is_ready(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// The emitted value, if any, without waiting.
    pub fn try_get(&self) -> Option<T> {
        self.tx.borrow().clone()
    }

    /// Suspends until the value is ready, or until `scope` cancels.
    ///
    /// Emission before or during the wait both resolve with the value;
    /// cancellation of the awaited scope fails with the recorded reason.
    pub async fn wait_until_ready(&self, scope: &Scope) -> Result<T, ScopeError> {
        let token = scope.cancel_token()?;
        let mut rx = self.tx.subscribe();
        tokio::select! {
            changed = rx.wait_for(|slot| slot.is_some()) => {
                let slot = changed
                    .map_err(|_| ScopeError::invalid_state("signal controller dropped"))?;
                (*slot)
                    .clone()
                    .ok_or_else(|| ScopeError::invalid_state("signal slot empty after wait"))
            }
            reason = token.cancelled() => Err(ScopeError::cancelled(reason)),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for SignalController<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CancelReason;
    use crate::scope::Attachment;
    use std::time::Duration;

    #[tokio::test]
    async fn test_second_emit_fails_with_double_emit() {
        let signal = SignalController::new();
        signal.emit(1).unwrap();
        assert_eq!(signal.emit(2), Err(ScopeError::DoubleEmit));
        assert_eq!(signal.try_get(), Some(1));
    }

    #[tokio::test]
    async fn test_wait_returns_value_emitted_before_wait() {
        let (_cancel, cancellation) = Attachment::cancellation(true);
        let signal = SignalController::new();
        signal.emit("early").unwrap();

        Scope::create(None, vec![cancellation], |scope| async move {
            assert_eq!(signal.wait_until_ready(&scope).await?, "early");
            Ok(())
        })
        .await
        .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_returns_value_emitted_during_wait() {
        let (_cancel, cancellation) = Attachment::cancellation(true);
        let signal = SignalController::new();
        let emitter = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            emitter.emit(7).unwrap();
        });

        Scope::create(None, vec![cancellation], |scope| async move {
            assert_eq!(signal.wait_until_ready(&scope).await?, 7);
            Ok(())
        })
        .await
        .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_fails_when_scope_cancels_first() {
        let (cancel, cancellation) = Attachment::cancellation(true);
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel(CancelReason::new("shutdown"));
        });

        let signal: SignalController<i32> = SignalController::new();
        let result: Result<(), _> = Scope::create(None, vec![cancellation], |scope| async move {
            signal.wait_until_ready(&scope).await?;
            Ok(())
        })
        .await;

        assert_eq!(
            result.unwrap_err().cancel_reason().map(|r| r.message().to_string()),
            Some("shutdown".to_string())
        );
    }
}
