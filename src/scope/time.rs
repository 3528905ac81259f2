//! Cancellable time helpers.
//!
//! Sleeps here are suspension points in the sense of the scope model: they
//! wake either because the duration elapsed or because the bound scope was
//! cancelled, and in the latter case they fail with the recorded reason.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{CancelReason, ScopeError};
use crate::scope::core::Scope;

/// Sleeps for `duration`, or fails with [`ScopeError::Cancelled`] as soon as
/// the scope's nearest cancellation cell fires.
pub async fn sleep_for(scope: &Scope, duration: Duration) -> Result<(), ScopeError> {
    let token = scope.cancel_token()?;
    if let Some(reason) = token.cancel_reason() {
        return Err(ScopeError::cancelled(reason));
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        reason = token.cancelled() => Err(ScopeError::cancelled(reason)),
    }
}

/// Suspends until the scope is cancelled and returns the recorded reason.
///
/// The usual shape of a "run until shutdown" body: do setup, then
/// `sleep_until_cancel`, then let teardown attachments do the cleanup.
pub async fn sleep_until_cancel(scope: &Scope) -> Result<CancelReason, ScopeError> {
    Ok(scope.cancel_token()?.cancelled().await)
}

/// Minimum-interval gate between acquisitions.
///
/// `acquire` returns immediately when the previous acquisition is at least
/// `interval` old, and otherwise sleeps (cancellably) until it is.
pub struct RateLimiter {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Creates a limiter enforcing `interval` between acquisitions.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    /// Waits until the interval since the previous acquisition has elapsed,
    /// then records this acquisition.
    pub async fn acquire(&self, scope: &Scope) -> Result<(), ScopeError> {
        loop {
            let wait = {
                let mut last = self.last.lock().unwrap();
                let now = Instant::now();
                match *last {
                    Some(previous) if now.duration_since(previous) < self.interval => {
                        Some(self.interval - now.duration_since(previous))
                    }
                    _ => {
                        *last = Some(now);
                        None
                    }
                }
            };
            match wait {
                Some(remaining) => sleep_for(scope, remaining).await?,
                None => return Ok(()),
            }
        }
    }
}
