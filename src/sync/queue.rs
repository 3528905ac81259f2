//! # HandlingQueue: bounded FIFO with backpressure.
//!
//! Producers `enqueue` (suspending while the queue is at capacity), one
//! logical consumer loop `dequeue`s in strict FIFO order, and `close` lets the
//! backlog drain before dequeues start reporting the end of the stream.
//! Both suspension points are bound to the caller's scope and wake on its
//! cancellation.

use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::error::ScopeError;
use crate::scope::Scope;

/// FIFO work queue with bounded-capacity backpressure.
pub struct HandlingQueue<T> {
    tx: Mutex<Option<mpsc::Sender<T>>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<T>>,
}

impl<T: Send + 'static> HandlingQueue<T> {
    /// Creates a queue holding at most `capacity` pending items (clamped
    /// to 1).
    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// Appends `item`, suspending while the queue is at capacity.
    ///
    /// Fails with [`ScopeError::InvalidState`] on a closed queue and with the
    /// scope's reason if the scope cancels while waiting for space.
    pub async fn enqueue(&self, scope: &Scope, item: T) -> Result<(), ScopeError> {
        let token = scope.cancel_token()?;
        let sender = self
            .tx
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ScopeError::invalid_state("queue is closed"))?;
        tokio::select! {
            reason = token.cancelled() => Err(ScopeError::cancelled(reason)),
            sent = sender.send(item) => {
                sent.map_err(|_| ScopeError::invalid_state("queue is closed"))
            }
        }
    }

    /// Takes the oldest pending item, suspending while the queue is empty.
    ///
    /// Returns `Ok(None)` once the queue is closed and drained; fails with the
    /// scope's reason if the scope cancels while waiting.
    pub async fn dequeue(&self, scope: &Scope) -> Result<Option<T>, ScopeError> {
        let token = scope.cancel_token()?;
        let mut rx = tokio::select! {
            reason = token.cancelled() => return Err(ScopeError::cancelled(reason)),
            guard = self.rx.lock() => guard,
        };
        tokio::select! {
            reason = token.cancelled() => Err(ScopeError::cancelled(reason)),
            item = rx.recv() => Ok(item),
        }
    }

    /// Closes the queue: pending items remain dequeueable, new enqueues fail,
    /// and dequeues after the drain return `None`. Idempotent.
    pub fn close(&self) {
        self.tx.lock().unwrap().take();
    }

    /// True once [`HandlingQueue::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.tx.lock().unwrap().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Attachment;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_capacity_one_backpressure_and_fifo_order() {
        let (_cancel, cancellation) = Attachment::cancellation(true);
        Scope::create(None, vec![cancellation], |scope| async move {
            let queue = Arc::new(HandlingQueue::bounded(1));
            queue.enqueue(&scope, "a").await?;

            let second_done = Arc::new(AtomicBool::new(false));
            let producer_queue = Arc::clone(&queue);
            let producer_flag = Arc::clone(&second_done);
            let producer_scope = scope.clone();
            tokio::spawn(async move {
                producer_queue.enqueue(&producer_scope, "b").await.unwrap();
                producer_flag.store(true, Ordering::SeqCst);
            });

            tokio::time::sleep(Duration::from_millis(10)).await;
            assert!(!second_done.load(Ordering::SeqCst), "enqueue should be suspended at capacity");

            assert_eq!(queue.dequeue(&scope).await?, Some("a"));
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert!(second_done.load(Ordering::SeqCst));
            assert_eq!(queue.dequeue(&scope).await?, Some("b"));
            Ok(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_close_drains_then_stops() {
        let (_cancel, cancellation) = Attachment::cancellation(true);
        Scope::create(None, vec![cancellation], |scope| async move {
            let queue = HandlingQueue::bounded(4);
            queue.enqueue(&scope, 1).await?;
            queue.enqueue(&scope, 2).await?;
            queue.close();
            assert!(queue.is_closed());

            let rejected = queue.enqueue(&scope, 3).await;
            assert!(matches!(rejected, Err(ScopeError::InvalidState { .. })));

            assert_eq!(queue.dequeue(&scope).await?, Some(1));
            assert_eq!(queue.dequeue(&scope).await?, Some(2));
            assert_eq!(queue.dequeue(&scope).await?, None);
            Ok(())
        })
        .await
        .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_wakes_on_cancellation() {
        let (cancel, cancellation) = Attachment::cancellation(true);
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel(crate::error::CancelReason::new("stop"));
        });

        let result: Result<(), _> = Scope::create(None, vec![cancellation], |scope| async move {
            let queue = HandlingQueue::bounded(1);
            queue.enqueue(&scope, 1).await?;
            queue.enqueue(&scope, 2).await?;
            Ok(())
        })
        .await;

        assert!(result.unwrap_err().is_cancelled());
    }
}
