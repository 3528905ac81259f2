//! # ResourcePool: keyed, ref-counted, exactly-once async allocation.
//!
//! Each key is allocated at most once per pool lifetime. Concurrent fetchers
//! of the same key join the in-flight allocation through a shared
//! [`SignalController`]; when the last interested fetcher leaves before the
//! allocation finishes, the allocation is cancelled and forgotten. A resource
//! that did materialize stays alive until the pool's scope exits, at which
//! point its cleanup runs.
//!
//! ```text
//! fetch(scope, key)
//!   ├─ entry exists ──► ref_count += 1, join its signal
//!   └─ first fetcher ─► launch_background_scope(pool scope):
//!        allocate ─► emit Ok(resource) ─► sleep_until_cancel ─► cleanup
//!                └─► emit Err(error)           (pool scope teardown drives this)
//! ```

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::error::{CancelReason, ScopeError, ValueOrError};
use crate::scope::{Attachment, CancelHandle, Scope, launch_background_scope, sleep_until_cancel};
use crate::sync::signal::SignalController;

/// A freshly allocated resource and the cleanup that releases it.
pub struct Allocated<T> {
    resource: T,
    cleanup: Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>,
}

impl<T> Allocated<T> {
    /// Pairs a resource with its async cleanup action.
    pub fn new<F, Fut>(resource: T, cleanup: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        Self {
            resource,
            cleanup: Box::new(move || cleanup().boxed()),
        }
    }
}

type AllocatorFn<K, T> =
    dyn Fn(Scope, K) -> BoxFuture<'static, Result<Allocated<T>, ScopeError>> + Send + Sync;

struct PoolEntry<T> {
    signal: SignalController<ValueOrError<Arc<T>>>,
    cancel: CancelHandle,
    ref_count: usize,
}

/// Keyed pool of shared resources bound to one long-lived scope.
pub struct ResourcePool<K, T> {
    scope: Scope,
    allocator: Arc<AllocatorFn<K, T>>,
    entries: Arc<Mutex<HashMap<K, PoolEntry<T>>>>,
}

impl<K, T> ResourcePool<K, T>
where
    K: Eq + Hash + Clone + Send + 'static,
    T: Send + Sync + 'static,
{
    /// Creates a pool whose allocations and resources live under `scope`.
    pub fn new<F, Fut>(scope: &Scope, allocator: F) -> Self
    where
        F: Fn(Scope, K) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Allocated<T>, ScopeError>> + Send + 'static,
    {
        let allocator: Arc<AllocatorFn<K, T>> =
            Arc::new(move |scope, key| allocator(scope, key).boxed());
        Self {
            scope: scope.clone(),
            allocator,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Fetches the resource for `key`, joining an in-flight allocation or
    /// starting one. Waits under a child of `scope`; leaving that child
    /// releases this fetcher's interest, and the last leaving fetcher cancels
    /// a still-pending allocation.
    pub async fn fetch(&self, scope: &Scope, key: K) -> Result<Arc<T>, ScopeError> {
        let signal = self.checkout(key.clone());
        let release = {
            let entries = Arc::clone(&self.entries);
            Attachment::teardown(move || async move {
                let cancel = {
                    let mut entries = entries.lock().unwrap();
                    match entries.get_mut(&key) {
                        Some(entry) => {
                            entry.ref_count = entry.ref_count.saturating_sub(1);
                            if entry.ref_count == 0 && !entry.signal.is_ready() {
                                let cancel = entry.cancel.clone();
                                entries.remove(&key);
                                Some(cancel)
                            } else {
                                None
                            }
                        }
                        None => None,
                    }
                };
                if let Some(cancel) = cancel {
                    cancel.cancel(CancelReason::new("resource no longer needed"));
                }
            })
        };

        Scope::create(Some(scope), vec![release], |child| async move {
            signal.wait_until_ready(&child).await?
        })
        .await
    }

    /// Number of keys currently tracked (pending or allocated).
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// True when no key is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    fn checkout(&self, key: K) -> SignalController<ValueOrError<Arc<T>>> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(&key) {
            entry.ref_count += 1;
            return entry.signal.clone();
        }

        let signal = SignalController::new();
        let emitter = signal.clone();
        let allocator = Arc::clone(&self.allocator);
        let allocate_key = key.clone();
        let cancel = launch_background_scope(&self.scope, move |child| async move {
            match (*allocator)(child.clone(), allocate_key).await {
                Ok(allocated) => {
                    let _ = emitter.emit(Ok(Arc::new(allocated.resource)));
                    let _ = sleep_until_cancel(&child).await;
                    (allocated.cleanup)().await;
                }
                Err(error) => {
                    let _ = emitter.emit(Err(error));
                }
            }
            Ok(())
        });

        entries.insert(
            key,
            PoolEntry {
                signal: signal.clone(),
                cancel,
                ref_count: 1,
            },
        );
        signal
    }
}
