//! # Single-Flight Coalescing
//!
//! Purpose: merge concurrent callers for the same key into one underlying
//! call, so a cache stampede on a cold key invokes the loader exactly once.
//!
//! ## Design Principles
//!
//! 1. **Per-Key, Not Global**: each `SingleFlight` instance owns its own
//!    map, so two unrelated caches never coalesce each other's keys (core
//!    spec section 5: "keyed per component instance, not global").
//! 2. **First Caller Does The Work**: later callers `.await` the first
//!    caller's future rather than polling; `futures::future::Shared` gives
//!    every waiter a clone of the same polled future.
//! 3. **Self-Cleaning**: the map entry is removed once the shared future
//!    resolves, so a later call for the same key starts a fresh attempt
//!    instead of replaying a stale result.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;

/// Coalescing map from key to the in-flight future computing its value.
pub struct SingleFlight<K, V> {
    inflight: Mutex<HashMap<K, Shared<BoxFuture<'static, V>>>>,
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    pub fn new() -> Self {
        SingleFlight {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `fut` under single-flight for `key`: if another caller is
    /// already computing `key`, awaits their shared future instead of
    /// starting a second one.
    pub async fn work<F>(&self, key: K, fut: F) -> V
    where
        F: Future<Output = V> + Send + 'static,
    {
        let existing = {
            let map = self.inflight.lock().await;
            map.get(&key).cloned()
        };

        if let Some(shared) = existing {
            return shared.await;
        }

        let candidate: Shared<BoxFuture<'static, V>> = fut.boxed().shared();
        let winner = {
            let mut map = self.inflight.lock().await;
            // Re-check under the lock: another caller may have raced us
            // between the optimistic read above and taking the lock here.
            match map.get(&key) {
                Some(existing) => existing.clone(),
                None => {
                    map.insert(key.clone(), candidate.clone());
                    candidate
                }
            }
        };

        let result = winner.await;

        {
            let mut map = self.inflight.lock().await;
            map.remove(&key);
        }

        result
    }

    /// Number of keys currently being computed. Test/diagnostic use only.
    pub async fn in_flight_count(&self) -> usize {
        self.inflight.lock().await.len()
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_callers_share_one_execution() {
        let sf: Arc<SingleFlight<String, i32>> = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let sf = Arc::clone(&sf);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                sf.work("k".to_string(), async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    42
                })
                .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 42);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn later_call_after_completion_runs_again() {
        let sf: SingleFlight<String, i32> = SingleFlight::new();
        let first = sf.work("k".to_string(), async { 1 }).await;
        let second = sf.work("k".to_string(), async { 2 }).await;
        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }

    #[tokio::test]
    async fn map_is_empty_after_completion() {
        let sf: SingleFlight<String, i32> = SingleFlight::new();
        sf.work("k".to_string(), async { 1 }).await;
        assert_eq!(sf.in_flight_count().await, 0);
    }
}
