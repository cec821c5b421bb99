//! # MemoryBoundedCache
//!
//! Wraps an inner [`Repository`] with a byte budget and a pluggable
//! [`EvictionPolicy`]: every `set` that would push total bytes over budget
//! evicts according to the policy until there's room.
//!
//! Grounded on the teacher's `MemoryEngine::evict_if_needed` /
//! `evict_one_from_shard` byte-budget loop, generalized from the teacher's
//! fixed byte-slice values to any `V: ByteSize`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use cachekit_common::{CacheError, CacheResult, Context, EvictCallback, Repository};

use crate::eviction::EvictionPolicy;

/// Values stored in a [`MemoryBoundedCache`] must report their own byte
/// cost, so the cache can track a budget without knowing the value's shape.
pub trait ByteSize {
    fn byte_size(&self) -> usize;
}

impl ByteSize for Vec<u8> {
    fn byte_size(&self) -> usize {
        self.len()
    }
}

impl ByteSize for Arc<[u8]> {
    fn byte_size(&self) -> usize {
        self.len()
    }
}

impl ByteSize for String {
    fn byte_size(&self) -> usize {
        self.len()
    }
}

/// Point-in-time counters for a [`MemoryBoundedCache`], exposed for
/// monitoring by `cachekit-app`'s `CacheAppService`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub used_bytes: usize,
    pub max_bytes: usize,
    pub item_count: usize,
}

/// Byte-accounting state, guarded by a single lock so that size debits and
/// credits for a given key never interleave with each other.
struct State {
    sizes: hashbrown::HashMap<String, usize, ahash::RandomState>,
    used_bytes: usize,
}

/// A [`Repository`] wrapper that evicts by the configured policy once the
/// tracked byte total exceeds `max_bytes`.
pub struct MemoryBoundedCache<V> {
    inner: Arc<dyn Repository<V>>,
    policy: Arc<dyn EvictionPolicy>,
    max_bytes: usize,
    state: Arc<Mutex<State>>,
}

impl<V> MemoryBoundedCache<V>
where
    V: ByteSize + Clone + Send + Sync + 'static,
{
    pub fn new(inner: Arc<dyn Repository<V>>, policy: Arc<dyn EvictionPolicy>, max_bytes: usize) -> Arc<Self> {
        Arc::new(MemoryBoundedCache {
            inner,
            policy,
            max_bytes,
            state: Arc::new(Mutex::new(State {
                sizes: hashbrown::HashMap::with_hasher(ahash::RandomState::new()),
                used_bytes: 0,
            })),
        })
    }

    pub fn used_bytes(&self) -> usize {
        self.state.lock().used_bytes
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            used_bytes: state.used_bytes,
            max_bytes: self.max_bytes,
            item_count: state.sizes.len(),
        }
    }

    /// Removes `key`'s tracked size (if any) and debits it from the running
    /// total, returning whether `key` had an existing entry.
    fn debit(state: &mut State, key: &str) -> bool {
        match state.sizes.remove(key) {
            Some(removed) => {
                state.used_bytes = state.used_bytes.saturating_sub(removed);
                true
            }
            None => false,
        }
    }

    fn credit(state: &mut State, key: &str, size: usize) {
        state.sizes.insert(key.to_string(), size);
        state.used_bytes += size;
    }

    async fn evict_until_fits(&self, ctx: &Context, incoming: usize) {
        loop {
            if self.state.lock().used_bytes + incoming <= self.max_bytes {
                return;
            }
            let Some(victim) = self.policy.evict() else {
                tracing::warn!(
                    incoming,
                    max_bytes = self.max_bytes,
                    "eviction policy has no victim but budget still exceeded"
                );
                return;
            };
            Self::debit(&mut self.state.lock(), &victim);
            let _ = self.inner.delete(ctx, &victim).await;
        }
    }
}

#[async_trait]
impl<V> Repository<V> for MemoryBoundedCache<V>
where
    V: ByteSize + Clone + Send + Sync + 'static,
{
    async fn get(&self, ctx: &Context, key: &str) -> CacheResult<V> {
        let value = self.inner.get(ctx, key).await?;
        self.policy.key_accessed(key);
        Ok(value)
    }

    async fn set(&self, ctx: &Context, key: &str, value: V, ttl: Duration) -> CacheResult<()> {
        let size = value.byte_size();
        if size > self.max_bytes {
            return Err(CacheError::InvalidInput(format!(
                "value of {size} bytes exceeds max_bytes {}",
                self.max_bytes
            )));
        }

        Self::debit(&mut self.state.lock(), key);

        self.evict_until_fits(ctx, size).await;

        self.inner.set(ctx, key, value, ttl).await?;
        Self::credit(&mut self.state.lock(), key, size);
        self.policy.key_accessed(key);
        Ok(())
    }

    async fn delete(&self, ctx: &Context, key: &str) -> CacheResult<()> {
        Self::debit(&mut self.state.lock(), key);
        self.policy.remove(key);
        self.inner.delete(ctx, key).await
    }

    async fn load_and_delete(&self, ctx: &Context, key: &str) -> CacheResult<V> {
        let value = self.inner.load_and_delete(ctx, key).await?;
        Self::debit(&mut self.state.lock(), key);
        self.policy.remove(key);
        Ok(value)
    }

    fn on_evicted(&self, callback: EvictCallback<V>) {
        let state = Arc::clone(&self.state);
        let policy = Arc::clone(&self.policy);
        let wrapped: EvictCallback<V> = Arc::new(move |key, value| {
            Self::debit(&mut state.lock(), key);
            policy.remove(key);
            callback(key, value);
        });
        self.inner.on_evicted(wrapped);
    }
}
