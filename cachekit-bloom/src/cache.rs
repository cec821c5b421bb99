//! # BloomCache
//!
//! Fronts a [`Repository`] with a [`BloomFilter`] and a loader: `get` tries
//! the cache repository first, and only consults the filter on a miss —
//! a key the filter has never seen is rejected as `KeyNotFound` without
//! ever invoking the loader, trading a small, bounded false-positive rate
//! for skipping source lookups on definite misses. A filter hit falls
//! through to the same single-flight-coalesced load-and-populate shape
//! `cachekit_layers::ReadThroughLayer` uses. `delete` never removes a
//! key from the filter (keys are never removed from it, matching a Bloom
//! filter's no-deletion invariant — this is the one operation the core
//! spec documents as a permanent non-goal for this cache: there is no way
//! to "un-remember" a key once added).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use cachekit_common::{CacheError, CacheResult, Context, EvictCallback, Repository, SingleFlight};

use crate::filter::{BloomFilter, BloomStats};

/// Composes a cache [`Repository`], a [`BloomFilter`] membership check, and
/// a `loader` repository consulted on a filter hit, with single-flight
/// coalescing on the loader lookup.
pub struct BloomCache<V> {
    inner: Arc<dyn Repository<V>>,
    filter: Arc<BloomFilter>,
    loader: Arc<dyn Repository<V>>,
    ttl: Duration,
    auto_add_to_bloom: bool,
    single_flight: SingleFlight<String, CacheResult<V>>,
}

impl<V> BloomCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// `auto_add_to_bloom` controls whether a successful `set` or a
    /// successful loader fetch on a filter hit also calls `filter.add`.
    pub fn new(
        inner: Arc<dyn Repository<V>>,
        filter: Arc<BloomFilter>,
        loader: Arc<dyn Repository<V>>,
        ttl: Duration,
        auto_add_to_bloom: bool,
    ) -> Arc<Self> {
        Arc::new(BloomCache {
            inner,
            filter,
            loader,
            ttl,
            auto_add_to_bloom,
            single_flight: SingleFlight::new(),
        })
    }

    pub fn stats(&self) -> BloomStats {
        self.filter.stats()
    }
}

#[async_trait]
impl<V> Repository<V> for BloomCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, ctx: &Context, key: &str) -> CacheResult<V> {
        match self.inner.get(ctx, key).await {
            Ok(value) => return Ok(value),
            Err(CacheError::KeyNotFound) => {}
            Err(err) => return Err(err),
        }

        if !self.filter.has(key) {
            return Err(CacheError::KeyNotFound);
        }

        let inner = Arc::clone(&self.inner);
        let loader = Arc::clone(&self.loader);
        let filter = Arc::clone(&self.filter);
        let ttl = self.ttl;
        let auto_add_to_bloom = self.auto_add_to_bloom;
        let ctx_owned = ctx.clone();
        let key_owned = key.to_string();

        self.single_flight
            .work(key.to_string(), async move {
                let value = loader.get(&ctx_owned, &key_owned).await?;
                if let Err(err) = inner.set(&ctx_owned, &key_owned, value.clone(), ttl).await {
                    tracing::warn!(key = %key_owned, error = ?err, "bloom-cache: failed to populate cache after loader fetch");
                }
                if auto_add_to_bloom {
                    filter.add(&key_owned);
                }
                Ok(value)
            })
            .await
    }

    async fn set(&self, ctx: &Context, key: &str, value: V, ttl: Duration) -> CacheResult<()> {
        self.inner.set(ctx, key, value, ttl).await?;
        if self.auto_add_to_bloom {
            self.filter.add(key);
        }
        Ok(())
    }

    async fn delete(&self, ctx: &Context, key: &str) -> CacheResult<()> {
        // Deliberately does not remove `key` from the filter: standard
        // Bloom filters cannot retract a single membership bit without a
        // counting variant, and the core spec excludes cross-process bloom
        // persistence / removal support from this cache's scope.
        self.inner.delete(ctx, key).await
    }

    async fn load_and_delete(&self, ctx: &Context, key: &str) -> CacheResult<V> {
        self.inner.load_and_delete(ctx, key).await
    }

    fn on_evicted(&self, callback: EvictCallback<V>) {
        self.inner.on_evicted(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachekit_engine::BaseKV;

    #[tokio::test]
    async fn never_added_key_is_rejected_without_touching_loader() {
        let inner = BaseKV::<i32>::new();
        let loader = BaseKV::<i32>::new();
        let filter = Arc::new(BloomFilter::new(100, 0.01).unwrap());
        let ctx = Context::background();
        let cache = BloomCache::new(inner, filter, loader.clone(), Duration::ZERO, true);

        assert_eq!(cache.get(&ctx, "never-added").await.unwrap_err(), CacheError::KeyNotFound);
    }

    #[tokio::test]
    async fn set_then_get_roundtrips_without_loader() {
        let inner = BaseKV::<i32>::new();
        let loader = BaseKV::<i32>::new();
        let filter = Arc::new(BloomFilter::new(100, 0.01).unwrap());
        let ctx = Context::background();
        let cache = BloomCache::new(inner, filter, loader, Duration::ZERO, true);

        cache.set(&ctx, "a", 5, Duration::ZERO).await.unwrap();
        assert_eq!(cache.get(&ctx, "a").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn delete_does_not_forget_bloom_membership() {
        let inner = BaseKV::<i32>::new();
        let loader = BaseKV::<i32>::new();
        let filter = Arc::new(BloomFilter::new(100, 0.01).unwrap());
        let ctx = Context::background();
        let cache = BloomCache::new(inner, filter, loader, Duration::ZERO, true);

        cache.set(&ctx, "a", 5, Duration::ZERO).await.unwrap();
        cache.delete(&ctx, "a").await.unwrap();
        // Filter still reports the key as possibly-present, so `get` falls
        // through to the loader; the loader has nothing for "a" either, so
        // the miss still surfaces correctly.
        assert_eq!(cache.get(&ctx, "a").await.unwrap_err(), CacheError::KeyNotFound);
    }

    #[tokio::test]
    async fn filter_hit_falls_through_to_loader_and_populates_cache() {
        let inner = BaseKV::<i32>::new();
        let loader = BaseKV::<i32>::new();
        let filter = Arc::new(BloomFilter::new(100, 0.01).unwrap());
        let ctx = Context::background();
        loader.set(&ctx, "a", 9, Duration::ZERO).await.unwrap();
        filter.add("a");
        let cache = BloomCache::new(inner.clone(), filter, loader, Duration::ZERO, false);

        assert_eq!(cache.get(&ctx, "a").await.unwrap(), 9);
        assert_eq!(inner.get(&ctx, "a").await.unwrap(), 9);
    }

    #[tokio::test]
    async fn auto_add_to_bloom_adds_key_on_loader_fetch() {
        let inner = BaseKV::<i32>::new();
        let loader = BaseKV::<i32>::new();
        let filter = Arc::new(BloomFilter::new(100, 0.01).unwrap());
        let ctx = Context::background();
        loader.set(&ctx, "a", 9, Duration::ZERO).await.unwrap();
        filter.add("a");
        let cache = BloomCache::new(inner, filter.clone(), loader, Duration::ZERO, true);

        cache.get(&ctx, "a").await.unwrap();
        assert!(filter.has("a"));
    }
}
