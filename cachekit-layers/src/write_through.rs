//! # Write-Through Layer
//!
//! Writes go to the source first, then the cache — so a crash between the
//! two steps leaves the cache stale or empty but never leaves the source
//! out of sync with a value nobody can reach. Grounded on harborgrid's
//! `WriteThroughCache::put` (store-then-cache ordering).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use cachekit_common::{CacheError, CacheResult, Context, EvictCallback, Repository};

/// Composes a cache repository in front of a source repository with
/// synchronous, strongly consistent writes.
pub struct WriteThroughLayer<V> {
    cache: Arc<dyn Repository<V>>,
    source: Arc<dyn Repository<V>>,
    ttl: Duration,
}

impl<V> WriteThroughLayer<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(cache: Arc<dyn Repository<V>>, source: Arc<dyn Repository<V>>, ttl: Duration) -> Arc<Self> {
        Arc::new(WriteThroughLayer { cache, source, ttl })
    }
}

#[async_trait]
impl<V> Repository<V> for WriteThroughLayer<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, ctx: &Context, key: &str) -> CacheResult<V> {
        match self.cache.get(ctx, key).await {
            Ok(value) => Ok(value),
            Err(CacheError::KeyNotFound) => self.source.get(ctx, key).await,
            Err(err) => Err(err),
        }
    }

    async fn set(&self, ctx: &Context, key: &str, value: V, ttl: Duration) -> CacheResult<()> {
        self.source.set(ctx, key, value.clone(), ttl).await?;
        let effective_ttl = if ttl.is_zero() { self.ttl } else { ttl };
        self.cache.set(ctx, key, value, effective_ttl).await
    }

    async fn delete(&self, ctx: &Context, key: &str) -> CacheResult<()> {
        self.source.delete(ctx, key).await?;
        self.cache.delete(ctx, key).await
    }

    async fn load_and_delete(&self, ctx: &Context, key: &str) -> CacheResult<V> {
        let value = self.source.load_and_delete(ctx, key).await?;
        let _ = self.cache.delete(ctx, key).await;
        Ok(value)
    }

    fn on_evicted(&self, callback: EvictCallback<V>) {
        self.cache.on_evicted(callback);
    }
}

/// A write-through variant that, under a "limited" context, writes only to
/// the source and skips the cache update — trading a guaranteed-cold read
/// next time for fewer cache writes under load.
pub struct RateLimitedWriteThrough<V> {
    inner: Arc<WriteThroughLayer<V>>,
}

impl<V> RateLimitedWriteThrough<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(inner: Arc<WriteThroughLayer<V>>) -> Arc<Self> {
        Arc::new(RateLimitedWriteThrough { inner })
    }
}

#[async_trait]
impl<V> Repository<V> for RateLimitedWriteThrough<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, ctx: &Context, key: &str) -> CacheResult<V> {
        self.inner.get(ctx, key).await
    }

    async fn set(&self, ctx: &Context, key: &str, value: V, ttl: Duration) -> CacheResult<()> {
        if ctx.is_limited() {
            tracing::debug!(key, "rate-limited write-through: writing source only");
            return self.inner.source.set(ctx, key, value, ttl).await;
        }
        self.inner.set(ctx, key, value, ttl).await
    }

    async fn delete(&self, ctx: &Context, key: &str) -> CacheResult<()> {
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
    async fn set_writes_source_then_cache() {
        let cache = BaseKV::<i32>::new();
        let source = BaseKV::<i32>::new();
        let ctx = Context::background();
        let layer = WriteThroughLayer::new(cache.clone(), source.clone(), Duration::ZERO);

        layer.set(&ctx, "a", 1, Duration::ZERO).await.unwrap();
        assert_eq!(cache.get(&ctx, "a").await.unwrap(), 1);
        assert_eq!(source.get(&ctx, "a").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn get_falls_back_to_source_on_cache_miss() {
        let cache = BaseKV::<i32>::new();
        let source = BaseKV::<i32>::new();
        let ctx = Context::background();
        source.set(&ctx, "a", 9, Duration::ZERO).await.unwrap();
        let layer = WriteThroughLayer::new(cache, source, Duration::ZERO);
        assert_eq!(layer.get(&ctx, "a").await.unwrap(), 9);
    }

    #[tokio::test]
    async fn rate_limited_skips_cache_write_when_limited() {
        let cache = BaseKV::<i32>::new();
        let source = BaseKV::<i32>::new();
        let ctx = Context::background();
        let base = WriteThroughLayer::new(cache.clone(), source.clone(), Duration::ZERO);
        let layer = RateLimitedWriteThrough::new(base);

        let limited_ctx = ctx.limited();
        layer.set(&limited_ctx, "a", 5, Duration::ZERO).await.unwrap();

        assert_eq!(source.get(&ctx, "a").await.unwrap(), 5);
        assert_eq!(cache.get(&ctx, "a").await.unwrap_err(), CacheError::KeyNotFound);
    }
}
