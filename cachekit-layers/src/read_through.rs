//! # Read-Through Layer
//!
//! On a cache miss, loads from the source `Repository` and populates the
//! cache before returning, with concurrent misses on the same key
//! coalesced through [`cachekit_common::SingleFlight`] so a cache stampede
//! invokes the source loader once.
//!
//! Grounded on harborgrid's `ReadThroughCache::get` (cache-check,
//! miss-then-populate ordering); the single-flight coalescing step is new
//! since harborgrid's reference has no stampede protection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use cachekit_common::{CacheError, CacheResult, Context, EvictCallback, Repository, SingleFlight};

/// A value that loaded successfully from the source but could not be
/// written back into the cache afterward. `error` is always a
/// `CacheError::FailedToRefreshCache`.
#[derive(Debug, Clone)]
pub struct PartialSuccess<V> {
    pub value: V,
    pub error: CacheError,
}

/// Outcome of a read-through load: either a clean value (cache hit, or a
/// source load whose cache-fill also succeeded), or a value that loaded but
/// whose cache-fill failed — see spec.md §4.4 step 4.
#[derive(Debug, Clone)]
pub enum Loaded<V> {
    Value(V),
    PartialSuccess(PartialSuccess<V>),
}

impl<V> Loaded<V> {
    /// Collapses a partial success into a plain value, discarding the
    /// refresh error. Used by the `Repository::get` trait impl, which has
    /// no channel to carry both.
    fn into_value(self) -> V {
        match self {
            Loaded::Value(v) => v,
            Loaded::PartialSuccess(p) => p.value,
        }
    }
}

/// Composes a cache repository in front of a source repository, populating
/// the cache on miss.
pub struct ReadThroughLayer<V> {
    cache: Arc<dyn Repository<V>>,
    source: Arc<dyn Repository<V>>,
    ttl: Duration,
    single_flight: SingleFlight<String, CacheResult<Loaded<V>>>,
}

impl<V> ReadThroughLayer<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(cache: Arc<dyn Repository<V>>, source: Arc<dyn Repository<V>>, ttl: Duration) -> Arc<Self> {
        Arc::new(ReadThroughLayer {
            cache,
            source,
            ttl,
            single_flight: SingleFlight::new(),
        })
    }

    async fn load_and_populate(&self, ctx: &Context, key: &str) -> CacheResult<Loaded<V>> {
        let value = self.source.get(ctx, key).await?;
        match self.cache.set(ctx, key, value.clone(), self.ttl).await {
            Ok(()) => Ok(Loaded::Value(value)),
            Err(err) => {
                tracing::warn!(key, error = ?err, "read-through: failed to populate cache after source load");
                Ok(Loaded::PartialSuccess(PartialSuccess {
                    value,
                    error: CacheError::FailedToRefreshCache(err.to_string()),
                }))
            }
        }
    }

    /// Like `get`, but surfaces a cache-refresh failure after a successful
    /// source load instead of silently logging and discarding it, per
    /// spec.md §4.4 step 4.
    pub async fn get_detailed(&self, ctx: &Context, key: &str) -> CacheResult<Loaded<V>> {
        match self.cache.get(ctx, key).await {
            Ok(value) => return Ok(Loaded::Value(value)),
            Err(CacheError::KeyNotFound) => {}
            Err(err) => return Err(err),
        }

        if ctx.is_cancelled() {
            return Err(CacheError::Cancelled);
        }

        let source = Arc::clone(&self.source);
        let cache = Arc::clone(&self.cache);
        let ttl = self.ttl;
        let ctx_owned = ctx.clone();
        let key_owned = key.to_string();

        self.single_flight
            .work(key.to_string(), async move {
                let value = source.get(&ctx_owned, &key_owned).await?;
                match cache.set(&ctx_owned, &key_owned, value.clone(), ttl).await {
                    Ok(()) => Ok(Loaded::Value(value)),
                    Err(err) => {
                        tracing::warn!(key = %key_owned, error = ?err, "read-through: failed to populate cache after source load");
                        Ok(Loaded::PartialSuccess(PartialSuccess {
                            value,
                            error: CacheError::FailedToRefreshCache(err.to_string()),
                        }))
                    }
                }
            })
            .await
    }
}

#[async_trait]
impl<V> Repository<V> for ReadThroughLayer<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, ctx: &Context, key: &str) -> CacheResult<V> {
        self.get_detailed(ctx, key).await.map(Loaded::into_value)
    }

    async fn set(&self, ctx: &Context, key: &str, value: V, ttl: Duration) -> CacheResult<()> {
        self.source.set(ctx, key, value.clone(), ttl).await?;
        self.cache.set(ctx, key, value, self.ttl).await
    }

    async fn delete(&self, ctx: &Context, key: &str) -> CacheResult<()> {
        self.source.delete(ctx, key).await?;
        self.cache.delete(ctx, key).await
    }

    async fn load_and_delete(&self, ctx: &Context, key: &str) -> CacheResult<V> {
        let value = match self.cache.load_and_delete(ctx, key).await {
            Ok(value) => value,
            Err(CacheError::KeyNotFound) => self.load_and_populate(ctx, key).await?.into_value(),
            Err(err) => return Err(err),
        };
        self.source.delete(ctx, key).await?;
        Ok(value)
    }

    fn on_evicted(&self, callback: EvictCallback<V>) {
        self.cache.on_evicted(callback);
    }
}

/// A read-through variant that skips source population entirely when the
/// context carries the "limited" signal (core spec's rate-limited
/// degraded-mode path): a miss under a limited context returns
/// `KeyNotFound` rather than invoking the source loader.
pub struct RateLimitedReadThrough<V> {
    inner: Arc<ReadThroughLayer<V>>,
}

impl<V> RateLimitedReadThrough<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(inner: Arc<ReadThroughLayer<V>>) -> Arc<Self> {
        Arc::new(RateLimitedReadThrough { inner })
    }
}

#[async_trait]
impl<V> Repository<V> for RateLimitedReadThrough<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, ctx: &Context, key: &str) -> CacheResult<V> {
        match self.inner.cache.get(ctx, key).await {
            Ok(value) => return Ok(value),
            Err(CacheError::KeyNotFound) => {}
            Err(err) => return Err(err),
        }

        if ctx.is_limited() {
            tracing::debug!(key, "rate-limited read-through: skipping source load");
            return Err(CacheError::KeyNotFound);
        }

        self.inner.get(ctx, key).await
    }

    async fn set(&self, ctx: &Context, key: &str, value: V, ttl: Duration) -> CacheResult<()> {
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
