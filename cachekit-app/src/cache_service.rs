//! # CacheAppService
//!
//! Validates incoming get/set/delete requests (empty keys, oversized TTLs)
//! before delegating to an inner [`Repository`], so malformed input is
//! rejected at the boundary instead of surfacing as a confusing error from
//! deep inside a composed layer stack.

use std::sync::Arc;
use std::time::Duration;

use cachekit_common::{CacheError, CacheResult, Context, Repository};
use cachekit_engine::{BaseKV, CacheStats, EvictionPolicy, Lru, MemoryBoundedCache};

/// The longest TTL a caller may request through this service. A request
/// above this is rejected rather than silently clamped, so the caller
/// notices its mistake instead of getting a surprising eviction later.
const MAX_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct SetRequest<V> {
    pub key: String,
    pub value: V,
    pub ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct GetRequest {
    pub key: String,
}

fn validate_key(key: &str) -> CacheResult<()> {
    if key.is_empty() {
        return Err(CacheError::InvalidInput("key must not be empty".to_string()));
    }
    Ok(())
}

fn validate_ttl(ttl: Duration) -> CacheResult<()> {
    if ttl > MAX_TTL {
        return Err(CacheError::InvalidExpiration(ttl));
    }
    Ok(())
}

/// Validates requests, then delegates to whatever [`Repository`] it was
/// built around — a bare `MemoryBoundedCache`, or a full
/// read-through/write-through/write-back/bloom stack.
pub struct CacheAppService<V> {
    repository: Arc<dyn Repository<V>>,
}

impl<V> CacheAppService<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(repository: Arc<dyn Repository<V>>) -> Self {
        CacheAppService { repository }
    }

    pub async fn get(&self, ctx: &Context, req: GetRequest) -> CacheResult<V> {
        validate_key(&req.key)?;
        self.repository.get(ctx, &req.key).await
    }

    pub async fn set(&self, ctx: &Context, req: SetRequest<V>) -> CacheResult<()> {
        validate_key(&req.key)?;
        validate_ttl(req.ttl)?;
        self.repository.set(ctx, &req.key, req.value, req.ttl).await
    }

    pub async fn delete(&self, ctx: &Context, req: GetRequest) -> CacheResult<()> {
        validate_key(&req.key)?;
        self.repository.delete(ctx, &req.key).await
    }

    pub async fn load_and_delete(&self, ctx: &Context, req: GetRequest) -> CacheResult<V> {
        validate_key(&req.key)?;
        self.repository.load_and_delete(ctx, &req.key).await
    }
}

impl<V> CacheAppService<V>
where
    V: cachekit_engine::ByteSize + Clone + Send + Sync + 'static,
{
    /// Convenience constructor: a `BaseKV` fronted by an LRU-bounded
    /// `MemoryBoundedCache` at `max_bytes`, ready to validate requests
    /// against.
    pub fn in_memory_lru(max_bytes: usize) -> Self {
        let inner = BaseKV::<V>::new();
        let policy: Arc<dyn EvictionPolicy> = Arc::new(Lru::new());
        let cache = MemoryBoundedCache::new(inner, policy, max_bytes);
        CacheAppService::new(cache)
    }
}

/// A separate accessor for stats, so services composed from multiple
/// layers can still surface the budget view of whichever layer tracks it,
/// without requiring every `Repository` implementor to carry the same
/// stats shape.
pub trait StatsProvider {
    fn cache_stats(&self) -> CacheStats;
}

impl<V> StatsProvider for MemoryBoundedCache<V>
where
    V: cachekit_engine::ByteSize + Clone + Send + Sync + 'static,
{
    fn cache_stats(&self) -> CacheStats {
        self.stats()
    }
}
