//! # Repository Contract
//!
//! Purpose: the shared interface every cache layer (`MemoryBoundedCache`,
//! `ReadThroughLayer`, `WriteThroughLayer`, `WriteBackLayer`, `BloomCache`)
//! both implements and wraps, so layers compose by delegating to an inner
//! `Arc<dyn Repository<V>>` without caring what sits underneath.
//!
//! Grounded on `harborgrid-justin-caddy`'s `BackingStore` trait shape
//! (`async_trait`, `Send + Sync` bounds on key/value).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::CacheResult;

/// A single mutable eviction-callback slot, invoked once per removal event
/// (TTL expiry, explicit delete, load-and-delete, capacity eviction).
/// Never invoked on overwrite.
pub type EvictCallback<V> = Arc<dyn Fn(&str, &V) + Send + Sync>;

/// The shared contract of all cache layers (core spec section 6).
#[async_trait]
pub trait Repository<V>: Send + Sync
where
    V: Send + Sync,
{
    /// Returns the value for `key`, or `CacheError::KeyNotFound` if absent
    /// or expired.
    async fn get(&self, ctx: &Context, key: &str) -> CacheResult<V>;

    /// Stores `value` under `key`. `ttl == Duration::ZERO` means "never
    /// expires", matching the core spec's `ttl > 0` convention.
    async fn set(&self, ctx: &Context, key: &str, value: V, ttl: Duration) -> CacheResult<()>;

    /// Removes `key`. A missing key is a no-op and does not fire the
    /// eviction callback.
    async fn delete(&self, ctx: &Context, key: &str) -> CacheResult<()>;

    /// Atomically reads then removes `key`, returning `KeyNotFound` if
    /// absent.
    async fn load_and_delete(&self, ctx: &Context, key: &str) -> CacheResult<V>;

    /// Installs the single eviction callback slot, replacing any previous
    /// callback.
    fn on_evicted(&self, callback: EvictCallback<V>);
}
