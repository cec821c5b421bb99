//! # DistributedLock
//!
//! A single-process-coordinator lock keyed by string resource name, fenced
//! by a UUID issued on each successful acquisition so a caller holding a
//! stale lease can never be confused with the current holder. Grounded on
//! harborgrid's `DistributedMutex`: lease-with-expiry `LockHolder`, owner
//! comparison on unlock/refresh, `force_unlock` admin override — generalized
//! from harborgrid's monotonic `u64` fencing counter to a `Uuid` per the
//! "UUID-fenced" requirement, and from its fixed 10ms retry poll to the
//! pluggable [`crate::retry::RetryStrategy`].
//!
//! This lock coordinates callers within one process (or one process
//! holding the `Arc`); it does not implement a network protocol for
//! cross-process coordination.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use uuid::Uuid;

use cachekit_common::{CacheError, CacheResult, Context, SingleFlight};

use crate::handle::Lock;
use crate::retry::RetryStrategy;

/// Longest key this lock accepts.
const MAX_KEY_LEN: usize = 200;
/// Longest lease this lock will grant.
const MAX_EXPIRATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Point-in-time counters for a [`DistributedLock`], exposed for
/// monitoring by `cachekit-app`'s `LockAppService`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockStats {
    pub held_count: usize,
    pub acquired_total: u64,
    pub preempted_total: u64,
}

struct LockHolder {
    owner: Uuid,
    token: Uuid,
    created_at: Instant,
    expiration: Duration,
}

impl LockHolder {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.created_at + self.expiration
    }
}

/// Issues and tracks exclusive, UUID-fenced leases over string keys.
pub struct DistributedLock {
    holders: RwLock<std::collections::HashMap<String, LockHolder>>,
    acquired_total: AtomicU64,
    preempted_total: AtomicU64,
    singleflight: SingleFlight<String, CacheResult<(Uuid, Uuid, Instant, Duration)>>,
}

fn validate_key(key: &str) -> CacheResult<()> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(CacheError::InvalidLockKey);
    }
    Ok(())
}

fn validate_expiration(expiration: Duration) -> CacheResult<()> {
    if expiration.is_zero() || expiration > MAX_EXPIRATION {
        return Err(CacheError::InvalidExpiration(expiration));
    }
    Ok(())
}

impl DistributedLock {
    pub fn new() -> Arc<Self> {
        Arc::new(DistributedLock {
            holders: RwLock::new(std::collections::HashMap::new()),
            acquired_total: AtomicU64::new(0),
            preempted_total: AtomicU64::new(0),
            singleflight: SingleFlight::new(),
        })
    }

    pub fn stats(&self) -> LockStats {
        LockStats {
            held_count: self.holders.read().len(),
            acquired_total: self.acquired_total.load(Ordering::Relaxed),
            preempted_total: self.preempted_total.load(Ordering::Relaxed),
        }
    }

    /// Attempts to acquire `key` once, non-blocking. Returns
    /// `CacheError::FailedToPreemptLock` if another owner currently holds
    /// an unexpired lease; validates `key` (non-empty, <= 200 chars) and
    /// `expiration` (> 0, <= 24h) first.
    pub fn try_lock(self: &Arc<Self>, ctx: &Context, key: &str, expiration: Duration) -> CacheResult<Lock> {
        if ctx.is_cancelled() {
            return Err(CacheError::Cancelled);
        }
        validate_key(key)?;
        validate_expiration(expiration)?;

        let mut holders = self.holders.write();
        if let Some(existing) = holders.get(key) {
            if !existing.is_expired() {
                return Err(CacheError::FailedToPreemptLock);
            }
            self.preempted_total.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key, "preempting expired lock");
        }

        let owner = Uuid::new_v4();
        let token = Uuid::new_v4();
        let created_at = Instant::now();
        holders.insert(
            key.to_string(),
            LockHolder {
                owner,
                token,
                created_at,
                expiration,
            },
        );
        self.acquired_total.fetch_add(1, Ordering::Relaxed);

        Ok(Lock::new(Arc::clone(self), key.to_string(), owner, token, created_at, expiration))
    }

    /// Acquires `key`, bounding `ctx` with `timeout` and retrying per
    /// `strategy` between attempts until it either succeeds, the
    /// strategy's schedule is exhausted, or the bounded context is
    /// cancelled.
    pub async fn lock(
        self: &Arc<Self>,
        ctx: &Context,
        key: &str,
        expiration: Duration,
        timeout: Duration,
        strategy: &dyn RetryStrategy,
    ) -> CacheResult<Lock> {
        let bounded = ctx.with_timeout(timeout);
        self.lock_with_bounded_ctx(&bounded, key, expiration, strategy).await
    }

    async fn lock_with_bounded_ctx(
        self: &Arc<Self>,
        ctx: &Context,
        key: &str,
        expiration: Duration,
        strategy: &dyn RetryStrategy,
    ) -> CacheResult<Lock> {
        let mut attempt = 0;
        loop {
            match self.try_lock(ctx, key, expiration) {
                Ok(lock) => return Ok(lock),
                Err(CacheError::FailedToPreemptLock) => {}
                Err(err) => return Err(err),
            }

            if ctx.is_cancelled() {
                return Err(CacheError::Cancelled);
            }

            let Some(delay) = strategy.delay(attempt) else {
                return Err(CacheError::FailedToPreemptLock);
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = ctx.cancelled() => return Err(CacheError::Cancelled),
            }
            attempt += 1;
        }
    }

    /// Identical behavior to [`DistributedLock::lock`], but concurrent
    /// in-process callers for the same `key` are coalesced through a
    /// single-flight group: only one of them actually drives the retry
    /// loop, and all of them observe its result.
    pub async fn singleflight_lock(
        self: &Arc<Self>,
        ctx: &Context,
        key: &str,
        expiration: Duration,
        timeout: Duration,
        strategy: &dyn RetryStrategy,
    ) -> CacheResult<Lock> {
        let this = Arc::clone(self);
        let ctx_owned = ctx.clone();
        let key_owned = key.to_string();

        // RetryStrategy is a trait object with a non-'static lifetime in
        // general; to cross into the single-flight's 'static future we
        // snapshot its schedule up front rather than threading the
        // reference through.
        let mut schedule = Vec::new();
        let mut attempt = 0;
        while let Some(delay) = strategy.delay(attempt) {
            schedule.push(delay);
            attempt += 1;
        }

        let raw = self
            .singleflight
            .work(key.to_string(), async move {
                let bounded = ctx_owned.with_timeout(timeout);
                let mut attempt = 0usize;
                loop {
                    match this.try_lock(&bounded, &key_owned, expiration) {
                        Ok(lock) => {
                            return Ok((lock.owner(), lock.fencing_token(), Instant::now(), expiration));
                        }
                        Err(CacheError::FailedToPreemptLock) => {}
                        Err(err) => return Err(err),
                    }

                    if bounded.is_cancelled() {
                        return Err(CacheError::Cancelled);
                    }

                    let Some(delay) = schedule.get(attempt).copied() else {
                        return Err(CacheError::FailedToPreemptLock);
                    };

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = bounded.cancelled() => return Err(CacheError::Cancelled),
                    }
                    attempt += 1;
                }
            })
            .await?;

        let (owner, token, created_at, expiration) = raw;
        Ok(Lock::new(Arc::clone(self), key.to_string(), owner, token, created_at, expiration))
    }

    pub(crate) fn unlock(&self, ctx: &Context, key: &str, owner: Uuid, token: Uuid) -> CacheResult<()> {
        if ctx.is_cancelled() {
            return Err(CacheError::Cancelled);
        }
        let mut holders = self.holders.write();
        match holders.get(key) {
            Some(holder) if holder.owner != owner || holder.token != token => {
                Err(CacheError::LockNotHeld)
            }
            Some(_) => {
                holders.remove(key);
                Ok(())
            }
            None => Err(CacheError::LockNotHeld),
        }
    }

    /// Resets the held entry's `created_at` to now, verifying only that the
    /// entry still exists and its fencing token matches this handle — per
    /// design, `refresh` does not separately check expiry: a handle that
    /// refreshes an entry at the instant it lapses still wins the race
    /// against preemption, since preemption itself only happens inside
    /// `try_lock`.
    pub(crate) fn refresh(&self, ctx: &Context, key: &str, owner: Uuid, token: Uuid) -> CacheResult<Instant> {
        if ctx.is_cancelled() {
            return Err(CacheError::Cancelled);
        }
        let mut holders = self.holders.write();
        match holders.get_mut(key) {
            Some(holder) if holder.owner != owner || holder.token != token => Err(CacheError::LockNotHeld),
            Some(holder) => {
                holder.created_at = Instant::now();
                Ok(holder.created_at)
            }
            None => Err(CacheError::LockNotHeld),
        }
    }

    pub(crate) fn is_valid(&self, key: &str, owner: Uuid, token: Uuid) -> bool {
        match self.holders.read().get(key) {
            Some(holder) => holder.owner == owner && holder.token == token && !holder.is_expired(),
            None => false,
        }
    }

    pub fn is_locked(&self, key: &str) -> bool {
        match self.holders.read().get(key) {
            Some(holder) => !holder.is_expired(),
            None => false,
        }
    }

    /// Releases `key` unconditionally, bypassing owner/token checks. An
    /// operational escape hatch, not part of the normal lock lifecycle.
    pub fn force_unlock(&self, key: &str) {
        self.holders.write().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::{Fixed, NoRetry};

    #[test]
    fn try_lock_conflict_is_fenced() {
        let manager = DistributedLock::new();
        let first = manager.try_lock(&Context::background(), "a", Duration::from_secs(10)).unwrap();
        let second = manager.try_lock(&Context::background(), "a", Duration::from_secs(10));
        assert_eq!(second.unwrap_err(), CacheError::FailedToPreemptLock);
        assert!(first.is_valid());
    }

    #[test]
    fn expired_lease_can_be_preempted_and_counted() {
        let manager = DistributedLock::new();
        let _first = manager.try_lock(&Context::background(), "a", Duration::from_millis(1)).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let second = manager.try_lock(&Context::background(), "a", Duration::from_secs(10));
        assert!(second.is_ok());
        assert_eq!(manager.stats().preempted_total, 1);
    }

    #[test]
    fn empty_key_is_rejected() {
        let manager = DistributedLock::new();
        assert_eq!(
            manager.try_lock(&Context::background(), "", Duration::from_secs(1)).unwrap_err(),
            CacheError::InvalidLockKey
        );
    }

    #[test]
    fn key_over_length_limit_is_rejected() {
        let manager = DistributedLock::new();
        let key = "x".repeat(MAX_KEY_LEN + 1);
        assert_eq!(
            manager.try_lock(&Context::background(), &key, Duration::from_secs(1)).unwrap_err(),
            CacheError::InvalidLockKey
        );
    }

    #[test]
    fn expiration_out_of_range_is_rejected() {
        let manager = DistributedLock::new();
        assert!(matches!(
            manager.try_lock(&Context::background(), "a", Duration::ZERO).unwrap_err(),
            CacheError::InvalidExpiration(_)
        ));
        assert!(matches!(
            manager.try_lock(&Context::background(), "a", MAX_EXPIRATION + Duration::from_secs(1)).unwrap_err(),
            CacheError::InvalidExpiration(_)
        ));
    }

    #[tokio::test]
    async fn lock_with_no_retry_fails_fast_on_conflict() {
        let manager = DistributedLock::new();
        let _held = manager.try_lock(&Context::background(), "a", Duration::from_secs(10)).unwrap();
        let ctx = Context::background();
        let result = manager
            .lock(&ctx, "a", Duration::from_secs(10), Duration::from_secs(1), &NoRetry)
            .await;
        assert_eq!(result.unwrap_err(), CacheError::FailedToPreemptLock);
    }

    #[tokio::test]
    async fn lock_retries_until_released() {
        let manager = DistributedLock::new();
        let held = manager.try_lock(&Context::background(), "a", Duration::from_millis(50)).unwrap();
        let ctx = Context::background();

        let manager_clone = Arc::clone(&manager);
        let waiter = tokio::spawn(async move {
            let strategy = Fixed::new(Duration::from_millis(10), 20);
            manager_clone
                .lock(&ctx, "a", Duration::from_secs(5), Duration::from_secs(5), &strategy)
                .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        held.unlock(&Context::background()).await.unwrap();

        let result = waiter.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn lock_honors_overall_timeout() {
        let manager = DistributedLock::new();
        let _held = manager.try_lock(&Context::background(), "a", Duration::from_secs(10)).unwrap();
        let ctx = Context::background();
        let strategy = Fixed::new(Duration::from_millis(5), 1000);
        let result = manager
            .lock(&ctx, "a", Duration::from_secs(10), Duration::from_millis(30), &strategy)
            .await;
        assert_eq!(result.unwrap_err(), CacheError::Cancelled);
    }

    #[tokio::test]
    async fn singleflight_lock_coalesces_concurrent_callers() {
        let manager = DistributedLock::new();
        let ctx = Context::background();

        let mut handles = Vec::new();
        for _ in 0..5 {
            let manager = Arc::clone(&manager);
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move {
                let strategy = Fixed::new(Duration::from_millis(5), 50);
                manager
                    .singleflight_lock(&ctx, "a", Duration::from_secs(5), Duration::from_secs(1), &strategy)
                    .await
            }));
        }

        let mut oks = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                oks += 1;
            }
        }
        assert!(oks >= 1);
    }

    #[test]
    fn force_unlock_ignores_ownership() {
        let manager = DistributedLock::new();
        let _held = manager.try_lock(&Context::background(), "a", Duration::from_secs(10)).unwrap();
        manager.force_unlock("a");
        assert!(!manager.is_locked("a"));
    }
}
