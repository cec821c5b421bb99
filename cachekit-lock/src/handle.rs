//! # Lock Handle
//!
//! The caller-facing token returned by [`crate::manager::DistributedLock`]:
//! carries the owner/fencing UUIDs needed to prove ownership on `unlock`
//! and `refresh`, and can spawn a background task that renews the lease on
//! its own so a long-running critical section doesn't need to poll a
//! timer manually.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use uuid::Uuid;

use cachekit_common::{CacheError, CacheResult, Context};

use crate::manager::DistributedLock;

/// A held lease over one key. Dropping a `Lock` without calling
/// [`Lock::unlock`] leaves the lease in place until it naturally expires —
/// there is no `Drop`-based auto-release, matching the explicit requirement
/// that release be a deliberate operation.
pub struct Lock {
    manager: Arc<DistributedLock>,
    key: String,
    owner: Uuid,
    token: Uuid,
    created_at: Mutex<Instant>,
    expiration: Duration,
    released: AtomicBool,
    auto_refresh_stop: Mutex<Option<Arc<AtomicBool>>>,
}

impl Lock {
    pub(crate) fn new(
        manager: Arc<DistributedLock>,
        key: String,
        owner: Uuid,
        token: Uuid,
        created_at: Instant,
        expiration: Duration,
    ) -> Self {
        Lock {
            manager,
            key,
            owner,
            token,
            created_at: Mutex::new(created_at),
            expiration,
            released: AtomicBool::new(false),
            auto_refresh_stop: Mutex::new(None),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn owner(&self) -> Uuid {
        self.owner
    }

    pub fn fencing_token(&self) -> Uuid {
        self.token
    }

    pub fn created_at(&self) -> Instant {
        *self.created_at.lock()
    }

    /// The fixed lease duration granted at acquisition. `refresh` resets
    /// [`Lock::created_at`] but never changes this value — expiration is
    /// always measured from the (possibly refreshed) creation instant.
    pub fn expiration(&self) -> Duration {
        self.expiration
    }

    /// True iff the manager's stored entry still exists, its fencing token
    /// matches this handle, and it has not expired. Re-queries live
    /// manager state rather than trusting this handle's local flags, so a
    /// concurrently force-unlocked or preempted lease is observed. Matches
    /// [`Lock::is_expired`]'s pure check as one of its three conditions.
    pub fn is_valid(&self) -> bool {
        !self.released.load(Ordering::Acquire) && self.manager.is_valid(&self.key, self.owner, self.token)
    }

    /// Pure function of `created_at + expiration` against `now`.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= *self.created_at.lock() + self.expiration
    }

    /// Verifies the stored entry still exists and its fencing token matches
    /// this handle, then resets `created_at` to now. Does not extend
    /// `expiration` beyond the original duration granted at acquisition.
    pub async fn refresh(&self, ctx: &Context) -> CacheResult<()> {
        if self.released.load(Ordering::Acquire) {
            return Err(CacheError::LockNotHeld);
        }
        let created_at = self.manager.refresh(ctx, &self.key, self.owner, self.token)?;
        *self.created_at.lock() = created_at;
        Ok(())
    }

    /// Spawns a background task that calls [`Lock::refresh`] every
    /// `interval`, bounding each call with `per_call_timeout`, until
    /// [`Lock::unlock`] is called or a refresh call errors, at which point
    /// it logs and stops.
    pub fn auto_refresh(self: &Arc<Self>, interval: Duration, per_call_timeout: Duration) {
        let stop = Arc::new(AtomicBool::new(false));
        *self.auto_refresh_stop.lock() = Some(Arc::clone(&stop));

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if stop.load(Ordering::Acquire) {
                    return;
                }
                let Some(lock) = weak.upgrade() else {
                    return;
                };
                let ctx = Context::background().with_timeout(per_call_timeout);
                if let Err(err) = lock.refresh(&ctx).await {
                    tracing::warn!(key = %lock.key, error = ?err, "auto-refresh stopped: lease lost");
                    return;
                }
            }
        });
    }

    /// Releases the lease. Idempotent-unsafe: a second call returns
    /// `CacheError::LockNotHeld`.
    pub async fn unlock(&self, ctx: &Context) -> CacheResult<()> {
        if self
            .released
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CacheError::LockNotHeld);
        }
        if let Some(stop) = self.auto_refresh_stop.lock().take() {
            stop.store(true, Ordering::Release);
        }
        self.manager.unlock(ctx, &self.key, self.owner, self.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::DistributedLock;

    fn ctx() -> Context {
        Context::background()
    }

    #[tokio::test]
    async fn refresh_resets_created_at_without_extending_expiration() {
        let manager = DistributedLock::new();
        let lock = manager.try_lock(&ctx(), "a", Duration::from_millis(200)).unwrap();
        let before = lock.created_at();
        tokio::time::sleep(Duration::from_millis(10)).await;
        lock.refresh(&ctx()).await.unwrap();
        assert!(lock.created_at() > before);
        assert_eq!(lock.expiration(), Duration::from_millis(200));
    }

    #[tokio::test]
    async fn unlock_twice_fails_second_time() {
        let manager = DistributedLock::new();
        let lock = manager.try_lock(&ctx(), "a", Duration::from_secs(10)).unwrap();
        lock.unlock(&ctx()).await.unwrap();
        assert_eq!(lock.unlock(&ctx()).await.unwrap_err(), CacheError::LockNotHeld);
    }

    #[tokio::test]
    async fn unlock_releases_key_for_others() {
        let manager = DistributedLock::new();
        let lock = manager.try_lock(&ctx(), "a", Duration::from_secs(10)).unwrap();
        lock.unlock(&ctx()).await.unwrap();
        assert!(manager.try_lock(&ctx(), "a", Duration::from_secs(10)).is_ok());
    }

    #[tokio::test]
    async fn refresh_after_preemption_fails() {
        let manager = DistributedLock::new();
        let lock = manager.try_lock(&ctx(), "a", Duration::from_millis(5)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _other = manager.try_lock(&ctx(), "a", Duration::from_secs(5)).unwrap();
        assert_eq!(lock.refresh(&ctx()).await.unwrap_err(), CacheError::LockNotHeld);
    }

    #[test]
    fn is_expired_is_pure_function_of_created_at_and_expiration() {
        let manager = DistributedLock::new();
        let lock = manager.try_lock(&ctx(), "a", Duration::from_millis(5)).unwrap();
        assert!(!lock.is_expired());
        std::thread::sleep(Duration::from_millis(20));
        assert!(lock.is_expired());
    }

    #[tokio::test]
    async fn is_valid_detects_external_force_unlock() {
        let manager = DistributedLock::new();
        let lock = manager.try_lock(&ctx(), "a", Duration::from_secs(10)).unwrap();
        assert!(lock.is_valid());
        manager.force_unlock("a");
        assert!(!lock.is_valid());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn auto_refresh_keeps_lease_alive() {
        let manager = DistributedLock::new();
        let lock = Arc::new(manager.try_lock(&ctx(), "a", Duration::from_millis(40)).unwrap());
        lock.auto_refresh(Duration::from_millis(10), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(lock.is_valid());

        lock.unlock(&ctx()).await.unwrap();
    }
}
