//! # LockAppService
//!
//! Validates acquisition requests (empty keys, out-of-range leases, retry
//! parameter ranges) before constructing the requested
//! [`cachekit_lock::RetryStrategy`] and delegating to a
//! [`DistributedLock`]. Also builds [`LockResult`] read-model DTOs from a
//! live [`Lock`] handle for callers that want a snapshot without holding
//! the handle itself.

use std::sync::Arc;
use std::time::{Duration, Instant};

use uuid::Uuid;

use cachekit_common::{CacheError, CacheResult, Context};
use cachekit_lock::{DistributedLock, Exponential, Fixed, Linear, Lock, LockStats, NoRetry, RetryStrategy};

fn duration_to_millis(d: Duration) -> u64 {
    d.as_millis().min(u64::MAX as u128) as u64
}

/// Wire-level description of which retry strategy to build; kept separate
/// from the strategy types themselves so a request can be deserialized
/// (e.g. from JSON config) without pulling trait objects across the
/// boundary.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryKind {
    Fixed { delay_ms: u64, max_attempts: u32 },
    Exponential {
        base_ms: u64,
        multiplier: f64,
        max_delay_ms: u64,
        max_attempts: u32,
    },
    Linear {
        base_ms: u64,
        step_ms: u64,
        max_delay_ms: u64,
        max_attempts: u32,
    },
    NoRetry,
}

impl RetryKind {
    /// Builds a `RetryKind` from the primitive triple callers pass across a
    /// wire boundary: a type tag (`"fixed"`, `"exponential"`, `"linear"`, or
    /// `""` defaulting to `"fixed"`), a base delay, and a retry count.
    ///
    /// `retry_count == 0` always yields [`RetryKind::NoRetry`], regardless
    /// of `retry_type`. A negative count, a zero `retry_base` paired with a
    /// positive count, or an unrecognized `retry_type` are all rejected.
    /// `exponential`/`linear` strategies fill their shape parameters
    /// (multiplier, step, cap) with fixed defaults since the triple carries
    /// no room for them.
    pub fn from_dto(retry_type: &str, retry_base: Duration, retry_count: i64) -> CacheResult<RetryKind> {
        if retry_count < 0 {
            return Err(CacheError::InvalidInput("retry_count must not be negative".to_string()));
        }
        if retry_count == 0 {
            return Ok(RetryKind::NoRetry);
        }
        if retry_base.is_zero() {
            return Err(CacheError::InvalidInput(
                "retry_base must be greater than zero when retry_count > 0".to_string(),
            ));
        }

        let max_attempts = retry_count as u32;
        let base_ms = duration_to_millis(retry_base);
        let kind = if retry_type.is_empty() { "fixed" } else { retry_type };

        match kind {
            "fixed" => Ok(RetryKind::Fixed { delay_ms: base_ms, max_attempts }),
            "exponential" => Ok(RetryKind::Exponential {
                base_ms,
                multiplier: 2.0,
                max_delay_ms: base_ms.saturating_mul(1 << max_attempts.min(20)),
                max_attempts,
            }),
            "linear" => Ok(RetryKind::Linear {
                base_ms,
                step_ms: base_ms,
                max_delay_ms: base_ms.saturating_mul(max_attempts as u64),
                max_attempts,
            }),
            other => Err(CacheError::InvalidInput(format!("unknown retry_type: {other}"))),
        }
    }

    fn validate(&self) -> CacheResult<()> {
        let invalid = |msg: &str| Err(CacheError::InvalidInput(msg.to_string()));
        match self {
            RetryKind::Fixed { max_attempts, .. } if *max_attempts == 0 => {
                invalid("max_attempts must be greater than zero")
            }
            RetryKind::Exponential {
                multiplier,
                max_attempts,
                ..
            } if *multiplier <= 1.0 || *max_attempts == 0 => {
                invalid("exponential retry requires multiplier > 1.0 and max_attempts > 0")
            }
            RetryKind::Linear { max_attempts, .. } if *max_attempts == 0 => {
                invalid("max_attempts must be greater than zero")
            }
            _ => Ok(()),
        }
    }

    fn build(&self) -> Box<dyn RetryStrategy> {
        match self {
            RetryKind::Fixed { delay_ms, max_attempts } => {
                Box::new(Fixed::new(Duration::from_millis(*delay_ms), *max_attempts))
            }
            RetryKind::Exponential {
                base_ms,
                multiplier,
                max_delay_ms,
                max_attempts,
            } => Box::new(Exponential::new(
                Duration::from_millis(*base_ms),
                *multiplier,
                Duration::from_millis(*max_delay_ms),
                *max_attempts,
            )),
            RetryKind::Linear {
                base_ms,
                step_ms,
                max_delay_ms,
                max_attempts,
            } => Box::new(Linear::new(
                Duration::from_millis(*base_ms),
                Duration::from_millis(*step_ms),
                Duration::from_millis(*max_delay_ms),
                *max_attempts,
            )),
            RetryKind::NoRetry => Box::new(NoRetry),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AcquireLockRequest {
    pub key: String,
    pub expiration: Duration,
    pub timeout: Duration,
    pub retry: RetryKind,
}

/// Read-model snapshot of a held lease, built from a [`Lock`] handle's
/// public getters. `value` is the fencing token — named to match the
/// handle's own "stored entry's value" terminology, not the cached
/// payload.
#[derive(Debug, Clone)]
pub struct LockResult {
    pub key: String,
    pub value: Uuid,
    pub created_at: Instant,
    pub expiration: Duration,
    pub is_valid: bool,
}

/// Validates lock requests, then delegates to a [`DistributedLock`].
pub struct LockAppService {
    manager: Arc<DistributedLock>,
}

impl LockAppService {
    pub fn new(manager: Arc<DistributedLock>) -> Self {
        LockAppService { manager }
    }

    pub fn in_memory() -> Self {
        LockAppService::new(DistributedLock::new())
    }

    pub async fn acquire(&self, ctx: &Context, req: AcquireLockRequest) -> CacheResult<Lock> {
        req.retry.validate()?;
        let strategy = req.retry.build();
        self.manager
            .lock(ctx, &req.key, req.expiration, req.timeout, strategy.as_ref())
            .await
    }

    /// Identical to [`LockAppService::acquire`], but concurrent callers for
    /// the same key are coalesced through the manager's single-flight
    /// group.
    pub async fn acquire_singleflight(&self, ctx: &Context, req: AcquireLockRequest) -> CacheResult<Lock> {
        req.retry.validate()?;
        let strategy = req.retry.build();
        self.manager
            .singleflight_lock(ctx, &req.key, req.expiration, req.timeout, strategy.as_ref())
            .await
    }

    pub fn try_acquire(&self, ctx: &Context, key: &str, expiration: Duration) -> CacheResult<Lock> {
        self.manager.try_lock(ctx, key, expiration)
    }

    pub fn stats(&self) -> LockStats {
        self.manager.stats()
    }

    /// Snapshots a held lease into a [`LockResult`] DTO.
    pub fn to_lock_result(&self, lock: &Lock) -> LockResult {
        LockResult {
            key: lock.key().to_string(),
            value: lock.fencing_token(),
            created_at: lock.created_at(),
            expiration: lock.expiration(),
            is_valid: lock.is_valid(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(key: &str, expiration: Duration, retry: RetryKind) -> AcquireLockRequest {
        AcquireLockRequest {
            key: key.to_string(),
            expiration,
            timeout: Duration::from_secs(1),
            retry,
        }
    }

    #[tokio::test]
    async fn rejects_empty_key() {
        let service = LockAppService::in_memory();
        let ctx = Context::background();
        let err = service
            .acquire(&ctx, request("", Duration::from_secs(5), RetryKind::NoRetry))
            .await
            .unwrap_err();
        assert_eq!(err, CacheError::InvalidLockKey);
    }

    #[tokio::test]
    async fn rejects_zero_expiration() {
        let service = LockAppService::in_memory();
        let ctx = Context::background();
        let err = service
            .acquire(&ctx, request("a", Duration::ZERO, RetryKind::NoRetry))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidExpiration(_)));
    }

    #[tokio::test]
    async fn rejects_invalid_retry_params() {
        let service = LockAppService::in_memory();
        let ctx = Context::background();
        let err = service
            .acquire(
                &ctx,
                request(
                    "a",
                    Duration::from_secs(5),
                    RetryKind::Fixed { delay_ms: 10, max_attempts: 0 },
                ),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn valid_request_acquires_lock() {
        let service = LockAppService::in_memory();
        let ctx = Context::background();
        let lock = service
            .acquire(&ctx, request("a", Duration::from_secs(5), RetryKind::NoRetry))
            .await
            .unwrap();
        assert!(lock.is_valid());
        assert_eq!(service.stats().held_count, 1);

        let dto = service.to_lock_result(&lock);
        assert_eq!(dto.key, "a");
        assert!(dto.is_valid);
        assert_eq!(dto.value, lock.fencing_token());
    }

    #[test]
    fn dto_zero_count_is_no_retry_regardless_of_type() {
        let kind = RetryKind::from_dto("exponential", Duration::from_millis(100), 0).unwrap();
        assert!(matches!(kind, RetryKind::NoRetry));
    }

    #[test]
    fn dto_empty_type_defaults_to_fixed() {
        let kind = RetryKind::from_dto("", Duration::from_millis(50), 3).unwrap();
        assert!(matches!(kind, RetryKind::Fixed { max_attempts: 3, .. }));
    }

    #[test]
    fn dto_rejects_negative_count() {
        let err = RetryKind::from_dto("fixed", Duration::from_millis(50), -1).unwrap_err();
        assert!(matches!(err, CacheError::InvalidInput(_)));
    }

    #[test]
    fn dto_rejects_zero_base_with_positive_count() {
        let err = RetryKind::from_dto("fixed", Duration::ZERO, 3).unwrap_err();
        assert!(matches!(err, CacheError::InvalidInput(_)));
    }

    #[test]
    fn dto_rejects_unknown_type() {
        let err = RetryKind::from_dto("jittered", Duration::from_millis(50), 3).unwrap_err();
        assert!(matches!(err, CacheError::InvalidInput(_)));
    }
}
