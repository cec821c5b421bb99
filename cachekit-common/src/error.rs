//! # Error Kinds
//!
//! Purpose: give every caller a stable, equality-comparable error identity
//! so layers can branch on "was this a miss" vs "was this a real failure"
//! without string matching.
//!
//! ## Design Principles
//!
//! 1. **Equality-Comparable**: callers match on `err == CacheError::KeyNotFound`
//!    rather than downcasting, matching the dispatch pattern already used
//!    against `HkvError` in the teacher's server code.
//! 2. **No Panics on Bad Input**: invalid caller input (empty lock key, bad
//!    bloom parameters) is returned as an error kind, never a panic.
//! 3. **Partial Success Carries Data**: `FailedToRefreshCache` and
//!    `PartialFlush` carry enough payload for the caller to recover.

use std::time::Duration;

use thiserror::Error;

/// Stable error identity for the cachekit core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// Key absent, or the bloom filter rejected the key before load.
    #[error("key not found")]
    KeyNotFound,

    /// Load succeeded but the subsequent cache `set` failed; callers still
    /// receive the loaded value through the `Ok` side of the outer result.
    #[error("loaded value but failed to refresh cache: {0}")]
    FailedToRefreshCache(String),

    /// `close` called twice on the same `BaseKV`.
    #[error("duplicate close")]
    DuplicateClose,

    /// Lock key was empty or exceeded 200 characters.
    #[error("invalid lock key")]
    InvalidLockKey,

    /// Expiration was non-positive or exceeded 24 hours.
    #[error("invalid expiration: {0:?}")]
    InvalidExpiration(Duration),

    /// Lock is held by another token and has not yet expired.
    #[error("failed to preempt lock")]
    FailedToPreemptLock,

    /// Refresh/unlock called where the stored token does not match the handle.
    #[error("lock not held")]
    LockNotHeld,

    /// Informational: a handle whose entry has timed out.
    #[error("lock expired")]
    LockExpired,

    /// Bloom filter constructed with `n <= 0`, `p <= 0`, or `p >= 1`.
    #[error("invalid bloom filter parameters")]
    BloomFilterInvalidParams,

    /// A flush loop completed with some keys failing; `failed` is the count.
    #[error("{failed} of {attempted} keys failed to flush")]
    PartialFlush { attempted: usize, failed: usize },

    /// A key was asked to flush but carried no unflushed write.
    #[error("key is not dirty")]
    NotDirty,

    /// The caller's `Context` was cancelled or its deadline elapsed.
    #[error("operation cancelled")]
    Cancelled,

    /// A validation failure from the application-service layer.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Escape hatch for ambient failures the distilled spec doesn't name
    /// (background task join failure, a user-supplied closure panicking).
    #[error("{0}")]
    Other(String),
}

/// Result alias used throughout the cachekit workspace.
pub type CacheResult<T> = Result<T, CacheError>;
