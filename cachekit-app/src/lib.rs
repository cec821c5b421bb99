//! # cachekit-app
//!
//! A thin DTO-validation layer in front of the cache and lock crates:
//! [`cache_service::CacheAppService`] and [`lock_service::LockAppService`]
//! reject malformed requests before they reach the composed repository or
//! distributed lock underneath.

pub mod cache_service;
pub mod lock_service;

pub use cache_service::{CacheAppService, GetRequest, SetRequest, StatsProvider};
pub use lock_service::{AcquireLockRequest, LockAppService, LockResult, RetryKind};
