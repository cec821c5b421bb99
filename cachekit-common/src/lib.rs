//! # cachekit-common
//!
//! Shared error types, the cancellation-aware `Context`, and the
//! `SingleFlight` coalescing primitive used across the cache, bloom, and
//! lock crates.

pub mod context;
pub mod error;
pub mod repository;
pub mod singleflight;

pub use context::Context;
pub use error::{CacheError, CacheResult};
pub use repository::{EvictCallback, Repository};
pub use singleflight::SingleFlight;
