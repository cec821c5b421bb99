//! # cachekit-engine
//!
//! The memory-bounded key/value core: [`basekv::BaseKV`] gives TTL-aware
//! storage with a background sweeper; [`memory_bounded::MemoryBoundedCache`]
//! layers a byte budget and a pluggable [`eviction::EvictionPolicy`]
//! (LRU, FIFO, Random) on top of any [`cachekit_common::Repository`].
//!
//! This crate stays synchronous at its core (`parking_lot` + a
//! `std::thread` sweeper), matching the teacher's engine crate; the async
//! coordination layers live one crate up.

pub mod basekv;
pub mod eviction;
pub mod memory_bounded;

pub use basekv::{BaseKV, ExpirerHandle};
pub use eviction::{EvictionPolicy, Fifo, Lru, Random};
pub use memory_bounded::{ByteSize, CacheStats, MemoryBoundedCache};
