//! # cachekit-bloom
//!
//! A [`filter::BloomFilter`] and the [`cache::BloomCache`] that fronts any
//! [`cachekit_common::Repository`] with it, rejecting definite misses
//! before they reach the inner repository.

pub mod cache;
pub mod filter;

pub use cache::BloomCache;
pub use filter::{BloomFilter, BloomStats};
