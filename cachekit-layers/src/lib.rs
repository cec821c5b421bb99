//! # cachekit-layers
//!
//! Composition layers that sit in front of a
//! [`cachekit_common::Repository`]: [`read_through::ReadThroughLayer`]
//! populates on miss with stampede suppression,
//! [`write_through::WriteThroughLayer`] keeps cache and source strongly
//! consistent, and [`write_back::WriteBackLayer`] batches writes through a
//! dirty set flushed on size or time triggers.

pub mod read_through;
pub mod write_back;
pub mod write_through;

pub use read_through::{Loaded, PartialSuccess, RateLimitedReadThrough, ReadThroughLayer};
pub use write_back::WriteBackLayer;
pub use write_through::{RateLimitedWriteThrough, WriteThroughLayer};
