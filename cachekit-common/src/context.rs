//! # Cancellation Context
//!
//! Purpose: give every public operation in cachekit a single request-scoped
//! handle for cancellation, deadlines, and the "rate limited" signal,
//! instead of a bare `Duration` parameter plus a string-keyed lookup.
//!
//! ## Design Principles
//!
//! 1. **Typed, Not String-Keyed**: the "limited" signal is a struct field,
//!    not a key someone could typo into a generic context map.
//! 2. **Cheap to Clone**: `Context` is an `Arc` handle; cloning it to hand
//!    to a background task or a single-flight waiter is O(1).
//! 3. **Timeout Is Sugar for Cancel**: `with_timeout` spawns a timer that
//!    cancels the derived context; callers that only need "stop after N"
//!    never touch the notify machinery directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
    limited: bool,
}

/// A cancellation- and signal-carrying handle threaded through every public
/// cachekit operation.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Context {
    /// A context that never cancels and never signals "limited".
    pub fn background() -> Self {
        Context {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
                limited: false,
            }),
        }
    }

    /// Derives a child context that also signals "limited" to callers that
    /// check [`Context::is_limited`]. Used by the rate-limited layer
    /// variants to skip the degraded-mode path.
    pub fn limited(&self) -> Self {
        Context {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(self.is_cancelled()),
                notify: Notify::new(),
                limited: true,
            }),
        }
    }

    /// Derives a child context that cancels itself after `timeout` elapses,
    /// in addition to inheriting the parent's current cancellation state.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let child = Context {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(self.is_cancelled()),
                notify: Notify::new(),
                limited: self.inner.limited,
            }),
        };

        let weak_child = child.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            weak_child.cancel();
        });

        child
    }

    /// Manually cancels this context. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// True once this context has been cancelled or has timed out.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// True if this context carries the "rate limited" signal.
    pub fn is_limited(&self) -> bool {
        self.inner.limited
    }

    /// Resolves once the context is cancelled. Poll this inside a
    /// `tokio::select!` alongside the real work to honor cancellation
    /// promptly, per the ordering guarantees in the core spec.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
            if self.is_cancelled() {
                return;
            }
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn background_never_cancels() {
        let ctx = Context::background();
        assert!(!ctx.is_cancelled());
    }

    #[tokio::test]
    async fn manual_cancel_wakes_waiter() {
        let ctx = Context::background();
        let waiter = ctx.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        ctx.cancel();
        handle.await.unwrap();
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn with_timeout_cancels_itself() {
        let ctx = Context::background().with_timeout(Duration::from_millis(10));
        assert!(!ctx.is_cancelled());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn limited_flag_is_set() {
        let ctx = Context::background();
        assert!(!ctx.is_limited());
        let limited = ctx.limited();
        assert!(limited.is_limited());
    }
}
