//! # BaseKV
//!
//! The foundational, unbounded-by-bytes key/value store: per-entry TTL,
//! lazy expiry on read, and a background sweeper thread that purges expired
//! entries in bounded-size passes.
//!
//! Grounded on the teacher's `hkv-engine::memory::MemoryEngine` — same
//! `parking_lot::RwLock` + `hashbrown::HashMap` core, same
//! `std::thread::spawn` sweeper with an `AtomicBool` stop flag and a
//! `JoinHandle`, generalized from the teacher's per-shard byte-sliced map to
//! a single unsharded map (core spec's `BaseKV` names no sharding concept).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;

use cachekit_common::{CacheError, CacheResult, Context, EvictCallback, Repository};

/// Caps how many expired entries a single sweeper pass removes, so one pass
/// never blocks readers for long on a cache holding millions of entries.
const MAX_SWEEP_PER_PASS: usize = 10_000;

struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
}

struct Inner<V> {
    map: hashbrown::HashMap<String, Entry<V>, ahash::RandomState>,
    evict_callback: Option<EvictCallback<V>>,
}

/// A background thread that periodically sweeps expired entries. Dropping
/// the handle does not stop the thread; call [`ExpirerHandle::stop`] or let
/// [`BaseKV::close`] do it.
pub struct ExpirerHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ExpirerHandle {
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Unbounded key/value store with per-entry TTL and a background sweeper.
/// `close()` may be called at most once; a second call returns
/// `CacheError::DuplicateClose`.
pub struct BaseKV<V> {
    inner: RwLock<Inner<V>>,
    closed: AtomicBool,
    expirer: RwLock<Option<ExpirerHandle>>,
}

impl<V> BaseKV<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Arc<Self> {
        Arc::new(BaseKV {
            inner: RwLock::new(Inner {
                map: hashbrown::HashMap::with_hasher(ahash::RandomState::new()),
                evict_callback: None,
            }),
            closed: AtomicBool::new(false),
            expirer: RwLock::new(None),
        })
    }

    /// Spawns the background sweeper thread on a fixed interval. Calling
    /// this more than once replaces the previous sweeper (stopping it
    /// first).
    pub fn start_expirer(self: &Arc<Self>, interval: Duration) {
        let stop = Arc::new(AtomicBool::new(false));
        let weak = Arc::downgrade(self);
        let stop_clone = Arc::clone(&stop);

        let join = std::thread::spawn(move || loop {
            std::thread::sleep(interval);
            if stop_clone.load(Ordering::Acquire) {
                return;
            }
            let Some(this) = weak.upgrade() else {
                return;
            };
            this.purge_expired();
        });

        let handle = ExpirerHandle {
            stop,
            join: Some(join),
        };

        let mut slot = self.expirer.write();
        if let Some(previous) = slot.take() {
            previous.stop();
        }
        *slot = Some(handle);
    }

    /// Removes up to `MAX_SWEEP_PER_PASS` expired entries. Returns the
    /// number actually removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.write();

        let expired: Vec<String> = inner
            .map
            .iter()
            .filter(|(_, entry)| matches!(entry.expires_at, Some(at) if at <= now))
            .take(MAX_SWEEP_PER_PASS)
            .map(|(key, _)| key.clone())
            .collect();

        let callback = inner.evict_callback.clone();
        let mut removed = 0;
        for key in expired {
            if let Some(entry) = inner.map.remove(&key) {
                if let Some(cb) = &callback {
                    cb(&key, &entry.value);
                }
                removed += 1;
            }
        }
        tracing::debug!(removed, "sweeper pass complete");
        removed
    }

    fn is_live(entry: &Entry<V>, now: Instant) -> bool {
        match entry.expires_at {
            Some(at) => at > now,
            None => true,
        }
    }

    /// Closes the store: stops the sweeper if running. Idempotent-unsafe by
    /// design — a second call is a logic error and returns
    /// `CacheError::DuplicateClose`.
    pub fn close(&self) -> CacheResult<()> {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CacheError::DuplicateClose);
        }
        if let Some(handle) = self.expirer.write().take() {
            handle.stop();
        }
        Ok(())
    }

    /// Remaining time-to-live for `key`, or `None` if the key never
    /// expires. Returns `CacheError::KeyNotFound` if absent or already
    /// expired.
    pub fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        let now = Instant::now();
        let inner = self.inner.read();
        match inner.map.get(key) {
            Some(entry) if Self::is_live(entry, now) => {
                Ok(entry.expires_at.map(|at| at.saturating_duration_since(now)))
            }
            _ => Err(CacheError::KeyNotFound),
        }
    }
}

#[async_trait]
impl<V> Repository<V> for BaseKV<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, _ctx: &Context, key: &str) -> CacheResult<V> {
        let now = Instant::now();
        {
            let inner = self.inner.read();
            match inner.map.get(key) {
                Some(entry) if Self::is_live(entry, now) => return Ok(entry.value.clone()),
                None => return Err(CacheError::KeyNotFound),
                Some(_) => {}
            }
        }

        let mut inner = self.inner.write();
        match inner.map.get(key) {
            Some(entry) if Self::is_live(entry, now) => Ok(entry.value.clone()),
            Some(_) => {
                let entry = inner.map.remove(key).expect("just observed present");
                let callback = inner.evict_callback.clone();
                if let Some(cb) = callback {
                    cb(key, &entry.value);
                }
                Err(CacheError::KeyNotFound)
            }
            None => Err(CacheError::KeyNotFound),
        }
    }

    async fn set(&self, _ctx: &Context, key: &str, value: V, ttl: Duration) -> CacheResult<()> {
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Some(Instant::now() + ttl)
        };
        let mut inner = self.inner.write();
        inner.map.insert(
            key.to_string(),
            Entry {
                value,
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, _ctx: &Context, key: &str) -> CacheResult<()> {
        let mut inner = self.inner.write();
        if let Some(entry) = inner.map.remove(key) {
            let callback = inner.evict_callback.clone();
            if let Some(cb) = callback {
                cb(key, &entry.value);
            }
        }
        Ok(())
    }

    async fn load_and_delete(&self, _ctx: &Context, key: &str) -> CacheResult<V> {
        let now = Instant::now();
        let mut inner = self.inner.write();
        match inner.map.remove(key) {
            Some(entry) => {
                let callback = inner.evict_callback.clone();
                if let Some(cb) = callback {
                    cb(key, &entry.value);
                }
                if Self::is_live(&entry, now) {
                    Ok(entry.value)
                } else {
                    Err(CacheError::KeyNotFound)
                }
            }
            None => Err(CacheError::KeyNotFound),
        }
    }

    fn on_evicted(&self, callback: EvictCallback<V>) {
        self.inner.write().evict_callback = Some(callback);
    }
}
