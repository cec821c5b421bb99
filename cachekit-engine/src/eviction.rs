//! # Eviction Policies
//!
//! Provide the three pluggable key-ordering policies that drive
//! [`crate::memory_bounded::MemoryBoundedCache`]'s byte budget: LRU, FIFO,
//! and Random.
//!
//! ## Design Principles
//!
//! 1. **Index-Based Intrusive Lists**: LRU and FIFO both keep a dense node
//!    arena addressed by index rather than heap pointers, the same pattern
//!    the teacher's `ShardInner` uses for its LRU list — this keeps nodes
//!    cache-friendly and avoids `unsafe`.
//! 2. **Shared Trait, Divergent Semantics**: all three expose the same five
//!    operations (`key_accessed`, `evict`, `remove`, `has`, `size`, plus
//!    `clear`), but FIFO's `key_accessed` is a no-op on an existing key —
//!    the one place LRU and FIFO genuinely disagree.
//! 3. **Capacity Is Optional**: a policy constructed with a capacity evicts
//!    internally from `key_accessed` to stay at or under it; one constructed
//!    without a capacity never self-evicts (the byte budget above it decides
//!    when to call `evict()`).

use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Shared contract of all eviction policies (core spec section 4.2 / 6).
///
/// Reads (`has`, `size`) take a shared lock; writes
/// (`key_accessed`, `evict`, `remove`, `clear`) take an exclusive one.
pub trait EvictionPolicy: Send + Sync {
    /// Records that `key` was just read or written. On LRU this moves the
    /// key to the most-recently-used end; on FIFO it is a no-op for a key
    /// already present (insertion order only). If constructed with a
    /// capacity, inserting a new key past capacity evicts internally.
    fn key_accessed(&self, key: &str);

    /// Picks and removes the next victim, or `None` if the policy tracks no
    /// evictable keys.
    fn evict(&self) -> Option<String>;

    /// Removes `key` from the policy's bookkeeping, independent of any
    /// byte-budget eviction. A no-op if the key isn't tracked.
    fn remove(&self, key: &str);

    /// True if the policy is currently tracking `key`.
    fn has(&self, key: &str) -> bool;

    /// Number of keys currently tracked.
    fn size(&self) -> usize;

    /// Drops all tracked keys.
    fn clear(&self);
}

#[derive(Debug)]
struct Node {
    key: String,
    prev: Option<usize>,
    next: Option<usize>,
}

struct ListInner {
    map: hashbrown::HashMap<String, usize, ahash::RandomState>,
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    capacity: Option<usize>,
}

impl ListInner {
    fn new(capacity: Option<usize>) -> Self {
        ListInner {
            map: hashbrown::HashMap::with_hasher(ahash::RandomState::new()),
            nodes: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            capacity,
        }
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.nodes[idx].as_ref().expect("node exists");
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.nodes[p].as_mut().unwrap().next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].as_mut().unwrap().prev = prev,
            None => self.tail = prev,
        }
        if let Some(node) = self.nodes[idx].as_mut() {
            node.prev = None;
            node.next = None;
        }
    }

    fn push_back(&mut self, idx: usize) {
        let tail = self.tail;
        if let Some(node) = self.nodes[idx].as_mut() {
            node.prev = tail;
            node.next = None;
        }
        match tail {
            Some(t) => self.nodes[t].as_mut().unwrap().next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
    }

    fn push_front(&mut self, idx: usize) {
        let head = self.head;
        if let Some(node) = self.nodes[idx].as_mut() {
            node.prev = None;
            node.next = head;
        }
        match head {
            Some(h) => self.nodes[h].as_mut().unwrap().prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }

    fn alloc(&mut self, key: String) -> usize {
        let idx = self.free.pop().unwrap_or_else(|| {
            self.nodes.push(None);
            self.nodes.len() - 1
        });
        self.nodes[idx] = Some(Node {
            key: key.clone(),
            prev: None,
            next: None,
        });
        self.map.insert(key, idx);
        idx
    }

    fn pop_front(&mut self) -> Option<String> {
        let idx = self.head?;
        self.detach(idx);
        self.remove_detached(idx)
    }

    fn remove_detached(&mut self, idx: usize) -> Option<String> {
        let node = self.nodes[idx].take()?;
        self.map.remove(&node.key);
        self.free.push(idx);
        Some(node.key)
    }
}

/// Least-recently-used eviction policy: head is oldest, tail is newest.
pub struct Lru {
    inner: RwLock<ListInner>,
}

impl Lru {
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Lru {
            inner: RwLock::new(ListInner::new(capacity)),
        }
    }
}

impl Default for Lru {
    fn default() -> Self {
        Self::new()
    }
}

impl EvictionPolicy for Lru {
    fn key_accessed(&self, key: &str) {
        let mut inner = self.inner.write();
        if let Some(&idx) = inner.map.get(key) {
            inner.detach(idx);
            inner.push_back(idx);
            return;
        }
        let idx = inner.alloc(key.to_string());
        inner.push_back(idx);

        if let Some(capacity) = inner.capacity {
            while inner.map.len() > capacity {
                if inner.pop_front().is_none() {
                    break;
                }
            }
        }
    }

    fn evict(&self) -> Option<String> {
        let mut inner = self.inner.write();
        inner.pop_front()
    }

    fn remove(&self, key: &str) {
        let mut inner = self.inner.write();
        if let Some(&idx) = inner.map.get(key) {
            inner.detach(idx);
            inner.remove_detached(idx);
        }
    }

    fn has(&self, key: &str) -> bool {
        self.inner.read().map.contains_key(key)
    }

    fn size(&self) -> usize {
        self.inner.read().map.len()
    }

    fn clear(&self) {
        let mut inner = self.inner.write();
        *inner = ListInner::new(inner.capacity);
    }
}

/// First-in-first-out eviction policy: re-accessing an existing key does
/// NOT change its position. This is FIFO's defining contract against LRU.
pub struct Fifo {
    inner: RwLock<ListInner>,
}

impl Fifo {
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Fifo {
            inner: RwLock::new(ListInner::new(capacity)),
        }
    }
}

impl Default for Fifo {
    fn default() -> Self {
        Self::new()
    }
}

impl EvictionPolicy for Fifo {
    fn key_accessed(&self, key: &str) {
        let mut inner = self.inner.write();
        if inner.map.contains_key(key) {
            // Defining FIFO property: re-access does not renew position.
            return;
        }
        let idx = inner.alloc(key.to_string());
        inner.push_back(idx);

        if let Some(capacity) = inner.capacity {
            while inner.map.len() > capacity {
                if inner.pop_front().is_none() {
                    break;
                }
            }
        }
    }

    fn evict(&self) -> Option<String> {
        let mut inner = self.inner.write();
        inner.pop_front()
    }

    fn remove(&self, key: &str) {
        let mut inner = self.inner.write();
        if let Some(&idx) = inner.map.get(key) {
            inner.detach(idx);
            inner.remove_detached(idx);
        }
    }

    fn has(&self, key: &str) -> bool {
        self.inner.read().map.contains_key(key)
    }

    fn size(&self) -> usize {
        self.inner.read().map.len()
    }

    fn clear(&self) {
        let mut inner = self.inner.write();
        *inner = ListInner::new(inner.capacity);
    }
}

struct RandomInner {
    keys: Vec<String>,
    index: hashbrown::HashMap<String, usize, ahash::RandomState>,
    capacity: Option<usize>,
    rng: StdRng,
}

impl RandomInner {
    fn remove_at(&mut self, pos: usize) -> String {
        let last = self.keys.len() - 1;
        self.keys.swap(pos, last);
        if pos != last {
            let moved = self.keys[pos].clone();
            self.index.insert(moved, pos);
        }
        let removed = self.keys.pop().expect("non-empty");
        self.index.remove(&removed);
        removed
    }
}

/// Uniform-random eviction policy: swap-with-last removal keeps both
/// insert and evict O(1); the victim on eviction is chosen uniformly.
pub struct Random {
    // `StdRng` is not internally synchronized, so it rides inside the same
    // lock that guards the rest of the policy's state rather than its own
    // separate mutex.
    inner: RwLock<RandomInner>,
}

impl Random {
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Random {
            inner: RwLock::new(RandomInner {
                keys: Vec::new(),
                index: hashbrown::HashMap::with_hasher(ahash::RandomState::new()),
                capacity,
                rng: StdRng::from_entropy(),
            }),
        }
    }
}

impl Default for Random {
    fn default() -> Self {
        Self::new()
    }
}

impl EvictionPolicy for Random {
    fn key_accessed(&self, key: &str) {
        let mut inner = self.inner.write();
        if inner.index.contains_key(key) {
            return;
        }
        inner.keys.push(key.to_string());
        let pos = inner.keys.len() - 1;
        inner.index.insert(key.to_string(), pos);

        if let Some(capacity) = inner.capacity {
            while inner.keys.len() > capacity {
                let victim_pos = inner.rng.gen_range(0..inner.keys.len());
                inner.remove_at(victim_pos);
            }
        }
    }

    fn evict(&self) -> Option<String> {
        let mut inner = self.inner.write();
        if inner.keys.is_empty() {
            return None;
        }
        let pos = inner.rng.gen_range(0..inner.keys.len());
        Some(inner.remove_at(pos))
    }

    fn remove(&self, key: &str) {
        let mut inner = self.inner.write();
        if let Some(&pos) = inner.index.get(key) {
            inner.remove_at(pos);
        }
    }

    fn has(&self, key: &str) -> bool {
        self.inner.read().index.contains_key(key)
    }

    fn size(&self) -> usize {
        self.inner.read().index.len()
    }

    fn clear(&self) {
        let mut inner = self.inner.write();
        inner.keys.clear();
        inner.index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lru_evicts_least_recently_used() {
        let policy = Lru::new();
        policy.key_accessed("a");
        policy.key_accessed("b");
        policy.key_accessed("a");
        assert_eq!(policy.evict().as_deref(), Some("b"));
        assert_eq!(policy.evict().as_deref(), Some("a"));
        assert_eq!(policy.evict(), None);
    }

    #[test]
    fn fifo_reaccess_does_not_renew() {
        let policy = Fifo::new();
        policy.key_accessed("a");
        policy.key_accessed("b");
        policy.key_accessed("a");
        assert_eq!(policy.evict().as_deref(), Some("a"));
        assert_eq!(policy.evict().as_deref(), Some("b"));
    }

    #[test]
    fn fifo_vs_lru_scenario() {
        let fifo = Fifo::with_capacity(Some(3));
        for key in ["a", "b", "c", "a", "d"] {
            fifo.key_accessed(key);
        }
        assert!(!fifo.has("a"));
        assert!(fifo.has("b"));
        assert!(fifo.has("c"));
        assert!(fifo.has("d"));
    }

    #[test]
    fn lru_capacity_self_evicts() {
        let lru = Lru::with_capacity(Some(2));
        lru.key_accessed("a");
        lru.key_accessed("b");
        lru.key_accessed("c");
        assert_eq!(lru.size(), 2);
        assert!(!lru.has("a"));
    }

    #[test]
    fn random_remove_is_swap_with_last() {
        let policy = Random::new();
        for key in ["a", "b", "c", "d"] {
            policy.key_accessed(key);
        }
        policy.remove("b");
        assert_eq!(policy.size(), 3);
        assert!(!policy.has("b"));
        assert!(policy.has("a") && policy.has("c") && policy.has("d"));
    }

    #[test]
    fn random_evict_returns_none_when_empty() {
        let policy = Random::new();
        assert_eq!(policy.evict(), None);
    }

    #[test]
    fn clear_resets_all_policies() {
        let lru = Lru::new();
        lru.key_accessed("a");
        lru.clear();
        assert_eq!(lru.size(), 0);

        let fifo = Fifo::new();
        fifo.key_accessed("a");
        fifo.clear();
        assert_eq!(fifo.size(), 0);

        let random = Random::new();
        random.key_accessed("a");
        random.clear();
        assert_eq!(random.size(), 0);
    }
}
