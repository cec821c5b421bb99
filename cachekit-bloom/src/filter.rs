//! # Bloom Filter
//!
//! A standard bit-array Bloom filter using the double-hashing scheme
//! (`h_i = h1 + i*h2 mod m`) to derive `k` index functions from two
//! independently seeded hashes, avoiding `k` separate hasher passes per
//! operation. No entry in the example pack implements a Bloom filter; the
//! bit-array layout and double-hashing derivation follow the standard
//! construction, sized with the teacher's `ahash::RandomState` as the
//! underlying hasher for consistency with the rest of the workspace.

use std::hash::{BuildHasher, Hash, Hasher};

use ahash::RandomState;
use parking_lot::RwLock;

use cachekit_common::{CacheError, CacheResult};

struct Inner {
    bits: Vec<u64>,
    len_bits: usize,
    num_hashes: u32,
    inserted: usize,
}

/// A probabilistic set membership test: `contains` never false-negatives
/// but can false-positive at a rate governed by `m` (bit count) and `k`
/// (hash count) relative to the number of inserted elements.
pub struct BloomFilter {
    inner: RwLock<Inner>,
    hasher_a: RandomState,
    hasher_b: RandomState,
}

/// Summary statistics for monitoring a live filter's saturation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BloomStats {
    pub len_bits: usize,
    pub num_hashes: u32,
    pub inserted: usize,
    pub estimated_fill_ratio: f64,
}

impl BloomFilter {
    /// Builds a filter sized for `expected_items` at `false_positive_rate`
    /// (0, 1 exclusive). Returns `CacheError::BloomFilterInvalidParams` for
    /// a zero item count or an out-of-range rate.
    pub fn new(expected_items: usize, false_positive_rate: f64) -> CacheResult<Self> {
        if expected_items == 0 || !(0.0..1.0).contains(&false_positive_rate) || false_positive_rate <= 0.0 {
            return Err(CacheError::BloomFilterInvalidParams);
        }

        let ln2 = std::f64::consts::LN_2;
        let m = (-(expected_items as f64) * false_positive_rate.ln() / (ln2 * ln2)).ceil();
        let len_bits = (m as usize).max(64);
        let k = ((len_bits as f64 / expected_items as f64) * ln2).round().max(1.0);
        let num_hashes = k as u32;

        Ok(BloomFilter {
            inner: RwLock::new(Inner {
                bits: vec![0u64; len_bits.div_ceil(64)],
                len_bits,
                num_hashes,
                inserted: 0,
            }),
            hasher_a: RandomState::with_seeds(0x9e37_79b9_7f4a_7c15, 0xbf58_476d_1ce4_e5b9, 1, 2),
            hasher_b: RandomState::with_seeds(0x94d0_49bb_1331_11eb, 0xff51_afd7_ed55_8ccd, 3, 4),
        })
    }

    fn hash_pair(&self, key: &str) -> (u64, u64) {
        let mut ha = self.hasher_a.build_hasher();
        key.hash(&mut ha);
        let mut hb = self.hasher_b.build_hasher();
        key.hash(&mut hb);
        (ha.finish(), hb.finish())
    }

    fn indices(&self, key: &str, len_bits: usize, num_hashes: u32) -> Vec<usize> {
        let (h1, h2) = self.hash_pair(key);
        (0..num_hashes)
            .map(|i| (h1.wrapping_add((i as u64).wrapping_mul(h2)) as usize) % len_bits)
            .collect()
    }

    /// Records `key` as present. Idempotent: adding the same key twice has
    /// no additional effect on false-positive rate beyond the first add.
    pub fn add(&self, key: &str) {
        let mut inner = self.inner.write();
        let indices = self.indices(key, inner.len_bits, inner.num_hashes);
        for idx in indices {
            inner.bits[idx / 64] |= 1 << (idx % 64);
        }
        inner.inserted += 1;
    }

    /// False-positives possible, false-negatives impossible: if this
    /// returns `false`, `key` was never added.
    pub fn has(&self, key: &str) -> bool {
        let inner = self.inner.read();
        let indices = self.indices(key, inner.len_bits, inner.num_hashes);
        indices.iter().all(|&idx| inner.bits[idx / 64] & (1 << (idx % 64)) != 0)
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.bits.iter_mut().for_each(|w| *w = 0);
        inner.inserted = 0;
    }

    pub fn stats(&self) -> BloomStats {
        let inner = self.inner.read();
        let set_bits: u32 = inner.bits.iter().map(|w| w.count_ones()).sum();
        BloomStats {
            len_bits: inner.len_bits,
            num_hashes: inner.num_hashes,
            inserted: inner.inserted,
            estimated_fill_ratio: set_bits as f64 / inner.len_bits as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_params_at_the_boundary() {
        assert_eq!(
            BloomFilter::new(0, 0.01).unwrap_err(),
            CacheError::BloomFilterInvalidParams
        );
        assert_eq!(
            BloomFilter::new(100, 0.0).unwrap_err(),
            CacheError::BloomFilterInvalidParams
        );
        assert_eq!(
            BloomFilter::new(100, 1.0).unwrap_err(),
            CacheError::BloomFilterInvalidParams
        );
    }

    #[test]
    fn added_keys_are_always_reported_present() {
        let filter = BloomFilter::new(1000, 0.01).unwrap();
        for i in 0..1000 {
            filter.add(&format!("key-{i}"));
        }
        for i in 0..1000 {
            assert!(filter.has(&format!("key-{i}")));
        }
    }

    #[test]
    fn false_positive_rate_is_in_the_right_ballpark() {
        let filter = BloomFilter::new(1000, 0.01).unwrap();
        for i in 0..1000 {
            filter.add(&format!("present-{i}"));
        }
        let false_positives = (0..10_000)
            .filter(|i| filter.has(&format!("absent-{i}")))
            .count();
        // Generous upper bound: a well-formed 1% filter should not produce
        // more than ~5x its target rate on this sample size.
        assert!(
            false_positives < 500,
            "false positive count too high: {false_positives}"
        );
    }

    #[test]
    fn clear_resets_membership() {
        let filter = BloomFilter::new(100, 0.01).unwrap();
        filter.add("a");
        filter.clear();
        assert_eq!(filter.stats().inserted, 0);
    }
}
