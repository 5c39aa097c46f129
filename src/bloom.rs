//! A small bloom filter backing the mutable buffer's tombstone index
//! (spec §3 "tombstone bloom filter sized for `hwm`", §4.1 `check_tombstone`).
//!
//! Structurally this is the same double-hashing bloom filter as the
//! teacher's `table/bloom.rs` (itself lifted from TiKV), generalized to hash
//! an arbitrary `Record` rather than a raw byte slice: the underlying shard
//! implementations this crate's contract hands off to are free to keep their
//! own bloom filters over their own key encodings, which is why spec §1
//! scopes that concern as an external utility; this one exists purely to let
//! the buffer short-circuit tombstone checks and is not part of that
//! external contract.

use std::hash::{Hash, Hasher};
use twox_hash::XxHash32;

use crate::record::Record;

pub struct TombstoneBloom {
    filter: Vec<u8>,
    k: u32,
}

fn hash_record<R: Record>(rec: &R) -> u32 {
    let mut hasher = XxHash32::with_seed(0);
    rec.hash(&mut hasher);
    hasher.finish() as u32
}

fn bits_per_key(entries: usize, false_positive_rate: f64) -> usize {
    let entries = entries.max(1) as f64;
    let size = -1.0 * entries * false_positive_rate.ln() / std::f64::consts::LN_2.powi(2);
    (size / entries).ceil() as usize
}

impl TombstoneBloom {
    /// Size the filter for up to `capacity` tombstones at a 1% false-positive rate.
    pub fn with_capacity(capacity: usize) -> Self {
        let bits_per_key = bits_per_key(capacity, 0.01);
        let k = ((bits_per_key as f64 * 0.69) as u32).clamp(1, 30);
        let nbits = (capacity.max(1) * bits_per_key).max(64);
        let nbytes = (nbits + 7) / 8;
        Self {
            filter: vec![0u8; nbytes],
            k,
        }
    }

    fn set_bit(&mut self, idx: usize) {
        let nbits = self.filter.len() * 8;
        let idx = idx % nbits;
        self.filter[idx / 8] |= 1 << (idx % 8);
    }

    fn get_bit(&self, idx: usize) -> bool {
        let nbits = self.filter.len() * 8;
        let idx = idx % nbits;
        self.filter[idx / 8] & (1 << (idx % 8)) != 0
    }

    pub fn insert<R: Record>(&mut self, rec: &R) {
        let mut h = hash_record(rec);
        let delta = (h >> 17) | (h << 15);
        for _ in 0..self.k {
            let nbits = self.filter.len() * 8;
            self.set_bit((h as usize) % nbits);
            h = h.wrapping_add(delta);
        }
    }

    /// False means `rec` is definitely not present; true means maybe.
    pub fn may_contain<R: Record>(&self, rec: &R) -> bool {
        let mut h = hash_record(rec);
        let delta = (h >> 17) | (h << 15);
        let nbits = self.filter.len() * 8;
        for _ in 0..self.k {
            if !self.get_bit((h as usize) % nbits) {
                return false;
            }
            h = h.wrapping_add(delta);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_keys_are_always_reported_present() {
        let mut bloom = TombstoneBloom::with_capacity(64);
        for k in 0..50i32 {
            bloom.insert(&k);
        }
        for k in 0..50i32 {
            assert!(bloom.may_contain(&k));
        }
    }

    #[test]
    fn empty_filter_reports_absence() {
        let bloom = TombstoneBloom::with_capacity(64);
        assert!(!bloom.may_contain(&42i32));
    }
}
