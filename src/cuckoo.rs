//! Cuckoo filter: fingerprint buckets with alternate-bucket kicking (spec
//! C6).
//!
//! No single file in the example pack implements a Cuckoo filter, so this
//! module is grounded directly on `original_source/include/CPISync/Syncs/
//! CuckooSync.h` and `src/Syncs/CuckooSync.cpp` for the insert/lookup/
//! delete/kick-chain shape, expressed the way the reference crate expresses
//! a fixed-shape array-backed structure (`pcs::Basis`'s manual
//! serialize/deserialize over a flat buffer) rather than translated from
//! the original's C++.

use rand::RngCore;

use crate::element::Element;
use crate::hashing;

/// Cuckoo-filter-internal failures (spec C6).
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CuckooError {
    /// `insert` exhausted its kick budget without finding an empty slot
    /// (spec C6: "filter considered full").
    #[error("filter full: no empty slot found within maxKicks evictions")]
    Full,
}

const EMPTY: u16 = 0;

/// A Cuckoo filter: `num_buckets` buckets of `bucket_size` slots, each an
/// `fingerprint_bits`-wide fingerprint (spec §3).
#[derive(Clone, Debug)]
pub struct CuckooFilter {
    buckets: Vec<Vec<u16>>,
    fingerprint_bits: u32,
    bucket_size: usize,
    max_kicks: u32,
}

impl CuckooFilter {
    /// Build an empty filter (spec §4.6 parameters: `ℓ` fingerprint bits,
    /// `b` slots per bucket, `F` buckets, `maxKicks`).
    pub fn new(fingerprint_bits: u32, bucket_size: usize, num_buckets: u32, max_kicks: u32) -> Self {
        debug_assert!(fingerprint_bits > 0 && fingerprint_bits <= 16, "fingerprint must fit a u16 slot");
        Self {
            buckets: (0..num_buckets).map(|_| vec![EMPTY; bucket_size]).collect(),
            fingerprint_bits,
            bucket_size,
            max_kicks,
        }
    }

    /// `F`, the bucket count.
    pub fn num_buckets(&self) -> u32 {
        self.buckets.len() as u32
    }

    /// `b`, slots per bucket.
    pub fn bucket_size(&self) -> usize {
        self.bucket_size
    }

    /// `ℓ`, fingerprint width in bits.
    pub fn fingerprint_bits(&self) -> u32 {
        self.fingerprint_bits
    }

    fn fingerprint_of(&self, elem: &Element) -> u16 {
        elem.fingerprint(self.fingerprint_bits) as u16
    }

    fn primary_bucket(&self, elem: &Element) -> u32 {
        let digest = blake3::hash(elem.as_bytes());
        let full = u64::from_be_bytes(digest.as_bytes()[0..8].try_into().unwrap());
        (full % self.num_buckets() as u64) as u32
    }

    fn alt_bucket(&self, primary: u32, fp: u16) -> u32 {
        primary ^ hashing::alt_bucket_offset(fp as u32, self.num_buckets())
    }

    /// Insert `elem`. Tries both candidate buckets for an empty slot first;
    /// if both are full, evicts a random occupant and relocates it to its
    /// own alternate bucket, repeating up to `maxKicks` times (spec C6).
    pub fn insert(&mut self, elem: &Element, rng: &mut impl RngCore) -> Result<(), CuckooError> {
        let fp = self.fingerprint_of(elem);
        let i1 = self.primary_bucket(elem);
        let i2 = self.alt_bucket(i1, fp);

        if self.place_if_empty(i1, fp) || self.place_if_empty(i2, fp) {
            return Ok(());
        }

        let mut victim_bucket = if rng.next_u32() % 2 == 0 { i1 } else { i2 };
        let mut victim_fp = fp;
        for _ in 0..self.max_kicks {
            let slot = (rng.next_u32() as usize) % self.bucket_size;
            let evicted = self.buckets[victim_bucket as usize][slot];
            self.buckets[victim_bucket as usize][slot] = victim_fp;
            victim_fp = evicted;
            victim_bucket = victim_bucket ^ hashing::alt_bucket_offset(victim_fp as u32, self.num_buckets());
            if self.place_if_empty(victim_bucket, victim_fp) {
                return Ok(());
            }
        }
        Err(CuckooError::Full)
    }

    fn place_if_empty(&mut self, bucket: u32, fp: u16) -> bool {
        let slots = &mut self.buckets[bucket as usize];
        if let Some(slot) = slots.iter_mut().find(|s| **s == EMPTY) {
            *slot = fp;
            true
        } else {
            false
        }
    }

    /// `lookup(x)` (spec C6): checks both candidate buckets for the
    /// fingerprint.
    pub fn lookup(&self, elem: &Element) -> bool {
        let fp = self.fingerprint_of(elem);
        let i1 = self.primary_bucket(elem);
        let i2 = self.alt_bucket(i1, fp);
        self.buckets[i1 as usize].contains(&fp) || self.buckets[i2 as usize].contains(&fp)
    }

    /// `delete(x)` (spec C6): removes one matching occurrence (multiset
    /// semantics: only one slot is cleared even if the fingerprint appears
    /// more than once). Returns whether a matching slot was found.
    pub fn delete(&mut self, elem: &Element) -> bool {
        let fp = self.fingerprint_of(elem);
        let i1 = self.primary_bucket(elem);
        let i2 = self.alt_bucket(i1, fp);
        for bucket in [i1, i2] {
            if let Some(slot) = self.buckets[bucket as usize].iter_mut().find(|s| **s == fp) {
                *slot = EMPTY;
                return true;
            }
        }
        false
    }

    /// Flatten to a row-major fingerprint array for wire encoding (spec
    /// C4: "bit-packed, row-major, byte-aligned at row boundaries" — the
    /// byte-packing itself lives in [`crate::communicant`]; this just
    /// exposes the logical row-major view).
    pub fn rows(&self) -> &[Vec<u16>] {
        &self.buckets
    }

    /// Rebuild a filter from a row-major fingerprint array (inverse of
    /// [`Self::rows`]).
    pub fn from_rows(fingerprint_bits: u32, max_kicks: u32, rows: Vec<Vec<u16>>) -> Self {
        let bucket_size = rows.first().map(|r| r.len()).unwrap_or(0);
        Self { buckets: rows, fingerprint_bits, bucket_size, max_kicks }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> rand::rngs::StdRng {
        rand::rngs::StdRng::seed_from_u64(7)
    }

    #[test]
    fn insert_then_lookup_succeeds() {
        let mut f = CuckooFilter::new(12, 4, 256, 500);
        let mut r = rng();
        let e = Element::new(vec![1, 2, 3, 4]);
        f.insert(&e, &mut r).unwrap();
        assert!(f.lookup(&e));
    }

    #[test]
    fn delete_then_lookup_fails() {
        let mut f = CuckooFilter::new(12, 4, 256, 500);
        let mut r = rng();
        let e = Element::new(vec![9, 9, 9]);
        f.insert(&e, &mut r).unwrap();
        assert!(f.delete(&e));
        assert!(!f.lookup(&e));
    }

    #[test]
    fn many_inserts_all_found() {
        let mut f = CuckooFilter::new(12, 4, 1024, 500);
        let mut r = rng();
        let elems: Vec<_> = (0u32..400).map(|i| Element::new(i.to_be_bytes().to_vec())).collect();
        for e in &elems {
            f.insert(e, &mut r).expect("filter should have headroom at this load factor");
        }
        for e in &elems {
            assert!(f.lookup(e));
        }
    }

    #[test]
    fn full_filter_reports_failure_without_corrupting() {
        // A 1-bucket, 1-slot filter with zero kick budget: second insert
        // must fail cleanly, first element must remain findable.
        let mut f = CuckooFilter::new(8, 1, 1, 0);
        let mut r = rng();
        let a = Element::new(vec![1]);
        let b = Element::new(vec![2]);
        f.insert(&a, &mut r).unwrap();
        let err = f.insert(&b, &mut r).unwrap_err();
        assert_eq!(err, CuckooError::Full);
        assert!(f.lookup(&a));
    }
}
