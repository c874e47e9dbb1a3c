//! Element data model (spec §3).
//!
//! An element is an opaque byte string with two derived views computed
//! lazily-once at construction: its canonical big-endian integer
//! interpretation, and a protocol-chosen fingerprint. Both views are cached
//! on the struct rather than recomputed per use, the way the reference
//! crate's `stream::BlockWs` precomputes a workspace once instead of
//! recomputing per-row.

use std::sync::Arc;

use num_bigint::BigUint;

use crate::bigint;
use crate::hashing;

/// An immutable, shareable element. Cheap to clone (the byte payload is
/// `Arc`-backed) since the same element is frequently held by multiple
/// engines (`SyncMethod`s) and the attached `Sketches` simultaneously.
#[derive(Clone, Debug)]
pub struct Element {
    bytes: Arc<[u8]>,
    integer: BigUint,
}

impl Element {
    /// Build an element from raw bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes: Vec<u8> = bytes.into();
        let integer = bigint::from_be_bytes(&bytes);
        Self { bytes: Arc::from(bytes.into_boxed_slice()), integer }
    }

    /// Build an element directly from its canonical integer view, encoding
    /// it to big-endian bytes.
    pub fn from_integer(v: BigUint) -> Self {
        let bytes = bigint::to_be_bytes(&v);
        Self { bytes: Arc::from(bytes.into_boxed_slice()), integer: v }
    }

    /// The raw byte view.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The canonical non-negative integer view (spec §3: "canonical
    /// big-endian interpretation").
    pub fn as_integer(&self) -> &BigUint {
        &self.integer
    }

    /// A protocol-chosen fixed-width fingerprint (spec §3, used by
    /// [`crate::cuckoo::CuckooFilter`]).
    pub fn fingerprint(&self, bits: u32) -> u32 {
        hashing::fingerprint(&self.bytes, bits)
    }
}

impl PartialEq for Element {
    /// Byte-wise equality (spec §3: "Equality is byte-wise").
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}
impl Eq for Element {}

impl std::hash::Hash for Element {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl Ord for Element {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.bytes.cmp(&other.bytes)
    }
}
impl PartialOrd for Element {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_roundtrip() {
        let e = Element::new(vec![0x01, 0x02, 0x03]);
        assert_eq!(e.as_integer(), &BigUint::from(0x010203u32));
        let back = Element::from_integer(e.as_integer().clone());
        assert_eq!(back.as_bytes(), e.as_bytes());
    }

    #[test]
    fn equality_is_byte_wise_not_integer_wise() {
        // Leading zero bytes differ as byte strings even though the
        // integer view is identical.
        let a = Element::new(vec![0x00, 0x01]);
        let b = Element::new(vec![0x01]);
        assert_eq!(a.as_integer(), b.as_integer());
        assert_ne!(a, b);
    }

    #[test]
    fn fingerprint_nonzero_and_bounded() {
        let e = Element::new(vec![9, 9, 9]);
        let fp = e.fingerprint(10);
        assert!(fp > 0 && fp < 1024);
    }
}
