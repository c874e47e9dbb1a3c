//! Arbitrary-precision integers and canonical big-endian encoding (spec C1).
//!
//! This crate leans on `num-bigint`'s `BigUint` for the arithmetic itself
//! (add/sub/mul/mod/compare all come for free from its `Num`/`Integer`
//! trait impls); this module adds the two things spec C1 asks for that
//! `num-bigint` does not provide out of the box: a canonical wire encoding
//! and a primality test used to pick a modulus from a declared bit-width.

use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::RngCore;

/// Canonical big-endian magnitude bytes, with no sign byte (this crate only
/// ever encodes non-negative integers; see spec §4.4's element encoding).
pub fn to_be_bytes(v: &BigUint) -> Vec<u8> {
    v.to_bytes_be()
}

/// Inverse of [`to_be_bytes`].
pub fn from_be_bytes(bytes: &[u8]) -> BigUint {
    BigUint::from_bytes_be(bytes)
}

/// Deterministic small-prime trial division witnesses used before falling
/// back to Miller–Rabin; this matches the shape of the Miller–Rabin helper
/// in `examples/other_examples/.../WolofSHIELD-Paillier_rsc/.../math.rs`
/// (trial-divide by small primes first, then run probabilistic rounds).
const SMALL_PRIMES: &[u64] = &[2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47];

/// Miller–Rabin probabilistic primality test with `rounds` independent
/// witnesses. False positives occur with probability at most `4^-rounds`.
pub fn is_probable_prime(n: &BigUint, rounds: u32, rng: &mut impl RngCore) -> bool {
    if *n < BigUint::from(2u32) {
        return false;
    }
    for &p in SMALL_PRIMES {
        let p = BigUint::from(p);
        if *n == p {
            return true;
        }
        if (n % &p).is_zero() {
            return false;
        }
    }

    // n - 1 = 2^s * d, d odd
    let one = BigUint::one();
    let n_minus_1 = n - &one;
    let mut d = n_minus_1.clone();
    let mut s = 0u32;
    while (&d).is_even() {
        d >>= 1u32;
        s += 1;
    }

    'witness: for _ in 0..rounds {
        let a = random_in_range(&BigUint::from(2u32), &(n - BigUint::from(2u32)), rng);
        let mut x = a.modpow(&d, n);
        if x == one || x == n_minus_1 {
            continue;
        }
        for _ in 0..s.saturating_sub(1) {
            x = x.modpow(&BigUint::from(2u32), n);
            if x == n_minus_1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// Uniform random `BigUint` in `[lo, hi]` (inclusive), via rejection
/// sampling over the minimal covering byte width.
pub fn random_in_range(lo: &BigUint, hi: &BigUint, rng: &mut impl RngCore) -> BigUint {
    if lo >= hi {
        return lo.clone();
    }
    let span = hi - lo + BigUint::one();
    let bytes_needed = (span.bits() as usize + 7) / 8 + 1;
    loop {
        let mut buf = vec![0u8; bytes_needed];
        rng.fill_bytes(&mut buf);
        let candidate = BigUint::from_bytes_be(&buf) % &span;
        return lo + candidate;
    }
}

/// Smallest prime `>= 2^bits` (spec C1: "a prime modulus p chosen >= 2^b").
/// Searches upward from `2^bits | 1` over odd candidates.
pub fn prime_at_least_bits(bits: u32, rng: &mut impl RngCore) -> BigUint {
    let mut candidate = BigUint::one() << bits;
    if candidate.is_even() {
        candidate += BigUint::one();
    }
    loop {
        if is_probable_prime(&candidate, 40, rng) {
            return candidate;
        }
        candidate += BigUint::from(2u32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn be_roundtrip() {
        let v = BigUint::from(123456789u64);
        assert_eq!(from_be_bytes(&to_be_bytes(&v)), v);
        assert_eq!(to_be_bytes(&BigUint::zero()), Vec::<u8>::new());
    }

    #[test]
    fn known_primes_and_composites() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        for p in [2u32, 3, 5, 7, 11, 13, 97, 7919] {
            assert!(is_probable_prime(&BigUint::from(p), 20, &mut rng), "{p} should be prime");
        }
        for c in [4u32, 6, 8, 9, 10, 15, 100, 7921] {
            assert!(!is_probable_prime(&BigUint::from(c), 20, &mut rng), "{c} should be composite");
        }
    }

    #[test]
    fn prime_at_least_bits_is_prime_and_big_enough() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let p = prime_at_least_bits(16, &mut rng);
        assert!(p >= BigUint::one() << 16u32);
        assert!(is_probable_prime(&p, 40, &mut rng));
    }
}
