//! Test harness adapters: property oracles and scenario runners shared
//! across engine test modules (spec C12). `#[cfg(test)]`-only; not part
//! of the public API.

use num_bigint::BigUint;
use rand::RngCore;

use crate::element::Element;

/// Deterministic pseudo-random elements for scenario tests, each a
/// `u64`-sized integer so cross-engine fingerprinting stays cheap.
pub(crate) fn random_elements(rng: &mut impl RngCore, n: usize) -> Vec<Element> {
    (0..n).map(|_| Element::from_integer(BigUint::from(rng.next_u64()))).collect()
}

/// Split two sets into (shared, only-in-a, only-in-b) by the oracle
/// definition of symmetric difference (spec §8: "A∖B and B∖A").
pub(crate) fn oracle_diff(a: &[Element], b: &[Element]) -> (Vec<Element>, Vec<Element>, Vec<Element>) {
    let only_a: Vec<Element> = a.iter().filter(|e| !b.contains(e)).cloned().collect();
    let only_b: Vec<Element> = b.iter().filter(|e| !a.contains(e)).cloned().collect();
    let shared: Vec<Element> = a.iter().filter(|e| b.contains(e)).cloned().collect();
    (shared, only_a, only_b)
}

/// Asserts that `got` and `want` contain the same elements, ignoring
/// order (every engine returns difference lists in whatever order it
/// peeled or interpolated them).
pub(crate) fn assert_same_elements(got: &[Element], want: &[Element]) {
    assert_eq!(got.len(), want.len(), "list length mismatch: got {got:?}, want {want:?}");
    for e in want {
        assert!(got.contains(e), "missing expected element {e:?} in {got:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iblt::{Iblt, IbltMode};
    use proptest::prelude::*;
    use rand::SeedableRng;

    #[test]
    fn oracle_diff_matches_hand_computed_sets() {
        let a: Vec<Element> = [1u64, 2, 3, 4, 5].into_iter().map(|v| Element::from_integer(BigUint::from(v))).collect();
        let b: Vec<Element> = [3u64, 4, 5, 6, 7].into_iter().map(|v| Element::from_integer(BigUint::from(v))).collect();
        let (shared, only_a, only_b) = oracle_diff(&a, &b);
        assert_same_elements(&shared, &[Element::from_integer(BigUint::from(3u64)), Element::from_integer(BigUint::from(4u64)), Element::from_integer(BigUint::from(5u64))]);
        assert_same_elements(&only_a, &[Element::from_integer(BigUint::from(1u64)), Element::from_integer(BigUint::from(2u64))]);
        assert_same_elements(&only_b, &[Element::from_integer(BigUint::from(6u64)), Element::from_integer(BigUint::from(7u64))]);
    }

    /// Property: IBLT `subtract` is anti-commutative on cell counts
    /// (spec §8 invariant: `(X-Y).count[i] = -(Y-X).count[i]`), checked
    /// against randomly generated element sets rather than one fixed
    /// example.
    proptest! {
        #[test]
        fn subtract_is_anticommutative_on_counts(seed in 0u64..10_000) {
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
            let a = random_elements(&mut rng, 6);
            let b = random_elements(&mut rng, 6);

            let mut table_a = Iblt::new(64, 4, 8, IbltMode::Set);
            let mut table_b = Iblt::new(64, 4, 8, IbltMode::Set);
            for e in &a {
                table_a.insert(e).unwrap();
            }
            for e in &b {
                table_b.insert(e).unwrap();
            }

            let a_minus_b = table_a.subtract(&table_b).unwrap();
            let b_minus_a = table_b.subtract(&table_a).unwrap();
            for (cell_ab, cell_ba) in a_minus_b.cells().iter().zip(b_minus_a.cells().iter()) {
                prop_assert_eq!(cell_ab.count(), -cell_ba.count());
            }
        }
    }
}
