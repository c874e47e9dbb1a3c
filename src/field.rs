//! Modular field arithmetic and polynomial operations over it (spec C1).
//!
//! `FieldElem` carries its modulus alongside its value (an `Arc<BigUint>`, so
//! cloning an element is cheap) rather than threading a separate modulus
//! parameter through every call site — this lets field elements implement
//! `Add`/`Sub`/`Mul` the way `ark_ff::Field` elements do in the reference
//! crate's `transcript.rs`/`pcs.rs` (`a * b`, `F::one()`, ...), instead of
//! free functions taking an extra context argument everywhere.

use std::ops::{Add, Mul, Neg, Sub};
use std::sync::Arc;

use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::RngCore;

use crate::bigint;

/// Errors from field/polynomial arithmetic.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FieldError {
    /// Attempted to invert zero, or a non-unit in a non-prime modulus.
    #[error("element is not invertible mod p")]
    NotInvertible,
    /// Two field elements (or a field element and a modulus) disagree.
    #[error("modulus mismatch between operands")]
    ModulusMismatch,
    /// Rational-function interpolation's linear system was rank-deficient.
    #[error("need more points")]
    NeedMorePoints,
    /// Root enumeration could not fully factor the polynomial within the
    /// retry budget (spec §4.1: "deterministic retry on failure").
    #[error("root finding did not converge after {attempts} attempts")]
    RootFindingFailed { attempts: u32 },
    /// The modulus candidate is not usable (< 2, or even when oddness is
    /// required by an algorithm step).
    #[error("invalid modulus")]
    InvalidModulus,
}

/// A prime (or at least odd, >1) modulus shared by a family of field
/// elements.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    modulus: Arc<BigUint>,
}

impl Field {
    /// Construct a field of the given modulus. Callers are responsible for
    /// `modulus` being prime (spec C1); this crate does not re-verify
    /// primality on every construction since `Field`s are built once per
    /// session from a value already chosen by [`crate::bigint::prime_at_least_bits`]
    /// or supplied by the peer during the modulus handshake.
    pub fn new(modulus: BigUint) -> Result<Self, FieldError> {
        if modulus < BigUint::from(2u32) {
            return Err(FieldError::InvalidModulus);
        }
        Ok(Self { modulus: Arc::new(modulus) })
    }

    /// The modulus `p`.
    pub fn modulus(&self) -> &BigUint {
        &self.modulus
    }

    /// Build an element `v mod p` in this field.
    pub fn elem<T: Into<BigUint>>(&self, v: T) -> FieldElem {
        FieldElem { value: v.into() % &*self.modulus, modulus: self.modulus.clone() }
    }

    /// The additive identity.
    pub fn zero(&self) -> FieldElem {
        self.elem(BigUint::zero())
    }

    /// The multiplicative identity.
    pub fn one(&self) -> FieldElem {
        self.elem(BigUint::one())
    }

    /// Hash an arbitrary byte string into this field (spec C2 `hashToField`):
    /// canonical big-endian bytes of the integer view of `x`, reduced mod `p`.
    pub fn hash_to_field(&self, x_as_integer: &BigUint) -> FieldElem {
        self.elem(x_as_integer.clone())
    }
}

/// An element of a [`Field`]. Always kept reduced into `[0, p)`.
#[derive(Clone, Debug)]
pub struct FieldElem {
    value: BigUint,
    modulus: Arc<BigUint>,
}

impl PartialEq for FieldElem {
    fn eq(&self, other: &Self) -> bool {
        self.modulus == other.modulus && self.value == other.value
    }
}
impl Eq for FieldElem {}

impl PartialOrd for FieldElem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for FieldElem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.value.cmp(&other.value)
    }
}

impl FieldElem {
    /// The raw integer representative in `[0, p)`.
    pub fn value(&self) -> &BigUint {
        &self.value
    }

    /// The shared modulus.
    pub fn modulus(&self) -> &Arc<BigUint> {
        &self.modulus
    }

    fn same_field(&self, other: &Self) -> Result<(), FieldError> {
        if self.modulus == other.modulus {
            Ok(())
        } else {
            Err(FieldError::ModulusMismatch)
        }
    }

    /// `self^exp mod p`, by repeated squaring.
    pub fn pow(&self, exp: &BigUint) -> FieldElem {
        FieldElem { value: self.value.modpow(exp, &self.modulus), modulus: self.modulus.clone() }
    }

    /// Multiplicative inverse via the extended Euclidean algorithm (spec
    /// C1: "invert (extended-Euclidean)"). Fails only for `self == 0`
    /// (assuming `p` prime, every nonzero element is a unit).
    pub fn inverse(&self) -> Result<FieldElem, FieldError> {
        if self.value.is_zero() {
            return Err(FieldError::NotInvertible);
        }
        let (g, x, _y) = extended_gcd(
            &self.value.clone().into(),
            &BigInt::from_biguint(&self.modulus),
        );
        if g != BigInt::from(1i64) {
            return Err(FieldError::NotInvertible);
        }
        let m = BigInt::from_biguint(&self.modulus);
        let inv = ((x % &m) + &m) % &m;
        Ok(FieldElem { value: inv.to_biguint(), modulus: self.modulus.clone() })
    }

    /// Is this the additive identity?
    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }
}

impl Add<&FieldElem> for &FieldElem {
    type Output = FieldElem;
    fn add(self, rhs: &FieldElem) -> FieldElem {
        debug_assert_eq!(self.modulus, rhs.modulus, "field mismatch in add");
        FieldElem { value: (&self.value + &rhs.value) % &*self.modulus, modulus: self.modulus.clone() }
    }
}
impl Sub<&FieldElem> for &FieldElem {
    type Output = FieldElem;
    fn sub(self, rhs: &FieldElem) -> FieldElem {
        debug_assert_eq!(self.modulus, rhs.modulus, "field mismatch in sub");
        let m = &*self.modulus;
        let a = &self.value;
        let b = &rhs.value;
        let value = if a >= b { (a - b) % m } else { (m - (b - a) % m) % m };
        FieldElem { value, modulus: self.modulus.clone() }
    }
}
impl Mul<&FieldElem> for &FieldElem {
    type Output = FieldElem;
    fn mul(self, rhs: &FieldElem) -> FieldElem {
        debug_assert_eq!(self.modulus, rhs.modulus, "field mismatch in mul");
        FieldElem { value: (&self.value * &rhs.value) % &*self.modulus, modulus: self.modulus.clone() }
    }
}
impl Neg for &FieldElem {
    type Output = FieldElem;
    fn neg(self) -> FieldElem {
        if self.value.is_zero() {
            self.clone()
        } else {
            FieldElem { value: &*self.modulus - &self.value, modulus: self.modulus.clone() }
        }
    }
}

// ---------------------------------------------------------------------
// Minimal signed-bigint shim for the extended Euclidean algorithm.
//
// `num-bigint`'s `BigInt` would do this directly, but we only need a
// handful of operations and keep the dependency surface to `BigUint` plus
// this tiny internal helper, mirroring how tightly scoped the reference
// crate keeps its own internal helper types (e.g. `stream::BlockIdx`).
// ---------------------------------------------------------------------
#[derive(Clone, Debug, PartialEq, Eq)]
struct BigInt {
    neg: bool,
    mag: BigUint,
}
impl BigInt {
    fn from_biguint(v: &BigUint) -> Self {
        Self { neg: false, mag: v.clone() }
    }
    fn to_biguint(&self) -> BigUint {
        debug_assert!(!self.neg || self.mag.is_zero(), "cannot convert negative BigInt to BigUint directly");
        self.mag.clone()
    }
    fn is_zero(&self) -> bool {
        self.mag.is_zero()
    }
}
impl From<BigUint> for BigInt {
    fn from(v: BigUint) -> Self {
        Self { neg: false, mag: v }
    }
}
impl From<i64> for BigInt {
    fn from(v: i64) -> Self {
        if v < 0 {
            Self { neg: true, mag: BigUint::from((-v) as u64) }
        } else {
            Self { neg: false, mag: BigUint::from(v as u64) }
        }
    }
}
impl std::ops::Add for &BigInt {
    type Output = BigInt;
    fn add(self, rhs: &BigInt) -> BigInt {
        match (self.neg, rhs.neg) {
            (false, false) => BigInt { neg: false, mag: &self.mag + &rhs.mag },
            (true, true) => BigInt { neg: true, mag: &self.mag + &rhs.mag },
            (false, true) => {
                if self.mag >= rhs.mag {
                    BigInt { neg: false, mag: &self.mag - &rhs.mag }
                } else {
                    BigInt { neg: true, mag: &rhs.mag - &self.mag }
                }
            }
            (true, false) => {
                if rhs.mag >= self.mag {
                    BigInt { neg: false, mag: &rhs.mag - &self.mag }
                } else {
                    BigInt { neg: true, mag: &self.mag - &rhs.mag }
                }
            }
        }
    }
}
impl std::ops::Sub for &BigInt {
    type Output = BigInt;
    fn sub(self, rhs: &BigInt) -> BigInt {
        self + &BigInt { neg: !rhs.neg && !rhs.is_zero(), mag: rhs.mag.clone() }
    }
}
impl std::ops::Mul for &BigInt {
    type Output = BigInt;
    fn mul(self, rhs: &BigInt) -> BigInt {
        let mag = &self.mag * &rhs.mag;
        BigInt { neg: (self.neg != rhs.neg) && !mag.is_zero(), mag }
    }
}
impl std::ops::Div for &BigInt {
    type Output = BigInt;
    fn div(self, rhs: &BigInt) -> BigInt {
        let mag = &self.mag / &rhs.mag;
        BigInt { neg: (self.neg != rhs.neg) && !mag.is_zero(), mag }
    }
}
impl std::ops::Rem<&BigInt> for BigInt {
    type Output = BigInt;
    fn rem(self, rhs: &BigInt) -> BigInt {
        // Euclidean remainder, always returned as `self - (self/rhs)*rhs`.
        let q = &self / rhs;
        &self - &(&q * rhs)
    }
}
impl std::ops::Add<&BigInt> for BigInt {
    type Output = BigInt;
    fn add(self, rhs: &BigInt) -> BigInt {
        &self + rhs
    }
}

/// Extended Euclidean algorithm: returns `(g, x, y)` with `a*x + b*y = g =
/// gcd(a, b)`.
fn extended_gcd(a: &BigInt, b: &BigInt) -> (BigInt, BigInt, BigInt) {
    let (mut old_r, mut r) = (a.clone(), b.clone());
    let (mut old_s, mut s) = (BigInt::from(1i64), BigInt::from(0i64));
    let (mut old_t, mut t) = (BigInt::from(0i64), BigInt::from(1i64));

    while !r.is_zero() {
        let q = &old_r / &r;
        let new_r = &old_r - &(&q * &r);
        old_r = r;
        r = new_r;
        let new_s = &old_s - &(&q * &s);
        old_s = s;
        s = new_s;
        let new_t = &old_t - &(&q * &t);
        old_t = t;
        t = new_t;
    }
    (old_r, old_s, old_t)
}

// ===========================================================================
// Polynomials over a Field
// ===========================================================================

/// A polynomial with coefficients in ascending-power (low→high) order, over
/// a shared [`Field`]. Matches the coefficient ordering the reference
/// crate's `stream::horner_eval_stream` and `pcs::Aggregator` use.
#[derive(Clone, Debug)]
pub struct Polynomial {
    /// `coeffs[i]` is the coefficient of `x^i`.
    coeffs: Vec<FieldElem>,
    field: Field,
}

impl Polynomial {
    /// Build from coefficients, trimming trailing (high-degree) zeros.
    pub fn new(field: Field, mut coeffs: Vec<FieldElem>) -> Self {
        while coeffs.len() > 1 && coeffs.last().map(|c| c.is_zero()).unwrap_or(false) {
            coeffs.pop();
        }
        if coeffs.is_empty() {
            coeffs.push(field.zero());
        }
        Self { coeffs, field }
    }

    /// The zero polynomial.
    pub fn zero(field: Field) -> Self {
        let z = field.zero();
        Self { coeffs: vec![z], field }
    }

    /// Degree of the polynomial (`-1`/`None` convention: the zero polynomial
    /// reports degree `0` here since `FieldElem` carries no signed sentinel;
    /// callers distinguish it via [`Polynomial::is_zero`]).
    pub fn degree(&self) -> usize {
        self.coeffs.len() - 1
    }

    /// True iff this is the zero polynomial.
    pub fn is_zero(&self) -> bool {
        self.coeffs.iter().all(|c| c.is_zero())
    }

    /// Coefficients, low→high.
    pub fn coeffs(&self) -> &[FieldElem] {
        &self.coeffs
    }

    fn coeff(&self, i: usize) -> FieldElem {
        self.coeffs.get(i).cloned().unwrap_or_else(|| self.field.zero())
    }

    /// Evaluate at `x` via Horner's method.
    pub fn eval(&self, x: &FieldElem) -> FieldElem {
        let mut acc = self.field.zero();
        for c in self.coeffs.iter().rev() {
            acc = &(&acc * x) + c;
        }
        acc
    }

    /// `self + other`.
    pub fn add(&self, other: &Polynomial) -> Polynomial {
        let n = self.coeffs.len().max(other.coeffs.len());
        let coeffs = (0..n).map(|i| &self.coeff(i) + &other.coeff(i)).collect();
        Polynomial::new(self.field.clone(), coeffs)
    }

    /// `self - other`.
    pub fn sub(&self, other: &Polynomial) -> Polynomial {
        let n = self.coeffs.len().max(other.coeffs.len());
        let coeffs = (0..n).map(|i| &self.coeff(i) - &other.coeff(i)).collect();
        Polynomial::new(self.field.clone(), coeffs)
    }

    /// `self * other`.
    pub fn mul(&self, other: &Polynomial) -> Polynomial {
        if self.is_zero() || other.is_zero() {
            return Polynomial::zero(self.field.clone());
        }
        let mut out = vec![self.field.zero(); self.coeffs.len() + other.coeffs.len() - 1];
        for (i, a) in self.coeffs.iter().enumerate() {
            if a.is_zero() {
                continue;
            }
            for (j, b) in other.coeffs.iter().enumerate() {
                out[i + j] = &out[i + j] + &(a * b);
            }
        }
        Polynomial::new(self.field.clone(), out)
    }

    /// Scalar multiplication.
    pub fn scalar_mul(&self, s: &FieldElem) -> Polynomial {
        Polynomial::new(self.field.clone(), self.coeffs.iter().map(|c| c * s).collect())
    }

    /// Polynomial long division: `self = q * divisor + r`, `deg(r) <
    /// deg(divisor)`. Requires `divisor` non-zero.
    pub fn div_rem(&self, divisor: &Polynomial) -> Result<(Polynomial, Polynomial), FieldError> {
        if divisor.is_zero() {
            return Err(FieldError::NotInvertible);
        }
        let mut remainder = self.clone();
        let div_deg = divisor.true_degree();
        let lead_inv = divisor.coeff(div_deg).inverse()?;
        let mut q_coeffs = vec![self.field.zero(); self.coeffs.len()];

        loop {
            let rem_deg = remainder.true_degree();
            if remainder.is_zero() || rem_deg < div_deg {
                break;
            }
            let shift = rem_deg - div_deg;
            let factor = &remainder.coeff(rem_deg) * &lead_inv;
            if shift >= q_coeffs.len() {
                q_coeffs.resize(shift + 1, self.field.zero());
            }
            q_coeffs[shift] = &q_coeffs[shift] + &factor;

            let mut sub_coeffs = vec![self.field.zero(); shift];
            for c in divisor.coeffs.iter() {
                sub_coeffs.push(c * &factor);
            }
            let sub_poly = Polynomial::new(self.field.clone(), sub_coeffs);
            remainder = remainder.sub(&sub_poly);
        }
        Ok((Polynomial::new(self.field.clone(), q_coeffs), remainder))
    }

    /// True degree ignoring representation padding (index of highest
    /// nonzero coefficient, or `0` for the zero polynomial).
    fn true_degree(&self) -> usize {
        for i in (0..self.coeffs.len()).rev() {
            if !self.coeffs[i].is_zero() {
                return i;
            }
        }
        0
    }

    /// Monic GCD of two polynomials via the Euclidean algorithm.
    pub fn gcd(&self, other: &Polynomial) -> Result<Polynomial, FieldError> {
        let (mut a, mut b) = (self.clone(), other.clone());
        while !b.is_zero() {
            let (_, r) = a.div_rem(&b)?;
            a = b;
            b = r;
        }
        a.make_monic()
    }

    fn make_monic(&self) -> Result<Polynomial, FieldError> {
        if self.is_zero() {
            return Ok(self.clone());
        }
        let lead = self.coeff(self.true_degree());
        let inv = lead.inverse()?;
        Ok(self.scalar_mul(&inv))
    }

    /// `base^exp mod modulus` in the polynomial ring, by repeated squaring.
    /// Used by [`Polynomial::find_roots`] for the Cantor–Zassenhaus steps;
    /// `exp` may be as large as the field modulus, but since `modulus`
    /// (here, the declared-degree polynomial) has small degree, each
    /// squaring/reduction is cheap.
    pub fn pow_mod(&self, exp: &BigUint, modulus: &Polynomial) -> Result<Polynomial, FieldError> {
        let mut result = {
            let one = self.field.one();
            Polynomial::new(self.field.clone(), vec![one])
        };
        let (_, mut base) = self.div_rem(modulus)?;
        let mut e = exp.clone();
        let two = BigUint::from(2u32);
        while !e.is_zero() {
            if (&e % &two).is_one() {
                let (_, r) = result.mul(&base).div_rem(modulus)?;
                result = r;
            }
            let (_, r) = base.mul(&base).div_rem(modulus)?;
            base = r;
            e >>= 1u32;
        }
        Ok(result)
    }

    /// `x` as a degree-1 polynomial (`0 + 1*x`).
    pub fn indeterminate(field: &Field) -> Polynomial {
        Polynomial::new(field.clone(), vec![field.zero(), field.one()])
    }

    /// Enumerate all distinct roots of a polynomial of declared degree
    /// `<= m_bar` (spec C1). Uses the "all field elements satisfy `a^p =
    /// a`" identity to strip multiplicities via `gcd(f, x^p - x)`, then
    /// splits the resulting squarefree product of linear factors with
    /// Cantor–Zassenhaus equal-degree splitting. `rng` drives the random
    /// splitting element; `max_attempts` bounds the deterministic retry
    /// spec §4.1 asks for.
    pub fn find_roots(
        &self,
        rng: &mut impl RngCore,
        max_attempts: u32,
    ) -> Result<Vec<FieldElem>, FieldError> {
        if self.is_zero() {
            return Ok(Vec::new());
        }
        let p = self.field.modulus().clone();
        let x = Polynomial::indeterminate(&self.field);

        let monic = self.make_monic()?;
        let x_pow_p = x.pow_mod(&p, &monic)?;
        let diff = x_pow_p.sub(&x);
        let squarefree_roots_poly = monic.gcd(&diff)?;

        let mut roots = Vec::new();
        let mut stack = vec![squarefree_roots_poly];
        let mut attempts_left = max_attempts;

        while let Some(poly) = stack.pop() {
            let deg = poly.true_degree();
            if poly.is_zero() || deg == 0 {
                continue;
            }
            if deg == 1 {
                // a_1 x + a_0 = 0  =>  root = -a_0 / a_1
                let a1 = poly.coeff(1);
                let a0 = poly.coeff(0);
                let root = &(-&a0) * &a1.inverse()?;
                roots.push(root);
                continue;
            }
            // Split `poly` (degree >= 2, product of distinct linear
            // factors) into two proper, nonzero-degree factors.
            let split = split_equal_degree(&poly, &p, rng, &mut attempts_left)?;
            match split {
                Some((f1, f2)) => {
                    stack.push(f1);
                    stack.push(f2);
                }
                None => return Err(FieldError::RootFindingFailed { attempts: max_attempts }),
            }
        }

        roots.sort();
        roots.dedup();
        Ok(roots)
    }
}

/// One Cantor–Zassenhaus degree-1 equal-degree-splitting attempt: returns
/// `Some((f1, f2))` with `f1 * f2 == poly` and both non-trivial, or `None`
/// if every attempt up to `attempts_left` produced a trivial split.
fn split_equal_degree(
    poly: &Polynomial,
    p: &BigUint,
    rng: &mut impl RngCore,
    attempts_left: &mut u32,
) -> Result<Option<(Polynomial, Polynomial)>, FieldError> {
    let field = field_of(poly);
    let exponent = (p - BigUint::one()) >> 1u32; // (p-1)/2, valid for odd p
    while *attempts_left > 0 {
        *attempts_left -= 1;
        let a = field.elem(bigint::random_in_range(&BigUint::one(), &(p - BigUint::from(2u32)), rng));
        // g = gcd(poly, (x + a)^((p-1)/2) - 1)
        let shift = Polynomial::new(field.clone(), vec![a, field.one()]);
        let powed = shift.pow_mod(&exponent, poly)?;
        let minus_one = powed.sub(&Polynomial::new(field.clone(), vec![field.one()]));
        let g = poly.gcd(&minus_one)?;
        let g_deg = g.true_degree();
        if !g.is_zero() && g_deg > 0 && g_deg < poly.true_degree() {
            let (h, rem) = poly.div_rem(&g)?;
            debug_assert!(rem.is_zero(), "gcd factor must divide poly exactly");
            return Ok(Some((g, h)));
        }
    }
    Ok(None)
}

fn field_of(poly: &Polynomial) -> Field {
    poly.field.clone()
}

// ===========================================================================
// Rational-function interpolation (spec C1 / C7 sample exchange)
// ===========================================================================

/// Interpolate a rational function `f(x)/g(x)` (with `deg f, deg g <=
/// m_bar`, `g` monic) from `2*m_bar` evaluation pairs, by solving the linear
/// system `y_i * g(x_i) - f(x_i) = y_i * x_i^m_bar` (i.e. fixing `g`'s
/// leading coefficient to `1` and solving for the remaining `2*m_bar`
/// unknown coefficients of `f` and the low-order part of `g`). Returns
/// `(f, g)`. This is the textbook CPISync interpolation step (Minsky–Trachtenberg).
pub fn interpolate_rational(
    field: &Field,
    points: &[(FieldElem, FieldElem)],
    m_bar: usize,
) -> Result<(Polynomial, Polynomial), FieldError> {
    let needed = 2 * m_bar;
    if points.len() < needed {
        return Err(FieldError::NeedMorePoints);
    }
    let points = &points[..needed];

    // Unknowns: f_0..f_{m_bar-1} (m_bar of them) and g_0..g_{m_bar-1}
    // (m_bar of them); g_{m_bar} is fixed to 1.
    // Equation per point i: sum_j f_j x_i^j - y_i * sum_j g_j x_i^j = y_i * x_i^m_bar
    let n = needed;
    let mut a = vec![vec![field.zero(); n]; n]; // n x n matrix
    let mut b = vec![field.zero(); n];

    for (row, (x, y)) in points.iter().enumerate() {
        let mut xp = field.one();
        let mut powers = Vec::with_capacity(m_bar + 1);
        for _ in 0..=m_bar {
            powers.push(xp.clone());
            xp = &xp * x;
        }
        for j in 0..m_bar {
            a[row][j] = powers[j].clone();
        }
        for j in 0..m_bar {
            a[row][m_bar + j] = &(-&powers[j]) * y;
        }
        b[row] = y * &powers[m_bar];
    }

    let solution = solve_linear_system(field, a, b)?;

    let f_coeffs = solution[0..m_bar].to_vec();
    let mut g_coeffs = solution[m_bar..2 * m_bar].to_vec();
    g_coeffs.push(field.one());

    Ok((Polynomial::new(field.clone(), f_coeffs), Polynomial::new(field.clone(), g_coeffs)))
}

/// Gaussian elimination with partial pivoting over a prime field. Returns
/// `Err(NeedMorePoints)` if the system is rank-deficient (spec C1: "report
/// need more points").
fn solve_linear_system(
    field: &Field,
    mut a: Vec<Vec<FieldElem>>,
    mut b: Vec<FieldElem>,
) -> Result<Vec<FieldElem>, FieldError> {
    let n = b.len();
    for col in 0..n {
        let pivot_row = (col..n).find(|&r| !a[r][col].is_zero());
        let pivot_row = pivot_row.ok_or(FieldError::NeedMorePoints)?;
        a.swap(col, pivot_row);
        b.swap(col, pivot_row);

        let inv = a[col][col].inverse()?;
        for c in col..n {
            a[col][c] = &a[col][c] * &inv;
        }
        b[col] = &b[col] * &inv;

        for r in 0..n {
            if r == col {
                continue;
            }
            let factor = a[r][col].clone();
            if factor.is_zero() {
                continue;
            }
            for c in col..n {
                let sub = &a[col][c] * &factor;
                a[r][c] = &a[r][c] - &sub;
            }
            let sub = &b[col] * &factor;
            b[r] = &b[r] - &sub;
        }
    }
    let _ = field;
    Ok(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigUint;
    use rand::SeedableRng;

    fn small_field() -> Field {
        // A small prime well above any test value, large enough for
        // Cantor-Zassenhaus splitting to behave like the real deployment.
        Field::new(BigUint::from(65537u32)).unwrap()
    }

    #[test]
    fn add_sub_mul_inverse() {
        let f = small_field();
        let a = f.elem(40000u64);
        let b = f.elem(30000u64);
        let sum = &a + &b;
        assert_eq!(sum.value(), &((40000u64 + 30000u64) % 65537));
        let diff = &sum - &b;
        assert_eq!(diff, a);
        let prod = &a * &b;
        let inv_b = b.inverse().unwrap();
        let back = &prod * &inv_b;
        assert_eq!(back, a);
    }

    #[test]
    fn zero_has_no_inverse() {
        let f = small_field();
        assert_eq!(f.zero().inverse(), Err(FieldError::NotInvertible));
    }

    #[test]
    fn polynomial_eval_matches_horner_by_hand() {
        let f = small_field();
        // p(x) = 1 + 2x + 3x^2
        let p = Polynomial::new(f.clone(), vec![f.elem(1u64), f.elem(2u64), f.elem(3u64)]);
        let x = f.elem(5u64);
        let got = p.eval(&x);
        let want = f.elem(1u64 + 2 * 5 + 3 * 25);
        assert_eq!(got, want);
    }

    #[test]
    fn div_rem_and_gcd() {
        let f = small_field();
        // (x-2)(x-3) = x^2 -5x + 6
        let a = Polynomial::new(f.clone(), vec![f.elem(6u64), f.elem(65537u64 - 5), f.elem(1u64)]);
        // (x-3)(x-4) = x^2 -7x + 12
        let b = Polynomial::new(f.clone(), vec![f.elem(12u64), f.elem(65537u64 - 7), f.elem(1u64)]);
        let g = a.gcd(&b).unwrap();
        // gcd should be (x-3), monic.
        assert_eq!(g.true_degree(), 1);
        assert_eq!(g.eval(&f.elem(3u64)), f.zero());
    }

    #[test]
    fn find_roots_of_known_product() {
        let f = small_field();
        // (x-1)(x-2)(x-5) -- 3 distinct small roots.
        let roots_wanted = [1u64, 2, 5];
        let mut p = Polynomial::new(f.clone(), vec![f.one()]);
        for r in roots_wanted {
            let factor = Polynomial::new(f.clone(), vec![&f.zero() - &f.elem(r), f.one()]);
            p = p.mul(&factor);
        }
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let mut roots = p.find_roots(&mut rng, 200).unwrap();
        roots.sort();
        let mut want: Vec<_> = roots_wanted.iter().map(|&r| f.elem(r)).collect();
        want.sort();
        assert_eq!(roots, want);
    }

    #[test]
    fn find_roots_with_repeated_root_is_distinct() {
        let f = small_field();
        // (x-7)^2 (x-9)
        let a = Polynomial::new(f.clone(), vec![&f.zero() - &f.elem(7u64), f.one()]);
        let b = a.clone();
        let c = Polynomial::new(f.clone(), vec![&f.zero() - &f.elem(9u64), f.one()]);
        let p = a.mul(&b).mul(&c);
        let mut rng = rand::rngs::StdRng::seed_from_u64(11);
        let mut roots = p.find_roots(&mut rng, 200).unwrap();
        roots.sort();
        assert_eq!(roots, vec![f.elem(7u64), f.elem(9u64)]);
    }

    #[test]
    fn interpolate_rational_recovers_known_difference() {
        let f = small_field();
        // client-only root: 11 (numerator degree 1), server-only root: 13 (denominator degree 1)
        let m_bar = 1;
        let num_root = f.elem(11u64);
        let den_root = f.elem(13u64);
        let numerator =
            Polynomial::new(f.clone(), vec![&f.zero() - &num_root, f.one()]);
        let denominator =
            Polynomial::new(f.clone(), vec![&f.zero() - &den_root, f.one()]);

        let xs: Vec<FieldElem> = (1u64..=4).map(|v| f.elem(v)).collect();
        let points: Vec<_> = xs
            .iter()
            .map(|x| {
                let y = &numerator.eval(x) * &denominator.eval(x).inverse().unwrap();
                (x.clone(), y)
            })
            .collect();

        let (num, den) = interpolate_rational(&f, &points, m_bar).unwrap();
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        let mut num_roots = num.find_roots(&mut rng, 100).unwrap();
        let mut den_roots = den.find_roots(&mut rng, 100).unwrap();
        num_roots.sort();
        den_roots.sort();
        assert_eq!(num_roots, vec![num_root]);
        assert_eq!(den_roots, vec![den_root]);
    }

    #[test]
    fn interpolate_rational_reports_need_more_points() {
        let f = small_field();
        let points: Vec<_> = (1u64..=3).map(|v| (f.elem(v), f.elem(v))).collect();
        let err = interpolate_rational(&f, &points, 2).unwrap_err();
        assert_eq!(err, FieldError::NeedMorePoints);
    }
}
