//! CPISync family: base, probabilistic, half-round, one-less-round (spec
//! C7).
//!
//! The client/server exchange shape (setup → sample exchange → recovery)
//! mirrors the reference crate's `scheduler::Prover`/`Verifier` symmetric
//! orchestration (`src/scheduler.rs`: one side drives, the other consumes,
//! both replay the same deterministic sequence of steps); the actual
//! interpolation/root-finding math is `crate::field`'s. This module
//! maintains the live element list directly rather than an incremental
//! power-sum vector (spec §3's internal representation note) since the
//! characteristic polynomial is cheap to evaluate from the element list at
//! the `m_bar`-scale this crate targets — see DESIGN.md for that tradeoff.

use std::io::{Read, Write};

use crate::communicant::Communicant;
use crate::element::Element;
use crate::error::SyncError;
use crate::field::{interpolate_rational, Field, FieldElem};
use crate::hashing;
use crate::sketches::Sketches;
use crate::sync_method::{
    base_add_elem, base_del_elem, default_sketch_config, StatBucket, SyncMethod, SyncResult, SyncStats,
};

/// Which CPISync family member this engine plays (spec C7).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CpiSyncVariant {
    /// Base three-round protocol; a single fixed `m_bar`, overflow is
    /// terminal.
    Base,
    /// Starts at `m_bar = 1`, doubles on overflow up to an error-budget cap.
    Probabilistic,
    /// Server sends evaluations and its own resolved difference in one
    /// message; client still replies with its own difference.
    HalfRound,
    /// Like `HalfRound` but the client never replies.
    OneLessRound,
}

/// Configuration for a [`CpiSyncEngine`] (spec §4.7 parameters).
#[derive(Clone, Debug)]
pub struct CpiSyncConfig {
    /// Declared upper bound on `|A△B|` (starting bound for `Probabilistic`).
    pub m_bar: u32,
    /// Element bit-width `b`.
    pub bits: u32,
    /// Error-probability exponent for probabilistic doubling.
    pub epsilon: u32,
    /// Whether elements are prehashed into the field.
    pub hashes: bool,
    /// Extra sample points beyond `2*m_bar`.
    pub redundant: u32,
    /// Which protocol variant to run.
    pub variant: CpiSyncVariant,
}

/// A CPISync engine (spec C7). One instance per session per peer; client
/// and server sides share this type, differing only in which of
/// [`Self::sync_client`] / [`Self::sync_server`] is invoked.
pub struct CpiSyncEngine {
    config: CpiSyncConfig,
    field: Field,
    elements: Vec<Element>,
    sketches: Sketches,
    stats: SyncStats,
}

impl CpiSyncEngine {
    /// Build a fresh engine over the given field.
    pub fn new(config: CpiSyncConfig, field: Field) -> Self {
        Self { config, field, elements: Vec::new(), sketches: Sketches::new(default_sketch_config()), stats: SyncStats::new() }
    }

    /// This engine's field, so a session driver can run the modulus
    /// handshake before the first `sync_client`/`sync_server` call (spec
    /// §5: "the first message after connect MUST be the modulus
    /// handshake").
    pub fn field(&self) -> &Field {
        &self.field
    }

    fn field_elem_of(&self, elem: &Element) -> FieldElem {
        if self.config.hashes {
            hashing::prehash_to_field(&self.field, elem.as_bytes())
        } else {
            hashing::hash_to_field(&self.field, elem.as_integer())
        }
    }

    /// Deterministic, non-zero sample points both peers derive
    /// independently from `m_bar`/`redundant` without exchanging anything
    /// (spec §4.7: "predetermined non-zero field points").
    fn sample_points(&self, m_bar: u32, redundant: u32) -> Vec<FieldElem> {
        let needed = 2 * m_bar as usize + redundant as usize;
        (1..=needed as u64).map(|i| hashing::sample_point(&self.field, i)).collect()
    }

    /// Evaluate this side's characteristic polynomial `Π (x - h(e))` at
    /// `x` directly from the live element list.
    fn eval_characteristic(&self, x: &FieldElem) -> FieldElem {
        let mut acc = self.field.one();
        for e in &self.elements {
            let h = self.field_elem_of(e);
            let factor = x - &h;
            acc = &acc * &factor;
        }
        acc
    }

    fn roots_to_elements(roots: &[FieldElem]) -> Vec<Element> {
        roots.iter().map(|r| Element::from_integer(r.value().clone())).collect()
    }

    /// One attempt at the sample-exchange + recovery rounds for a fixed
    /// `m_bar`. Returns `Ok(Some(result))` on a clean decode, `Ok(None)` on
    /// overflow (rank-deficient interpolation — caller decides whether to
    /// retry with a larger `m_bar`), or `Err` on a hard failure.
    fn attempt_client<S: Read + Write>(
        &mut self,
        comm: &mut Communicant<S>,
        m_bar: u32,
        redundant: u32,
    ) -> Result<Option<SyncResult>, SyncError> {
        let points = self.sample_points(m_bar, redundant);

        self.stats.start(StatBucket::Comm);
        let server_evals_raw: Vec<_> = (0..points.len())
            .map(|_| comm.recv_bigint())
            .collect::<Result<_, _>>()?;
        self.stats.stop();
        let server_evals: Vec<FieldElem> =
            server_evals_raw.into_iter().map(|v| self.field.elem(v)).collect();

        self.stats.start(StatBucket::Comp);
        let client_evals: Vec<FieldElem> = points.iter().map(|x| self.eval_characteristic(x)).collect();

        let mut ratio_points = Vec::with_capacity(points.len());
        let mut degenerate = false;
        for (x, (c, s)) in points.iter().zip(client_evals.iter().zip(server_evals.iter())) {
            if s.is_zero() {
                degenerate = true;
                break;
            }
            let y = c * &s.inverse()?;
            ratio_points.push((x.clone(), y));
        }
        if degenerate {
            self.stats.stop();
            return Ok(None);
        }

        let interpolation = interpolate_rational(&self.field, &ratio_points, m_bar as usize);
        self.stats.stop();

        let (num, den) = match interpolation {
            Ok(pair) => pair,
            Err(_) => return Ok(None),
        };

        self.stats.start(StatBucket::Comp);
        let mut rng = rand::rngs::StdRng::from_entropy_seeded();
        let num_roots = num.find_roots(&mut rng, 200);
        let den_roots = den.find_roots(&mut rng, 200);
        self.stats.stop();
        let (num_roots, den_roots) = match (num_roots, den_roots) {
            (Ok(a), Ok(b)) => (a, b),
            _ => return Ok(None),
        };

        let self_minus_other = Self::roots_to_elements(&num_roots);
        let other_minus_self = Self::roots_to_elements(&den_roots);
        Ok(Some(SyncResult { self_minus_other, other_minus_self, success: true }))
    }

    /// Client role: runs (and, for `Probabilistic`, retries) the
    /// sample-exchange/recovery protocol (spec §4.7).
    pub fn sync_client<S: Read + Write>(&mut self, comm: &mut Communicant<S>) -> Result<SyncResult, SyncError> {
        self.stats.start(StatBucket::Comm);
        let server_m_bar = comm.recv_u32()?;
        let server_bits = comm.recv_u32()?;
        let server_hashes = comm.recv_byte()? != 0;
        self.stats.stop();
        if server_bits != self.config.bits || server_hashes != self.config.hashes {
            return Err(SyncError::ParameterMismatch("CPISync bits/hashes disagree".into()));
        }

        match self.config.variant {
            CpiSyncVariant::Base | CpiSyncVariant::HalfRound | CpiSyncVariant::OneLessRound => {
                let m_bar = server_m_bar;
                match self.attempt_client(comm, m_bar, self.config.redundant)? {
                    Some(result) => {
                        comm.send_byte(1)?;
                        if !matches!(self.config.variant, CpiSyncVariant::OneLessRound) {
                            comm.send_element_list(&result.self_minus_other)?;
                        }
                        self.stats.record_comm_bytes(comm);
                        Ok(result)
                    }
                    None => {
                        comm.send_byte(0)?;
                        Err(SyncError::InsufficientBound)
                    }
                }
            }
            CpiSyncVariant::Probabilistic => {
                let mut m_bar = server_m_bar.max(1);
                let max_rounds = self.config.epsilon.clamp(1, 32);
                for _ in 0..max_rounds {
                    match self.attempt_client(comm, m_bar, self.config.redundant)? {
                        Some(result) => {
                            comm.send_byte(1)?;
                            comm.send_element_list(&result.self_minus_other)?;
                            self.stats.record_comm_bytes(comm);
                            return Ok(result);
                        }
                        None => {
                            comm.send_byte(0)?;
                            self.stats.record_round();
                            m_bar = comm.recv_u32()?;
                        }
                    }
                }
                Err(SyncError::InsufficientBound)
            }
        }
    }

    /// Server role (spec §4.7 step 1-2): sends `m_bar, bits, hashes`, then
    /// its own evaluations; on client-reported overflow for the
    /// `Probabilistic` variant, doubles `m_bar` and restarts.
    pub fn sync_server<S: Read + Write>(&mut self, comm: &mut Communicant<S>) -> Result<SyncResult, SyncError> {
        let mut m_bar = self.config.m_bar;
        self.stats.start(StatBucket::Comm);
        comm.send_u32(m_bar)?;
        comm.send_u32(self.config.bits)?;
        comm.send_byte(self.config.hashes as u8)?;
        self.stats.stop();

        let max_rounds = match self.config.variant {
            CpiSyncVariant::Probabilistic => self.config.epsilon.clamp(1, 32),
            _ => 1,
        };

        for round in 0..max_rounds {
            let points = self.sample_points(m_bar, self.config.redundant);
            self.stats.start(StatBucket::Comp);
            let evals: Vec<_> = points.iter().map(|x| self.eval_characteristic(x)).collect();
            self.stats.stop();

            self.stats.start(StatBucket::Comm);
            for e in &evals {
                comm.send_bigint(e.value())?;
            }
            let client_ok = comm.recv_byte()?;
            self.stats.stop();

            if client_ok == 1 {
                let other_minus_self = if matches!(self.config.variant, CpiSyncVariant::OneLessRound) {
                    Vec::new()
                } else {
                    self.stats.start(StatBucket::Comm);
                    let list = comm.recv_element_list()?;
                    self.stats.stop();
                    list
                };
                self.stats.record_comm_bytes(comm);
                return Ok(SyncResult { self_minus_other: Vec::new(), other_minus_self, success: true });
            }

            if !matches!(self.config.variant, CpiSyncVariant::Probabilistic) {
                return Err(SyncError::InsufficientBound);
            }
            m_bar = (m_bar.saturating_mul(2)).max(1);
            self.stats.record_round();
            self.stats.start(StatBucket::Comm);
            comm.send_u32(m_bar)?;
            self.stats.stop();
            let _ = round;
        }
        Err(SyncError::InsufficientBound)
    }
}

impl SyncMethod for CpiSyncEngine {
    fn get_name(&self) -> &'static str {
        match self.config.variant {
            CpiSyncVariant::Base => "CPISync",
            CpiSyncVariant::Probabilistic => "ProbCPISync",
            CpiSyncVariant::HalfRound => "CPISync_HalfRound",
            CpiSyncVariant::OneLessRound => "CPISync_OneLessRound",
        }
    }

    fn add_elem(&mut self, elem: Element) -> Result<bool, SyncError> {
        if self.elements.contains(&elem) {
            return Ok(false);
        }
        base_add_elem(&mut self.sketches, &elem);
        self.elements.push(elem);
        Ok(true)
    }

    fn del_elem(&mut self, elem: &Element) -> Result<bool, SyncError> {
        if let Some(pos) = self.elements.iter().position(|e| e == elem) {
            self.elements.remove(pos);
            base_del_elem(&mut self.sketches, elem);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn elements(&self) -> &[Element] {
        &self.elements
    }
    fn stats(&self) -> &SyncStats {
        &self.stats
    }
    fn stats_mut(&mut self) -> &mut SyncStats {
        &mut self.stats
    }
    fn sketches_mut(&mut self) -> &mut Sketches {
        &mut self.sketches
    }
}

/// A non-seeding source of entropy for engine-internal randomized steps
/// (Cantor–Zassenhaus splitting). Spec §5: "Global random-number
/// generators are NOT permitted to be seeded inside an engine" — this
/// pulls fresh OS entropy per call instead of maintaining or seeding any
/// shared generator state.
trait FromEntropySeeded {
    fn from_entropy_seeded() -> Self;
}
impl FromEntropySeeded for rand::rngs::StdRng {
    fn from_entropy_seeded() -> Self {
        rand::rngs::StdRng::from_entropy()
    }
}
use rand::SeedableRng;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bigint;
    use crate::communicant::test_channel::duplex_pair;
    use num_bigint::BigUint;

    fn base_config(m_bar: u32, bits: u32) -> CpiSyncConfig {
        CpiSyncConfig { m_bar, bits, epsilon: 40, hashes: false, redundant: 0, variant: CpiSyncVariant::Base }
    }

    fn run_pair(
        client_elems: &[u64],
        server_elems: &[u64],
        m_bar: u32,
        bits: u32,
    ) -> (Result<SyncResult, SyncError>, Result<SyncResult, SyncError>) {
        let mut seed_rng = rand::rngs::StdRng::seed_from_u64(1);
        let p = bigint::prime_at_least_bits(bits, &mut seed_rng);
        let field = Field::new(p).unwrap();

        let mut client = CpiSyncEngine::new(base_config(m_bar, bits), field.clone());
        let mut server = CpiSyncEngine::new(base_config(m_bar, bits), field);
        for v in client_elems {
            client.add_elem(Element::from_integer(BigUint::from(*v))).unwrap();
        }
        for v in server_elems {
            server.add_elem(Element::from_integer(BigUint::from(*v))).unwrap();
        }

        let (pa, pb) = duplex_pair();
        let mut comm_client = Communicant::new(pa, false);
        let mut comm_server = Communicant::new(pb, true);
        comm_client.comm_connect();
        comm_client.mark_connected();
        comm_server.comm_listen();
        comm_server.mark_connected();
        let modulus = field_modulus(&client);
        let handle = std::thread::spawn(move || {
            comm_client.establish_modulus(&modulus).unwrap();
            let res = client.sync_client(&mut comm_client);
            (res, client)
        });
        let modulus2 = field_modulus(&server);
        comm_server.establish_modulus(&modulus2).unwrap();
        let server_res = server.sync_server(&mut comm_server);
        let (client_res, _client) = handle.join().unwrap();
        (client_res, server_res)
    }

    fn field_modulus(e: &CpiSyncEngine) -> BigUint {
        e.field.modulus().clone()
    }

    #[test]
    fn tiny_cpisync_matches_scenario_1() {
        let (client_res, server_res) = run_pair(&[1, 2, 3, 4, 5], &[3, 4, 5, 6, 7], 4, 32);
        let client_res = client_res.unwrap();
        let server_res = server_res.unwrap();
        assert!(client_res.success);
        let mut a_minus_b: Vec<_> = client_res.self_minus_other.iter().map(|e| e.as_integer().clone()).collect();
        a_minus_b.sort();
        assert_eq!(a_minus_b, vec![BigUint::from(1u32), BigUint::from(2u32)]);

        let mut b_minus_a: Vec<_> = client_res.other_minus_self.iter().map(|e| e.as_integer().clone()).collect();
        b_minus_a.sort();
        assert_eq!(b_minus_a, vec![BigUint::from(6u32), BigUint::from(7u32)]);
        assert!(server_res.success);
    }

    #[test]
    fn overflow_with_too_small_m_bar_is_insufficient_bound() {
        let (client_res, server_res) = run_pair(&[1, 2, 3, 4, 5], &[3, 4, 5, 6, 7], 1, 32);
        assert!(matches!(client_res, Err(SyncError::InsufficientBound)));
        assert!(matches!(server_res, Err(SyncError::InsufficientBound)));
    }

    #[test]
    fn identical_sets_complete_within_one_round_empty_lists() {
        let (client_res, server_res) = run_pair(&[1, 2, 3], &[1, 2, 3], 4, 32);
        let client_res = client_res.unwrap();
        assert!(client_res.self_minus_other.is_empty());
        assert!(client_res.other_minus_self.is_empty());
        assert!(server_res.unwrap().success);
    }
}
