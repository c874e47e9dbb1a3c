//! Common engine contract, timing buckets, and byte counters (spec C10).
//!
//! `SyncStats`'s start/stop timer buckets with a non-reentrant guard are
//! grounded on the reference crate's `scheduler::Prover`/`Verifier`
//! orchestration discipline (one phase active at a time, tracked via
//! explicit state rather than nested timers); the `SyncMethod` trait's
//! "base bookkeeping runs before the subclass protocol" ordering is
//! grounded directly on `CuckooSync.cpp`'s `SyncClient`/`SyncServer`, which
//! call `SyncMethod::SyncClient`/`SyncServer` first (see `SPEC_FULL.md`
//! §2).

use std::time::{Duration, Instant};

use crate::communicant::Communicant;
use crate::element::Element;
use crate::error::SyncError;
use crate::sketches::{SketchConfig, Sketches};

/// Timing buckets (spec C10, times accumulated in nanoseconds).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatBucket {
    /// Waiting on the peer.
    Idle,
    /// Active send/recv.
    Comm,
    /// Local computation.
    Comp,
}

/// Per-session statistics: timing buckets, byte counters, and whatever
/// bookkeeping counters an engine records (e.g. doubling rounds).
#[derive(Debug, Default)]
pub struct SyncStats {
    idle_ns: u64,
    comm_ns: u64,
    comp_ns: u64,
    xmit_bytes: u64,
    recv_bytes: u64,
    rounds: u32,
    active: Option<(StatBucket, Instant)>,
}

impl SyncStats {
    /// A fresh, zeroed stats block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start timing `bucket`. Panics if a bucket is already active (spec
    /// C10: "nesting is a programming error and triggers stats-reentry" —
    /// this is the one taxonomy entry spec §7 marks as a programming bug
    /// rather than a `Result`, so it surfaces as a panic here, matching
    /// `SPEC_FULL.md`'s error-handling section).
    pub fn start(&mut self, bucket: StatBucket) {
        assert!(self.active.is_none(), "stats-reentry: {:?} started while a bucket is already active", bucket);
        self.active = Some((bucket, Instant::now()));
    }

    /// Stop the currently active bucket and accumulate its elapsed time.
    /// Panics if no bucket is active (same `stats-reentry` contract as
    /// [`Self::start`]).
    pub fn stop(&mut self) {
        let (bucket, started) = self.active.take().expect("stats-reentry: stop() with no active bucket");
        let elapsed = started.elapsed().as_nanos() as u64;
        match bucket {
            StatBucket::Idle => self.idle_ns += elapsed,
            StatBucket::Comm => self.comm_ns += elapsed,
            StatBucket::Comp => self.comp_ns += elapsed,
        }
    }

    /// Time `f` under `bucket`, handling the start/stop pairing.
    pub fn time<R>(&mut self, bucket: StatBucket, f: impl FnOnce() -> R) -> R {
        self.start(bucket);
        let r = f();
        self.stop();
        r
    }

    /// Read back a communicant's current byte counters (spec
    /// `SPEC_FULL.md` §2: "read back after each comm phase", not only once
    /// at session end). Since `Communicant`'s counters are monotone
    /// session totals, this sets (not adds) the stats' mirrored totals.
    pub fn record_comm_bytes<S>(&mut self, comm: &Communicant<S>) {
        self.xmit_bytes = comm.xmit_bytes();
        self.recv_bytes = comm.recv_bytes();
    }

    /// Record one protocol round (e.g. a ProbCPISync doubling, or an
    /// InterCPISync tree descent step).
    pub fn record_round(&mut self) {
        self.rounds += 1;
    }

    /// Total idle time.
    pub fn idle_time(&self) -> Duration {
        Duration::from_nanos(self.idle_ns)
    }
    /// Total active comm time.
    pub fn comm_time(&self) -> Duration {
        Duration::from_nanos(self.comm_ns)
    }
    /// Total local computation time.
    pub fn comp_time(&self) -> Duration {
        Duration::from_nanos(self.comp_ns)
    }
    /// Bytes transmitted, as last recorded.
    pub fn xmit_bytes(&self) -> u64 {
        self.xmit_bytes
    }
    /// Bytes received, as last recorded.
    pub fn recv_bytes(&self) -> u64 {
        self.recv_bytes
    }
    /// Rounds recorded so far.
    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    /// A human-readable block (spec C11: `printStats`).
    pub fn render(&self, engine_name: &str) -> String {
        format!(
            "{engine_name}: idle={:?} comm={:?} comp={:?} xmit={}B recv={}B rounds={}",
            self.idle_time(),
            self.comm_time(),
            self.comp_time(),
            self.xmit_bytes,
            self.recv_bytes,
            self.rounds
        )
    }
}

/// The result of a completed client/server sync (spec C11:
/// "`clientSyncBegin`/`serverSyncBegin` ... return success iff the
/// resulting difference lists are believed complete by the decoder").
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncResult {
    /// Elements present locally but absent on the peer.
    pub self_minus_other: Vec<Element>,
    /// Elements present on the peer but absent locally.
    pub other_minus_self: Vec<Element>,
    /// Whether the decoder believes the lists above are complete.
    pub success: bool,
}

/// Common contract every reconciliation engine satisfies (spec C10).
pub trait SyncMethod {
    /// Engine identifier, matching a `SyncProtocol` variant's display name.
    fn get_name(&self) -> &'static str;

    /// Update the engine-specific structure and sketches; returns whether
    /// the element was newly accepted.
    fn add_elem(&mut self, elem: Element) -> Result<bool, SyncError>;

    /// Optional: remove an element. Default raises `unsupported-op` (spec
    /// C10).
    fn del_elem(&mut self, _elem: &Element) -> Result<bool, SyncError> {
        Err(SyncError::UnsupportedOp("delElem"))
    }

    /// All elements currently tracked, in insertion order (spec §3:
    /// "preserved for deterministic iteration in tests").
    fn elements(&self) -> &[Element];

    /// This engine's statistics block.
    fn stats(&self) -> &SyncStats;

    /// Mutable access for engines driving their own timing.
    fn stats_mut(&mut self) -> &mut SyncStats;

    /// This engine's sketches bundle.
    fn sketches_mut(&mut self) -> &mut Sketches;
}

/// Base bookkeeping every `SyncMethod` performs before its own
/// client/server protocol runs (spec `SPEC_FULL.md` §2): feed the element
/// into `Sketches`, tracking failures as non-fatal per spec §7.
pub fn base_add_elem(sketches: &mut Sketches, elem: &Element) {
    sketches.observe_insert(elem);
}

/// Base bookkeeping for delete, mirroring [`base_add_elem`].
pub fn base_del_elem(sketches: &mut Sketches, elem: &Element) {
    sketches.observe_delete(elem);
}

/// Default sketch configuration every engine constructs with, matching the
/// original's three-estimator default (`SPEC_FULL.md` §2).
pub fn default_sketch_config() -> SketchConfig {
    SketchConfig { cardinality: true, unique_elem: true, heavy_hitters: true }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "stats-reentry")]
    fn nested_start_panics() {
        let mut s = SyncStats::new();
        s.start(StatBucket::Comp);
        s.start(StatBucket::Comm);
    }

    #[test]
    #[should_panic(expected = "stats-reentry")]
    fn stop_without_start_panics() {
        let mut s = SyncStats::new();
        s.stop();
    }

    #[test]
    fn time_accumulates_into_the_right_bucket() {
        let mut s = SyncStats::new();
        s.time(StatBucket::Comp, || {
            let mut x = 0u64;
            for i in 0..1000 {
                x = x.wrapping_add(i);
            }
            std::hint::black_box(x);
        });
        assert!(s.comp_time() >= Duration::from_nanos(0));
        assert_eq!(s.idle_time(), Duration::ZERO);
        assert_eq!(s.comm_time(), Duration::ZERO);
    }
}
