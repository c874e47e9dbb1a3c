//! `CuckooSync` engine: approximate reconciliation via Cuckoo filter
//! exchange (spec C9).
//!
//! Message order is grounded directly on `original_source/src/Syncs/
//! CuckooSync.cpp`'s `SyncClient`/`SyncServer`: each side sends its own
//! filter, receives the peer's, queries it locally for `selfMinusOther`,
//! then exchanges those difference lists outright so both sides end up
//! with exact (not merely approximate) results modulo the filter's false
//! positive rate.

use std::io::{Read, Write};

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::communicant::Communicant;
use crate::cuckoo::CuckooFilter;
use crate::element::Element;
use crate::error::SyncError;
use crate::sketches::Sketches;
use crate::sync_method::{
    base_add_elem, base_del_elem, default_sketch_config, StatBucket, SyncMethod, SyncResult, SyncStats,
};

/// Cuckoo filter shape parameters (spec §4.6: `ℓ`, `b`, `F`, `maxKicks`).
#[derive(Clone, Copy, Debug)]
pub struct CuckooSyncConfig {
    /// Fingerprint width in bits.
    pub fingerprint_bits: u32,
    /// Slots per bucket.
    pub bucket_size: usize,
    /// Bucket count.
    pub num_buckets: u32,
    /// Eviction budget for `insert`.
    pub max_kicks: u32,
}

/// The `CuckooSync` engine.
pub struct CuckooSyncEngine {
    config: CuckooSyncConfig,
    filter: CuckooFilter,
    elements: Vec<Element>,
    sketches: Sketches,
    stats: SyncStats,
}

impl CuckooSyncEngine {
    /// A fresh engine with an empty filter.
    pub fn new(config: CuckooSyncConfig) -> Self {
        Self {
            config,
            filter: CuckooFilter::new(config.fingerprint_bits, config.bucket_size, config.num_buckets, config.max_kicks),
            elements: Vec::new(),
            sketches: Sketches::new(default_sketch_config()),
            stats: SyncStats::new(),
        }
    }

    /// Client role (spec §4.6 / `CuckooSync.cpp::SyncClient`): send our
    /// filter, receive theirs, query it locally, then exchange diff lists.
    pub fn sync_client<S: Read + Write>(&mut self, comm: &mut Communicant<S>) -> Result<SyncResult, SyncError> {
        self.stats.start(StatBucket::Comm);
        comm.send_cuckoo(&self.filter)?;
        let theirs = comm.recv_cuckoo(self.config.max_kicks)?;
        self.stats.stop();
        self.stats.record_comm_bytes(comm);

        self.stats.start(StatBucket::Comp);
        let self_minus_other: Vec<Element> = self.elements.iter().filter(|e| !theirs.lookup(e)).cloned().collect();
        self.stats.stop();

        self.stats.start(StatBucket::Comm);
        comm.send_element_list(&self_minus_other)?;
        let other_minus_self = comm.recv_element_list()?;
        self.stats.stop();
        self.stats.record_comm_bytes(comm);
        self.stats.record_round();

        Ok(SyncResult { self_minus_other, other_minus_self, success: true })
    }

    /// Server role, mirroring the client's message order.
    pub fn sync_server<S: Read + Write>(&mut self, comm: &mut Communicant<S>) -> Result<SyncResult, SyncError> {
        self.stats.start(StatBucket::Comm);
        let theirs = comm.recv_cuckoo(self.config.max_kicks)?;
        self.stats.stop();

        self.stats.start(StatBucket::Comp);
        let self_minus_other: Vec<Element> = self.elements.iter().filter(|e| !theirs.lookup(e)).cloned().collect();
        self.stats.stop();

        self.stats.start(StatBucket::Comm);
        comm.send_cuckoo(&self.filter)?;
        let other_minus_self = comm.recv_element_list()?;
        comm.send_element_list(&self_minus_other)?;
        self.stats.stop();
        self.stats.record_comm_bytes(comm);
        self.stats.record_round();

        Ok(SyncResult { self_minus_other, other_minus_self, success: true })
    }
}

impl SyncMethod for CuckooSyncEngine {
    fn get_name(&self) -> &'static str {
        "CuckooSync"
    }

    fn add_elem(&mut self, elem: Element) -> Result<bool, SyncError> {
        // A fresh per-call RNG handle: the filter's eviction chain never
        // seeds or stores a generator of its own (spec §5).
        let mut rng = StdRng::from_entropy();
        self.filter.insert(&elem, &mut rng)?;
        base_add_elem(&mut self.sketches, &elem);
        self.elements.push(elem);
        Ok(true)
    }

    fn del_elem(&mut self, elem: &Element) -> Result<bool, SyncError> {
        let found = self.filter.delete(elem);
        if let Some(pos) = self.elements.iter().position(|e| e == elem) {
            self.elements.remove(pos);
            base_del_elem(&mut self.sketches, elem);
        }
        Ok(found)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communicant::test_channel::duplex_pair;

    fn cfg() -> CuckooSyncConfig {
        CuckooSyncConfig { fingerprint_bits: 12, bucket_size: 4, num_buckets: 1024, max_kicks: 500 }
    }

    fn elem(v: u64) -> Element {
        Element::new(v.to_be_bytes().to_vec())
    }

    #[test]
    fn mostly_overlapping_sets_reconcile_exactly() {
        let (pa, pb) = duplex_pair();
        let mut comm_client = Communicant::new(pa, false);
        let mut comm_server = Communicant::new(pb, true);

        let mut client = CuckooSyncEngine::new(cfg());
        let mut server = CuckooSyncEngine::new(cfg());
        for v in 0..400u64 {
            client.add_elem(elem(v)).unwrap();
        }
        for v in 20..420u64 {
            server.add_elem(elem(v)).unwrap();
        }

        let handle = std::thread::spawn(move || client.sync_client(&mut comm_client));
        let server_res = server.sync_server(&mut comm_server).unwrap();
        let client_res = handle.join().unwrap().unwrap();

        assert_eq!(client_res.self_minus_other.len(), 20);
        assert_eq!(client_res.other_minus_self.len(), 20);
        assert_eq!(server_res.self_minus_other.len(), 20);
        assert_eq!(server_res.other_minus_self.len(), 20);
    }

    #[test]
    fn delete_then_lookup_removed_element_absent() {
        let mut engine = CuckooSyncEngine::new(cfg());
        let e = elem(7);
        engine.add_elem(e.clone()).unwrap();
        assert!(engine.filter.lookup(&e));
        assert!(engine.del_elem(&e).unwrap());
        assert!(!engine.filter.lookup(&e));
    }
}
