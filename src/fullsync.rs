//! Baseline exact reconciliation: exchange entire sets (spec §2, "FullSync").
//!
//! No finesse here by design — this is the correctness baseline every other
//! engine is benchmarked against (spec §8: "For all A, B, FullSync returns
//! exact A∖B and B∖A"). Shape follows the same base-bookkeeping-then-protocol
//! ordering as every other `SyncMethod` (`SPEC_FULL.md` §2).

use std::collections::HashSet;
use std::io::{Read, Write};

use crate::communicant::Communicant;
use crate::element::Element;
use crate::error::SyncError;
use crate::sketches::Sketches;
use crate::sync_method::{
    base_add_elem, base_del_elem, default_sketch_config, StatBucket, SyncMethod, SyncResult, SyncStats,
};

/// The `FullSync` engine: holds its elements and exchanges the whole set.
pub struct FullSyncEngine {
    elements: Vec<Element>,
    sketches: Sketches,
    stats: SyncStats,
}

impl FullSyncEngine {
    /// A fresh engine with no elements.
    pub fn new() -> Self {
        Self { elements: Vec::new(), sketches: Sketches::new(default_sketch_config()), stats: SyncStats::new() }
    }

    fn difference(mine: &[Element], theirs: &[Element]) -> Vec<Element> {
        let their_set: HashSet<&Element> = theirs.iter().collect();
        mine.iter().filter(|e| !their_set.contains(e)).cloned().collect()
    }

    /// Client role: send the full local set, receive the peer's, compute
    /// both differences locally.
    pub fn sync_client<S: Read + Write>(&mut self, comm: &mut Communicant<S>) -> Result<SyncResult, SyncError> {
        self.stats.start(StatBucket::Comm);
        comm.send_element_list(&self.elements)?;
        let peer_elements = comm.recv_element_list()?;
        self.stats.stop();
        self.stats.record_comm_bytes(comm);

        self.stats.start(StatBucket::Comp);
        let self_minus_other = Self::difference(&self.elements, &peer_elements);
        let other_minus_self = Self::difference(&peer_elements, &self.elements);
        self.stats.stop();

        Ok(SyncResult { self_minus_other, other_minus_self, success: true })
    }

    /// Server role: symmetric to the client (spec §5: FullSync has no
    /// asymmetric roles beyond who speaks first).
    pub fn sync_server<S: Read + Write>(&mut self, comm: &mut Communicant<S>) -> Result<SyncResult, SyncError> {
        self.stats.start(StatBucket::Comm);
        let peer_elements = comm.recv_element_list()?;
        comm.send_element_list(&self.elements)?;
        self.stats.stop();
        self.stats.record_comm_bytes(comm);

        self.stats.start(StatBucket::Comp);
        let self_minus_other = Self::difference(&self.elements, &peer_elements);
        let other_minus_self = Self::difference(&peer_elements, &self.elements);
        self.stats.stop();

        Ok(SyncResult { self_minus_other, other_minus_self, success: true })
    }
}

impl Default for FullSyncEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncMethod for FullSyncEngine {
    fn get_name(&self) -> &'static str {
        "FullSync"
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communicant::test_channel::duplex_pair;
    use num_bigint::BigUint;

    #[test]
    fn exact_difference_both_directions() {
        let (pa, pb) = duplex_pair();
        let mut comm_client = Communicant::new(pa, false);
        let mut comm_server = Communicant::new(pb, true);

        let mut client = FullSyncEngine::new();
        let mut server = FullSyncEngine::new();
        for v in [1u64, 2, 3, 4, 5] {
            client.add_elem(Element::from_integer(BigUint::from(v))).unwrap();
        }
        for v in [3u64, 4, 5, 6, 7] {
            server.add_elem(Element::from_integer(BigUint::from(v))).unwrap();
        }

        let handle = std::thread::spawn(move || {
            let res = client.sync_client(&mut comm_client);
            (res, client)
        });
        let server_res = server.sync_server(&mut comm_server).unwrap();
        let (client_res, _client) = handle.join().unwrap();
        let client_res = client_res.unwrap();

        let mut a_minus_b: Vec<_> = client_res.self_minus_other.iter().map(|e| e.as_integer().clone()).collect();
        a_minus_b.sort();
        assert_eq!(a_minus_b, vec![BigUint::from(1u32), BigUint::from(2u32)]);

        let mut b_minus_a: Vec<_> = server_res.self_minus_other.iter().map(|e| e.as_integer().clone()).collect();
        b_minus_a.sort();
        assert_eq!(b_minus_a, vec![BigUint::from(6u32), BigUint::from(7u32)]);
    }
}
