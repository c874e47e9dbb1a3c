//! InterCPISync: recursive partition-tree reconciliation (spec C8).
//!
//! Each node of the hash-space partition tree runs an ordinary base
//! [`CpiSyncEngine`] restricted to the elements whose hash falls in that
//! node's range; `InsufficientBound` is treated as an overflow signal that
//! subdivides the range into `pFactor` children rather than doubling
//! `m_bar` in place (that doubling strategy is `ProbCPISync`'s, not this
//! engine's). The per-node success/failure byte that `CpiSyncEngine`
//! already exchanges over the wire *is* the descent's one-bit-per-node
//! "is this node a leaf" signal (spec §4.8's "single bitstream"), so no
//! separate control channel is needed.
//!
//! Nodes are tracked in a flat arena (`Vec<Node>`, parent as an optional
//! index) rather than as a pointer tree, per the redesign noted for
//! cyclic/shared ownership in `SPEC_FULL.md` §4's open-question
//! resolutions.

use std::io::{Read, Write};

use crate::communicant::Communicant;
use crate::cpisync::{CpiSyncConfig, CpiSyncEngine, CpiSyncVariant};
use crate::element::Element;
use crate::error::SyncError;
use crate::field::Field;
use crate::sketches::Sketches;
use crate::sync_method::{
    base_add_elem, base_del_elem, default_sketch_config, StatBucket, SyncMethod, SyncResult, SyncStats,
};

/// Configuration for [`InterCpiSyncEngine`] (spec §4.8).
#[derive(Clone, Debug)]
pub struct InterCpiSyncConfig {
    /// Per-node declared difference bound.
    pub m_bar: u32,
    /// Element bit-width `b`, and the width of the partitioned hash space.
    pub bits: u32,
    /// Whether elements are prehashed into the field (forwarded to each
    /// node's `CpiSyncEngine`).
    pub hashes: bool,
    /// Branching factor: a node that overflows splits into this many
    /// equal sub-ranges.
    pub p_factor: u32,
    /// Extra sample points per node beyond `2*m_bar`.
    pub redundant: u32,
    /// Maximum tree depth before `TreeTooDeep` is raised.
    pub max_depth: usize,
}

#[derive(Clone, Copy, Debug)]
struct Node {
    lo: u64,
    hi: u64,
    depth: usize,
    #[allow(dead_code)]
    parent: Option<usize>,
}

/// The `InterCPISync` engine.
pub struct InterCpiSyncEngine {
    config: InterCpiSyncConfig,
    field: Field,
    elements: Vec<Element>,
    sketches: Sketches,
    stats: SyncStats,
    arena: Vec<Node>,
}

impl InterCpiSyncEngine {
    /// Build a fresh engine over the given field.
    pub fn new(config: InterCpiSyncConfig, field: Field) -> Self {
        Self {
            config,
            field,
            elements: Vec::new(),
            sketches: Sketches::new(default_sketch_config()),
            stats: SyncStats::new(),
            arena: Vec::new(),
        }
    }

    /// This engine's field, for the same reason as
    /// [`crate::cpisync::CpiSyncEngine::field`].
    pub fn field(&self) -> &Field {
        &self.field
    }

    fn elements_in_range(&self, lo: u64, hi: u64) -> Vec<Element> {
        self.elements
            .iter()
            .filter(|e| {
                let h = e.fingerprint(self.config.bits) as u64;
                h >= lo && h < hi
            })
            .cloned()
            .collect()
    }

    fn child_ranges(lo: u64, hi: u64, p_factor: u32) -> Vec<(u64, u64)> {
        let p = p_factor.max(1) as u64;
        let width = (hi - lo).max(p);
        let step = (width / p).max(1);
        let mut ranges = Vec::with_capacity(p as usize);
        let mut cur = lo;
        for i in 0..p {
            let next = if i == p - 1 { hi } else { (cur + step).min(hi) };
            if cur >= hi {
                break;
            }
            ranges.push((cur, next));
            cur = next;
        }
        ranges
    }

    fn node_engine(&self, elems: Vec<Element>) -> CpiSyncEngine {
        let cfg = CpiSyncConfig {
            m_bar: self.config.m_bar,
            bits: self.config.bits,
            epsilon: 1,
            hashes: self.config.hashes,
            redundant: self.config.redundant,
            variant: CpiSyncVariant::Base,
        };
        let mut engine = CpiSyncEngine::new(cfg, self.field.clone());
        for e in elems {
            engine.add_elem(e).expect("node-local elements are unique by construction");
        }
        engine
    }

    fn push_node(&mut self, lo: u64, hi: u64, depth: usize, parent: Option<usize>) -> usize {
        self.arena.push(Node { lo, hi, depth, parent });
        self.arena.len() - 1
    }

    /// Client role: descend the partition tree in lock step with the
    /// server, accumulating leaf-level differences.
    pub fn sync_client<S: Read + Write>(&mut self, comm: &mut Communicant<S>) -> Result<SyncResult, SyncError> {
        let id = self.push_node(0, 1u64 << self.config.bits, 0, None);
        self.recon_client(comm, id)
    }

    /// Server role, mirroring the client.
    pub fn sync_server<S: Read + Write>(&mut self, comm: &mut Communicant<S>) -> Result<SyncResult, SyncError> {
        let id = self.push_node(0, 1u64 << self.config.bits, 0, None);
        self.recon_server(comm, id)
    }

    fn recon_client<S: Read + Write>(&mut self, comm: &mut Communicant<S>, id: usize) -> Result<SyncResult, SyncError> {
        let Node { lo, hi, depth, .. } = self.arena[id];
        let local = self.elements_in_range(lo, hi);
        let mut node_engine = self.node_engine(local);

        match node_engine.sync_client(comm) {
            Ok(result) => {
                self.stats.record_round();
                Ok(result)
            }
            Err(SyncError::InsufficientBound) => {
                if depth >= self.config.max_depth {
                    return Err(SyncError::TreeTooDeep { max_depth: self.config.max_depth });
                }
                let mut aggregate = SyncResult::default();
                for (c_lo, c_hi) in Self::child_ranges(lo, hi, self.config.p_factor) {
                    let child_id = self.push_node(c_lo, c_hi, depth + 1, Some(id));
                    let child_result = self.recon_client(comm, child_id)?;
                    aggregate.self_minus_other.extend(child_result.self_minus_other);
                    aggregate.other_minus_self.extend(child_result.other_minus_self);
                }
                aggregate.success = true;
                Ok(aggregate)
            }
            Err(other) => Err(other),
        }
    }

    fn recon_server<S: Read + Write>(&mut self, comm: &mut Communicant<S>, id: usize) -> Result<SyncResult, SyncError> {
        let Node { lo, hi, depth, .. } = self.arena[id];
        let local = self.elements_in_range(lo, hi);
        let mut node_engine = self.node_engine(local);

        match node_engine.sync_server(comm) {
            Ok(result) => {
                self.stats.record_round();
                Ok(result)
            }
            Err(SyncError::InsufficientBound) => {
                if depth >= self.config.max_depth {
                    return Err(SyncError::TreeTooDeep { max_depth: self.config.max_depth });
                }
                let mut aggregate = SyncResult::default();
                for (c_lo, c_hi) in Self::child_ranges(lo, hi, self.config.p_factor) {
                    let child_id = self.push_node(c_lo, c_hi, depth + 1, Some(id));
                    let child_result = self.recon_server(comm, child_id)?;
                    aggregate.self_minus_other.extend(child_result.self_minus_other);
                    aggregate.other_minus_self.extend(child_result.other_minus_self);
                }
                aggregate.success = true;
                Ok(aggregate)
            }
            Err(other) => Err(other),
        }
    }
}

impl SyncMethod for InterCpiSyncEngine {
    fn get_name(&self) -> &'static str {
        "InterCPISync"
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
