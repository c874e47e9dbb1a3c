//! Crate root: public surface and shared protocol-wide conventions.
//!
//! This module is the single canonical entry-point for downstream users of
//! the library. It re-exports the core building blocks (field/big-integer
//! arithmetic, element and sketch types, the wire codec, the data
//! structures each engine encodes, and the engines themselves) plus the
//! `GenSync` façade that drives a session end to end.
//!
//! ## Invariants
//!
//! - **Wire-first.** Every type that crosses a `Communicant` boundary has a
//!   canonical encoding defined alongside it; engines never invent ad hoc
//!   framing inline.
//! - **No implicit entropy.** Randomness (prime search, Cuckoo eviction)
//!   always takes an explicit `rng` handle or builds one fresh per call;
//!   nothing seeds a generator inside a long-lived struct.
//! - **Typed errors.** Every fallible subsystem has its own `thiserror`
//!   enum, composed into the single [`error::SyncError`] that crosses
//!   engine/session boundaries.

#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms)]

/// Big-integer helpers: canonical byte encoding, Miller-Rabin primality,
/// and prime search.
pub mod bigint;
/// Prime-field arithmetic and polynomial interpolation over it (CPISync's
/// characteristic-polynomial machinery).
pub mod field;
/// Shared error taxonomy.
pub mod error;
/// Element-to-field and element-to-bucket hashing.
pub mod hashing;
/// The wire-level unit of reconciliation: an opaque, ordered byte string.
pub mod element;
/// Approximate cardinality/frequency sketches attached to every engine.
pub mod sketches;
/// Typed wire codec and connection lifecycle over an ordered byte stream.
pub mod communicant;
/// Invertible Bloom Lookup Table.
pub mod iblt;
/// Cuckoo filter.
pub mod cuckoo;
/// The `SyncMethod` trait every engine implements, plus shared statistics
/// and default-operation helpers.
pub mod sync_method;
/// Protocol identifiers and the typed `Params` payload contract.
pub mod params;
/// CPISync engine (base, probabilistic, half-round, one-less-round).
pub mod cpisync;
/// InterCPISync: recursive partition-tree reconciliation.
pub mod intercpisync;
/// IBLT-based engines: base, half-round, multiset, two-level set-of-sets.
pub mod iblt_sync;
/// FullSync: exact full-set exchange.
pub mod fullsync;
/// CuckooSync: approximate reconciliation via Cuckoo filter exchange.
pub mod cuckoo_sync;
/// The `GenSync` façade and its `Builder`.
pub mod gensync;

#[cfg(test)]
pub(crate) mod testutil;

pub use crate::communicant::{Communicant, ConnState, TimeoutChannel};
pub use crate::cpisync::{CpiSyncConfig, CpiSyncEngine, CpiSyncVariant};
pub use crate::cuckoo::{CuckooError, CuckooFilter};
pub use crate::cuckoo_sync::{CuckooSyncConfig, CuckooSyncEngine};
pub use crate::element::Element;
pub use crate::error::SyncError;
pub use crate::field::{Field, FieldElem, FieldError};
pub use crate::fullsync::FullSyncEngine;
pub use crate::gensync::{Builder, Engine, GenSync};
pub use crate::iblt::{Iblt, IbltCell, IbltDecodeResult, IbltError, IbltMode};
pub use crate::iblt_sync::{
    IbltMultisetSyncEngine, IbltSetOfSetsEngine, IbltSyncConfig, IbltSyncEngine,
};
pub use crate::intercpisync::{InterCpiSyncConfig, InterCpiSyncEngine};
pub use crate::params::{
    CpiSyncParams, CuckooParams, FullSyncParams, IbltParams, InterCpiSyncParams, Params,
    SyncProtocol,
};
pub use crate::sketches::{CardinalityCounter, HyperLogLog, SketchConfig, SketchSnapshot, Sketches, SpaceSaving};
pub use crate::sync_method::{SyncMethod, SyncResult, SyncStats};
