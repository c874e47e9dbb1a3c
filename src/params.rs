//! Protocol identifiers and the typed `Params` payload contract (spec
//! C11).
//!
//! Field order and naming for each `serialize`/`unserialize` pair are taken
//! verbatim from `original_source/src/Benchmarks/BenchParams.cpp`'s
//! `CPISyncParams`/`IBLTParams`/`CuckooParams` (`SPEC_FULL.md` §2): this
//! crate does not read or write the surrounding parameter-file text format
//! (out of scope, spec §1), only this typed payload contract so an
//! external reader can drive `GenSync::Builder` through `apply`.

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::gensync::Builder;

/// Recognized sync protocols (spec C11). Identifiers are stable across
/// versions for wire-compatibility of parameter files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncProtocol {
    /// Base 3-round CPISync.
    CPISync,
    /// CPISync with the client's reply folded away (one-way).
    CPISyncOneLessRound,
    /// CPISync with the server's whole message sent up front.
    CPISyncHalfRound,
    /// CPISync that doubles `m_bar` from 1 on overflow.
    ProbCPISync,
    /// Recursive partition-tree CPISync.
    InteractiveCPISync,
    /// One-way variant: server resolves and sends, client never replies.
    OneWayCPISync,
    /// Exchange entire sets.
    FullSync,
    /// Base 3-round IBLTSync.
    IBLTSync,
    /// IBLTSync with no client reply.
    OneWayIBLTSync,
    /// Two-level IBLT container keyed by child-set hash.
    IBLTSetOfSets,
    /// Multiset-count IBLT variant.
    IBLTSyncMultiset,
    /// Cuckoo-filter exchange.
    CuckooSync,
}

impl SyncProtocol {
    /// Stable wire/display identifier (spec C11: "exact identifiers").
    pub fn name(&self) -> &'static str {
        match self {
            SyncProtocol::CPISync => "CPISync",
            SyncProtocol::CPISyncOneLessRound => "CPISync_OneLessRound",
            SyncProtocol::CPISyncHalfRound => "CPISync_HalfRound",
            SyncProtocol::ProbCPISync => "ProbCPISync",
            SyncProtocol::InteractiveCPISync => "InteractiveCPISync",
            SyncProtocol::OneWayCPISync => "OneWayCPISync",
            SyncProtocol::FullSync => "FullSync",
            SyncProtocol::IBLTSync => "IBLTSync",
            SyncProtocol::OneWayIBLTSync => "OneWayIBLTSync",
            SyncProtocol::IBLTSetOfSets => "IBLTSetOfSets",
            SyncProtocol::IBLTSyncMultiset => "IBLTSync_Multiset",
            SyncProtocol::CuckooSync => "CuckooSync",
        }
    }
}

fn kv_line(key: &str, value: impl std::fmt::Display) -> String {
    format!("{key}: {value}")
}

fn parse_kv_line<'a>(line: &'a str, expected_key: &str) -> Result<&'a str, SyncError> {
    let (key, value) = line
        .split_once(':')
        .ok_or_else(|| SyncError::ParameterParse(format!("malformed line (no ':'): {line}")))?;
    if key.trim() != expected_key {
        return Err(SyncError::ParameterParse(format!(
            "expected key '{expected_key}', got '{}' in line: {line}",
            key.trim()
        )));
    }
    Ok(value.trim())
}

fn parse_num<T: std::str::FromStr>(line: &str, expected_key: &str) -> Result<T, SyncError> {
    parse_kv_line(line, expected_key)?
        .parse()
        .map_err(|_| SyncError::ParameterParse(format!("bad numeric value on line: {line}")))
}

fn parse_bool(line: &str, expected_key: &str) -> Result<bool, SyncError> {
    match parse_kv_line(line, expected_key)? {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(SyncError::ParameterParse(format!("bad boolean '{other}' on line: {line}"))),
    }
}

/// Parameters for [`SyncProtocol::CPISync`] and its single-leaf relatives
/// (`ProbCPISync` shares this shape; its doubling behavior is runtime, not
/// a distinct field).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpiSyncParams {
    /// Declared upper bound on `|A△B|`.
    pub m_bar: u32,
    /// Element bit-width `b`.
    pub bits: u32,
    /// Error-probability exponent (probabilistic variants).
    pub epsilon: u32,
    /// Hash-space partition count for simple (non-tree) variants. Spec §9:
    /// distinct from `pFactor`, never aliased.
    pub partitions: u32,
    /// Whether elements are prehashed into the field before evaluation.
    pub hashes: bool,
    /// Extra sample points beyond `2*m_bar` (spec §4.7). Defaults to 0 and
    /// is always serialized (spec §9 open-question resolution).
    pub redundant: u32,
}

impl CpiSyncParams {
    /// Serialize in `BenchParams.cpp`'s exact field order: `m_bar, bits,
    /// epsilon, partitions, hashes`, plus the always-present `redundant`.
    pub fn serialize(&self) -> String {
        [
            kv_line("m_bar", self.m_bar),
            kv_line("bits", self.bits),
            kv_line("epsilon", self.epsilon),
            kv_line("partitions", self.partitions),
            kv_line("hashes", self.hashes),
            kv_line("redundant", self.redundant),
        ]
        .join("\n")
    }

    /// Parse the format [`Self::serialize`] produces.
    pub fn unserialize(text: &str) -> Result<Self, SyncError> {
        let mut lines = text.lines();
        let mut next = |key: &str| {
            lines
                .next()
                .ok_or_else(|| SyncError::ParameterParse(format!("missing key: {key}")))
        };
        Ok(Self {
            m_bar: parse_num(next("m_bar")?, "m_bar")?,
            bits: parse_num(next("bits")?, "bits")?,
            epsilon: parse_num(next("epsilon")?, "epsilon")?,
            partitions: parse_num(next("partitions")?, "partitions")?,
            hashes: parse_bool(next("hashes")?, "hashes")?,
            redundant: parse_num(next("redundant")?, "redundant")?,
        })
    }

    /// Apply to a builder under construction (spec §9: "the `Params`
    /// contract becomes a sum type with a single `apply(builder)`
    /// operation per variant").
    pub fn apply(&self, builder: Builder) -> Builder {
        builder
            .set_mbar(self.m_bar)
            .set_bits(self.bits)
            .set_err(self.epsilon)
            .set_num_partitions(self.partitions)
            .set_hashes(self.hashes)
    }
}

/// Parameters for [`SyncProtocol::InteractiveCPISync`] (the partition-tree
/// variant): identical shape to [`CpiSyncParams`] except `partitions` is
/// replaced by `pFactor`, the tree's branching factor (spec §9).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterCpiSyncParams {
    /// Per-node declared upper bound on `|A△B|` before subdividing.
    pub m_bar: u32,
    /// Element bit-width `b`.
    pub bits: u32,
    /// Error-probability exponent.
    pub epsilon: u32,
    /// Tree branching factor. Spec §9: distinct from `partitions`.
    pub p_factor: u32,
    /// Whether elements are prehashed before evaluation.
    pub hashes: bool,
    /// Extra sample points beyond `2*m_bar`.
    pub redundant: u32,
}

impl InterCpiSyncParams {
    /// Serialize in the same order as [`CpiSyncParams::serialize`] with
    /// `pFactor` in place of `partitions`.
    pub fn serialize(&self) -> String {
        [
            kv_line("m_bar", self.m_bar),
            kv_line("bits", self.bits),
            kv_line("epsilon", self.epsilon),
            kv_line("pFactor", self.p_factor),
            kv_line("hashes", self.hashes),
            kv_line("redundant", self.redundant),
        ]
        .join("\n")
    }

    /// Parse the format [`Self::serialize`] produces.
    pub fn unserialize(text: &str) -> Result<Self, SyncError> {
        let mut lines = text.lines();
        let mut next = |key: &str| {
            lines
                .next()
                .ok_or_else(|| SyncError::ParameterParse(format!("missing key: {key}")))
        };
        Ok(Self {
            m_bar: parse_num(next("m_bar")?, "m_bar")?,
            bits: parse_num(next("bits")?, "bits")?,
            epsilon: parse_num(next("epsilon")?, "epsilon")?,
            p_factor: parse_num(next("pFactor")?, "pFactor")?,
            hashes: parse_bool(next("hashes")?, "hashes")?,
            redundant: parse_num(next("redundant")?, "redundant")?,
        })
    }

    /// Apply to a builder under construction.
    pub fn apply(&self, builder: Builder) -> Builder {
        builder
            .set_mbar(self.m_bar)
            .set_bits(self.bits)
            .set_err(self.epsilon)
            .set_num_partitions(self.p_factor)
            .set_hashes(self.hashes)
    }
}

/// Parameters for the IBLT-based protocols (spec C9).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IbltParams {
    /// Expected `|A△B|`, sizes the table.
    pub expected: u32,
    /// Per-element byte width.
    pub elt_size: u32,
    /// `IBLTSetOfSets` only: max elements per inner (child) IBLT.
    pub num_elem_child: u32,
}

impl IbltParams {
    /// Serialize in `BenchParams.cpp`'s exact order: `expected, eltSize,
    /// numElemChild`.
    pub fn serialize(&self) -> String {
        [
            kv_line("expected", self.expected),
            kv_line("eltSize", self.elt_size),
            kv_line("numElemChild", self.num_elem_child),
        ]
        .join("\n")
    }

    /// Parse the format [`Self::serialize`] produces.
    pub fn unserialize(text: &str) -> Result<Self, SyncError> {
        let mut lines = text.lines();
        let mut next = |key: &str| {
            lines
                .next()
                .ok_or_else(|| SyncError::ParameterParse(format!("missing key: {key}")))
        };
        Ok(Self {
            expected: parse_num(next("expected")?, "expected")?,
            elt_size: parse_num(next("eltSize")?, "eltSize")?,
            num_elem_child: parse_num(next("numElemChild")?, "numElemChild")?,
        })
    }

    /// Apply to a builder under construction.
    pub fn apply(&self, builder: Builder) -> Builder {
        builder.set_exp_num_elems(self.expected).set_exp_num_elem_child(self.num_elem_child)
    }
}

/// Parameters for [`SyncProtocol::CuckooSync`] (spec C6).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CuckooParams {
    /// Fingerprint width in bits (`ℓ`).
    pub fngprt_size: u32,
    /// Slots per bucket (`b`).
    pub bucket_size: u32,
    /// Bucket count (`F`).
    pub filter_size: u32,
    /// Eviction-chain cap.
    pub max_kicks: u32,
}

impl CuckooParams {
    /// Serialize in `BenchParams.cpp`'s exact order: `fngprtSize,
    /// bucketSize, filterSize, maxKicks`.
    pub fn serialize(&self) -> String {
        [
            kv_line("fngprtSize", self.fngprt_size),
            kv_line("bucketSize", self.bucket_size),
            kv_line("filterSize", self.filter_size),
            kv_line("maxKicks", self.max_kicks),
        ]
        .join("\n")
    }

    /// Parse the format [`Self::serialize`] produces.
    pub fn unserialize(text: &str) -> Result<Self, SyncError> {
        let mut lines = text.lines();
        let mut next = |key: &str| {
            lines
                .next()
                .ok_or_else(|| SyncError::ParameterParse(format!("missing key: {key}")))
        };
        Ok(Self {
            fngprt_size: parse_num(next("fngprtSize")?, "fngprtSize")?,
            bucket_size: parse_num(next("bucketSize")?, "bucketSize")?,
            filter_size: parse_num(next("filterSize")?, "filterSize")?,
            max_kicks: parse_num(next("maxKicks")?, "maxKicks")?,
        })
    }

    /// Apply to a builder under construction.
    pub fn apply(&self, builder: Builder) -> Builder {
        builder
            .set_fngprt_size(self.fngprt_size)
            .set_bucket_size(self.bucket_size)
            .set_filter_size(self.filter_size)
            .set_max_kicks(self.max_kicks)
    }
}

/// `FullSync` takes no protocol-specific parameters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullSyncParams;

impl FullSyncParams {
    /// Always the empty string: `FullSync` has no tunable parameters.
    pub fn serialize(&self) -> String {
        String::new()
    }
    /// Always succeeds: there is nothing to parse.
    pub fn unserialize(_text: &str) -> Result<Self, SyncError> {
        Ok(Self)
    }
    /// No-op: nothing to configure beyond `setProtocol`.
    pub fn apply(&self, builder: Builder) -> Builder {
        builder
    }
}

/// The typed parameter payload for a chosen protocol (spec §9: "a sum type
/// with a single `apply(builder)` operation per variant").
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Params {
    /// See [`CpiSyncParams`].
    CpiSync(CpiSyncParams),
    /// See [`InterCpiSyncParams`].
    InterCpiSync(InterCpiSyncParams),
    /// See [`IbltParams`].
    Iblt(IbltParams),
    /// See [`CuckooParams`].
    Cuckoo(CuckooParams),
    /// See [`FullSyncParams`].
    FullSync(FullSyncParams),
}

impl Params {
    /// Dispatch to the contained variant's `serialize`.
    pub fn serialize(&self) -> String {
        match self {
            Params::CpiSync(p) => p.serialize(),
            Params::InterCpiSync(p) => p.serialize(),
            Params::Iblt(p) => p.serialize(),
            Params::Cuckoo(p) => p.serialize(),
            Params::FullSync(p) => p.serialize(),
        }
    }

    /// Dispatch to the contained variant's `apply`.
    pub fn apply(&self, builder: Builder) -> Builder {
        match self {
            Params::CpiSync(p) => p.apply(builder),
            Params::InterCpiSync(p) => p.apply(builder),
            Params::Iblt(p) => p.apply(builder),
            Params::Cuckoo(p) => p.apply(builder),
            Params::FullSync(p) => p.apply(builder),
        }
    }
}
