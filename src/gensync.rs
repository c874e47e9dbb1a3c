//! `GenSync` façade and builder (spec C11).
//!
//! `Engine` is a closed, tagged enum over the concrete per-protocol
//! engines rather than a trait object, per `SPEC_FULL.md`'s redesign note
//! against vtable/RTTI-style dispatch — dispatch is a plain `match` in
//! each of this type's inherent methods, the same "one concrete struct
//! per case, matched by hand" shape the reference crate uses for its
//! `air`/`domain` constraint kinds. None of the concrete engines store
//! the channel type, so `Engine` itself stays non-generic; only
//! [`GenSync`] is generic over the channel, and only at the point a
//! session actually runs.

use std::io::{Read, Write};

use num_bigint::BigUint;

use crate::communicant::Communicant;
use crate::cpisync::{CpiSyncConfig, CpiSyncEngine, CpiSyncVariant};
use crate::cuckoo_sync::{CuckooSyncConfig, CuckooSyncEngine};
use crate::element::Element;
use crate::error::SyncError;
use crate::field::Field;
use crate::fullsync::FullSyncEngine;
use crate::iblt_sync::{
    IbltMultisetSyncEngine, IbltSetOfSetsEngine, IbltSyncConfig, IbltSyncEngine,
};
use crate::intercpisync::{InterCpiSyncConfig, InterCpiSyncEngine};
use crate::params::SyncProtocol;
use crate::sync_method::{SyncMethod, SyncResult, SyncStats};

use rand::rngs::StdRng;
use rand::SeedableRng;

/// Per-element byte width for IBLT engines built through [`Builder`].
/// `Builder` has no `set_elt_size` (spec §4.11 names no such setter;
/// `IbltParams::elt_size` documents the on-wire width but its `apply`
/// never threads it through), so every IBLT-family engine built here
/// uses this fixed width, wide enough for any hashed element fingerprint.
const DEFAULT_ELT_SIZE: usize = 8;

/// A validated, session-ready engine for exactly one [`SyncProtocol`]
/// (spec C11: `.build()` "returns a ready session").
pub enum Engine {
    /// See [`CpiSyncEngine`].
    CpiSync(CpiSyncEngine),
    /// See [`InterCpiSyncEngine`].
    InterCpiSync(InterCpiSyncEngine),
    /// See [`IbltSyncEngine`].
    IbltSync(IbltSyncEngine),
    /// See [`IbltMultisetSyncEngine`].
    IbltMultiset(IbltMultisetSyncEngine),
    /// See [`IbltSetOfSetsEngine`].
    IbltSetOfSets(IbltSetOfSetsEngine),
    /// See [`CuckooSyncEngine`].
    Cuckoo(CuckooSyncEngine),
    /// See [`FullSyncEngine`].
    FullSync(FullSyncEngine),
}

impl Engine {
    /// The field modulus that must be handshaken before this engine's
    /// first protocol exchange, for engines built over a field (spec §5:
    /// "the first message after connect MUST be the modulus handshake").
    /// `None` for engines with no field (IBLT, Cuckoo, FullSync).
    pub fn modulus(&self) -> Option<&BigUint> {
        match self {
            Engine::CpiSync(e) => Some(e.field().modulus()),
            Engine::InterCpiSync(e) => Some(e.field().modulus()),
            _ => None,
        }
    }

    /// Run the client role to completion.
    pub fn sync_client<S: Read + Write>(&mut self, comm: &mut Communicant<S>) -> Result<SyncResult, SyncError> {
        match self {
            Engine::CpiSync(e) => e.sync_client(comm),
            Engine::InterCpiSync(e) => e.sync_client(comm),
            Engine::IbltSync(e) => e.sync_client(comm),
            Engine::IbltMultiset(e) => e.sync_client(comm),
            Engine::IbltSetOfSets(e) => e.sync_client(comm),
            Engine::Cuckoo(e) => e.sync_client(comm),
            Engine::FullSync(e) => e.sync_client(comm),
        }
    }

    /// Run the server role to completion.
    pub fn sync_server<S: Read + Write>(&mut self, comm: &mut Communicant<S>) -> Result<SyncResult, SyncError> {
        match self {
            Engine::CpiSync(e) => e.sync_server(comm),
            Engine::InterCpiSync(e) => e.sync_server(comm),
            Engine::IbltSync(e) => e.sync_server(comm),
            Engine::IbltMultiset(e) => e.sync_server(comm),
            Engine::IbltSetOfSets(e) => e.sync_server(comm),
            Engine::Cuckoo(e) => e.sync_server(comm),
            Engine::FullSync(e) => e.sync_server(comm),
        }
    }

    /// Feed one element into the underlying engine (spec C10: `addElem`).
    pub fn add_elem(&mut self, elem: Element) -> Result<bool, SyncError> {
        match self {
            Engine::CpiSync(e) => e.add_elem(elem),
            Engine::InterCpiSync(e) => e.add_elem(elem),
            Engine::IbltSync(e) => e.add_elem(elem),
            Engine::IbltMultiset(e) => e.add_elem(elem),
            Engine::IbltSetOfSets(e) => e.add_elem(elem),
            Engine::Cuckoo(e) => e.add_elem(elem),
            Engine::FullSync(e) => e.add_elem(elem),
        }
    }

    /// Remove one element, if the underlying engine supports it.
    pub fn del_elem(&mut self, elem: &Element) -> Result<bool, SyncError> {
        match self {
            Engine::CpiSync(e) => e.del_elem(elem),
            Engine::InterCpiSync(e) => e.del_elem(elem),
            Engine::IbltSync(e) => e.del_elem(elem),
            Engine::IbltMultiset(e) => e.del_elem(elem),
            Engine::IbltSetOfSets(e) => e.del_elem(elem),
            Engine::Cuckoo(e) => e.del_elem(elem),
            Engine::FullSync(e) => e.del_elem(elem),
        }
    }

    /// This engine's protocol identifier, matching [`SyncProtocol::name`].
    pub fn get_name(&self) -> &'static str {
        match self {
            Engine::CpiSync(e) => e.get_name(),
            Engine::InterCpiSync(e) => e.get_name(),
            Engine::IbltSync(e) => e.get_name(),
            Engine::IbltMultiset(e) => e.get_name(),
            Engine::IbltSetOfSets(e) => e.get_name(),
            Engine::Cuckoo(e) => e.get_name(),
            Engine::FullSync(e) => e.get_name(),
        }
    }

    /// This engine's statistics block (spec C11: `printStats`).
    pub fn stats(&self) -> &SyncStats {
        match self {
            Engine::CpiSync(e) => e.stats(),
            Engine::InterCpiSync(e) => e.stats(),
            Engine::IbltSync(e) => e.stats(),
            Engine::IbltMultiset(e) => e.stats(),
            Engine::IbltSetOfSets(e) => e.stats(),
            Engine::Cuckoo(e) => e.stats(),
            Engine::FullSync(e) => e.stats(),
        }
    }
}

/// Pure configuration object with typed setters (spec C11). Validated by
/// [`Builder::build`], which is the only place protocol-specific
/// requirements are checked.
#[derive(Clone, Debug, Default)]
pub struct Builder {
    protocol: Option<SyncProtocol>,
    m_bar: Option<u32>,
    bits: Option<u32>,
    err: Option<u32>,
    num_partitions: Option<u32>,
    hashes: Option<bool>,
    redundant: u32,
    exp_num_elems: Option<u32>,
    exp_num_elem_child: Option<u32>,
    fngprt_size: Option<u32>,
    bucket_size: Option<u32>,
    filter_size: Option<u32>,
    max_kicks: Option<u32>,
    host: Option<String>,
    port: Option<u16>,
}

impl Builder {
    /// A blank builder with no fields set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the protocol to build (spec C11: `setProtocol`).
    pub fn set_protocol(mut self, protocol: SyncProtocol) -> Self {
        self.protocol = Some(protocol);
        self
    }
    /// `setMbar`.
    pub fn set_mbar(mut self, m_bar: u32) -> Self {
        self.m_bar = Some(m_bar);
        self
    }
    /// `setBits`.
    pub fn set_bits(mut self, bits: u32) -> Self {
        self.bits = Some(bits);
        self
    }
    /// `setErr`.
    pub fn set_err(mut self, err: u32) -> Self {
        self.err = Some(err);
        self
    }
    /// `setNumPartitions` (spec §9: serves both the simple-variant
    /// `partitions` field and InterCPISync's `pFactor` — they are distinct
    /// concepts at the `Params` layer but share this one builder slot,
    /// since a builder only ever configures a single protocol at a time).
    pub fn set_num_partitions(mut self, num_partitions: u32) -> Self {
        self.num_partitions = Some(num_partitions);
        self
    }
    /// `setHashes`.
    pub fn set_hashes(mut self, hashes: bool) -> Self {
        self.hashes = Some(hashes);
        self
    }
    /// Extra sample points beyond `2*m_bar` (not in spec §4.11's named
    /// setter list; defaults to 0 if never called).
    pub fn set_redundant(mut self, redundant: u32) -> Self {
        self.redundant = redundant;
        self
    }
    /// `setExpNumElems`.
    pub fn set_exp_num_elems(mut self, n: u32) -> Self {
        self.exp_num_elems = Some(n);
        self
    }
    /// `setExpNumElemChild`.
    pub fn set_exp_num_elem_child(mut self, n: u32) -> Self {
        self.exp_num_elem_child = Some(n);
        self
    }
    /// `setFngprtSize`.
    pub fn set_fngprt_size(mut self, n: u32) -> Self {
        self.fngprt_size = Some(n);
        self
    }
    /// `setBucketSize`.
    pub fn set_bucket_size(mut self, n: u32) -> Self {
        self.bucket_size = Some(n);
        self
    }
    /// `setFilterSize`.
    pub fn set_filter_size(mut self, n: u32) -> Self {
        self.filter_size = Some(n);
        self
    }
    /// `setMaxKicks`.
    pub fn set_max_kicks(mut self, n: u32) -> Self {
        self.max_kicks = Some(n);
        self
    }
    /// `setHost`.
    pub fn set_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }
    /// `setPort`.
    pub fn set_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// The configured peer address, if both `setHost`/`setPort` were
    /// called (dialing the socket itself is the caller's responsibility;
    /// this crate's protocol layer is transport-agnostic per spec §1).
    pub fn peer_addr(&self) -> Option<(String, u16)> {
        Some((self.host.clone()?, self.port?))
    }

    fn require<T>(field: Option<T>, name: &'static str) -> Result<T, SyncError> {
        field.ok_or_else(|| SyncError::SyncSetupFailure(format!("missing required builder field: {name}")))
    }

    fn cpisync_field(&self) -> Result<Field, SyncError> {
        let bits = Self::require(self.bits, "bits")?;
        let mut rng = StdRng::from_entropy();
        let p = crate::bigint::prime_at_least_bits(bits, &mut rng);
        Ok(Field::new(p)?)
    }

    /// Validate all fields required by the chosen protocol and construct
    /// the corresponding [`Engine`] (spec C11: "returns a ready session").
    pub fn build(self) -> Result<Engine, SyncError> {
        let protocol = Self::require(self.protocol, "protocol")?;
        match protocol {
            SyncProtocol::CPISync
            | SyncProtocol::CPISyncOneLessRound
            | SyncProtocol::CPISyncHalfRound
            | SyncProtocol::ProbCPISync
            | SyncProtocol::OneWayCPISync => {
                let variant = match protocol {
                    SyncProtocol::CPISync => CpiSyncVariant::Base,
                    SyncProtocol::ProbCPISync => CpiSyncVariant::Probabilistic,
                    SyncProtocol::CPISyncHalfRound => CpiSyncVariant::HalfRound,
                    // `OneWayCPISync` is a legacy alias for `CPISync_OneLessRound`
                    // (spec §9 open-question resolution, see DESIGN.md): both
                    // name an identical wire protocol, kept as distinct
                    // `SyncProtocol` identifiers only for file compatibility.
                    SyncProtocol::CPISyncOneLessRound | SyncProtocol::OneWayCPISync => CpiSyncVariant::OneLessRound,
                    _ => unreachable!(),
                };
                let field = self.cpisync_field()?;
                let config = CpiSyncConfig {
                    m_bar: Self::require(self.m_bar, "m_bar")?,
                    bits: Self::require(self.bits, "bits")?,
                    epsilon: Self::require(self.err, "err")?,
                    hashes: Self::require(self.hashes, "hashes")?,
                    redundant: self.redundant,
                    variant,
                };
                Ok(Engine::CpiSync(CpiSyncEngine::new(config, field)))
            }
            SyncProtocol::InteractiveCPISync => {
                let field = self.cpisync_field()?;
                let config = InterCpiSyncConfig {
                    m_bar: Self::require(self.m_bar, "m_bar")?,
                    bits: Self::require(self.bits, "bits")?,
                    hashes: Self::require(self.hashes, "hashes")?,
                    p_factor: Self::require(self.num_partitions, "num_partitions (pFactor)")?,
                    redundant: self.redundant,
                    max_depth: 32,
                };
                Ok(Engine::InterCpiSync(InterCpiSyncEngine::new(config, field)))
            }
            SyncProtocol::FullSync => Ok(Engine::FullSync(FullSyncEngine::new())),
            SyncProtocol::IBLTSync | SyncProtocol::OneWayIBLTSync => {
                let config = IbltSyncConfig {
                    expected: Self::require(self.exp_num_elems, "exp_num_elems")?,
                    elt_size: DEFAULT_ELT_SIZE,
                    hashes: 4,
                };
                let engine = if matches!(protocol, SyncProtocol::OneWayIBLTSync) {
                    IbltSyncEngine::new_half_round(config)
                } else {
                    IbltSyncEngine::new(config)
                };
                Ok(Engine::IbltSync(engine))
            }
            SyncProtocol::IBLTSyncMultiset => {
                let config = IbltSyncConfig {
                    expected: Self::require(self.exp_num_elems, "exp_num_elems")?,
                    elt_size: DEFAULT_ELT_SIZE,
                    hashes: 4,
                };
                Ok(Engine::IbltMultiset(IbltMultisetSyncEngine::new(config)))
            }
            SyncProtocol::IBLTSetOfSets => {
                let parent_config = IbltSyncConfig {
                    expected: Self::require(self.exp_num_elems, "exp_num_elems")?,
                    elt_size: DEFAULT_ELT_SIZE,
                    hashes: 4,
                };
                let child_config = IbltSyncConfig {
                    expected: Self::require(self.exp_num_elem_child, "exp_num_elem_child")?,
                    elt_size: DEFAULT_ELT_SIZE,
                    hashes: 4,
                };
                Ok(Engine::IbltSetOfSets(IbltSetOfSetsEngine::new(parent_config, child_config)))
            }
            SyncProtocol::CuckooSync => {
                let config = CuckooSyncConfig {
                    fingerprint_bits: Self::require(self.fngprt_size, "fngprt_size")?,
                    bucket_size: Self::require(self.bucket_size, "bucket_size")? as usize,
                    num_buckets: Self::require(self.filter_size, "filter_size")?,
                    max_kicks: Self::require(self.max_kicks, "max_kicks")?,
                };
                Ok(Engine::Cuckoo(CuckooSyncEngine::new(config)))
            }
        }
    }
}

/// The façade aggregating one or more agents, each paired with its own
/// channel (spec C11: "aggregates one or more SyncMethod agents ... and
/// one or more Communicant channels").
pub struct GenSync<S> {
    agents: Vec<Engine>,
    comms: Vec<Communicant<S>>,
}

impl<S> GenSync<S> {
    /// An empty façade; agents are registered with [`Self::add_agent`].
    pub fn new() -> Self {
        Self { agents: Vec::new(), comms: Vec::new() }
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether any agents are registered.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl<S> Default for GenSync<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Read + Write> GenSync<S> {
    /// Register a built engine with the channel it will run over,
    /// returning its `agentIdx`.
    pub fn add_agent(&mut self, engine: Engine, comm: Communicant<S>) -> usize {
        self.agents.push(engine);
        self.comms.push(comm);
        self.agents.len() - 1
    }

    /// Feed one element into every registered agent (spec §2's data flow:
    /// "elements enter via GenSync.addElem -> routed to each configured
    /// SyncMethod").
    pub fn add_elem(&mut self, elem: Element) -> Result<(), SyncError> {
        for agent in &mut self.agents {
            agent.add_elem(elem.clone())?;
        }
        Ok(())
    }

    /// Remove one element from every registered agent that supports it,
    /// ignoring `unsupported-op` from agents that don't (spec C10: delete
    /// is optional per engine).
    pub fn del_elem(&mut self, elem: &Element) -> Result<(), SyncError> {
        for agent in &mut self.agents {
            match agent.del_elem(elem) {
                Ok(_) | Err(SyncError::UnsupportedOp(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn handshake(engine: &Engine, comm: &mut Communicant<S>) -> Result<(), SyncError> {
        if let Some(modulus) = engine.modulus() {
            comm.establish_modulus(modulus)?;
        }
        Ok(())
    }

    /// Run the client role for agent `agent_idx` to completion (spec C11:
    /// `clientSyncBegin`).
    pub fn client_sync_begin(&mut self, agent_idx: usize) -> Result<SyncResult, SyncError> {
        let comm = &mut self.comms[agent_idx];
        comm.comm_connect();
        comm.mark_connected();
        Self::handshake(&self.agents[agent_idx], comm)?;
        self.agents[agent_idx].sync_client(comm)
    }

    /// Run the server role for agent `agent_idx` to completion (spec C11:
    /// `serverSyncBegin`).
    pub fn server_sync_begin(&mut self, agent_idx: usize) -> Result<SyncResult, SyncError> {
        let comm = &mut self.comms[agent_idx];
        comm.comm_listen();
        comm.mark_connected();
        Self::handshake(&self.agents[agent_idx], comm)?;
        self.agents[agent_idx].sync_server(comm)
    }

    /// A human-readable statistics block for agent `agent_idx` (spec C11:
    /// `printStats`).
    pub fn print_stats(&self, agent_idx: usize) -> String {
        let engine = &self.agents[agent_idx];
        engine.stats().render(engine.get_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communicant::test_channel::duplex_pair;

    #[test]
    fn builder_rejects_missing_required_field() {
        let err = Builder::new().set_protocol(SyncProtocol::CPISync).build().unwrap_err();
        assert!(matches!(err, SyncError::SyncSetupFailure(_)));
    }

    #[test]
    fn full_sync_needs_no_protocol_specific_fields() {
        let engine = Builder::new().set_protocol(SyncProtocol::FullSync).build().unwrap();
        assert_eq!(engine.get_name(), "FullSync");
    }

    #[test]
    fn cuckoo_builder_round_trip_through_gensync() {
        let (pa, pb) = duplex_pair();
        let client_engine = Builder::new()
            .set_protocol(SyncProtocol::CuckooSync)
            .set_fngprt_size(12)
            .set_bucket_size(4)
            .set_filter_size(1024)
            .set_max_kicks(500)
            .build()
            .unwrap();
        let server_engine = Builder::new()
            .set_protocol(SyncProtocol::CuckooSync)
            .set_fngprt_size(12)
            .set_bucket_size(4)
            .set_filter_size(1024)
            .set_max_kicks(500)
            .build()
            .unwrap();

        let mut client = GenSync::new();
        let mut server = GenSync::new();
        let ci = client.add_agent(client_engine, Communicant::new(pa, false));
        let si = server.add_agent(server_engine, Communicant::new(pb, true));

        client.add_elem(Element::new(1u64.to_be_bytes().to_vec())).unwrap();
        client.add_elem(Element::new(2u64.to_be_bytes().to_vec())).unwrap();
        server.add_elem(Element::new(2u64.to_be_bytes().to_vec())).unwrap();
        server.add_elem(Element::new(3u64.to_be_bytes().to_vec())).unwrap();

        let handle = std::thread::spawn(move || client.client_sync_begin(ci));
        let server_res = server.server_sync_begin(si).unwrap();
        let client_res = handle.join().unwrap().unwrap();

        assert_eq!(client_res.self_minus_other.len(), 1);
        assert_eq!(client_res.other_minus_self.len(), 1);
        assert!(server_res.success);
    }

    #[test]
    fn modulus_mismatch_surfaces_as_sync_setup_failure() {
        let (pa, pb) = duplex_pair();
        let client_engine = Builder::new()
            .set_protocol(SyncProtocol::CPISync)
            .set_mbar(4)
            .set_bits(32)
            .set_err(1)
            .set_hashes(false)
            .build()
            .unwrap();
        // A different bit-width yields a different prime with overwhelming
        // probability, so the handshake disagrees.
        let server_engine = Builder::new()
            .set_protocol(SyncProtocol::CPISync)
            .set_mbar(4)
            .set_bits(16)
            .set_err(1)
            .set_hashes(false)
            .build()
            .unwrap();

        let mut client = GenSync::new();
        let mut server = GenSync::new();
        let ci = client.add_agent(client_engine, Communicant::new(pa, false));
        let si = server.add_agent(server_engine, Communicant::new(pb, true));

        let handle = std::thread::spawn(move || client.client_sync_begin(ci));
        let server_res = server.server_sync_begin(si);
        let client_res = handle.join().unwrap();

        assert!(matches!(client_res, Err(SyncError::SyncSetupFailure(_))));
        assert!(matches!(server_res, Err(SyncError::SyncSetupFailure(_))));
    }
}
