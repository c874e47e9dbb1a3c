//! Shared error taxonomy (spec §7).
//!
//! Every fallible subsystem gets its own `thiserror` enum; this module
//! composes them into the single [`SyncError`] that crosses engine/session
//! boundaries. `stats-reentry` is deliberately **not** a variant here: spec §7
//! marks it a programming bug, so [`crate::sync_method::SyncStats`] panics on
//! it directly instead of returning a `Result`.

use crate::cuckoo::CuckooError;
use crate::field::FieldError;
use crate::iblt::IbltError;

/// Top-level error returned by session-driving entry points
/// (`clientSyncBegin`/`serverSyncBegin` and friends).
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The modulus handshake (or any other parameter handshake) disagreed.
    #[error("sync parameters do not match between communicants: {0}")]
    ParameterMismatch(String),

    /// Connection/session setup failed before any element exchange happened.
    #[error("sync setup failed: {0}")]
    SyncSetupFailure(String),

    /// A CPISync/InterCPISync engine could not bound the difference even
    /// after escalating as far as its policy allows.
    #[error("declared difference bound exceeded and could not be escalated further")]
    InsufficientBound,

    /// An IBLT (or IBLT-based) engine could not fully peel its cells.
    #[error(
        "IBLT decode incomplete: recovered {recovered_positive} positive / \
         {recovered_negative} negative entries, {unpeeled_cells} cell(s) unpeeled"
    )]
    PartialDecode {
        /// Entries recovered from `+1` pure cells before peeling stalled.
        recovered_positive: usize,
        /// Entries recovered from `-1` pure cells before peeling stalled.
        recovered_negative: usize,
        /// Cells that were neither empty nor pure when peeling stalled.
        unpeeled_cells: usize,
    },

    /// The InterCPISync partition tree exceeded its configured depth cap.
    #[error("partition tree exceeded maximum depth ({max_depth})")]
    TreeTooDeep {
        /// The configured cap that was exceeded.
        max_depth: usize,
    },

    /// `delElem` (or another optional operation) is not implemented by this
    /// `SyncMethod`.
    #[error("operation not supported by this sync method: {0}")]
    UnsupportedOp(&'static str),

    /// The channel was closed while a session was in flight.
    #[error("channel closed mid-sync")]
    ChannelClosed,

    /// A `Communicant` recv deadline elapsed.
    #[error("recv deadline expired")]
    Timeout,

    /// A sketch update failed; this does not abort the sync (spec §7).
    #[error("sketch update failed: {0}")]
    Sketches(String),

    /// The typed `Params` payload could not be parsed from a stream.
    #[error("parameter parse error: {0}")]
    ParameterParse(String),

    /// Field arithmetic failure (singular interpolation system, failed
    /// inversion, root-finding exhaustion, ...).
    #[error(transparent)]
    Field(#[from] FieldError),

    /// IBLT-internal failure that is not itself a partial decode (insertion
    /// failure after exhausting the re-hash budget, mismatched shape on
    /// `subtract`, ...).
    #[error(transparent)]
    Iblt(#[from] IbltError),

    /// Cuckoo filter insertion exhausted its eviction budget.
    #[error(transparent)]
    Cuckoo(#[from] CuckooError),

    /// Underlying transport I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// True for the error kinds spec §7 marks fatal for the whole session
    /// (as opposed to ones a caller may retry or escalate past).
    pub fn is_fatal_for_session(&self) -> bool {
        matches!(
            self,
            SyncError::ParameterMismatch(_)
                | SyncError::SyncSetupFailure(_)
                | SyncError::ChannelClosed
                | SyncError::Timeout
        )
    }
}
