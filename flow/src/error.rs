//! The error taxonomy (§7).

use flow_actors::DomainError;
use flow_buffers::SharedBufferError;
use flow_slabs::{BufferConvertError, UnknownType};

/// A block uid, used to key per-block errors in aggregate failures.
pub type BlockUid = u64;

/// The unified error type surfaced by the public API.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// A `DType` could not be constructed from an alias or markup string.
    #[error(transparent)]
    UnknownType(#[from] UnknownType),

    /// A block setter rejected an argument; state is left unchanged.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `BufferChunk::convert`/`convert_complex` hit an unsupported pair or
    /// an undersized destination.
    #[error(transparent)]
    BufferConvert(#[from] BufferConvertError),

    /// A sub-range `SharedBuffer` was requested out of bounds, or a circular
    /// allocation exhausted its retries.
    #[error(transparent)]
    SharedBuffer(#[from] SharedBufferError),

    /// Topology JSON was malformed; carries the JSON path to the offending field.
    #[error("malformed topology JSON at {path}: {reason}")]
    DataFormat {
        /// JSON pointer-style path to the offending field.
        path: String,
        /// Human-readable description of what was wrong.
        reason: String,
    },

    /// Multiple CUSTOM destinations were declared on one source output.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// A test harness assertion did not hold.
    #[error("assertion violation: {0}")]
    AssertionViolation(String),

    /// A block's `work()` raised; the owning actor is quarantined (Faulted).
    #[error("block {uid} faulted in work(): {reason}")]
    Fatal {
        /// Uid of the faulted block.
        uid: BlockUid,
        /// Description of the failure.
        reason: String,
    },

    /// `commit()` failed to subscribe or activate one or more actors; every
    /// failure observed across the parallel subcommits is collected here.
    #[error("{} actor(s) failed during commit", .failures.len())]
    TopologyConnect {
        /// `(block, action, error)` for every failure observed.
        failures: Vec<(BlockUid, String, String)>,
    },
}

impl FlowError {
    /// Builds a [`FlowError::TopologyConnect`] from per-action failures,
    /// formatting each nested error with `Display`.
    pub fn topology_connect(failures: Vec<(BlockUid, String, FlowError)>) -> Self {
        FlowError::TopologyConnect {
            failures: failures.into_iter().map(|(uid, action, err)| (uid, action, err.to_string())).collect(),
        }
    }

    /// Builds a [`FlowError::DataFormat`] at `path`.
    pub fn data_format(path: impl Into<String>, reason: impl Into<String>) -> Self {
        FlowError::DataFormat { path: path.into(), reason: reason.into() }
    }
}
