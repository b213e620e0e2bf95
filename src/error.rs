use thiserror::Error;

use crate::core::types::{ExeKind, MemKind};

/// Crate-wide error type, split along the three failure families the engine
/// distinguishes: configuration errors (always fatal, never retried),
/// validation errors (fatal unless continue-on-error is set), and resource
/// errors from the allocation / peer-access layer (always fatal, since a
/// benchmark result is meaningless if placement did not succeed).
#[derive(Debug, Error)]
pub enum EngineError {
    // --- Configuration ---
    #[error("unable to parse {what} token '{token}'")]
    BadToken { what: &'static str, token: String },

    #[error("{device} index must be between 0 and {max} (got {got})")]
    IndexOutOfRange {
        device: &'static str,
        got: i64,
        max: i64,
    },

    #[error("{exe:?} executor cannot drive {src_count} source(s) / {dst_count} destination(s)")]
    UnsupportedShape {
        exe: ExeKind,
        src_count: usize,
        dst_count: usize,
    },

    #[error("transfer must have at least one source or destination")]
    EmptyTransfer,

    #[error("invalid configuration: {0}")]
    Config(String),

    // --- Validation ---
    #[error("validation mismatch: {0}")]
    Validation(String),

    // --- Resource ---
    #[error("unable to allocate {bytes} bytes of {kind:?} memory on device {index}")]
    AllocFailed {
        kind: MemKind,
        index: usize,
        bytes: usize,
    },

    #[error("refusing to allocate 0 bytes")]
    ZeroAllocation,

    #[error("{failed} of {total} pages not resident on device {index}")]
    PlacementMismatch {
        index: usize,
        failed: usize,
        total: usize,
    },

    #[error("unable to enable peer access from device {from} to device {to}")]
    PeerAccessUnsupported { from: usize, to: usize },

    #[error("unknown buffer {0}")]
    UnknownBuffer(u64),

    #[error("no {kind:?} agent registered for device {index}")]
    NoAgent { kind: ExeKind, index: usize },

    #[error("launch failed: {0}")]
    Launch(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Validation errors may be downgraded to warnings by the
    /// continue-on-error flag; everything else is fatal.
    pub fn is_validation(&self) -> bool {
        matches!(self, EngineError::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
