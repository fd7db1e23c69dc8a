//! Error types for the history engine

use thiserror::Error;

/// Why a recoverable request was turned away.
///
/// Callers are expected to retry later (or give up); nothing was applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("a complex operation is already in flight")]
    Busy,

    #[error("no matching undo entry")]
    NothingToUndo,

    #[error("transaction {0} was already filed")]
    DuplicateTransaction(u64),

    #[error("actor handle is stale or unknown")]
    UnknownActor,

    #[error("environment handle is stale or unknown")]
    UnknownEnvironment,
}

/// Main error type for the engine
#[derive(Debug, Error)]
pub enum Error {
    #[error("dimension {size} on axis {axis} exceeds maximum {max}")]
    DimensionTooLarge { axis: char, size: u32, max: u32 },

    #[error("mask size mismatch: {left:?} vs {right:?}")]
    MaskSizeMismatch { left: [u32; 3], right: [u32; 3] },

    #[error("write mask selects voxels the snapshot holds no data for")]
    MaskNotSubset,

    #[error("edit contains no voxels")]
    EmptyEdit,

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("rejected: {0}")]
    Rejected(#[from] Rejection),
}

impl Error {
    /// The rejection reason, if this is a recoverable capacity rejection.
    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            Error::Rejected(r) => Some(*r),
            _ => None,
        }
    }
}
