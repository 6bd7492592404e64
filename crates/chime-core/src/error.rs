//! Error taxonomy for stores and the claim engine.

use thiserror::Error;

use crate::domain::TickerStatus;

/// Failures surfaced by store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// At least one item in a guarded batch changed since it was read.
    /// The whole batch was discarded; nothing was written.
    #[error("version conflict: batch discarded, nothing written")]
    VersionConflict,

    #[error("work item not found: {0}")]
    NotFound(String),

    #[error("duplicate id on insert: {0}")]
    Duplicate(String),

    /// Backend unavailable or transient I/O failure.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A persisted record failed to decode.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Failures surfaced by the engine's operations.
///
/// A claim-path version conflict is not here: losing the race is a normal
/// outcome and comes back as an empty claimed set.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("batch size must be positive")]
    InvalidBatchSize,

    #[error("holder id must not be empty")]
    EmptyHolder,

    /// The operation's cancellation token fired before any write was
    /// submitted.
    #[error("operation cancelled")]
    Cancelled,

    /// A lifecycle write lost the version race: the lease was taken by
    /// another holder between read and save.
    #[error("lease lost for {item}")]
    LeaseLost { item: String },

    #[error("illegal status transition: {from} -> {to}")]
    IllegalTransition {
        from: TickerStatus,
        to: TickerStatus,
    },

    /// The caller is not the holder recorded on the item's lock.
    #[error("item {item} is not held by {holder}")]
    NotHolder { item: String, holder: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type StoreResult<T> = Result<T, StoreError>;
pub type EngineResult<T> = Result<T, EngineError>;
