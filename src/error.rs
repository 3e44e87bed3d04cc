//! Error types for quiver.

use thiserror::Error;

/// Errors surfaced by indexing, ingestion, and search.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Search was issued before the index was trained.
    #[error("index is not trained")]
    NotTrained,

    /// Too few vectors were available at training time.
    #[error("insufficient training data: got {got} vectors, need {need}")]
    InsufficientTrainingData { got: usize, need: usize },

    /// An internal counter invariant was broken; the current tick is aborted.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A bucket of the realtime inverted index cannot accept more entries.
    #[error("bucket {list_no} capacity exhausted: {requested} entries over limit {limit}")]
    CapacityExhausted {
        list_no: usize,
        requested: usize,
        limit: usize,
    },

    /// Residual computation or code encoding failed.
    #[error("codec failure: {0}")]
    CodecFailure(String),

    /// Reassignment or re-encoding failed while draining updated vectors.
    #[error("update failure: {0}")]
    UpdateFailure(String),

    /// Dimension mismatch between an input vector and the index.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Invalid parameter value.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Result type alias for quiver operations.
pub type Result<T> = std::result::Result<T, EngineError>;
