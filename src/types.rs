//! Shared error taxonomy for the lexsync pipeline.
//!
//! Each subsystem owns a narrow error enum; [`PipelineError`] is the
//! umbrella type returned by the high-level pipeline and orchestrator
//! entry points.

use thiserror::Error;

/// Errors raised while splitting source text into chunks.
#[derive(Debug, Error)]
pub enum SegmentationError {
    /// The input text was empty or contained no sentence material.
    #[error("input text is empty after normalization")]
    EmptyInput,

    /// Configured chunk size cannot accommodate any sentence.
    #[error("invalid chunking config: chunk_size_tokens must be > 0 (got {0})")]
    InvalidChunkSize(usize),

    /// Overlap must leave room for forward progress.
    #[error(
        "invalid chunking config: overlap_tokens ({overlap}) must be < chunk_size_tokens ({chunk_size})"
    )]
    OverlapTooLarge { overlap: usize, chunk_size: usize },
}

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// The named model could not be loaded or reached.
    #[error("embedding model '{model_id}' unavailable: {reason}")]
    ModelUnavailable { model_id: String, reason: String },

    /// The backend returned a different number of vectors than inputs.
    ///
    /// A batch failure must never silently shorten the output sequence;
    /// this surfaces the mismatch so the whole batch can be retried.
    #[error("embedding batch mismatch: {expected} inputs, {got} vectors")]
    BatchMismatch { expected: usize, got: usize },

    /// The backend returned a vector of the wrong dimension.
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Errors raised when delivering payloads to Core.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network failure, timeout, or 5xx response. Retryable, bounded by
    /// the configured max retry count.
    #[error("core transport error: {0}")]
    Transport(String),

    /// 4xx response. A payload defect that retries cannot fix; the
    /// affected embedding transitions to `Failed` immediately.
    #[error("core rejected payload (HTTP {status}): {body}")]
    Validation { status: u16, body: String },
}

impl SyncError {
    /// Whether this failure is eligible for automatic retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Transport(_))
    }
}

/// Errors raised by the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("JSON serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("missing persisted field: {0}")]
    Missing(&'static str),
}

/// Errors raised while assembling a sync payload.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// The embedding references a chunk or source that no longer exists.
    /// Callers treat this as a cleanup signal, not a fault.
    #[error("orphaned reference: {0}")]
    OrphanedReference(String),

    #[error("payload serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Umbrella error for pipeline and orchestrator entry points.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Segmentation(#[from] SegmentationError),

    #[error(transparent)]
    Embed(#[from] EmbedError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error("configuration error: {0}")]
    Config(String),
}
