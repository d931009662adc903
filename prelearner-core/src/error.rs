//! Error types for the offline preparation pipeline
//!
//! Taxonomy covering dataset access, batch contract violations, learner
//! binding and the remote snapshot fetch.

use std::time::Duration;
use thiserror::Error;

/// Primary error type for all prelearner operations
#[derive(Debug, Error)]
pub enum PrelearnerError {
    // ========== Dataset Errors ==========

    /// The dataset failed to load at construction; sampling is impossible
    #[error("No dataset available: {reason}")]
    DatasetUnavailable { reason: String },

    /// No reader registered under the configured read method
    #[error("Unknown read method: {method}")]
    UnknownReadMethod { method: String },

    /// The reader could not read one of the input paths
    #[error("Failed to read {path}: {reason}")]
    ReadFailed { path: String, reason: String },

    /// Data exhausted (stream finished)
    #[error("Data exhausted for current iterator")]
    DataExhausted,

    // ========== Batch Contract Errors ==========

    /// Batch shape is inconsistent (ragged columns, bad cell types)
    #[error("Malformed batch: {reason}")]
    MalformedBatch { reason: String },

    /// A required column is missing from a raw batch
    #[error("Malformed batch: missing required column '{column}'")]
    MissingColumn { column: String },

    /// Multi-agent rows cannot be turned into episodes yet
    #[error("Multi-agent episode construction is not supported")]
    UnsupportedMultiAgent,

    /// Compressed payload could not be unpacked
    #[error("Compression error: {reason}")]
    Compression { reason: String },

    // ========== Learner Errors ==========

    /// Affinity selection was handed an empty learner list
    #[error("No learners available for binding")]
    NoLearners,

    /// Learner handles and locality hints are not parallel sequences
    #[error("Locality hints mismatch: {handles} learner handles, {hints} hints")]
    LocalityHintMismatch { handles: usize, hints: usize },

    /// Fetching the module state from a remote learner failed
    #[error("Snapshot fetch from learner {learner} failed: {reason}")]
    SnapshotFetchFailed { learner: String, reason: String },

    /// The connector pipeline failed on a batch of episodes
    #[error("Connector pipeline failed: {reason}")]
    Pipeline { reason: String },

    // ========== Runtime Errors ==========

    /// A bounded operation did not finish in time
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// The iterator was cancelled through a shutdown signal
    #[error("Iterator cancelled")]
    Cancelled,

    /// Configuration rejected by validation
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl PrelearnerError {
    /// Returns true if an outer layer may sensibly retry the operation.
    /// Nothing inside this crate retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PrelearnerError::Timeout { .. } | PrelearnerError::SnapshotFetchFailed { .. }
        )
    }

    /// Returns true if this error was caused by the content of the data
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            PrelearnerError::MalformedBatch { .. }
                | PrelearnerError::MissingColumn { .. }
                | PrelearnerError::Compression { .. }
        )
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        PrelearnerError::MalformedBatch { reason: reason.into() }
    }

    pub(crate) fn pipeline(reason: impl std::fmt::Display) -> Self {
        PrelearnerError::Pipeline { reason: reason.to_string() }
    }
}

/// Result type alias for prelearner operations
pub type Result<T> = std::result::Result<T, PrelearnerError>;
