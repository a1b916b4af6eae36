//! Error types for memovault operations

use std::path::PathBuf;
use thiserror::Error;

/// Lock protocol errors.
///
/// Contention is not an error; waiting is normal operation for the FIFO
/// mutex. Only I/O failures of the protocol itself are reported here.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Failed to cast lock file {path}: {source}")]
    Cast {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to list lock namespace in {dir}: {source}")]
    Namespace {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read creation time of lock file {path}: {source}")]
    Timestamp {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Storage backend errors.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Key not found: {key}")]
    NotFound { key: String },

    #[error("Key already exists: {key}")]
    Duplicate { key: String },

    #[error("I/O error for key {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization failed for key {key}: {reason}")]
    Serialization { key: String, reason: String },
}

/// Key derivation errors.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Argument set is not serializable: {reason}")]
    Unserializable { reason: String },
}

/// Master error type for all memovault operations.
#[derive(Debug, Error)]
pub enum MemoError {
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),
}

impl MemoError {
    /// True when this is a missing-key report from the backend.
    ///
    /// Opportunistic cleanup paths (invalidate-on-call) tolerate this case;
    /// direct delete requests propagate it.
    pub fn is_not_found(&self) -> bool {
        matches!(self, MemoError::Backend(BackendError::NotFound { .. }))
    }

    /// True when this is a duplicate-key rejection from `put`.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, MemoError::Backend(BackendError::Duplicate { .. }))
    }
}

/// Result type alias for memovault operations.
pub type MemoResult<T> = Result<T, MemoError>;

// =============================================================================
// TESTS
// =============================================================================
