//! Error types for convsync
//!
//! This module defines the error taxonomy used throughout the crate,
//! using `thiserror` for ergonomic error handling. There are three layers:
//!
//! - [`SyncError`]: the typed outcome of core reader/writer operations.
//!   Every expected condition (bad input, absence, conflicts, backend
//!   outages) is returned as one of these, never raised as a panic.
//! - [`StoreError`]: failures reported by a [`crate::storage::ConversationStore`]
//!   backend. The reader and writer translate these into [`SyncError`].
//! - [`ConvsyncError`]: ambient failures (configuration, I/O, parsing) on
//!   the CLI and configuration paths.

use crate::storage::ConversationRecord;
use std::time::Duration;
use thiserror::Error;

/// Typed result of a core sync operation
///
/// The reader and writer never let these escape as panics; callers match
/// on the variant to decide whether to retry, merge, or report.
#[derive(Error, Debug, Clone)]
pub enum SyncError {
    /// Caller supplied an invalid id, owner, title or payload
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Candidate owner does not match the authenticated caller
    #[error("Owner mismatch: caller={expected}, candidate={actual}")]
    OwnerMismatch {
        /// Owner id of the calling context
        expected: String,
        /// Owner id found on the candidate record
        actual: String,
    },

    /// No live record exists for the requested key
    #[error("Conversation not found: {id}")]
    NotFound {
        /// Requested conversation id
        id: String,
    },

    /// Write lost a version race; carries the authoritative stored record
    #[error("Write conflict: stored version is {}", current.version)]
    Conflict {
        /// The record currently stored for the key
        current: Box<ConversationRecord>,
    },

    /// Transient backend failure (timeouts, outages) after retries
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
}

impl SyncError {
    /// Whether retrying the same call later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::StoreUnavailable(_))
    }

    /// Stable label used for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::InvalidInput(_) => "invalid_input",
            SyncError::OwnerMismatch { .. } => "owner_mismatch",
            SyncError::NotFound { .. } => "not_found",
            SyncError::Conflict { .. } => "conflict",
            SyncError::StoreUnavailable(_) => "store_unavailable",
        }
    }

    /// Returns the authoritative record attached to a conflict
    pub fn conflict_record(&self) -> Option<&ConversationRecord> {
        match self {
            SyncError::Conflict { current } => Some(current),
            _ => None,
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        SyncError::StoreUnavailable(err.to_string())
    }
}

/// Failure reported by a store backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A single-row lookup matched more than one live row
    #[error("Expected a single row, found {rows}")]
    NotSingleRow {
        /// Number of live rows that matched
        rows: usize,
    },

    /// Backend could not be reached or refused the request
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// The call did not complete within the configured deadline
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Stored data could not be decoded
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether the failure is expected to clear on its own
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..) => StoreError::Corrupt(err.to_string()),
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// Ambient error type for configuration, CLI and I/O paths
#[derive(Error, Debug)]
pub enum ConvsyncError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Store setup errors (paths, schema creation)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Core sync failure surfaced to the CLI
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for convsync ambient operations
///
/// Uses `anyhow::Error` so CLI and configuration code can attach context
/// while propagating.
pub type Result<T> = anyhow::Result<T>;

/// Result type for core reader/writer operations
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Result type for store backend calls
pub type StoreResult<T> = std::result::Result<T, StoreError>;
