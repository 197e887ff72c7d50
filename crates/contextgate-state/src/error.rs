//! Error types for contextgate-state

use thiserror::Error;

/// Errors raised by storage trait implementations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Appending would rewrite or reorder history.
    #[error("append-only violation for {work_item}: version {attempted} does not follow {head}")]
    AppendOnlyViolation {
        work_item: String,
        attempted: u64,
        head: u64,
    },

    /// No snapshot recorded at the requested version.
    #[error("snapshot {version} not found for {work_item}")]
    SnapshotNotFound { work_item: String, version: u64 },

    /// No report archived under the run id.
    #[error("report not found: {run_id}")]
    ReportNotFound { run_id: String },

    /// A report with the same run id was already archived.
    #[error("report already archived: {run_id}")]
    DuplicateReport { run_id: String },

    /// Digest string is not 64 hex characters.
    #[error("invalid digest: {digest}")]
    InvalidDigest { digest: String },

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend-specific failure.
    #[error("backend error: {0}")]
    Backend(String),
}
