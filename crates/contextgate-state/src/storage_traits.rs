//! Storage trait definitions for contextgate
//!
//! - `SnapshotLedger`: append-only snapshot history per work item
//! - `ReportArchive`: write-once archive of terminal run reports
//!
//! Payloads are opaque `serde_json::Value`s so this crate stays independent
//! of the core's domain types. All traits are async and backend-agnostic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private so the string is always lowercase hex produced
/// by `from_bytes`/`from_json` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Digest of the canonical JSON encoding of `value`.
    ///
    /// `serde_json` preserves struct field order and `BTreeMap` key order,
    /// so the same value always encodes to the same bytes.
    pub fn from_json<T: Serialize>(value: &T) -> StorageResult<Self> {
        let bytes = serde_json::to_vec(value)?;
        Ok(Self::from_bytes(&bytes))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// SnapshotLedger
// ---------------------------------------------------------------------------

/// One committed snapshot as seen by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    /// Work item the snapshot belongs to.
    pub work_item: String,
    /// Snapshot version; strictly increasing per work item.
    pub version: u64,
    /// Version this snapshot was derived from (`None` for the foundation).
    pub parent_version: Option<u64>,
    /// Digest of `state`.
    pub digest: ContentDigest,
    /// Serialized snapshot.
    pub state: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl SnapshotEntry {
    /// Build an entry, computing the digest of `state`.
    pub fn new(
        work_item: impl Into<String>,
        version: u64,
        parent_version: Option<u64>,
        state: serde_json::Value,
    ) -> StorageResult<Self> {
        let digest = ContentDigest::from_json(&state)?;
        Ok(Self {
            work_item: work_item.into(),
            version,
            parent_version,
            digest,
            state,
            recorded_at: Utc::now(),
        })
    }
}

/// Append-only snapshot history.
///
/// Guarantees:
/// - `append` accepts only versions strictly greater than the current head
///   for that work item; anything else is `AppendOnlyViolation`.
/// - Entries are never modified or removed once appended.
/// - `history` returns entries in ascending version order.
#[async_trait]
pub trait SnapshotLedger: Send + Sync {
    /// Append a snapshot entry.
    async fn append(&self, entry: SnapshotEntry) -> StorageResult<()>;

    /// Latest entry for a work item, if any.
    async fn head(&self, work_item: &str) -> StorageResult<Option<SnapshotEntry>>;

    /// Entry at an exact version. Returns `SnapshotNotFound` if absent.
    async fn get(&self, work_item: &str, version: u64) -> StorageResult<SnapshotEntry>;

    /// Full history for a work item (oldest first).
    async fn history(&self, work_item: &str) -> StorageResult<Vec<SnapshotEntry>>;
}

// ---------------------------------------------------------------------------
// ReportArchive
// ---------------------------------------------------------------------------

/// A terminal run report stored for external tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedReport {
    pub run_id: String,
    pub work_item: String,
    /// Terminal scheduler state name (`done` or `halted`).
    pub terminal_state: String,
    pub digest: ContentDigest,
    pub report: serde_json::Value,
    pub archived_at: DateTime<Utc>,
}

impl ArchivedReport {
    /// Build an archive record, computing the digest of `report`.
    pub fn new(
        run_id: impl Into<String>,
        work_item: impl Into<String>,
        terminal_state: impl Into<String>,
        report: serde_json::Value,
    ) -> StorageResult<Self> {
        let digest = ContentDigest::from_json(&report)?;
        Ok(Self {
            run_id: run_id.into(),
            work_item: work_item.into(),
            terminal_state: terminal_state.into(),
            digest,
            report,
            archived_at: Utc::now(),
        })
    }
}

/// Write-once report archive.
///
/// Semantics:
/// - `put` fails with `DuplicateReport` if the run id is already archived.
/// - `list_for` returns reports for a work item, newest first.
#[async_trait]
pub trait ReportArchive: Send + Sync {
    async fn put(&self, report: ArchivedReport) -> StorageResult<()>;

    async fn get(&self, run_id: &str) -> StorageResult<ArchivedReport>;

    async fn list_for(&self, work_item: &str) -> StorageResult<Vec<ArchivedReport>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_from_json_is_stable() {
        let a = ContentDigest::from_json(&serde_json::json!({"a": 1, "b": [1, 2]})).unwrap();
        let b = ContentDigest::from_json(&serde_json::json!({"a": 1, "b": [1, 2]})).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert_eq!(a.short().len(), 12);
    }

    #[test]
    fn digest_try_from_rejects_non_hex() {
        let err = ContentDigest::try_from("xyz".to_string()).unwrap_err();
        assert!(matches!(err, StorageError::InvalidDigest { .. }));

        let upper = "A".repeat(64);
        let ok = ContentDigest::try_from(upper).unwrap();
        assert_eq!(ok.as_str(), "a".repeat(64));
    }

    #[test]
    fn snapshot_entry_digest_matches_state() {
        let state = serde_json::json!({"version": 3});
        let entry = SnapshotEntry::new("OCPBUGS-1", 3, Some(2), state.clone()).unwrap();
        assert_eq!(entry.digest, ContentDigest::from_json(&state).unwrap());
    }
}
