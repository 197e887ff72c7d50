//! In-memory implementations of the storage traits
//!
//! `MemorySnapshotLedger` and `MemoryReportArchive` satisfy the trait
//! contracts without external dependencies. Used by tests and by callers that
//! only need an in-process audit trail.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// MemorySnapshotLedger
// ---------------------------------------------------------------------------

/// In-memory ledger backed by a `HashMap<work_item, Vec<SnapshotEntry>>`.
#[derive(Debug, Default)]
pub struct MemorySnapshotLedger {
    entries: Mutex<HashMap<String, Vec<SnapshotEntry>>>,
}

impl MemorySnapshotLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries across all work items.
    pub fn len(&self) -> usize {
        lock(&self.entries).values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SnapshotLedger for MemorySnapshotLedger {
    async fn append(&self, entry: SnapshotEntry) -> StorageResult<()> {
        let mut entries = lock(&self.entries);
        let chain = entries.entry(entry.work_item.clone()).or_default();
        if let Some(head) = chain.last() {
            if entry.version <= head.version {
                return Err(StorageError::AppendOnlyViolation {
                    work_item: entry.work_item,
                    attempted: entry.version,
                    head: head.version,
                });
            }
        }
        tracing::trace!(
            work_item = %entry.work_item,
            version = entry.version,
            digest = %entry.digest.short(),
            "snapshot appended"
        );
        chain.push(entry);
        Ok(())
    }

    async fn head(&self, work_item: &str) -> StorageResult<Option<SnapshotEntry>> {
        let entries = lock(&self.entries);
        Ok(entries.get(work_item).and_then(|c| c.last().cloned()))
    }

    async fn get(&self, work_item: &str, version: u64) -> StorageResult<SnapshotEntry> {
        let entries = lock(&self.entries);
        entries
            .get(work_item)
            .and_then(|c| c.iter().find(|e| e.version == version).cloned())
            .ok_or_else(|| StorageError::SnapshotNotFound {
                work_item: work_item.to_string(),
                version,
            })
    }

    async fn history(&self, work_item: &str) -> StorageResult<Vec<SnapshotEntry>> {
        let entries = lock(&self.entries);
        Ok(entries.get(work_item).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// MemoryReportArchive
// ---------------------------------------------------------------------------

/// In-memory report archive keyed by run id.
#[derive(Debug, Default)]
pub struct MemoryReportArchive {
    reports: Mutex<Vec<ArchivedReport>>,
}

impl MemoryReportArchive {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReportArchive for MemoryReportArchive {
    async fn put(&self, report: ArchivedReport) -> StorageResult<()> {
        let mut reports = lock(&self.reports);
        if reports.iter().any(|r| r.run_id == report.run_id) {
            return Err(StorageError::DuplicateReport {
                run_id: report.run_id,
            });
        }
        reports.push(report);
        Ok(())
    }

    async fn get(&self, run_id: &str) -> StorageResult<ArchivedReport> {
        let reports = lock(&self.reports);
        reports
            .iter()
            .find(|r| r.run_id == run_id)
            .cloned()
            .ok_or_else(|| StorageError::ReportNotFound {
                run_id: run_id.to_string(),
            })
    }

    async fn list_for(&self, work_item: &str) -> StorageResult<Vec<ArchivedReport>> {
        let reports = lock(&self.reports);
        let mut matching: Vec<ArchivedReport> = reports
            .iter()
            .filter(|r| r.work_item == work_item)
            .cloned()
            .collect();
        matching.reverse();
        Ok(matching)
    }
}
