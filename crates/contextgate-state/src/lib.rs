//! Contextgate-State: storage boundary for context snapshot history.
//!
//! The core keeps its snapshots in memory and never performs I/O on the merge
//! path. Durable audit trails plug in through the traits defined here:
//!
//! - `SnapshotLedger`: append-only, per-work-item history of committed snapshots
//! - `ReportArchive`: terminal run reports keyed by run id
//!
//! In-memory implementations live in the `fakes` module.

mod error;
pub mod fakes;
pub mod storage_traits;

pub use error::StorageError;
pub use storage_traits::{
    ArchivedReport, ContentDigest, ReportArchive, SnapshotEntry, SnapshotLedger, StorageResult,
};
