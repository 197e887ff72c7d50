//! Domain model for context propagation.
//!
//! Canonical definitions for the core entities:
//! - `WorkItem` / `AgentName`: run subject and pipeline participants
//! - `Enhancement`: typed facts an agent asserts
//! - `EvidenceRecord`: externally verifiable backing for an enhancement
//! - `ContextSnapshot` / `Contribution`: versioned, append-only context
//! - `ConflictRecord`: structured disagreement retained for audit

pub mod agent;
pub mod conflict;
pub mod enhancement;
pub mod error;
pub mod evidence;
pub mod snapshot;

pub use agent::{AgentName, WorkItem};
pub use conflict::{
    CheckName, ConflictKind, ConflictRecord, ConflictingValue, ResolutionStatus, Severity,
    ValueSource,
};
pub use enhancement::{Enhancement, EnhancementCategory};
pub use error::{BlockReason, ContextError, Result};
pub use evidence::{EvidenceRecord, SourceKind};
pub use snapshot::{
    CheckOutcome, ContextSnapshot, Contribution, ContributionStatus, FoundationData,
    SnapshotMetadata, TicketInfo, ValidationState, VersionContext,
};
