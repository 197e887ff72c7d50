//! Versioned context snapshots and the contributions they own.
//!
//! A snapshot is never mutated once committed; every change produces a new
//! snapshot with a bumped `metadata.version` (see [`ContextSnapshot::derive`]).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use contextgate_state::ContentDigest;

use super::agent::{AgentName, WorkItem};
use super::conflict::{CheckName, ConflictRecord};
use super::enhancement::Enhancement;
use super::error::{ContextError, Result};
use super::evidence::EvidenceRecord;

// ---------------------------------------------------------------------------
// Foundation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketInfo {
    pub id: String,
    pub summary: String,
    pub status: String,
    /// Additional ticket fields (component, priority, ...).
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionContext {
    /// Version the ticket targets.
    pub target_version: Option<String>,
    /// Version declared for the environment under analysis.
    pub environment_version: Option<String>,
}

/// Facts established once, before any analysis agent runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoundationData {
    pub ticket_info: TicketInfo,
    #[serde(default)]
    pub version_context: VersionContext,
    #[serde(default)]
    pub environment_baseline: BTreeMap<String, String>,
}

impl FoundationData {
    /// Check the shape of bootstrap data. Semantic correctness is not checked.
    pub fn validate_shape(&self, work_item: &WorkItem) -> Result<()> {
        let ticket = &self.ticket_info;
        if ticket.id.trim().is_empty() {
            return Err(ContextError::InvalidFoundation(
                "ticket_info.id is empty".to_string(),
            ));
        }
        if ticket.id != work_item.as_str() {
            return Err(ContextError::InvalidFoundation(format!(
                "ticket_info.id {} does not match work item {}",
                ticket.id, work_item
            )));
        }
        if ticket.status.trim().is_empty() {
            return Err(ContextError::InvalidFoundation(
                "ticket_info.status is empty".to_string(),
            ));
        }
        let versions = [
            ("target_version", &self.version_context.target_version),
            (
                "environment_version",
                &self.version_context.environment_version,
            ),
        ];
        for (name, v) in versions {
            if matches!(v, Some(s) if s.trim().is_empty()) {
                return Err(ContextError::InvalidFoundation(format!(
                    "version_context.{name} is present but empty"
                )));
            }
        }
        if let Some(key) = self.environment_baseline.keys().find(|k| k.trim().is_empty()) {
            return Err(ContextError::InvalidFoundation(format!(
                "environment_baseline has an empty key ({key:?})"
            )));
        }
        Ok(())
    }

    /// Look up a foundation fact by dotted path, e.g. `ticket_info.status`.
    ///
    /// A leading `foundation_data.` or `foundation.` prefix is ignored.
    pub fn fact(&self, path: &str) -> Option<&str> {
        let path = normalize_fact_path(path);
        let (section, key) = path.split_once('.')?;
        match (section, key) {
            ("ticket_info", "id") => Some(&self.ticket_info.id),
            ("ticket_info", "summary") => Some(&self.ticket_info.summary),
            ("ticket_info", "status") => Some(&self.ticket_info.status),
            ("ticket_info", field) => self.ticket_info.fields.get(field).map(String::as_str),
            ("version_context", "target_version") => {
                self.version_context.target_version.as_deref()
            }
            ("version_context", "environment_version") => {
                self.version_context.environment_version.as_deref()
            }
            ("environment_baseline", k) => self.environment_baseline.get(k).map(String::as_str),
            _ => None,
        }
    }
}

/// Strip the optional `foundation_data.` / `foundation.` prefix from a fact path.
pub fn normalize_fact_path(path: &str) -> &str {
    path.strip_prefix("foundation_data.")
        .or_else(|| path.strip_prefix("foundation."))
        .unwrap_or(path)
}

// ---------------------------------------------------------------------------
// Contribution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContributionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One agent's output as recorded in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub agent: AgentName,
    pub status: ContributionStatus,
    pub enhancements: BTreeMap<String, Enhancement>,
    pub evidence: Vec<EvidenceRecord>,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    /// Whether the agent reported validating its own inputs.
    #[serde(default)]
    pub self_validated: bool,
    /// Snapshot version in which this contribution was merged (0 while a candidate).
    pub accepted_in_version: u64,
    /// Set when a later resolution preferred another contribution's values.
    #[serde(default)]
    pub superseded: bool,
    /// Why the agent's output was dropped, for failed contributions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drop_reason: Option<String>,
}

impl Contribution {
    /// Completed and not superseded: participates in consistency checks.
    pub fn is_active(&self) -> bool {
        self.status == ContributionStatus::Completed && !self.superseded
    }

    /// Evidence records attached to one enhancement key.
    pub fn evidence_for<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a EvidenceRecord> {
        self.evidence.iter().filter(move |e| e.supports == key)
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub version: u64,
    /// Version this snapshot was derived from; `None` for the foundation snapshot.
    pub parent_version: Option<u64>,
    /// When the snapshot chain was started.
    pub created_at: DateTime<Utc>,
    /// When this version was produced.
    pub updated_at: DateTime<Utc>,
    /// Advisory score from the most recent recorded validation.
    pub consistency_score: f64,
}

/// Result of one check in the most recent recorded validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub check: CheckName,
    pub passed: bool,
    /// Passed because a matching conflict was already resolved.
    #[serde(default)]
    pub reconciled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationState {
    pub checks: Vec<CheckOutcome>,
    /// Every conflict ever raised against this chain, in detection order.
    pub conflicts: Vec<ConflictRecord>,
    pub confidence: Option<f64>,
}

/// Versioned aggregate of everything known about one work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub work_item: WorkItem,
    pub metadata: SnapshotMetadata,
    pub foundation: FoundationData,
    pub contributions: BTreeMap<AgentName, Contribution>,
    pub validation: ValidationState,
}

impl ContextSnapshot {
    pub fn version(&self) -> u64 {
        self.metadata.version
    }

    pub fn contribution(&self, agent: AgentName) -> Option<&Contribution> {
        self.contributions.get(&agent)
    }

    pub fn has_contribution(&self, agent: AgentName) -> bool {
        self.contributions.contains_key(&agent)
    }

    /// Contributions that participate in consistency checks.
    pub fn active_contributions(&self) -> impl Iterator<Item = &Contribution> {
        self.contributions.values().filter(|c| c.is_active())
    }

    /// Evidence accepted into this snapshot, with the agent that supplied it.
    pub fn accepted_evidence(&self) -> impl Iterator<Item = (AgentName, &EvidenceRecord)> {
        self.active_contributions()
            .flat_map(|c| c.evidence.iter().map(move |e| (c.agent, e)))
    }

    pub fn conflict(&self, id: &str) -> Option<&ConflictRecord> {
        self.validation.conflicts.iter().find(|c| c.id == id)
    }

    pub fn unresolved_conflicts(&self) -> impl Iterator<Item = &ConflictRecord> {
        self.validation.conflicts.iter().filter(|c| !c.is_resolved())
    }

    pub fn blocking_conflicts(&self) -> impl Iterator<Item = &ConflictRecord> {
        self.validation.conflicts.iter().filter(|c| c.is_blocking())
    }

    /// SHA-256 of the canonical JSON encoding.
    pub fn digest(&self) -> Result<ContentDigest> {
        Ok(ContentDigest::from_json(self)?)
    }

    /// Clone into the next version. The receiver is left untouched.
    pub(crate) fn derive(&self, now: DateTime<Utc>) -> ContextSnapshot {
        let mut next = self.clone();
        next.metadata.parent_version = Some(self.metadata.version);
        next.metadata.version = self.metadata.version + 1;
        next.metadata.updated_at = now.max(self.metadata.updated_at);
        next
    }

    /// Append conflicts not already recorded (by id). Existing records keep
    /// their resolution state.
    pub(crate) fn absorb_conflicts<I>(&mut self, conflicts: I) -> usize
    where
        I: IntoIterator<Item = ConflictRecord>,
    {
        let mut added = 0;
        for c in conflicts {
            if self.conflict(&c.id).is_none() {
                self.validation.conflicts.push(c);
                added += 1;
            }
        }
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn foundation() -> FoundationData {
        FoundationData {
            ticket_info: TicketInfo {
                id: "OCPBUGS-1".into(),
                summary: "upgrade stalls".into(),
                status: "In Progress".into(),
                fields: BTreeMap::from([("component".to_string(), "installer".to_string())]),
            },
            version_context: VersionContext {
                target_version: Some("2.15".into()),
                environment_version: Some("2.14".into()),
            },
            environment_baseline: BTreeMap::from([("platform".to_string(), "aws".to_string())]),
        }
    }

    #[test]
    fn fact_lookup_accepts_prefixed_paths() {
        let f = foundation();
        assert_eq!(f.fact("ticket_info.status"), Some("In Progress"));
        assert_eq!(f.fact("foundation_data.ticket_info.status"), Some("In Progress"));
        assert_eq!(f.fact("ticket_info.component"), Some("installer"));
        assert_eq!(f.fact("version_context.environment_version"), Some("2.14"));
        assert_eq!(f.fact("environment_baseline.platform"), Some("aws"));
        assert_eq!(f.fact("nonsense"), None);
    }

    #[test]
    fn shape_check_rejects_mismatched_ticket() {
        let f = foundation();
        assert!(f.validate_shape(&WorkItem::new("OCPBUGS-1")).is_ok());
        let err = f.validate_shape(&WorkItem::new("OCPBUGS-2")).unwrap_err();
        assert!(matches!(err, ContextError::InvalidFoundation(_)));
    }

    #[test]
    fn shape_check_rejects_blank_versions() {
        let mut f = foundation();
        f.version_context.environment_version = Some("  ".into());
        assert!(f.validate_shape(&WorkItem::new("OCPBUGS-1")).is_err());
    }
}
