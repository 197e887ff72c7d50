//! Context Manager: turns agent output into new snapshot versions.
//!
//! Every operation here is pure. It takes a snapshot by reference, returns a
//! new one, and performs no I/O; durability is the store's job.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ConfidenceConfig;
use crate::domain::{
    AgentName, CheckOutcome, ConflictRecord, ContextError, ContextSnapshot, Contribution,
    ContributionStatus, Enhancement, EvidenceRecord, FoundationData, Result, SnapshotMetadata,
    ValidationState, WorkItem,
};
use crate::evidence_gate::EvidencePolicy;

/// What an agent hands back before it becomes a [`Contribution`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContributionDraft {
    pub enhancements: BTreeMap<String, Enhancement>,
    pub evidence: Vec<EvidenceRecord>,
    /// The agent's own confidence, if it reported one.
    pub reported_confidence: Option<f64>,
    pub self_validated: bool,
}

impl ContributionDraft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enhancement(mut self, key: impl Into<String>, enhancement: Enhancement) -> Self {
        self.enhancements.insert(key.into(), enhancement);
        self
    }

    pub fn with_evidence(mut self, record: EvidenceRecord) -> Self {
        self.evidence.push(record);
        self
    }

    pub fn with_reported_confidence(mut self, confidence: f64) -> Self {
        self.reported_confidence = Some(confidence);
        self
    }

    pub fn self_validated(mut self) -> Self {
        self.self_validated = true;
        self
    }

    /// Every enhancement key has at least one evidence record.
    pub fn fully_evidenced(&self) -> bool {
        !self.enhancements.is_empty()
            && self
                .enhancements
                .keys()
                .all(|k| self.evidence.iter().any(|e| &e.supports == k))
    }

    /// Build the candidate contribution the evidence gate inspects.
    pub fn to_candidate(&self, agent: AgentName, confidence: f64, now: DateTime<Utc>) -> Contribution {
        Contribution {
            agent,
            status: ContributionStatus::Pending,
            enhancements: self.enhancements.clone(),
            evidence: self.evidence.clone(),
            confidence,
            timestamp: now,
            self_validated: self.self_validated,
            accepted_in_version: 0,
            superseded: false,
            drop_reason: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContextManager {
    policy: Arc<EvidencePolicy>,
    confidence: ConfidenceConfig,
}

impl ContextManager {
    pub fn new(policy: Arc<EvidencePolicy>, confidence: ConfidenceConfig) -> Self {
        Self { policy, confidence }
    }

    /// Foundation snapshot (version 1, no parent).
    pub fn bootstrap(&self, work_item: WorkItem, foundation: FoundationData) -> Result<ContextSnapshot> {
        self.bootstrap_at(work_item, foundation, Utc::now())
    }

    pub fn bootstrap_at(
        &self,
        work_item: WorkItem,
        foundation: FoundationData,
        now: DateTime<Utc>,
    ) -> Result<ContextSnapshot> {
        foundation.validate_shape(&work_item)?;
        Ok(ContextSnapshot {
            work_item,
            metadata: SnapshotMetadata {
                version: 1,
                parent_version: None,
                created_at: now,
                updated_at: now,
                consistency_score: 1.0,
            },
            foundation,
            contributions: BTreeMap::new(),
            validation: ValidationState::default(),
        })
    }

    /// Merge `agent`'s output into a new snapshot derived from `prior`.
    pub fn inherit(
        &self,
        prior: &ContextSnapshot,
        agent: AgentName,
        draft: ContributionDraft,
    ) -> Result<ContextSnapshot> {
        self.inherit_at(prior, agent, draft, Utc::now())
    }

    pub fn inherit_at(
        &self,
        prior: &ContextSnapshot,
        agent: AgentName,
        draft: ContributionDraft,
        now: DateTime<Utc>,
    ) -> Result<ContextSnapshot> {
        if agent == AgentName::Foundation {
            return Err(ContextError::InvalidContribution(
                "foundation data enters through bootstrap, not inherit".to_string(),
            ));
        }
        if prior
            .contribution(agent)
            .is_some_and(|c| c.status == ContributionStatus::Pending)
        {
            return Err(ContextError::ContributionPending { agent });
        }

        let missing: Vec<String> = draft
            .enhancements
            .iter()
            .filter(|(_, e)| self.policy.is_gated(e.category()))
            .filter(|(key, _)| !draft.evidence.iter().any(|ev| &ev.supports == *key))
            .map(|(key, _)| key.clone())
            .collect();
        if !missing.is_empty() {
            return Err(ContextError::EvidenceMissing { agent, keys: missing });
        }

        let confidence = self.score(&draft);
        let mut next = prior.derive(now);
        let version = next.metadata.version;
        next.contributions.insert(
            agent,
            Contribution {
                agent,
                status: ContributionStatus::Completed,
                enhancements: draft.enhancements,
                evidence: draft.evidence,
                confidence,
                timestamp: now,
                self_validated: draft.self_validated,
                accepted_in_version: version,
                superseded: false,
                drop_reason: None,
            },
        );
        debug!(%agent, version, confidence, "contribution merged");
        Ok(next)
    }

    /// Contribution confidence for `draft`.
    ///
    /// Starts from the agent's reported confidence (or the configured base),
    /// adds the evidence and self-validation bonuses, caps at 1.0.
    pub fn score(&self, draft: &ContributionDraft) -> f64 {
        let base = draft
            .reported_confidence
            .filter(|c| c.is_finite())
            .map(|c| c.clamp(0.0, 1.0))
            .unwrap_or(self.confidence.base);
        let mut score = base;
        if draft.fully_evidenced() {
            score += self.confidence.evidence_bonus;
        }
        if draft.self_validated {
            score += self.confidence.self_validation_bonus;
        }
        score.min(1.0)
    }

    /// Record that `agent`'s output was dropped: a failed contribution with
    /// zero confidence, so the drop stays visible in history.
    pub fn record_dropped(
        &self,
        prior: &ContextSnapshot,
        agent: AgentName,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<ContextSnapshot> {
        if agent == AgentName::Foundation {
            return Err(ContextError::InvalidContribution(
                "the foundation agent cannot be dropped".to_string(),
            ));
        }
        let mut next = prior.derive(now);
        let version = next.metadata.version;
        next.contributions.insert(
            agent,
            Contribution {
                agent,
                status: ContributionStatus::Failed,
                enhancements: BTreeMap::new(),
                evidence: Vec::new(),
                confidence: 0.0,
                timestamp: now,
                self_validated: false,
                accepted_in_version: version,
                superseded: false,
                drop_reason: Some(reason.into()),
            },
        );
        Ok(next)
    }

    /// Replay what `fork` added since its parent onto `head`.
    ///
    /// Sibling forks of one ancestor each add a different agent; those merge
    /// cleanly. An agent written on both sides is a `ForkConflict`.
    pub fn rebase(&self, head: &ContextSnapshot, fork: &ContextSnapshot, now: DateTime<Utc>) -> Result<ContextSnapshot> {
        let base_version = fork.metadata.parent_version.unwrap_or(0);
        let mut next = head.derive(now);
        let version = next.metadata.version;
        for (agent, contribution) in &fork.contributions {
            if contribution.accepted_in_version <= base_version {
                continue;
            }
            if head
                .contribution(*agent)
                .is_some_and(|c| c.accepted_in_version > base_version)
            {
                return Err(ContextError::ForkConflict {
                    agent: *agent,
                    base_version,
                });
            }
            let mut replayed = contribution.clone();
            replayed.accepted_in_version = version;
            next.contributions.insert(*agent, replayed);
        }
        let carried: Vec<ConflictRecord> = fork
            .validation
            .conflicts
            .iter()
            .filter(|c| head.conflict(&c.id).is_none())
            .cloned()
            .collect();
        next.absorb_conflicts(carried);
        Ok(next)
    }

    /// New version carrying `conflicts` (already-known ids are skipped).
    pub fn record_conflicts(
        &self,
        prior: &ContextSnapshot,
        conflicts: Vec<ConflictRecord>,
        now: DateTime<Utc>,
    ) -> ContextSnapshot {
        let mut next = prior.derive(now);
        next.absorb_conflicts(conflicts);
        next
    }

    /// New version carrying a validation outcome.
    pub fn record_validation(
        &self,
        prior: &ContextSnapshot,
        checks: Vec<CheckOutcome>,
        conflicts: Vec<ConflictRecord>,
        score: f64,
        now: DateTime<Utc>,
    ) -> ContextSnapshot {
        let mut next = prior.derive(now);
        next.validation.checks = checks;
        next.validation.confidence = Some(score);
        next.metadata.consistency_score = score;
        next.absorb_conflicts(conflicts);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SourceKind, TicketInfo, VersionContext};

    fn manager() -> ContextManager {
        ContextManager::new(
            Arc::new(EvidencePolicy::standard()),
            ConfidenceConfig::default(),
        )
    }

    fn foundation() -> ContextSnapshot {
        let f = FoundationData {
            ticket_info: TicketInfo {
                id: "OCPBUGS-7".into(),
                summary: "operator upgrade hangs".into(),
                status: "New".into(),
                fields: BTreeMap::new(),
            },
            version_context: VersionContext::default(),
            environment_baseline: BTreeMap::new(),
        };
        manager().bootstrap(WorkItem::new("OCPBUGS-7"), f).unwrap()
    }

    fn analysis(summary: &str) -> Enhancement {
        Enhancement::Analysis {
            summary: summary.into(),
            detail: serde_json::Value::Null,
        }
    }

    #[test]
    fn score_uses_base_and_bonuses() {
        let m = manager();
        let bare = ContributionDraft::new().with_enhancement("a", analysis("x"));
        assert!((m.score(&bare) - 0.8).abs() < 1e-9);

        let evidenced = bare.clone().with_evidence(EvidenceRecord::new(
            SourceKind::CodeReference,
            "src/lib.rs:1",
            "a",
        ));
        assert!((m.score(&evidenced) - 0.9).abs() < 1e-9);
        assert!((m.score(&evidenced.self_validated()) - 0.95).abs() < 1e-9);
    }

    #[test]
    fn score_is_capped_and_tolerates_bad_reports() {
        let m = manager();
        let d = ContributionDraft::new()
            .with_enhancement("a", analysis("x"))
            .with_evidence(EvidenceRecord::new(SourceKind::CodeReference, "l", "a"))
            .with_reported_confidence(0.98)
            .self_validated();
        assert_eq!(m.score(&d), 1.0);

        let nan = ContributionDraft::new().with_reported_confidence(f64::NAN);
        assert!((m.score(&nan) - 0.8).abs() < 1e-9);
    }

    #[test]
    fn empty_draft_earns_no_evidence_bonus() {
        assert!(!ContributionDraft::new().fully_evidenced());
    }

    #[test]
    fn inherit_rejects_foundation_agent() {
        let err = manager()
            .inherit(&foundation(), AgentName::Foundation, ContributionDraft::new())
            .unwrap_err();
        assert!(matches!(err, ContextError::InvalidContribution(_)));
    }

    #[test]
    fn inherit_rejects_pending_agent() {
        let mut prior = foundation();
        prior.contributions.insert(
            AgentName::JiraAnalysis,
            ContributionDraft::new().to_candidate(AgentName::JiraAnalysis, 0.0, Utc::now()),
        );
        let err = manager()
            .inherit(&prior, AgentName::JiraAnalysis, ContributionDraft::new())
            .unwrap_err();
        assert!(matches!(
            err,
            ContextError::ContributionPending {
                agent: AgentName::JiraAnalysis
            }
        ));
    }

    #[test]
    fn record_dropped_is_failed_with_zero_confidence() {
        let next = manager()
            .record_dropped(&foundation(), AgentName::CodeInvestigation, "timeout", Utc::now())
            .unwrap();
        let c = next.contribution(AgentName::CodeInvestigation).unwrap();
        assert_eq!(c.status, ContributionStatus::Failed);
        assert_eq!(c.confidence, 0.0);
        assert_eq!(c.drop_reason.as_deref(), Some("timeout"));
        assert!(!c.is_active());
    }

    #[test]
    fn rebase_replays_sibling_contribution() {
        let m = manager();
        let base = foundation();
        let left = m
            .inherit(&base, AgentName::JiraAnalysis, ContributionDraft::new())
            .unwrap();
        let right = m
            .inherit(&base, AgentName::EnvironmentAnalysis, ContributionDraft::new())
            .unwrap();
        let merged = m.rebase(&left, &right, Utc::now()).unwrap();
        assert_eq!(merged.version(), 3);
        assert!(merged.has_contribution(AgentName::JiraAnalysis));
        assert!(merged.has_contribution(AgentName::EnvironmentAnalysis));
        assert_eq!(
            merged
                .contribution(AgentName::EnvironmentAnalysis)
                .unwrap()
                .accepted_in_version,
            3
        );
    }

    #[test]
    fn rebase_rejects_same_agent_on_both_sides() {
        let m = manager();
        let base = foundation();
        let left = m
            .inherit(&base, AgentName::JiraAnalysis, ContributionDraft::new())
            .unwrap();
        let right = m
            .inherit(&base, AgentName::JiraAnalysis, ContributionDraft::new())
            .unwrap();
        let err = m.rebase(&left, &right, Utc::now()).unwrap_err();
        assert!(matches!(err, ContextError::ForkConflict { base_version: 1, .. }));
    }
}
