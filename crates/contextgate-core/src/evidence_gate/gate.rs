//! Admission check run before a contribution reaches the context manager.
//!
//! Two ways to be blocked:
//! - a gated enhancement without evidence of an accepted kind
//!   (`InsufficientEvidence`, recoverable by retrying the agent);
//! - evidence that disagrees with evidence an ancestor snapshot already
//!   accepted at the same locator (`RealityContradiction`, never
//!   auto-resolved).
//!
//! Blocks are returned as values; the scheduler decides what happens next.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{
    AgentName, BlockReason, ConflictKind, ConflictRecord, ConflictingValue, ContextSnapshot,
    Contribution, Severity, SourceKind, ValueSource,
};
use crate::evidence_gate::policy::EvidencePolicy;

/// Outcome of [`EvidenceGate::admit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AdmitDecision {
    Allow,
    Blocked {
        reason: BlockReason,
        /// Enhancement keys that caused the block.
        keys: Vec<String>,
    },
}

impl AdmitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AdmitDecision::Allow)
    }

    pub fn block_reason(&self) -> Option<BlockReason> {
        match self {
            AdmitDecision::Allow => None,
            AdmitDecision::Blocked { reason, .. } => Some(*reason),
        }
    }
}

/// Evidence gate bound to a policy table.
#[derive(Debug, Clone)]
pub struct EvidenceGate {
    policy: Arc<EvidencePolicy>,
}

impl EvidenceGate {
    pub fn new(policy: Arc<EvidencePolicy>) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &EvidencePolicy {
        &self.policy
    }

    /// Decide whether `contribution` may be merged on top of `ancestor`.
    ///
    /// Contradictions are checked first since they are the harder stop.
    /// Any conflict records raised are returned alongside the decision.
    pub fn admit(
        &self,
        contribution: &Contribution,
        ancestor: &ContextSnapshot,
    ) -> (AdmitDecision, Vec<ConflictRecord>) {
        let contradictions = find_contradictions(contribution, ancestor);
        if !contradictions.is_empty() {
            let keys: Vec<String> = contradictions.iter().map(|c| c.key.clone()).collect();
            let conflicts = contradictions
                .into_iter()
                .map(|c| c.into_record(contribution))
                .collect();
            debug!(agent = %contribution.agent, ?keys, "contribution contradicts accepted evidence");
            return (
                AdmitDecision::Blocked {
                    reason: BlockReason::RealityContradiction,
                    keys,
                },
                conflicts,
            );
        }

        let missing = self.unsupported_keys(contribution);
        if !missing.is_empty() {
            let values = missing
                .iter()
                .map(|key| {
                    let claimed = contribution
                        .enhancements
                        .get(key)
                        .and_then(|e| e.claimed_value())
                        .unwrap_or(serde_json::Value::Null);
                    ConflictingValue::new(ValueSource::Agent(contribution.agent), key, claimed)
                })
                .collect();
            let record = ConflictRecord::new(
                None,
                ConflictKind::MissingEvidence,
                Severity::Advisory,
                missing.clone(),
                values,
                contribution.timestamp,
            );
            debug!(agent = %contribution.agent, keys = ?missing, "gated claims lack evidence");
            return (
                AdmitDecision::Blocked {
                    reason: BlockReason::InsufficientEvidence,
                    keys: missing,
                },
                vec![record],
            );
        }

        (AdmitDecision::Allow, Vec::new())
    }

    /// Gated enhancement keys with no evidence of an accepted kind.
    pub fn unsupported_keys(&self, contribution: &Contribution) -> Vec<String> {
        contribution
            .enhancements
            .iter()
            .filter(|(_, e)| self.policy.is_gated(e.category()))
            .filter(|(key, e)| {
                !contribution
                    .evidence_for(key)
                    .any(|ev| self.policy.accepts(e.category(), ev.source_kind))
            })
            .map(|(key, _)| key.clone())
            .collect()
    }
}

struct Contradiction {
    key: String,
    locator: String,
    prior_agent: AgentName,
    prior_value: serde_json::Value,
    new_value: serde_json::Value,
}

impl Contradiction {
    fn into_record(self, contribution: &Contribution) -> ConflictRecord {
        ConflictRecord::new(
            None,
            ConflictKind::Contradiction,
            Severity::Critical,
            vec![self.key.clone(), self.locator.clone()],
            vec![
                ConflictingValue::new(
                    ValueSource::Agent(self.prior_agent),
                    self.locator,
                    self.prior_value,
                ),
                ConflictingValue::new(
                    ValueSource::Agent(contribution.agent),
                    self.key,
                    self.new_value,
                ),
            ],
            contribution.timestamp,
        )
    }
}

/// Evidence in `contribution` that disagrees with accepted evidence in
/// `ancestor` at the same locator.
///
/// An accepted record's value is what it `observed`; a prior verified fact
/// without an observation stands for the value its enhancement claimed. The
/// new side's value is the record's `observed` value, or failing that the
/// value its enhancement claims. Records from the same agent are compared too:
/// a re-run may not silently reverse what was accepted.
fn find_contradictions(contribution: &Contribution, ancestor: &ContextSnapshot) -> Vec<Contradiction> {
    let mut accepted: BTreeMap<&str, (AgentName, serde_json::Value)> = BTreeMap::new();
    for (agent, record) in ancestor.accepted_evidence() {
        let value = match &record.observed {
            Some(observed) => Some(observed.clone()),
            None if record.source_kind == SourceKind::PriorVerifiedFact => ancestor
                .contribution(agent)
                .and_then(|c| c.enhancements.get(&record.supports))
                .and_then(|e| e.claimed_value()),
            None => None,
        };
        if let Some(value) = value {
            accepted.entry(record.locator.as_str()).or_insert((agent, value));
        }
    }
    if accepted.is_empty() {
        return Vec::new();
    }

    let mut found = Vec::new();
    for record in &contribution.evidence {
        let Some((prior_agent, prior_value)) = accepted.get(record.locator.as_str()) else {
            continue;
        };
        let claimed = record.observed.clone().or_else(|| {
            contribution
                .enhancements
                .get(&record.supports)
                .and_then(|e| e.claimed_value())
        });
        if let Some(new_value) = claimed {
            if new_value != *prior_value {
                found.push(Contradiction {
                    key: record.supports.clone(),
                    locator: record.locator.clone(),
                    prior_agent: *prior_agent,
                    prior_value: prior_value.clone(),
                    new_value,
                });
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ContributionStatus, Enhancement, EvidenceRecord, SourceKind};
    use chrono::Utc;

    fn candidate(
        enhancements: Vec<(&str, Enhancement)>,
        evidence: Vec<EvidenceRecord>,
    ) -> Contribution {
        Contribution {
            agent: AgentName::CodeInvestigation,
            status: ContributionStatus::Pending,
            enhancements: enhancements
                .into_iter()
                .map(|(k, e)| (k.to_string(), e))
                .collect(),
            evidence,
            confidence: 0.0,
            timestamp: Utc::now(),
            self_validated: false,
            accepted_in_version: 0,
            superseded: false,
            drop_reason: None,
        }
    }

    #[test]
    fn unsupported_keys_ignores_non_gated_categories() {
        let gate = EvidenceGate::new(Arc::new(EvidencePolicy::standard()));
        let c = candidate(
            vec![(
                "note",
                Enhancement::Analysis {
                    summary: "looks like a race".into(),
                    detail: serde_json::Value::Null,
                },
            )],
            vec![],
        );
        assert!(gate.unsupported_keys(&c).is_empty());
    }

    #[test]
    fn wrong_evidence_kind_does_not_satisfy_gate() {
        let gate = EvidenceGate::new(Arc::new(EvidencePolicy::standard()));
        let c = candidate(
            vec![(
                "digest_field",
                Enhancement::SchemaField {
                    path: "spec.upgrade.imageDigest".into(),
                    exists: true,
                },
            )],
            vec![EvidenceRecord::new(
                SourceKind::DocumentationCitation,
                "docs/upgrade.md#digest",
                "digest_field",
            )],
        );
        assert_eq!(gate.unsupported_keys(&c), vec!["digest_field".to_string()]);
    }

    #[test]
    fn prior_verified_fact_is_checked_against_its_claim() {
        use crate::config::ConfidenceConfig;
        use crate::context::{ContextManager, ContributionDraft};
        use crate::domain::{FoundationData, TicketInfo, VersionContext, WorkItem};

        let m = ContextManager::new(
            Arc::new(EvidencePolicy::standard()),
            ConfidenceConfig::default(),
        );
        let root = m
            .bootstrap(
                WorkItem::new("T-9"),
                FoundationData {
                    ticket_info: TicketInfo {
                        id: "T-9".into(),
                        summary: "s".into(),
                        status: "New".into(),
                        fields: BTreeMap::new(),
                    },
                    version_context: VersionContext::default(),
                    environment_baseline: BTreeMap::new(),
                },
            )
            .unwrap();
        let ancestor = m
            .inherit(
                &root,
                AgentName::EnvironmentAnalysis,
                ContributionDraft::new()
                    .with_enhancement(
                        "deployed",
                        Enhancement::WorkflowDeployment {
                            workflow: "upgrade".into(),
                            deployed: true,
                        },
                    )
                    .with_evidence(EvidenceRecord::new(
                        SourceKind::PriorVerifiedFact,
                        "cluster/deployments/upgrade",
                        "deployed",
                    )),
            )
            .unwrap();

        let c = candidate(
            vec![(
                "not_deployed",
                Enhancement::WorkflowDeployment {
                    workflow: "upgrade".into(),
                    deployed: false,
                },
            )],
            vec![EvidenceRecord::new(
                SourceKind::CodeReference,
                "cluster/deployments/upgrade",
                "not_deployed",
            )],
        );
        let gate = EvidenceGate::new(Arc::new(EvidencePolicy::standard()));
        let (decision, conflicts) = gate.admit(&c, &ancestor);
        assert_eq!(decision.block_reason(), Some(BlockReason::RealityContradiction));
        assert_eq!(conflicts[0].kind, ConflictKind::Contradiction);
    }
}
