//! Confidence Aggregator: the authoritative run score.
//!
//! `aggregate = weighted_mean(contribution confidences) × all-level pass fraction`
//!
//! Dropped agents count with confidence 0. Nothing is cached; each call
//! re-validates the snapshot it is given.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{AgentName, ContextSnapshot};
use crate::validation::{ConsistencyValidator, ValidationLevel};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBreakdown {
    pub per_agent: BTreeMap<AgentName, f64>,
    pub weighted_mean: f64,
    pub check_pass_fraction: f64,
    pub aggregate: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ConfidenceAggregator {
    weights: BTreeMap<AgentName, f64>,
    validator: ConsistencyValidator,
}

impl ConfidenceAggregator {
    pub fn new(weights: BTreeMap<AgentName, f64>, validator: ConsistencyValidator) -> Self {
        Self { weights, validator }
    }

    fn weight(&self, agent: AgentName) -> f64 {
        self.weights.get(&agent).copied().unwrap_or(1.0)
    }

    pub fn aggregate(&self, snapshot: &ContextSnapshot) -> f64 {
        self.breakdown(snapshot).aggregate
    }

    pub fn breakdown(&self, snapshot: &ContextSnapshot) -> ConfidenceBreakdown {
        let per_agent: BTreeMap<AgentName, f64> = snapshot
            .contributions
            .values()
            .map(|c| (c.agent, c.confidence.clamp(0.0, 1.0)))
            .collect();

        let (weighted_sum, total_weight) = per_agent
            .iter()
            .fold((0.0, 0.0), |(sum, total), (agent, confidence)| {
                let w = self.weight(*agent);
                (sum + w * confidence, total + w)
            });
        let weighted_mean = if total_weight > 0.0 {
            weighted_sum / total_weight
        } else {
            0.0
        };

        let check_pass_fraction = self
            .validator
            .validate(snapshot, ValidationLevel::All)
            .confidence_score;

        ConfidenceBreakdown {
            per_agent,
            weighted_mean,
            check_pass_fraction,
            aggregate: weighted_mean * check_pass_fraction,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfidenceConfig;
    use crate::context::{ContextManager, ContributionDraft};
    use crate::domain::{FoundationData, TicketInfo, VersionContext, WorkItem};
    use crate::evidence_gate::EvidencePolicy;
    use chrono::Utc;
    use std::sync::Arc;

    fn snapshot_with(confidences: &[(AgentName, Option<f64>)]) -> ContextSnapshot {
        let m = ContextManager::new(
            Arc::new(EvidencePolicy::permissive()),
            ConfidenceConfig::default(),
        );
        let mut s = m
            .bootstrap(
                WorkItem::new("T-1"),
                FoundationData {
                    ticket_info: TicketInfo {
                        id: "T-1".into(),
                        summary: "s".into(),
                        status: "New".into(),
                        fields: BTreeMap::new(),
                    },
                    version_context: VersionContext::default(),
                    environment_baseline: BTreeMap::new(),
                },
            )
            .unwrap();
        for (agent, c) in confidences {
            s = match c {
                Some(c) => m
                    .inherit(&s, *agent, ContributionDraft::new().with_reported_confidence(*c))
                    .unwrap(),
                None => m.record_dropped(&s, *agent, "timeout", Utc::now()).unwrap(),
            };
        }
        s
    }

    #[test]
    fn empty_snapshot_scores_zero() {
        let s = snapshot_with(&[]);
        assert_eq!(ConfidenceAggregator::default().aggregate(&s), 0.0);
    }

    #[test]
    fn dropped_agent_lowers_mean() {
        let all = snapshot_with(&[
            (AgentName::JiraAnalysis, Some(1.0)),
            (AgentName::EnvironmentAnalysis, Some(1.0)),
        ]);
        let dropped = snapshot_with(&[
            (AgentName::JiraAnalysis, Some(1.0)),
            (AgentName::EnvironmentAnalysis, None),
        ]);
        let agg = ConfidenceAggregator::default();
        assert_eq!(agg.aggregate(&all), 1.0);
        assert_eq!(agg.aggregate(&dropped), 0.5);
    }

    #[test]
    fn weights_shift_the_mean() {
        let s = snapshot_with(&[
            (AgentName::JiraAnalysis, Some(1.0)),
            (AgentName::EnvironmentAnalysis, Some(0.5)),
        ]);
        let agg = ConfidenceAggregator::new(
            BTreeMap::from([(AgentName::JiraAnalysis, 3.0)]),
            ConsistencyValidator::default(),
        );
        let b = agg.breakdown(&s);
        assert!((b.weighted_mean - 0.875).abs() < 1e-9);
        assert_eq!(b.check_pass_fraction, 1.0);
    }
}
