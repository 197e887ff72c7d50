//! Conflict Resolver.
//!
//! - [`rules`]: deterministic rule table, always available
//! - [`advisor`]: optional advice (`NoopAdvisor`, `PatternLibrary`)
//! - [`escalation`]: manual decisions for what neither may decide
//!
//! The resolver is the only component that changes a `ConflictRecord`'s
//! resolution fields, and it does so by producing a new snapshot.

pub mod advisor;
pub mod escalation;
pub mod rules;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::domain::{
    ConflictKind, ConflictRecord, ContextError, ContextSnapshot, ResolutionStatus, Result,
};

pub use advisor::{
    Advice, ConflictSignature, NoopAdvisor, OutcomeTally, PatternLibrary, ResolutionAdvisor,
};
pub use escalation::{EscalationHandler, ManualDecision};
pub use rules::{materialize, rule_table, Resolution, ResolutionAction, ResolutionOrigin};

pub struct ConflictResolver {
    advisor: Arc<dyn ResolutionAdvisor>,
    advisor_threshold: f64,
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(Arc::new(NoopAdvisor), 0.85)
    }
}

impl std::fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictResolver")
            .field("advisor_threshold", &self.advisor_threshold)
            .finish_non_exhaustive()
    }
}

impl ConflictResolver {
    pub fn new(advisor: Arc<dyn ResolutionAdvisor>, advisor_threshold: f64) -> Self {
        Self {
            advisor,
            advisor_threshold,
        }
    }

    pub fn advisor(&self) -> &dyn ResolutionAdvisor {
        self.advisor.as_ref()
    }

    /// Propose a resolution for `conflict` against `snapshot`.
    ///
    /// Advice is taken only when it clears the threshold and decides the
    /// conflict; the rule table answers otherwise.
    pub fn resolve(&self, conflict: &ConflictRecord, snapshot: &ContextSnapshot) -> Resolution {
        if conflict.kind != ConflictKind::Contradiction {
            if let Some(advice) = self.advisor.advise(conflict) {
                if advice.confidence >= self.advisor_threshold {
                    if let Some(mut r) = materialize(advice.action, conflict, snapshot) {
                        r.origin = ResolutionOrigin::Advisor {
                            confidence: advice.confidence,
                        };
                        r.rationale = format!(
                            "{} (advised, p={:.2})",
                            r.rationale, advice.confidence
                        );
                        return r;
                    }
                }
                debug!(
                    conflict_id = %conflict.id,
                    action = advice.action.as_str(),
                    confidence = advice.confidence,
                    "advice not applied; using rule table"
                );
            }
        }
        rule_table(conflict, snapshot)
    }

    /// Record `resolution` onto its conflict in a new snapshot version.
    ///
    /// An unresolved (escalating) resolution only records its rationale.
    /// Changing an already resolved conflict is rejected.
    pub fn apply(
        &self,
        snapshot: &ContextSnapshot,
        resolution: &Resolution,
        now: DateTime<Utc>,
    ) -> Result<ContextSnapshot> {
        let current = snapshot
            .conflict(&resolution.conflict_id)
            .ok_or_else(|| ContextError::ConflictNotFound(resolution.conflict_id.clone()))?;
        if current.is_resolved() {
            return Err(ContextError::InvalidResolution(format!(
                "conflict {} is already {:?}",
                current.id, current.resolution
            )));
        }
        if current.kind == ConflictKind::Contradiction
            && resolution.status == ResolutionStatus::AutoResolved
        {
            return Err(ContextError::InvalidResolution(
                "contradictions are never auto-resolved".to_string(),
            ));
        }
        if let Some(agent) = resolution
            .superseded
            .iter()
            .find(|a| !snapshot.has_contribution(**a))
        {
            return Err(ContextError::InvalidResolution(format!(
                "cannot supersede {agent}: no contribution in snapshot"
            )));
        }

        let mut next = snapshot.derive(now);
        if let Some(record) = next
            .validation
            .conflicts
            .iter_mut()
            .find(|c| c.id == resolution.conflict_id)
        {
            record.resolution_rationale = Some(resolution.rationale.clone());
            if resolution.is_resolved() {
                record.resolution = resolution.status;
                record.resolved_value = resolution.resolved_value.clone();
                record.resolved_at = Some(now);
            }
        }
        if resolution.is_resolved() {
            for agent in &resolution.superseded {
                if let Some(c) = next.contributions.get_mut(agent) {
                    c.superseded = true;
                }
            }
        }
        debug!(
            conflict_id = %resolution.conflict_id,
            status = ?resolution.status,
            action = resolution.action.as_str(),
            version = next.metadata.version,
            "resolution applied"
        );
        Ok(next)
    }

    /// Record an operator's decision as `manually-overridden`.
    pub fn manual_override(
        &self,
        snapshot: &ContextSnapshot,
        conflict_id: &str,
        decision: ManualDecision,
        now: DateTime<Utc>,
    ) -> Result<ContextSnapshot> {
        if decision.rationale.trim().is_empty() {
            return Err(ContextError::InvalidResolution(
                "manual decisions require a rationale".to_string(),
            ));
        }
        let resolution = Resolution {
            conflict_id: conflict_id.to_string(),
            status: ResolutionStatus::ManuallyOverridden,
            action: ResolutionAction::ManualOverride,
            resolved_value: decision.value,
            superseded: decision.supersede,
            rationale: format!("{} (by {})", decision.rationale, decision.operator),
            origin: ResolutionOrigin::Manual {
                operator: decision.operator,
            },
        };
        self.apply(snapshot, &resolution, now)
    }
}
