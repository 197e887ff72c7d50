//! Resolution types and the deterministic rule table.

use serde::{Deserialize, Serialize};

use crate::domain::{
    AgentName, ConflictKind, ConflictRecord, ContextSnapshot, ResolutionStatus, ValueSource,
};

/// What a resolution does to the conflicting values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionAction {
    /// Keep the foundation value; supersede disagreeing agents.
    PreferFoundation,
    /// Keep the newest contribution's value; supersede the older ones.
    PreferMostRecent,
    /// Keep the single most confident contribution's value.
    PreferHighestConfidence,
    /// The gated claim stays out of the store; nothing to merge.
    AcceptDrop,
    /// Needs a human (or a confident advisor) to decide.
    Escalate,
    /// An operator decided.
    ManualOverride,
}

impl ResolutionAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ResolutionAction::PreferFoundation => "prefer_foundation",
            ResolutionAction::PreferMostRecent => "prefer_most_recent",
            ResolutionAction::PreferHighestConfidence => "prefer_highest_confidence",
            ResolutionAction::AcceptDrop => "accept_drop",
            ResolutionAction::Escalate => "escalate",
            ResolutionAction::ManualOverride => "manual_override",
        }
    }
}

/// Who produced a resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum ResolutionOrigin {
    RuleTable,
    Advisor { confidence: f64 },
    Manual { operator: String },
}

/// A proposed or applied outcome for one conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub conflict_id: String,
    pub status: ResolutionStatus,
    pub action: ResolutionAction,
    pub resolved_value: Option<serde_json::Value>,
    /// Contributions to mark superseded when applied.
    pub superseded: Vec<AgentName>,
    pub rationale: String,
    pub origin: ResolutionOrigin,
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        self.status != ResolutionStatus::Unresolved
    }

    fn escalate(conflict: &ConflictRecord, rationale: impl Into<String>) -> Self {
        Self {
            conflict_id: conflict.id.clone(),
            status: ResolutionStatus::Unresolved,
            action: ResolutionAction::Escalate,
            resolved_value: None,
            superseded: Vec::new(),
            rationale: rationale.into(),
            origin: ResolutionOrigin::RuleTable,
        }
    }
}

/// Deterministic resolution per conflict kind.
///
/// | kind | action |
/// |------|--------|
/// | contradiction | escalate, never auto-resolved |
/// | staleness | prefer most recent |
/// | status-mismatch | escalate |
/// | value-mismatch on a foundation fact | escalate |
/// | value-mismatch between agents | prefer highest confidence, else escalate |
/// | missing-evidence | accept the drop |
pub fn rule_table(conflict: &ConflictRecord, snapshot: &ContextSnapshot) -> Resolution {
    match conflict.kind {
        ConflictKind::Contradiction => Resolution::escalate(
            conflict,
            "evidence contradicts previously accepted evidence; never auto-resolved",
        ),
        ConflictKind::StatusMismatch => Resolution::escalate(
            conflict,
            "agents disagree on a status fact; manual resolution required",
        ),
        ConflictKind::ValueMismatch if conflict.involves_foundation() => Resolution::escalate(
            conflict,
            "foundation facts are singular; manual resolution required",
        ),
        ConflictKind::ValueMismatch => {
            materialize(ResolutionAction::PreferHighestConfidence, conflict, snapshot)
                .unwrap_or_else(|| {
                    Resolution::escalate(conflict, "no single most confident contribution")
                })
        }
        ConflictKind::Staleness => materialize(ResolutionAction::PreferMostRecent, conflict, snapshot)
            .unwrap_or_else(|| Resolution::escalate(conflict, "no unique most recent contribution")),
        ConflictKind::MissingEvidence => {
            materialize(ResolutionAction::AcceptDrop, conflict, snapshot)
                .unwrap_or_else(|| Resolution::escalate(conflict, "cannot accept drop"))
        }
    }
}

/// Turn `action` into a concrete resolution for `conflict`, if it applies.
///
/// Returns `None` when the action cannot decide this conflict (no unique
/// winner, action does not fit the kind, or the action is `Escalate`).
pub fn materialize(
    action: ResolutionAction,
    conflict: &ConflictRecord,
    snapshot: &ContextSnapshot,
) -> Option<Resolution> {
    let resolved = |value, superseded, rationale: String| Resolution {
        conflict_id: conflict.id.clone(),
        status: ResolutionStatus::AutoResolved,
        action,
        resolved_value: value,
        superseded,
        rationale,
        origin: ResolutionOrigin::RuleTable,
    };

    match action {
        ResolutionAction::PreferFoundation => {
            let foundation = conflict
                .values
                .iter()
                .find(|v| v.source == ValueSource::Foundation)?;
            let losers: Vec<AgentName> = conflict
                .values
                .iter()
                .filter_map(|v| match v.source {
                    ValueSource::Agent(a) if v.value != foundation.value => Some(a),
                    _ => None,
                })
                .collect::<std::collections::BTreeSet<_>>()
                .into_iter()
                .collect();
            Some(resolved(
                Some(foundation.value.clone()),
                losers,
                format!("kept foundation value for {}", foundation.field),
            ))
        }
        ResolutionAction::PreferMostRecent => {
            if conflict.involves_foundation() {
                return None;
            }
            let winner = unique_max(conflict, snapshot, |c| c.timestamp)?;
            Some(resolved(
                agent_value(conflict, winner),
                losers_of(conflict, winner),
                format!("kept most recent contribution from {winner}"),
            ))
        }
        ResolutionAction::PreferHighestConfidence => {
            if conflict.involves_foundation() {
                return None;
            }
            let winner = unique_max(conflict, snapshot, |c| ordered_f64(c.confidence))?;
            Some(resolved(
                agent_value(conflict, winner),
                losers_of(conflict, winner),
                format!("kept highest-confidence contribution from {winner}"),
            ))
        }
        ResolutionAction::AcceptDrop => {
            if conflict.kind != ConflictKind::MissingEvidence {
                return None;
            }
            let retried = conflict.agents().into_iter().all(|a| {
                snapshot
                    .contribution(a)
                    .is_some_and(|c| c.is_active())
            });
            let rationale = if retried {
                "evidence supplied on retry; unevidenced claim was never merged"
            } else {
                "unevidenced claim dropped; run continues with reduced confidence"
            };
            Some(resolved(None, Vec::new(), rationale.to_string()))
        }
        ResolutionAction::Escalate | ResolutionAction::ManualOverride => None,
    }
}

/// The one agent in `conflict` maximizing `key` over its snapshot contribution.
fn unique_max<K, F>(conflict: &ConflictRecord, snapshot: &ContextSnapshot, key: F) -> Option<AgentName>
where
    K: Ord,
    F: Fn(&crate::domain::Contribution) -> K,
{
    let mut scored: Vec<(K, AgentName)> = conflict
        .agents()
        .into_iter()
        .filter_map(|a| snapshot.contribution(a).map(|c| (key(c), a)))
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    match scored.as_slice() {
        [(_, only)] => Some(*only),
        [(top, winner), (next, _), ..] if top != next => Some(*winner),
        _ => None,
    }
}

fn losers_of(conflict: &ConflictRecord, winner: AgentName) -> Vec<AgentName> {
    conflict
        .agents()
        .into_iter()
        .filter(|a| *a != winner)
        .collect()
}

fn agent_value(conflict: &ConflictRecord, agent: AgentName) -> Option<serde_json::Value> {
    conflict
        .values
        .iter()
        .find(|v| v.source == ValueSource::Agent(agent))
        .map(|v| v.value.clone())
}

/// Total order over confidences in [0, 1] (NaN sorts lowest).
fn ordered_f64(v: f64) -> i64 {
    if v.is_nan() {
        i64::MIN
    } else {
        (v * 1e9).round() as i64
    }
}
