//! Optional resolution advisors.
//!
//! An advisor proposes an action with an estimated success probability. The
//! resolver applies advice only above its confidence threshold and only when
//! the action actually decides the conflict; otherwise the rule table wins.
//! Contradictions are never shown to an advisor.

use std::collections::BTreeMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::domain::{CheckName, ConflictKind, ConflictRecord};
use crate::resolver::rules::ResolutionAction;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Advice {
    pub action: ResolutionAction,
    /// Estimated probability that `action` resolves the conflict, 0.0–1.0.
    pub confidence: f64,
}

pub trait ResolutionAdvisor: Send + Sync {
    fn advise(&self, conflict: &ConflictRecord) -> Option<Advice>;

    /// Feedback after an applied resolution was re-validated.
    fn record_outcome(&self, _conflict: &ConflictRecord, _action: ResolutionAction, _success: bool) {}
}

/// Advisor that never advises.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAdvisor;

impl ResolutionAdvisor for NoopAdvisor {
    fn advise(&self, _conflict: &ConflictRecord) -> Option<Advice> {
        None
    }
}

/// The shape of a conflict, independent of the concrete values involved.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConflictSignature {
    pub check: Option<CheckName>,
    pub kind: ConflictKind,
    pub involves_foundation: bool,
    pub fields: Vec<String>,
}

impl ConflictSignature {
    pub fn of(conflict: &ConflictRecord) -> Self {
        let mut fields = conflict.fields.clone();
        fields.sort();
        fields.dedup();
        Self {
            check: conflict.check,
            kind: conflict.kind,
            involves_foundation: conflict.involves_foundation(),
            fields,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeTally {
    pub successes: u32,
    pub failures: u32,
}

impl OutcomeTally {
    pub fn total(&self) -> u32 {
        self.successes + self.failures
    }

    pub fn success_rate(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            n => f64::from(self.successes) / f64::from(n),
        }
    }
}

/// Advisor backed by recorded (signature → action → outcome) history.
///
/// Advises the action with the best success rate among actions with at least
/// `min_samples` recorded outcomes for the same signature.
#[derive(Debug)]
pub struct PatternLibrary {
    history: RwLock<BTreeMap<ConflictSignature, BTreeMap<ResolutionAction, OutcomeTally>>>,
    min_samples: u32,
}

impl Default for PatternLibrary {
    fn default() -> Self {
        Self::new(3)
    }
}

impl PatternLibrary {
    pub fn new(min_samples: u32) -> Self {
        Self {
            history: RwLock::new(BTreeMap::new()),
            min_samples: min_samples.max(1),
        }
    }

    pub fn record(&self, signature: ConflictSignature, action: ResolutionAction, success: bool) {
        let mut history = self.history.write().unwrap_or_else(|e| e.into_inner());
        let tally = history
            .entry(signature)
            .or_default()
            .entry(action)
            .or_default();
        if success {
            tally.successes += 1;
        } else {
            tally.failures += 1;
        }
    }

    pub fn tally(&self, signature: &ConflictSignature, action: ResolutionAction) -> OutcomeTally {
        self.history
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(signature)
            .and_then(|actions| actions.get(&action))
            .copied()
            .unwrap_or_default()
    }
}

impl ResolutionAdvisor for PatternLibrary {
    fn advise(&self, conflict: &ConflictRecord) -> Option<Advice> {
        if conflict.kind == ConflictKind::Contradiction {
            return None;
        }
        let signature = ConflictSignature::of(conflict);
        let history = self.history.read().unwrap_or_else(|e| e.into_inner());
        let mut best: Option<Advice> = None;
        for (action, tally) in history.get(&signature)? {
            if tally.total() < self.min_samples || *action == ResolutionAction::Escalate {
                continue;
            }
            let confidence = tally.success_rate();
            if best.map_or(true, |b| confidence > b.confidence) {
                best = Some(Advice {
                    action: *action,
                    confidence,
                });
            }
        }
        best
    }

    fn record_outcome(&self, conflict: &ConflictRecord, action: ResolutionAction, success: bool) {
        if conflict.kind != ConflictKind::Contradiction {
            self.record(ConflictSignature::of(conflict), action, success);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AgentName, ConflictingValue, Severity, ValueSource};
    use chrono::Utc;
    use serde_json::json;

    fn status_conflict() -> ConflictRecord {
        ConflictRecord::new(
            Some(CheckName::StatusConsistency),
            ConflictKind::StatusMismatch,
            Severity::Critical,
            vec!["ticket_info.status".into()],
            vec![
                ConflictingValue::new(
                    ValueSource::Agent(AgentName::JiraAnalysis),
                    "ticket_info.status",
                    json!("Verified"),
                ),
                ConflictingValue::new(
                    ValueSource::Agent(AgentName::EnvironmentAnalysis),
                    "ticket_info.status",
                    json!("ON_QA"),
                ),
            ],
            Utc::now(),
        )
    }

    #[test]
    fn noop_never_advises() {
        assert!(NoopAdvisor.advise(&status_conflict()).is_none());
    }

    #[test]
    fn library_needs_min_samples() {
        let lib = PatternLibrary::new(3);
        let sig = ConflictSignature::of(&status_conflict());
        lib.record(sig.clone(), ResolutionAction::PreferMostRecent, true);
        lib.record(sig.clone(), ResolutionAction::PreferMostRecent, true);
        assert!(lib.advise(&status_conflict()).is_none());
        lib.record(sig, ResolutionAction::PreferMostRecent, true);
        let advice = lib.advise(&status_conflict()).unwrap();
        assert_eq!(advice.action, ResolutionAction::PreferMostRecent);
        assert_eq!(advice.confidence, 1.0);
    }

    #[test]
    fn library_prefers_higher_success_rate() {
        let lib = PatternLibrary::new(2);
        let sig = ConflictSignature::of(&status_conflict());
        for ok in [true, false, false] {
            lib.record(sig.clone(), ResolutionAction::PreferMostRecent, ok);
        }
        for ok in [true, true, false] {
            lib.record(sig.clone(), ResolutionAction::PreferHighestConfidence, ok);
        }
        let advice = lib.advise(&status_conflict()).unwrap();
        assert_eq!(advice.action, ResolutionAction::PreferHighestConfidence);
        assert!((advice.confidence - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(
            lib.tally(&sig, ResolutionAction::PreferMostRecent),
            OutcomeTally {
                successes: 1,
                failures: 2
            }
        );
    }

    #[test]
    fn signature_ignores_values() {
        let mut other = status_conflict();
        other.values[0].value = json!("Closed");
        assert_eq!(
            ConflictSignature::of(&status_conflict()),
            ConflictSignature::of(&other)
        );
    }
}
