//! Conflict records: structured disagreements retained for audit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::agent::AgentName;

/// The fixed battery of consistency checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckName {
    StatusConsistency,
    VersionConsistency,
    EnvironmentConsistency,
    Freshness,
}

impl CheckName {
    pub const ALL: [CheckName; 4] = [
        CheckName::StatusConsistency,
        CheckName::VersionConsistency,
        CheckName::EnvironmentConsistency,
        CheckName::Freshness,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CheckName::StatusConsistency => "status_consistency",
            CheckName::VersionConsistency => "version_consistency",
            CheckName::EnvironmentConsistency => "environment_consistency",
            CheckName::Freshness => "freshness",
        }
    }
}

impl std::fmt::Display for CheckName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an unresolved conflict blocks phase progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Advisory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictKind {
    ValueMismatch,
    StatusMismatch,
    Staleness,
    MissingEvidence,
    Contradiction,
}

impl ConflictKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictKind::ValueMismatch => "value-mismatch",
            ConflictKind::StatusMismatch => "status-mismatch",
            ConflictKind::Staleness => "staleness",
            ConflictKind::MissingEvidence => "missing-evidence",
            ConflictKind::Contradiction => "contradiction",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionStatus {
    Unresolved,
    AutoResolved,
    ManuallyOverridden,
}

/// Where a conflicting value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    Foundation,
    Agent(AgentName),
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::Foundation => f.write_str("foundation"),
            ValueSource::Agent(a) => write!(f, "agent:{a}"),
        }
    }
}

/// One side of a conflict, recorded verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictingValue {
    pub source: ValueSource,
    pub field: String,
    pub value: serde_json::Value,
}

impl ConflictingValue {
    pub fn new(source: ValueSource, field: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            source,
            field: field.into(),
            value,
        }
    }
}

/// A structured disagreement between pieces of context state.
///
/// `id` is derived from the check, kind, fields and values only, so the same
/// disagreement always yields the same id. Records are never deleted; only
/// the resolution fields change, and only through the conflict resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: String,
    /// Consistency check that raised this conflict; `None` for evidence gate records.
    pub check: Option<CheckName>,
    pub kind: ConflictKind,
    pub severity: Severity,
    pub fields: Vec<String>,
    pub values: Vec<ConflictingValue>,
    pub detected_at: DateTime<Utc>,
    pub resolution: ResolutionStatus,
    pub resolution_rationale: Option<String>,
    pub resolved_value: Option<serde_json::Value>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ConflictRecord {
    pub fn new(
        check: Option<CheckName>,
        kind: ConflictKind,
        severity: Severity,
        fields: Vec<String>,
        values: Vec<ConflictingValue>,
        detected_at: DateTime<Utc>,
    ) -> Self {
        let id = conflict_id(check, kind, &fields, &values);
        Self {
            id,
            check,
            kind,
            severity,
            fields,
            values,
            detected_at,
            resolution: ResolutionStatus::Unresolved,
            resolution_rationale: None,
            resolved_value: None,
            resolved_at: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution != ResolutionStatus::Unresolved
    }

    /// Unresolved and critical: blocks phase progression.
    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Critical && !self.is_resolved()
    }

    /// Agents named among the conflicting values, deduplicated.
    pub fn agents(&self) -> Vec<AgentName> {
        let mut agents: Vec<AgentName> = self
            .values
            .iter()
            .filter_map(|v| match v.source {
                ValueSource::Agent(a) => Some(a),
                ValueSource::Foundation => None,
            })
            .collect();
        agents.sort();
        agents.dedup();
        agents
    }

    pub fn involves_foundation(&self) -> bool {
        self.values
            .iter()
            .any(|v| v.source == ValueSource::Foundation)
    }
}

fn conflict_id(
    check: Option<CheckName>,
    kind: ConflictKind,
    fields: &[String],
    values: &[ConflictingValue],
) -> String {
    use sha2::Digest as _;
    let mut hasher = sha2::Sha256::new();
    hasher.update(check.map(CheckName::as_str).unwrap_or("evidence_gate"));
    hasher.update([0u8]);
    hasher.update(kind.as_str());
    for field in fields {
        hasher.update([0u8]);
        hasher.update(field);
    }
    for v in values {
        hasher.update([1u8]);
        hasher.update(v.source.to_string());
        hasher.update([0u8]);
        hasher.update(&v.field);
        hasher.update([0u8]);
        hasher.update(v.value.to_string());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values() -> Vec<ConflictingValue> {
        vec![
            ConflictingValue::new(
                ValueSource::Foundation,
                "version_context.environment_version",
                json!("2.14"),
            ),
            ConflictingValue::new(
                ValueSource::Agent(AgentName::CodeInvestigation),
                "detected_version",
                json!("2.15"),
            ),
        ]
    }

    #[test]
    fn id_is_stable_for_identical_disagreement() {
        let at = Utc::now();
        let a = ConflictRecord::new(
            Some(CheckName::VersionConsistency),
            ConflictKind::ValueMismatch,
            Severity::Critical,
            vec!["version_context.environment_version".into()],
            values(),
            at,
        );
        let b = ConflictRecord::new(
            Some(CheckName::VersionConsistency),
            ConflictKind::ValueMismatch,
            Severity::Critical,
            vec!["version_context.environment_version".into()],
            values(),
            at + chrono::Duration::seconds(5),
        );
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn id_changes_with_values() {
        let at = Utc::now();
        let mut other = values();
        other[1].value = json!("2.16");
        let a = ConflictRecord::new(
            Some(CheckName::VersionConsistency),
            ConflictKind::ValueMismatch,
            Severity::Critical,
            vec![],
            values(),
            at,
        );
        let b = ConflictRecord::new(
            Some(CheckName::VersionConsistency),
            ConflictKind::ValueMismatch,
            Severity::Critical,
            vec![],
            other,
            at,
        );
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn new_record_is_blocking_when_critical() {
        let r = ConflictRecord::new(
            Some(CheckName::VersionConsistency),
            ConflictKind::ValueMismatch,
            Severity::Critical,
            vec![],
            values(),
            Utc::now(),
        );
        assert!(r.is_blocking());
        assert!(r.involves_foundation());
        assert_eq!(r.agents(), vec![AgentName::CodeInvestigation]);
    }

    #[test]
    fn kind_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&ConflictKind::StatusMismatch).unwrap(),
            "\"status-mismatch\""
        );
        assert_eq!(
            serde_json::to_string(&ResolutionStatus::ManuallyOverridden).unwrap(),
            "\"manually-overridden\""
        );
    }
}
