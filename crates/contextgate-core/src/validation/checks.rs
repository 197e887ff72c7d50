//! The consistency check battery.
//!
//! Each check inspects the active contributions of one snapshot and returns
//! at most one [`ConflictRecord`]; every disagreeing value is recorded
//! verbatim. Iteration follows the snapshot's ordered maps, so the output is
//! a pure function of the snapshot.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Duration;
use serde_json::json;

use crate::domain::{
    snapshot::normalize_fact_path, AgentName, CheckName, ConflictKind, ConflictRecord,
    ConflictingValue, ContextSnapshot, Enhancement, Severity, ValueSource,
};

/// Field name under which the declared environment version is recorded.
pub const ENVIRONMENT_VERSION_FIELD: &str = "version_context.environment_version";

pub(crate) fn run_check(
    check: CheckName,
    snapshot: &ContextSnapshot,
    severity: Severity,
    staleness_window: Duration,
) -> Option<ConflictRecord> {
    match check {
        CheckName::StatusConsistency => status_consistency(snapshot, severity),
        CheckName::VersionConsistency => version_consistency(snapshot, severity),
        CheckName::EnvironmentConsistency => environment_consistency(snapshot, severity),
        CheckName::Freshness => freshness(snapshot, severity, staleness_window),
    }
}

/// Active enhancements in agent order, then key order.
fn enhancements(snapshot: &ContextSnapshot) -> impl Iterator<Item = (AgentName, &Enhancement)> {
    snapshot
        .active_contributions()
        .flat_map(|c| c.enhancements.values().map(move |e| (c.agent, e)))
}

fn record(
    snapshot: &ContextSnapshot,
    check: CheckName,
    kind: ConflictKind,
    severity: Severity,
    fields: Vec<String>,
    values: Vec<ConflictingValue>,
) -> ConflictRecord {
    ConflictRecord::new(
        Some(check),
        kind,
        severity,
        fields,
        values,
        snapshot.metadata.updated_at,
    )
}

/// Agents must not assert different statuses for the same fact.
fn status_consistency(snapshot: &ContextSnapshot, severity: Severity) -> Option<ConflictRecord> {
    let mut by_fact: BTreeMap<&str, Vec<(AgentName, &str)>> = BTreeMap::new();
    for (agent, e) in enhancements(snapshot) {
        if let Enhancement::StatusAssertion { fact, status } = e {
            by_fact
                .entry(normalize_fact_path(fact))
                .or_default()
                .push((agent, status.as_str()));
        }
    }

    let mut fields = Vec::new();
    let mut values = Vec::new();
    for (fact, claims) in by_fact {
        let distinct: BTreeSet<&str> = claims.iter().map(|(_, s)| *s).collect();
        if distinct.len() < 2 {
            continue;
        }
        fields.push(fact.to_string());
        for (agent, status) in claims {
            values.push(ConflictingValue::new(
                ValueSource::Agent(agent),
                fact,
                json!(status),
            ));
        }
    }
    if fields.is_empty() {
        return None;
    }
    Some(record(
        snapshot,
        CheckName::StatusConsistency,
        ConflictKind::StatusMismatch,
        severity,
        fields,
        values,
    ))
}

/// Detected versions must match the declared one unless an agent explicitly
/// reconciled that exact pair. With nothing declared, detections must agree.
fn version_consistency(snapshot: &ContextSnapshot, severity: Severity) -> Option<ConflictRecord> {
    let declared = snapshot
        .foundation
        .version_context
        .environment_version
        .as_deref();

    let mut reconciled: BTreeSet<(&str, &str)> = BTreeSet::new();
    let mut detected: Vec<(AgentName, &str)> = Vec::new();
    for (agent, e) in enhancements(snapshot) {
        match e {
            Enhancement::DetectedVersion { version } => detected.push((agent, version.as_str())),
            Enhancement::VersionReconciliation {
                declared: from,
                detected: to,
                ..
            } => {
                reconciled.insert((from.as_str(), to.as_str()));
            }
            _ => {}
        }
    }

    let mut values = Vec::new();
    match declared {
        Some(declared) => {
            let mismatched: Vec<_> = detected
                .iter()
                .filter(|(_, v)| *v != declared && !reconciled.contains(&(declared, *v)))
                .collect();
            if mismatched.is_empty() {
                return None;
            }
            values.push(ConflictingValue::new(
                ValueSource::Foundation,
                ENVIRONMENT_VERSION_FIELD,
                json!(declared),
            ));
            for (agent, v) in mismatched {
                values.push(ConflictingValue::new(
                    ValueSource::Agent(*agent),
                    "detected_version",
                    json!(v),
                ));
            }
        }
        None => {
            let distinct: BTreeSet<&str> = detected.iter().map(|(_, v)| *v).collect();
            if distinct.len() < 2 {
                return None;
            }
            for (agent, v) in &detected {
                values.push(ConflictingValue::new(
                    ValueSource::Agent(*agent),
                    "detected_version",
                    json!(v),
                ));
            }
        }
    }
    Some(record(
        snapshot,
        CheckName::VersionConsistency,
        ConflictKind::ValueMismatch,
        severity,
        vec![ENVIRONMENT_VERSION_FIELD.to_string()],
        values,
    ))
}

/// Observations must match the environment baseline and each other.
fn environment_consistency(
    snapshot: &ContextSnapshot,
    severity: Severity,
) -> Option<ConflictRecord> {
    let mut by_key: BTreeMap<&str, Vec<(AgentName, &str)>> = BTreeMap::new();
    for (agent, e) in enhancements(snapshot) {
        if let Enhancement::EnvironmentObservation { key, value } = e {
            by_key
                .entry(key.as_str())
                .or_default()
                .push((agent, value.as_str()));
        }
    }

    let mut fields = Vec::new();
    let mut values = Vec::new();
    for (key, observed) in by_key {
        let baseline = snapshot.foundation.environment_baseline.get(key);
        let mut distinct: BTreeSet<&str> = observed.iter().map(|(_, v)| *v).collect();
        if let Some(b) = baseline {
            distinct.insert(b.as_str());
        }
        if distinct.len() < 2 {
            continue;
        }
        let field = format!("environment_baseline.{key}");
        if let Some(b) = baseline {
            values.push(ConflictingValue::new(
                ValueSource::Foundation,
                field.clone(),
                json!(b),
            ));
        }
        for (agent, v) in observed {
            values.push(ConflictingValue::new(
                ValueSource::Agent(agent),
                field.clone(),
                json!(v),
            ));
        }
        fields.push(field);
    }
    if fields.is_empty() {
        return None;
    }
    Some(record(
        snapshot,
        CheckName::EnvironmentConsistency,
        ConflictKind::ValueMismatch,
        severity,
        fields,
        values,
    ))
}

/// No active contribution may trail the newest one by more than `window`.
fn freshness(
    snapshot: &ContextSnapshot,
    severity: Severity,
    window: Duration,
) -> Option<ConflictRecord> {
    let newest = snapshot
        .active_contributions()
        .max_by_key(|c| (c.timestamp, std::cmp::Reverse(c.agent)))?;
    let stale: Vec<_> = snapshot
        .active_contributions()
        .filter(|c| newest.timestamp - c.timestamp > window)
        .collect();
    if stale.is_empty() {
        return None;
    }

    let mut values = vec![ConflictingValue::new(
        ValueSource::Agent(newest.agent),
        "timestamp",
        json!(newest.timestamp),
    )];
    values.extend(stale.iter().map(|c| {
        ConflictingValue::new(ValueSource::Agent(c.agent), "timestamp", json!(c.timestamp))
    }));
    Some(record(
        snapshot,
        CheckName::Freshness,
        ConflictKind::Staleness,
        severity,
        vec!["timestamp".to_string()],
        values,
    ))
}
