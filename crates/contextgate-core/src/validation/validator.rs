//! Consistency Validator.

use std::collections::BTreeMap;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{default_check_severity, PipelineConfig};
use crate::domain::{CheckName, CheckOutcome, ConflictRecord, ContextSnapshot, Severity};
use crate::validation::checks::run_check;

/// Which checks to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    /// Only checks whose failure blocks phase progression.
    Critical,
    /// Every check; used for end-of-run reporting.
    All,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub level: ValidationLevel,
    pub checks: Vec<CheckOutcome>,
    /// One record per failed check not already reconciled.
    pub conflicts: Vec<ConflictRecord>,
    /// Passed checks over checks run (1.0 when none ran). Advisory only.
    pub confidence_score: f64,
}

impl ValidationResult {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn blocking(&self) -> impl Iterator<Item = &ConflictRecord> {
        self.conflicts.iter().filter(|c| c.is_blocking())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatorConfig {
    pub staleness_window: Duration,
    pub severity: BTreeMap<CheckName, Severity>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            staleness_window: Duration::hours(1),
            severity: CheckName::ALL
                .iter()
                .map(|c| (*c, default_check_severity(*c)))
                .collect(),
        }
    }
}

impl ValidatorConfig {
    pub fn from_pipeline(config: &PipelineConfig) -> Self {
        Self {
            staleness_window: config.staleness_window(),
            severity: CheckName::ALL
                .iter()
                .map(|c| (*c, config.severity(*c)))
                .collect(),
        }
    }

    pub fn severity(&self, check: CheckName) -> Severity {
        self.severity
            .get(&check)
            .copied()
            .unwrap_or_else(|| default_check_severity(check))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConsistencyValidator {
    config: ValidatorConfig,
}

impl ConsistencyValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Checks that `level` selects, in battery order.
    pub fn checks_for(&self, level: ValidationLevel) -> Vec<CheckName> {
        CheckName::ALL
            .into_iter()
            .filter(|c| match level {
                ValidationLevel::All => true,
                ValidationLevel::Critical => self.config.severity(*c) == Severity::Critical,
            })
            .collect()
    }

    /// Run the battery at `level` against `snapshot`.
    ///
    /// A failing check whose record is already present in the snapshot as
    /// resolved counts as passed and reports `reconciled`.
    pub fn validate(&self, snapshot: &ContextSnapshot, level: ValidationLevel) -> ValidationResult {
        let checks = self.checks_for(level);
        let mut outcomes = Vec::with_capacity(checks.len());
        let mut conflicts = Vec::new();

        for check in checks {
            let severity = self.config.severity(check);
            match run_check(check, snapshot, severity, self.config.staleness_window) {
                None => outcomes.push(CheckOutcome {
                    check,
                    passed: true,
                    reconciled: false,
                }),
                Some(record) => {
                    let reconciled = snapshot
                        .conflict(&record.id)
                        .is_some_and(|prior| prior.is_resolved());
                    outcomes.push(CheckOutcome {
                        check,
                        passed: reconciled,
                        reconciled,
                    });
                    if !reconciled {
                        conflicts.push(record);
                    }
                }
            }
        }

        let passed = outcomes.iter().filter(|o| o.passed).count();
        let confidence_score = if outcomes.is_empty() {
            1.0
        } else {
            passed as f64 / outcomes.len() as f64
        };
        debug!(
            version = snapshot.metadata.version,
            ?level,
            run = outcomes.len(),
            passed,
            "validation complete"
        );
        ValidationResult {
            level,
            checks: outcomes,
            conflicts,
            confidence_score,
        }
    }
}
