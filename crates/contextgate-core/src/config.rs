//! Pipeline configuration.
//!
//! Every field has a default, so an empty TOML document is a valid config.
//!
//! ```toml
//! agent_timeout_ms = 60000
//! staleness_window_secs = 1800
//!
//! [confidence]
//! base = 0.75
//!
//! [agent_weights]
//! code_investigation = 2.0
//!
//! [evidence_policy]
//! schema_field = ["schema_definition"]
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{AgentName, CheckName, ContextError, Result, Severity};
use crate::evidence_gate::EvidencePolicy;
use crate::scheduler::PhasePlan;

/// Contribution confidence scoring parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceConfig {
    /// Used when the agent reports no confidence of its own.
    pub base: f64,
    /// Added when every enhancement carries at least one evidence record.
    pub evidence_bonus: f64,
    /// Added when the agent reports validating its own inputs.
    pub self_validation_bonus: f64,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            base: 0.8,
            evidence_bonus: 0.1,
            self_validation_bonus: 0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Wall-clock budget for one agent attempt (milliseconds).
    pub agent_timeout_ms: u64,
    /// Attempts per agent per phase, including the first (2 = one retry).
    pub max_attempts: u32,
    /// Maximum age of a contribution relative to the newest one (seconds).
    pub staleness_window_secs: u64,
    pub confidence: ConfidenceConfig,
    /// Minimum advisor confidence for advice to be applied.
    pub advisor_threshold: f64,
    /// Aggregation weight per agent; missing agents weigh 1.0.
    pub agent_weights: BTreeMap<AgentName, f64>,
    /// Severity overrides per consistency check.
    pub check_severity: BTreeMap<CheckName, Severity>,
    pub evidence_policy: EvidencePolicy,
    pub phases: PhasePlan,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            agent_timeout_ms: 120_000,
            max_attempts: 2,
            staleness_window_secs: 3600,
            confidence: ConfidenceConfig::default(),
            advisor_threshold: 0.85,
            agent_weights: BTreeMap::new(),
            check_severity: BTreeMap::new(),
            evidence_policy: EvidencePolicy::standard(),
            phases: PhasePlan::default(),
        }
    }
}

/// Severity a check carries when not overridden.
pub fn default_check_severity(check: CheckName) -> Severity {
    match check {
        CheckName::StatusConsistency | CheckName::VersionConsistency => Severity::Critical,
        CheckName::EnvironmentConsistency | CheckName::Freshness => Severity::Advisory,
    }
}

impl PipelineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_millis(self.agent_timeout_ms)
    }

    pub fn staleness_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.staleness_window_secs).unwrap_or(i64::MAX))
    }

    pub fn severity(&self, check: CheckName) -> Severity {
        self.check_severity
            .get(&check)
            .copied()
            .unwrap_or_else(|| default_check_severity(check))
    }

    pub fn weight(&self, agent: AgentName) -> f64 {
        self.agent_weights.get(&agent).copied().unwrap_or(1.0)
    }

    pub fn with_agent_timeout(mut self, timeout: Duration) -> Self {
        self.agent_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_agent_weight(mut self, agent: AgentName, weight: f64) -> Self {
        self.agent_weights.insert(agent, weight);
        self
    }

    pub fn with_check_severity(mut self, check: CheckName, severity: Severity) -> Self {
        self.check_severity.insert(check, severity);
        self
    }

    pub fn with_advisor_threshold(mut self, threshold: f64) -> Self {
        self.advisor_threshold = threshold;
        self
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.agent_timeout_ms == 0 {
            return Err(invalid("agent_timeout_ms must be greater than zero"));
        }
        if self.max_attempts == 0 {
            return Err(invalid("max_attempts must be at least 1"));
        }
        if !in_unit_range(self.advisor_threshold) {
            return Err(invalid("advisor_threshold must be within [0, 1]"));
        }
        let c = &self.confidence;
        for (name, v) in [
            ("confidence.base", c.base),
            ("confidence.evidence_bonus", c.evidence_bonus),
            ("confidence.self_validation_bonus", c.self_validation_bonus),
        ] {
            if !in_unit_range(v) {
                return Err(invalid(&format!("{name} must be within [0, 1]")));
            }
        }
        if let Some((agent, w)) = self
            .agent_weights
            .iter()
            .find(|(_, w)| !w.is_finite() || **w < 0.0)
        {
            return Err(invalid(&format!(
                "agent_weights.{agent} must be a non-negative number, got {w}"
            )));
        }
        self.phases.validate()
    }
}

fn in_unit_range(v: f64) -> bool {
    (0.0..=1.0).contains(&v)
}

fn invalid(msg: &str) -> ContextError {
    ContextError::InvalidConfig(msg.to_string())
}
