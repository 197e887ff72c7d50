//! Error taxonomy for context propagation.
//!
//! Soft outcomes (insufficient evidence, timeouts, consistency conflicts) are
//! values, not errors: they become `BlockReason`s, dropped contributions, or
//! `ConflictRecord`s. Only contract failures and hard stops surface here.

use serde::{Deserialize, Serialize};

use super::agent::AgentName;

/// Why a contribution was refused entry into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// A gated claim lacks evidence of an accepted kind. Retried once.
    InsufficientEvidence,
    /// New evidence contradicts evidence already accepted. Halts the run.
    RealityContradiction,
    /// The agent exceeded its time budget. Retried once.
    Timeout,
}

impl BlockReason {
    /// Whether this block stops the run rather than dropping a contribution.
    pub fn is_hard(self) -> bool {
        matches!(self, BlockReason::RealityContradiction)
    }
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BlockReason::InsufficientEvidence => "insufficient_evidence",
            BlockReason::RealityContradiction => "reality_contradiction",
            BlockReason::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// Errors produced by the context layer.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("evidence missing for {agent}: gated enhancements {keys:?} carry no evidence")]
    EvidenceMissing { agent: AgentName, keys: Vec<String> },

    #[error("{agent} already holds a pending contribution")]
    ContributionPending { agent: AgentName },

    #[error("invalid contribution: {0}")]
    InvalidContribution(String),

    #[error("invalid foundation: {0}")]
    InvalidFoundation(String),

    #[error("fork conflict: {agent} was written on both sides of version {base_version}")]
    ForkConflict { agent: AgentName, base_version: u64 },

    #[error("stale snapshot: derived from version {parent:?}, head is {head}")]
    StaleSnapshot { parent: Option<u64>, head: u64 },

    #[error("conflict not found: {0}")]
    ConflictNotFound(String),

    #[error("invalid resolution: {0}")]
    InvalidResolution(String),

    #[error("scheduler invariant violated: {0}")]
    SchedulerInvariantViolation(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] contextgate_state::StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for context operations.
pub type Result<T> = std::result::Result<T, ContextError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evidence_missing_names_agent_and_keys() {
        let err = ContextError::EvidenceMissing {
            agent: AgentName::JiraAnalysis,
            keys: vec!["schema_field".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("jira_analysis"));
        assert!(msg.contains("schema_field"));
    }

    #[test]
    fn only_contradiction_is_hard() {
        assert!(BlockReason::RealityContradiction.is_hard());
        assert!(!BlockReason::InsufficientEvidence.is_hard());
        assert!(!BlockReason::Timeout.is_hard());
    }
}
