//! Manual escalation for conflicts no rule or advisor may decide.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{AgentName, ConflictRecord, ContextSnapshot};

/// An operator's decision on one conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualDecision {
    pub operator: String,
    pub value: Option<serde_json::Value>,
    /// Contributions the operator rejects.
    #[serde(default)]
    pub supersede: Vec<AgentName>,
    pub rationale: String,
}

impl ManualDecision {
    pub fn new(operator: impl Into<String>, rationale: impl Into<String>) -> Self {
        Self {
            operator: operator.into(),
            value: None,
            supersede: Vec::new(),
            rationale: rationale.into(),
        }
    }

    pub fn with_value(mut self, value: serde_json::Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn superseding(mut self, agent: AgentName) -> Self {
        self.supersede.push(agent);
        self
    }
}

/// Consulted by the scheduler for critical conflicts left unresolved.
///
/// Returning `None` means nobody decided; the run halts.
#[async_trait]
pub trait EscalationHandler: Send + Sync {
    async fn escalate(
        &self,
        conflict: &ConflictRecord,
        snapshot: &ContextSnapshot,
    ) -> Option<ManualDecision>;
}
