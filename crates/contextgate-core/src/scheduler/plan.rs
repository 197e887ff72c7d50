//! Which agents run in which phase.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::{AgentName, ContextError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Phase1,
    Phase2,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Phase1 => f.write_str("phase1"),
            Phase::Phase2 => f.write_str("phase2"),
        }
    }
}

/// Phase membership. Phase 2 depends on every phase 1 agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhasePlan {
    pub phase1: Vec<AgentName>,
    pub phase2: Vec<AgentName>,
}

impl Default for PhasePlan {
    fn default() -> Self {
        Self {
            phase1: vec![AgentName::JiraAnalysis, AgentName::EnvironmentAnalysis],
            phase2: vec![
                AgentName::DocumentationAnalysis,
                AgentName::CodeInvestigation,
            ],
        }
    }
}

impl PhasePlan {
    pub fn agents(&self, phase: Phase) -> &[AgentName] {
        match phase {
            Phase::Phase1 => &self.phase1,
            Phase::Phase2 => &self.phase2,
        }
    }

    /// Agents whose contributions must exist before `phase` starts.
    pub fn dependencies(&self, phase: Phase) -> &[AgentName] {
        match phase {
            Phase::Phase1 => &[],
            Phase::Phase2 => &self.phase1,
        }
    }

    pub fn all_agents(&self) -> impl Iterator<Item = AgentName> + '_ {
        self.phase1.iter().chain(self.phase2.iter()).copied()
    }

    pub fn validate(&self) -> Result<()> {
        if self.phase1.is_empty() || self.phase2.is_empty() {
            return Err(ContextError::InvalidConfig(
                "phases.phase1 and phases.phase2 must each name at least one agent".to_string(),
            ));
        }
        let mut seen = BTreeSet::new();
        for agent in self.all_agents() {
            if agent == AgentName::Foundation {
                return Err(ContextError::InvalidConfig(
                    "the foundation agent cannot run in a phase".to_string(),
                ));
            }
            if !seen.insert(agent) {
                return Err(ContextError::InvalidConfig(format!(
                    "{agent} appears in more than one phase slot"
                )));
            }
        }
        Ok(())
    }
}
