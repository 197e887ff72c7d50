//! Pipeline participants and the run subject.

use serde::{Deserialize, Serialize};

/// The fixed set of pipeline participants.
///
/// `Foundation` establishes facts before any analysis agent runs; the other
/// four are the analysis roles scheduled into phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentName {
    Foundation,
    JiraAnalysis,
    EnvironmentAnalysis,
    DocumentationAnalysis,
    CodeInvestigation,
}

impl AgentName {
    /// The four analysis roles, in default scheduling order.
    pub const ANALYSIS: [AgentName; 4] = [
        AgentName::JiraAnalysis,
        AgentName::EnvironmentAnalysis,
        AgentName::DocumentationAnalysis,
        AgentName::CodeInvestigation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AgentName::Foundation => "foundation",
            AgentName::JiraAnalysis => "jira_analysis",
            AgentName::EnvironmentAnalysis => "environment_analysis",
            AgentName::DocumentationAnalysis => "documentation_analysis",
            AgentName::CodeInvestigation => "code_investigation",
        }
    }
}

impl std::fmt::Display for AgentName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The subject being analyzed (e.g. a ticket id). Immutable for a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItem(String);

impl WorkItem {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_name_serializes_snake_case() {
        let json = serde_json::to_string(&AgentName::DocumentationAnalysis).unwrap();
        assert_eq!(json, "\"documentation_analysis\"");
        assert_eq!(AgentName::CodeInvestigation.to_string(), "code_investigation");
    }

    #[test]
    fn analysis_roles_exclude_foundation() {
        assert!(!AgentName::ANALYSIS.contains(&AgentName::Foundation));
    }

    #[test]
    fn work_item_is_transparent_in_json() {
        let item = WorkItem::new("OCPBUGS-1234");
        assert_eq!(serde_json::to_string(&item).unwrap(), "\"OCPBUGS-1234\"");
    }
}
