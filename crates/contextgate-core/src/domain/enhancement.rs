//! Typed enhancements: the facts and opinions an agent contributes.

use serde::{Deserialize, Serialize};

/// Category of an enhancement, used as the evidence policy key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnhancementCategory {
    UiWorkflow,
    SchemaField,
    WorkflowDeployment,
    DetectedVersion,
    VersionReconciliation,
    StatusAssertion,
    EnvironmentObservation,
    Analysis,
}

impl EnhancementCategory {
    /// Every recognized category. Policy tables may only name these.
    pub const ALL: [EnhancementCategory; 8] = [
        EnhancementCategory::UiWorkflow,
        EnhancementCategory::SchemaField,
        EnhancementCategory::WorkflowDeployment,
        EnhancementCategory::DetectedVersion,
        EnhancementCategory::VersionReconciliation,
        EnhancementCategory::StatusAssertion,
        EnhancementCategory::EnvironmentObservation,
        EnhancementCategory::Analysis,
    ];
}

/// One fact or opinion asserted by an agent.
///
/// The `category` discriminant selects the evidence requirement; variants
/// other than `Analysis` assert something checkable against an external
/// source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum Enhancement {
    /// A UI workflow exists (or does not) in the product.
    UiWorkflow { workflow: String, exists: bool },
    /// A schema field exists at `path` (e.g. `spec.upgrade.imageDigest`).
    SchemaField { path: String, exists: bool },
    /// A workflow is deployed in the target environment.
    WorkflowDeployment { workflow: String, deployed: bool },
    /// Version observed in the running environment.
    DetectedVersion { version: String },
    /// Explicit acknowledgement that a detected version differs from the
    /// declared one for a stated reason.
    VersionReconciliation {
        declared: String,
        detected: String,
        rationale: String,
    },
    /// Status of a foundation fact such as `ticket_info.status`.
    StatusAssertion { fact: String, status: String },
    /// Observed value for an environment baseline key.
    EnvironmentObservation { key: String, value: String },
    /// Free-form analytical opinion.
    Analysis {
        summary: String,
        #[serde(default)]
        detail: serde_json::Value,
    },
}

impl Enhancement {
    pub fn category(&self) -> EnhancementCategory {
        match self {
            Enhancement::UiWorkflow { .. } => EnhancementCategory::UiWorkflow,
            Enhancement::SchemaField { .. } => EnhancementCategory::SchemaField,
            Enhancement::WorkflowDeployment { .. } => EnhancementCategory::WorkflowDeployment,
            Enhancement::DetectedVersion { .. } => EnhancementCategory::DetectedVersion,
            Enhancement::VersionReconciliation { .. } => {
                EnhancementCategory::VersionReconciliation
            }
            Enhancement::StatusAssertion { .. } => EnhancementCategory::StatusAssertion,
            Enhancement::EnvironmentObservation { .. } => {
                EnhancementCategory::EnvironmentObservation
            }
            Enhancement::Analysis { .. } => EnhancementCategory::Analysis,
        }
    }

    /// The value this enhancement claims a source would show, if it makes a
    /// checkable claim at all.
    pub fn claimed_value(&self) -> Option<serde_json::Value> {
        use serde_json::json;
        match self {
            Enhancement::UiWorkflow { exists, .. } => Some(json!(exists)),
            Enhancement::SchemaField { exists, .. } => Some(json!(exists)),
            Enhancement::WorkflowDeployment { deployed, .. } => Some(json!(deployed)),
            Enhancement::DetectedVersion { version } => Some(json!(version)),
            Enhancement::StatusAssertion { status, .. } => Some(json!(status)),
            Enhancement::EnvironmentObservation { value, .. } => Some(json!(value)),
            Enhancement::VersionReconciliation { .. } | Enhancement::Analysis { .. } => None,
        }
    }
}
