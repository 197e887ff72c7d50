//! Contracts for the external collaborators the scheduler drives.
//!
//! How an agent reasons is not this crate's concern. Agents receive the work
//! item and an immutable snapshot and return typed enhancements with
//! evidence. Their errors are opaque `anyhow::Error`s and only ever turn
//! into dropped contributions.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::ContributionDraft;
use crate::domain::{
    AgentName, ContextSnapshot, Enhancement, EvidenceRecord, FoundationData, WorkItem,
};

/// Extra instruction attached to a retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "instruction", rename_all = "snake_case")]
pub enum AgentInstruction {
    /// The previous attempt was blocked; attach evidence for these keys.
    AttachEvidence { keys: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub work_item: WorkItem,
    pub snapshot: Arc<ContextSnapshot>,
    /// 1 for the first attempt.
    pub attempt: u32,
    pub instruction: Option<AgentInstruction>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub enhancements: BTreeMap<String, Enhancement>,
    pub evidence: Vec<EvidenceRecord>,
    pub confidence: Option<f64>,
    #[serde(default)]
    pub self_validated: bool,
}

impl AgentOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enhancement(mut self, key: impl Into<String>, enhancement: Enhancement) -> Self {
        self.enhancements.insert(key.into(), enhancement);
        self
    }

    pub fn with_evidence(mut self, record: EvidenceRecord) -> Self {
        self.evidence.push(record);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn self_validated(mut self) -> Self {
        self.self_validated = true;
        self
    }
}

impl From<AgentOutput> for ContributionDraft {
    fn from(out: AgentOutput) -> Self {
        ContributionDraft {
            enhancements: out.enhancements,
            evidence: out.evidence,
            reported_confidence: out.confidence,
            self_validated: out.self_validated,
        }
    }
}

#[async_trait]
pub trait AnalysisAgent: Send + Sync {
    fn name(&self) -> AgentName;

    async fn analyze(&self, request: AgentRequest) -> anyhow::Result<AgentOutput>;
}

/// One-time supplier of foundation data.
#[async_trait]
pub trait FoundationSource: Send + Sync {
    async fn bootstrap(&self, work_item: &WorkItem) -> anyhow::Result<FoundationData>;
}

/// Foundation source returning fixed data.
#[derive(Debug, Clone)]
pub struct StaticFoundation(pub FoundationData);

#[async_trait]
impl FoundationSource for StaticFoundation {
    async fn bootstrap(&self, _work_item: &WorkItem) -> anyhow::Result<FoundationData> {
        Ok(self.0.clone())
    }
}
