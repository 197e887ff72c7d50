//! Shared fixtures: foundation data, scripted agents, a scripted operator.
#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use contextgate_core::{
    AgentName, AgentOutput, AgentRequest, AnalysisAgent, ConflictRecord, ContextSnapshot,
    Enhancement, EscalationHandler, EvidenceRecord, FoundationData, ManualDecision,
    PipelineConfig, Scheduler, SourceKind, StaticFoundation, TicketInfo, VersionContext, WorkItem,
};

pub const TICKET: &str = "OCPBUGS-1001";
pub const DIGEST_CRD: &str = "crd/upgrade.yaml#spec.upgrade.imageDigest";

pub fn work_item() -> WorkItem {
    WorkItem::new(TICKET)
}

pub fn foundation() -> FoundationData {
    FoundationData {
        ticket_info: TicketInfo {
            id: TICKET.into(),
            summary: "upgrade ignores pinned image digest".into(),
            status: "In Progress".into(),
            fields: BTreeMap::from([("component".to_string(), "installer".to_string())]),
        },
        version_context: VersionContext {
            target_version: Some("2.15".into()),
            environment_version: Some("2.14".into()),
        },
        environment_baseline: BTreeMap::from([
            ("platform".to_string(), "aws".to_string()),
            ("network".to_string(), "ovn".to_string()),
        ]),
    }
}

/// Config with a short agent timeout so hung agents fail fast.
pub fn config() -> PipelineConfig {
    PipelineConfig::default().with_agent_timeout(Duration::from_secs(1))
}

pub fn scheduler(config: PipelineConfig) -> Scheduler {
    Scheduler::new(config, Arc::new(StaticFoundation(foundation()))).unwrap()
}

/// Register every agent in `agents` on `scheduler`.
pub fn with_agents(mut scheduler: Scheduler, agents: &[Arc<ScriptedAgent>]) -> Scheduler {
    for a in agents {
        scheduler = scheduler.with_agent(a.clone());
    }
    scheduler
}

// ---------------------------------------------------------------------------
// Agent outputs
// ---------------------------------------------------------------------------

pub fn jira_output(status: &str) -> AgentOutput {
    AgentOutput::new()
        .with_enhancement(
            "ticket_status",
            Enhancement::StatusAssertion {
                fact: "foundation_data.ticket_info.status".into(),
                status: status.into(),
            },
        )
        .with_evidence(EvidenceRecord::new(
            SourceKind::DocumentationCitation,
            format!("jira/{TICKET}#status"),
            "ticket_status",
        ))
        .with_confidence(0.95)
}

pub fn environment_output(detected: &str) -> AgentOutput {
    AgentOutput::new()
        .with_enhancement(
            "cluster_version",
            Enhancement::DetectedVersion {
                version: detected.into(),
            },
        )
        .with_enhancement(
            "platform",
            Enhancement::EnvironmentObservation {
                key: "platform".into(),
                value: "aws".into(),
            },
        )
        .with_evidence(EvidenceRecord::new(
            SourceKind::PriorVerifiedFact,
            "cluster/clusterversion",
            "cluster_version",
        ))
        .with_evidence(EvidenceRecord::new(
            SourceKind::PriorVerifiedFact,
            "cluster/infrastructure",
            "platform",
        ))
        .with_confidence(0.95)
}

pub fn documentation_output() -> AgentOutput {
    AgentOutput::new()
        .with_enhancement(
            "upgrade_workflow",
            Enhancement::UiWorkflow {
                workflow: "cluster-settings/upgrade".into(),
                exists: true,
            },
        )
        .with_evidence(EvidenceRecord::new(
            SourceKind::CodeReference,
            "console/src/upgrade/UpgradeModal.tsx:42",
            "upgrade_workflow",
        ))
        .with_confidence(0.95)
}

/// Schema claim about the image digest field, evidenced when `evidenced`.
pub fn code_output(evidenced: bool, digest_field_exists: bool) -> AgentOutput {
    let out = AgentOutput::new()
        .with_enhancement(
            "digest_field",
            Enhancement::SchemaField {
                path: "spec.upgrade.imageDigest".into(),
                exists: digest_field_exists,
            },
        )
        .with_confidence(0.95);
    if evidenced {
        out.with_evidence(
            EvidenceRecord::new(SourceKind::SchemaDefinition, DIGEST_CRD, "digest_field")
                .observing(json!(digest_field_exists)),
        )
    } else {
        out
    }
}

// ---------------------------------------------------------------------------
// Scripted agent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Step {
    Reply(AgentOutput),
    Fail(&'static str),
    /// Panic inside `analyze`.
    Panic(&'static str),
    /// Sleep far beyond any test timeout.
    Hang,
}

/// Agent that plays `steps` in order; the last step repeats.
pub struct ScriptedAgent {
    name: AgentName,
    steps: Mutex<VecDeque<Step>>,
    seen: Mutex<Vec<AgentRequest>>,
}

impl ScriptedAgent {
    pub fn new(name: AgentName, steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            name,
            steps: Mutex::new(steps.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn replying(name: AgentName, output: AgentOutput) -> Arc<Self> {
        Self::new(name, vec![Step::Reply(output)])
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        self.seen.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl AnalysisAgent for ScriptedAgent {
    fn name(&self) -> AgentName {
        self.name
    }

    async fn analyze(&self, request: AgentRequest) -> anyhow::Result<AgentOutput> {
        let step = {
            let mut steps = self.steps.lock().unwrap();
            if steps.len() > 1 {
                steps.pop_front()
            } else {
                steps.front().cloned()
            }
        };
        self.seen.lock().unwrap().push(request);
        match step {
            Some(Step::Reply(out)) => Ok(out),
            Some(Step::Fail(msg)) => Err(anyhow::anyhow!(msg)),
            Some(Step::Panic(msg)) => panic!("{msg}"),
            Some(Step::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(anyhow::anyhow!("woke from hang"))
            }
            None => Err(anyhow::anyhow!("no scripted step")),
        }
    }
}

/// The four analysis agents, all evidence-backed and mutually consistent.
pub fn consistent_agents() -> Vec<Arc<ScriptedAgent>> {
    vec![
        ScriptedAgent::replying(AgentName::JiraAnalysis, jira_output("In Progress")),
        ScriptedAgent::replying(AgentName::EnvironmentAnalysis, environment_output("2.14")),
        ScriptedAgent::replying(AgentName::DocumentationAnalysis, documentation_output()),
        ScriptedAgent::replying(AgentName::CodeInvestigation, code_output(true, true)),
    ]
}

/// Replace the agent named `name` in `agents`.
pub fn replace(
    mut agents: Vec<Arc<ScriptedAgent>>,
    replacement: Arc<ScriptedAgent>,
) -> Vec<Arc<ScriptedAgent>> {
    agents.retain(|a| a.name != replacement.name);
    agents.push(replacement);
    agents
}

// ---------------------------------------------------------------------------
// Scripted operator
// ---------------------------------------------------------------------------

pub struct ScriptedOperator {
    decision: Option<ManualDecision>,
    escalated: Mutex<Vec<String>>,
}

impl ScriptedOperator {
    pub fn deciding(decision: ManualDecision) -> Arc<Self> {
        Arc::new(Self {
            decision: Some(decision),
            escalated: Mutex::new(Vec::new()),
        })
    }

    pub fn silent() -> Arc<Self> {
        Arc::new(Self {
            decision: None,
            escalated: Mutex::new(Vec::new()),
        })
    }

    pub fn escalated(&self) -> Vec<String> {
        self.escalated.lock().unwrap().clone()
    }
}

#[async_trait]
impl EscalationHandler for ScriptedOperator {
    async fn escalate(
        &self,
        conflict: &ConflictRecord,
        _snapshot: &ContextSnapshot,
    ) -> Option<ManualDecision> {
        self.escalated.lock().unwrap().push(conflict.id.clone());
        self.decision.clone()
    }
}
