//! Concurrent execution of one phase.
//!
//! Each agent runs as its own task against the phase's base snapshot. Agent
//! work is fully parallel; admission and commit into the store are
//! serialized. Every `analyze` call runs in a task of its own, so a
//! panicking agent is a failed attempt rather than a lost phase.
//! Attempt handling per agent:
//!
//! - timeout, agent error or panic: retry, then drop;
//! - `InsufficientEvidence`: retry with an attach-evidence instruction, then drop;
//! - `RealityContradiction`: stop and report, siblings are cancelled.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, error, warn, Instrument};

use crate::context::{Admission, ContextManager, ContextStore, ContributionDraft};
use crate::domain::{AgentName, BlockReason, ConflictRecord, ContextError, ContextSnapshot, Result, WorkItem};
use crate::evidence_gate::{AdmitDecision, EvidenceGate};
use crate::obs;
use crate::scheduler::agent::{AgentInstruction, AgentOutput, AgentRequest, AnalysisAgent};
use crate::scheduler::plan::Phase;

/// Why an agent's output was dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum DropCause {
    Timeout,
    InsufficientEvidence { keys: Vec<String> },
    AgentError { message: String },
}

impl DropCause {
    pub fn block_reason(&self) -> Option<BlockReason> {
        match self {
            DropCause::Timeout => Some(BlockReason::Timeout),
            DropCause::InsufficientEvidence { .. } => Some(BlockReason::InsufficientEvidence),
            DropCause::AgentError { .. } => None,
        }
    }
}

impl std::fmt::Display for DropCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropCause::Timeout => f.write_str("timeout"),
            DropCause::InsufficientEvidence { keys } => {
                write!(f, "insufficient evidence for {}", keys.join(", "))
            }
            DropCause::AgentError { message } => write!(f, "agent error: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroppedContribution {
    pub agent: AgentName,
    pub phase: Phase,
    pub attempts: u32,
    pub cause: DropCause,
}

/// What one phase produced.
#[derive(Debug, Clone, Default)]
pub struct PhaseRun {
    pub merged: Vec<AgentName>,
    pub dropped: Vec<DroppedContribution>,
    /// Missing-evidence records raised by blocked attempts.
    pub gate_conflicts: Vec<ConflictRecord>,
    /// Set when an agent contradicted accepted evidence.
    pub contradiction: Option<Vec<ConflictRecord>>,
}

enum TaskOutcome {
    Merged(Vec<ConflictRecord>),
    Dropped(DroppedContribution, Vec<ConflictRecord>),
    Contradicted(Vec<ConflictRecord>),
}

#[derive(Clone)]
pub struct PhaseExecutor {
    manager: Arc<ContextManager>,
    gate: Arc<EvidenceGate>,
    store: Arc<ContextStore>,
    timeout: Duration,
    max_attempts: u32,
    run_id: Arc<str>,
}

impl PhaseExecutor {
    pub fn new(
        manager: Arc<ContextManager>,
        gate: Arc<EvidenceGate>,
        store: Arc<ContextStore>,
        timeout: Duration,
        max_attempts: u32,
        run_id: &str,
    ) -> Self {
        Self {
            manager,
            gate,
            store,
            timeout,
            max_attempts: max_attempts.max(1),
            run_id: Arc::from(run_id),
        }
    }

    /// Run `agents` concurrently against `base` and merge what passes.
    ///
    /// Errors only on contract failures (store or manager errors). Every
    /// agent-level failure, panics included, is a value.
    pub async fn run_phase(
        &self,
        phase: Phase,
        work_item: &WorkItem,
        base: Arc<ContextSnapshot>,
        agents: Vec<Arc<dyn AnalysisAgent>>,
    ) -> Result<PhaseRun> {
        let mut tasks: JoinSet<(AgentName, Result<TaskOutcome>)> = JoinSet::new();
        for agent in agents {
            let this = self.clone();
            let base = Arc::clone(&base);
            let work_item = work_item.clone();
            tasks.spawn(
                async move {
                    let name = agent.name();
                    let outcome = this.run_agent(phase, work_item, base, agent).await;
                    (name, outcome)
                }
                .in_current_span(),
            );
        }

        let mut run = PhaseRun::default();
        while let Some(joined) = tasks.join_next().await {
            let (agent, outcome) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    tasks.abort_all();
                    error!(%phase, error = %e, "phase task did not complete");
                    return Err(ContextError::SchedulerInvariantViolation(format!(
                        "phase task in {phase} did not complete: {e}"
                    )));
                }
            };
            match outcome? {
                TaskOutcome::Merged(conflicts) => {
                    run.gate_conflicts.extend(conflicts);
                    run.merged.push(agent);
                }
                TaskOutcome::Dropped(dropped, conflicts) => {
                    run.gate_conflicts.extend(conflicts);
                    run.dropped.push(dropped);
                }
                TaskOutcome::Contradicted(conflicts) => {
                    warn!(%phase, %agent, "contradiction; cancelling remaining agents");
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    run.contradiction = Some(conflicts);
                    break;
                }
            }
        }
        run.merged.sort();
        run.dropped.sort_by_key(|d| d.agent);
        Ok(run)
    }

    async fn run_agent(
        &self,
        phase: Phase,
        work_item: WorkItem,
        base: Arc<ContextSnapshot>,
        agent: Arc<dyn AnalysisAgent>,
    ) -> Result<TaskOutcome> {
        let name = agent.name();
        let metrics = self.store.metrics();
        let mut instruction = None;
        let mut cause = DropCause::Timeout;
        let mut gate_conflicts: BTreeMap<String, ConflictRecord> = BTreeMap::new();

        for attempt in 1..=self.max_attempts {
            let request = AgentRequest {
                work_item: work_item.clone(),
                snapshot: Arc::clone(&base),
                attempt,
                instruction: instruction.take(),
            };
            let output = match self.call_agent(&agent, request).await {
                Ok(output) => output,
                Err(failed) => {
                    if matches!(failed, DropCause::Timeout) {
                        metrics.inc_agent_timeouts();
                        warn!(
                            agent = %name,
                            attempt,
                            timeout_ms = self.timeout.as_millis() as u64,
                            "agent timed out"
                        );
                    } else {
                        warn!(agent = %name, attempt, cause = %failed, "agent failed");
                    }
                    cause = failed;
                    continue;
                }
            };

            let admission = self
                .store
                .admit_fork(
                    &self.gate,
                    &self.manager,
                    &base,
                    name,
                    ContributionDraft::from(output),
                    Utc::now(),
                )
                .await?;
            match admission {
                Admission::Committed(commit) => {
                    obs::emit_gate_decision(&self.run_id, name, attempt, &AdmitDecision::Allow);
                    debug!(
                        agent = %name,
                        attempt,
                        version = commit.snapshot.metadata.version,
                        rebased = commit.rebased,
                        "contribution committed"
                    );
                    return Ok(TaskOutcome::Merged(gate_conflicts.into_values().collect()));
                }
                Admission::Blocked {
                    reason,
                    keys,
                    conflicts,
                } => {
                    let decision = AdmitDecision::Blocked {
                        reason,
                        keys: keys.clone(),
                    };
                    obs::emit_gate_decision(&self.run_id, name, attempt, &decision);
                    if reason == BlockReason::RealityContradiction {
                        return Ok(TaskOutcome::Contradicted(conflicts));
                    }
                    for c in conflicts {
                        gate_conflicts.entry(c.id.clone()).or_insert(c);
                    }
                    instruction = Some(AgentInstruction::AttachEvidence { keys: keys.clone() });
                    cause = DropCause::InsufficientEvidence { keys };
                }
            }
        }

        let dropped = DroppedContribution {
            agent: name,
            phase,
            attempts: self.max_attempts,
            cause,
        };
        let now = Utc::now();
        let fork = self
            .manager
            .record_dropped(&base, name, dropped.cause.to_string(), now)?;
        self.store.commit_fork(fork, &self.manager, now).await?;
        metrics.inc_contributions_dropped();
        warn!(agent = %name, %phase, cause = %dropped.cause, "contribution dropped");
        Ok(TaskOutcome::Dropped(
            dropped,
            gate_conflicts.into_values().collect(),
        ))
    }

    /// One `analyze` call under the agent timeout, isolated in its own task.
    ///
    /// The task is aborted when this future is dropped or times out.
    async fn call_agent(
        &self,
        agent: &Arc<dyn AnalysisAgent>,
        request: AgentRequest,
    ) -> std::result::Result<AgentOutput, DropCause> {
        let agent = Arc::clone(agent);
        let mut call = JoinSet::new();
        call.spawn(async move { agent.analyze(request).await }.in_current_span());
        match tokio::time::timeout(self.timeout, call.join_next()).await {
            Err(_elapsed) => Err(DropCause::Timeout),
            Ok(Some(Ok(Ok(output)))) => Ok(output),
            Ok(Some(Ok(Err(e)))) => Err(DropCause::AgentError {
                message: format!("{e:#}"),
            }),
            Ok(Some(Err(joined))) => {
                error!(error = %joined, "agent task did not complete");
                Err(DropCause::AgentError {
                    message: joined.to_string(),
                })
            }
            Ok(None) => Err(DropCause::AgentError {
                message: "agent task vanished".to_string(),
            }),
        }
    }
}
