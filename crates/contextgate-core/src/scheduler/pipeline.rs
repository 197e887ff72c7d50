//! Pipeline Scheduler: foundation, two concurrent phases, synthesis.
//!
//! The scheduler is the only component that halts a run. It owns no global
//! state: every collaborator is injected, and each run gets its own store.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use contextgate_state::{ReportArchive, SnapshotLedger};

use crate::aggregate::ConfidenceAggregator;
use crate::config::PipelineConfig;
use crate::context::{ContextManager, ContextStore};
use crate::domain::{
    AgentName, ConflictKind, ConflictRecord, ContextError, ContextSnapshot, Result, Severity,
    WorkItem,
};
use crate::evidence_gate::EvidenceGate;
use crate::metrics::Metrics;
use crate::obs;
use crate::report::RunReport;
use crate::resolver::{
    ConflictResolver, EscalationHandler, NoopAdvisor, ResolutionAction, ResolutionAdvisor,
};
use crate::scheduler::agent::{AnalysisAgent, FoundationSource};
use crate::scheduler::executor::{DroppedContribution, PhaseExecutor};
use crate::scheduler::plan::Phase;
use crate::scheduler::state::{PipelineState, StateMachine};
use crate::validation::{ConsistencyValidator, ValidationLevel, ValidationResult, ValidatorConfig};

/// Validate/resolve passes per settle before giving up on new conflicts.
const MAX_SETTLE_ROUNDS: usize = 3;

/// Why a run ended in `Halted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum HaltReason {
    /// An agent's evidence contradicted evidence already accepted.
    RealityContradiction { conflicts: Vec<ConflictRecord> },
    /// Critical conflicts remained after resolution and escalation.
    UnresolvedConflicts { conflicts: Vec<ConflictRecord> },
    FoundationUnavailable { message: String },
    FoundationInvalid { message: String },
}

impl HaltReason {
    /// The conflict records that caused the halt, if any.
    pub fn conflicts(&self) -> &[ConflictRecord] {
        match self {
            HaltReason::RealityContradiction { conflicts }
            | HaltReason::UnresolvedConflicts { conflicts } => conflicts,
            HaltReason::FoundationUnavailable { .. } | HaltReason::FoundationInvalid { .. } => &[],
        }
    }
}

impl std::fmt::Display for HaltReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HaltReason::RealityContradiction { conflicts } => {
                write!(f, "reality contradiction ({} conflict(s))", conflicts.len())
            }
            HaltReason::UnresolvedConflicts { conflicts } => {
                write!(f, "unresolved critical conflicts ({})", conflicts.len())
            }
            HaltReason::FoundationUnavailable { message } => {
                write!(f, "foundation unavailable: {message}")
            }
            HaltReason::FoundationInvalid { message } => write!(f, "foundation invalid: {message}"),
        }
    }
}

struct RunState {
    run_id: String,
    work_item: WorkItem,
    store: Arc<ContextStore>,
    machine: StateMachine,
    dropped: Vec<DroppedContribution>,
    started_at: DateTime<Utc>,
}

pub struct Scheduler {
    config: PipelineConfig,
    manager: Arc<ContextManager>,
    gate: Arc<EvidenceGate>,
    validator: ConsistencyValidator,
    resolver: ConflictResolver,
    aggregator: ConfidenceAggregator,
    foundation: Arc<dyn FoundationSource>,
    agents: BTreeMap<AgentName, Arc<dyn AnalysisAgent>>,
    escalation: Option<Arc<dyn EscalationHandler>>,
    ledger: Option<Arc<dyn SnapshotLedger>>,
    archive: Option<Arc<dyn ReportArchive>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("agents", &self.agents.keys().collect::<Vec<_>>())
            .field("escalation", &self.escalation.is_some())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Build every component from `config`.
    pub fn new(config: PipelineConfig, foundation: Arc<dyn FoundationSource>) -> Result<Self> {
        config.validate()?;
        let policy = Arc::new(config.evidence_policy.clone());
        let manager = Arc::new(ContextManager::new(
            Arc::clone(&policy),
            config.confidence.clone(),
        ));
        let gate = Arc::new(EvidenceGate::new(policy));
        let validator = ConsistencyValidator::new(ValidatorConfig::from_pipeline(&config));
        let resolver = ConflictResolver::new(Arc::new(NoopAdvisor), config.advisor_threshold);
        let aggregator =
            ConfidenceAggregator::new(config.agent_weights.clone(), validator.clone());
        Ok(Self::from_parts(
            config, manager, gate, validator, resolver, aggregator, foundation,
        ))
    }

    /// Assemble from explicitly constructed components.
    pub fn from_parts(
        config: PipelineConfig,
        manager: Arc<ContextManager>,
        gate: Arc<EvidenceGate>,
        validator: ConsistencyValidator,
        resolver: ConflictResolver,
        aggregator: ConfidenceAggregator,
        foundation: Arc<dyn FoundationSource>,
    ) -> Self {
        Self {
            config,
            manager,
            gate,
            validator,
            resolver,
            aggregator,
            foundation,
            agents: BTreeMap::new(),
            escalation: None,
            ledger: None,
            archive: None,
        }
    }

    /// Register an agent under its own name, replacing any previous one.
    pub fn with_agent(mut self, agent: Arc<dyn AnalysisAgent>) -> Self {
        self.agents.insert(agent.name(), agent);
        self
    }

    pub fn with_advisor(mut self, advisor: Arc<dyn ResolutionAdvisor>) -> Self {
        self.resolver = ConflictResolver::new(advisor, self.config.advisor_threshold);
        self
    }

    pub fn with_escalation(mut self, handler: Arc<dyn EscalationHandler>) -> Self {
        self.escalation = Some(handler);
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn SnapshotLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_archive(mut self, archive: Arc<dyn ReportArchive>) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the pipeline for `work_item` to `Done` or `Halted`.
    ///
    /// Halts are reported in the returned [`RunReport`]. `Err` means a
    /// contract was broken (`SchedulerInvariantViolation`) or storage failed.
    pub async fn run(&self, work_item: WorkItem) -> Result<RunReport> {
        let run_id = Uuid::new_v4().to_string();
        let span = obs::run_span(&run_id, &work_item);
        self.run_inner(run_id, work_item).instrument(span).await
    }

    async fn run_inner(&self, run_id: String, work_item: WorkItem) -> Result<RunReport> {
        let mut store = ContextStore::new().with_metrics(Arc::new(Metrics::new()));
        if let Some(ledger) = &self.ledger {
            store = store.with_ledger(Arc::clone(ledger));
        }
        let mut run = RunState {
            run_id,
            work_item,
            store: Arc::new(store),
            machine: StateMachine::new(),
            dropped: Vec::new(),
            started_at: Utc::now(),
        };

        if let Some(missing) = self
            .config
            .phases
            .all_agents()
            .find(|a| !self.agents.contains_key(a))
        {
            return Err(violation(format!("no agent registered for {missing}")));
        }
        obs::emit_run_started(&run.run_id, &run.work_item, self.agents.len());

        let foundation = match self.foundation.bootstrap(&run.work_item).await {
            Ok(f) => f,
            Err(e) => {
                let reason = HaltReason::FoundationUnavailable {
                    message: format!("{e:#}"),
                };
                return self.halt(run, reason).await;
            }
        };
        let root = match self.manager.bootstrap(run.work_item.clone(), foundation) {
            Ok(root) => root,
            Err(ContextError::InvalidFoundation(message)) => {
                return self.halt(run, HaltReason::FoundationInvalid { message }).await;
            }
            Err(e) => return Err(e),
        };
        run.store.commit(root).await?;
        self.advance(&mut run, PipelineState::FoundationReady)?;

        for (phase, running, validated) in [
            (
                Phase::Phase1,
                PipelineState::Phase1Running,
                PipelineState::Phase1Validated,
            ),
            (
                Phase::Phase2,
                PipelineState::Phase2Running,
                PipelineState::Phase2Validated,
            ),
        ] {
            let base = self.ensure_ready(&run, phase)?;
            self.advance(&mut run, running)?;

            let agents: Vec<Arc<dyn AnalysisAgent>> = self
                .config
                .phases
                .agents(phase)
                .iter()
                .filter_map(|a| self.agents.get(a).cloned())
                .collect();
            let executor = PhaseExecutor::new(
                Arc::clone(&self.manager),
                Arc::clone(&self.gate),
                Arc::clone(&run.store),
                self.config.agent_timeout(),
                self.config.max_attempts,
                &run.run_id,
            );
            let outcome = executor
                .run_phase(phase, &run.work_item, base, agents)
                .await?;
            info!(
                %phase,
                merged = ?outcome.merged,
                dropped = outcome.dropped.len(),
                "phase agents finished"
            );
            run.dropped.extend(outcome.dropped);
            self.raise(&mut run, outcome.gate_conflicts).await?;

            if let Some(conflicts) = outcome.contradiction {
                self.raise(&mut run, conflicts.clone()).await?;
                return self
                    .halt(run, HaltReason::RealityContradiction { conflicts })
                    .await;
            }
            if let Some(conflicts) = self.settle(&mut run, ValidationLevel::Critical).await? {
                return self
                    .halt(run, HaltReason::UnresolvedConflicts { conflicts })
                    .await;
            }
            self.advance(&mut run, validated)?;
        }

        self.ensure_complete(&run)?;
        self.advance(&mut run, PipelineState::SynthesisReady)?;
        if let Some(conflicts) = self.settle(&mut run, ValidationLevel::All).await? {
            return self
                .halt(run, HaltReason::UnresolvedConflicts { conflicts })
                .await;
        }
        self.advance(&mut run, PipelineState::Done)?;
        self.finish(run, None).await
    }

    fn head(&self, run: &RunState) -> Result<Arc<ContextSnapshot>> {
        run.store
            .head()
            .ok_or_else(|| violation("store has no committed snapshot".to_string()))
    }

    fn advance(&self, run: &mut RunState, to: PipelineState) -> Result<()> {
        let from = run.machine.state();
        if let Err(e) = run.machine.transition(to) {
            error!(run_id = %run.run_id, %from, %to, "illegal pipeline transition");
            return Err(e);
        }
        let version = run.store.head().map(|s| s.version()).unwrap_or(0);
        obs::emit_phase_transition(&run.run_id, from, to, version);
        Ok(())
    }

    /// Snapshot a phase may start from: dependencies present, nothing blocking.
    fn ensure_ready(&self, run: &RunState, phase: Phase) -> Result<Arc<ContextSnapshot>> {
        let head = self.head(run)?;
        if let Some(missing) = self
            .config
            .phases
            .dependencies(phase)
            .iter()
            .find(|a| !head.has_contribution(**a))
        {
            return Err(violation(format!(
                "{phase} cannot start: no contribution from {missing} in version {}",
                head.version()
            )));
        }
        let critical = self.validator.validate(&head, ValidationLevel::Critical);
        if critical.blocking().next().is_some() || head.blocking_conflicts().next().is_some() {
            return Err(violation(format!(
                "{phase} cannot start: version {} has unresolved critical conflicts",
                head.version()
            )));
        }
        Ok(head)
    }

    fn ensure_complete(&self, run: &RunState) -> Result<()> {
        let head = self.head(run)?;
        match self
            .config
            .phases
            .all_agents()
            .find(|a| !head.has_contribution(*a))
        {
            Some(missing) => Err(violation(format!(
                "synthesis cannot start: no contribution from {missing}"
            ))),
            None => Ok(()),
        }
    }

    /// Commit conflicts not yet recorded in the head snapshot.
    async fn raise(&self, run: &mut RunState, conflicts: Vec<ConflictRecord>) -> Result<()> {
        let head = self.head(run)?;
        let mut seen = BTreeSet::new();
        let fresh: Vec<ConflictRecord> = conflicts
            .into_iter()
            .filter(|c| head.conflict(&c.id).is_none() && seen.insert(c.id.clone()))
            .collect();
        if fresh.is_empty() {
            return Ok(());
        }
        for c in &fresh {
            obs::emit_conflict_raised(&run.run_id, c);
        }
        run.store.metrics().add_conflicts_raised(fresh.len() as u64);
        let next = self.manager.record_conflicts(&head, fresh, Utc::now());
        run.store.commit(next).await?;
        Ok(())
    }

    async fn record_validation(&self, run: &mut RunState, result: &ValidationResult) -> Result<()> {
        let head = self.head(run)?;
        let fresh: Vec<&ConflictRecord> = result
            .conflicts
            .iter()
            .filter(|c| head.conflict(&c.id).is_none())
            .collect();
        for c in &fresh {
            obs::emit_conflict_raised(&run.run_id, c);
        }
        run.store.metrics().add_conflicts_raised(fresh.len() as u64);
        let next = self.manager.record_validation(
            &head,
            result.checks.clone(),
            result.conflicts.clone(),
            result.confidence_score,
            Utc::now(),
        );
        run.store.commit(next).await?;
        Ok(())
    }

    /// Validate at `level`, resolve what can be resolved, escalate critical
    /// leftovers. Returns the conflicts still blocking, if any.
    async fn settle(
        &self,
        run: &mut RunState,
        level: ValidationLevel,
    ) -> Result<Option<Vec<ConflictRecord>>> {
        let mut applied: Vec<(ConflictRecord, ResolutionAction)> = Vec::new();
        let mut last = None;
        for round in 0..=MAX_SETTLE_ROUNDS {
            let head = self.head(run)?;
            let result = self.validator.validate(&head, level);
            self.record_validation(run, &result).await?;
            last = Some(result);
            if round == MAX_SETTLE_ROUNDS || !self.resolve_pending(run, &mut applied).await? {
                break;
            }
        }

        if let Some(result) = &last {
            for (conflict, action) in &applied {
                let success = conflict.check.map_or(true, |check| {
                    !result.conflicts.iter().any(|c| c.check == Some(check))
                });
                self.resolver
                    .advisor()
                    .record_outcome(conflict, *action, success);
            }
        }

        let head = self.head(run)?;
        let blocking: Vec<ConflictRecord> = head.blocking_conflicts().cloned().collect();
        if blocking.is_empty() {
            Ok(None)
        } else {
            Ok(Some(blocking))
        }
    }

    /// One resolution pass over every unresolved conflict. Returns whether
    /// any conflict changed state.
    async fn resolve_pending(
        &self,
        run: &mut RunState,
        applied: &mut Vec<(ConflictRecord, ResolutionAction)>,
    ) -> Result<bool> {
        let pending: Vec<ConflictRecord> = self.head(run)?.unresolved_conflicts().cloned().collect();
        let mut progressed = false;
        for conflict in pending {
            let head = self.head(run)?;
            let resolution = self.resolver.resolve(&conflict, &head);
            if resolution.is_resolved() {
                let next = self.resolver.apply(&head, &resolution, Utc::now())?;
                run.store.commit(next).await?;
                applied.push((conflict, resolution.action));
                progressed = true;
                continue;
            }

            let escalate = conflict.severity == Severity::Critical
                && conflict.kind != ConflictKind::Contradiction;
            if escalate {
                if let Some(handler) = &self.escalation {
                    if let Some(decision) = handler.escalate(&conflict, &head).await {
                        info!(
                            conflict_id = %conflict.id,
                            operator = %decision.operator,
                            "conflict manually overridden"
                        );
                        let next =
                            self.resolver
                                .manual_override(&head, &conflict.id, decision, Utc::now())?;
                        run.store.commit(next).await?;
                        progressed = true;
                        continue;
                    }
                    warn!(conflict_id = %conflict.id, "escalation returned no decision");
                }
            }

            if conflict.resolution_rationale.is_none() {
                let next = self.resolver.apply(&head, &resolution, Utc::now())?;
                run.store.commit(next).await?;
            }
        }
        Ok(progressed)
    }

    async fn halt(&self, mut run: RunState, reason: HaltReason) -> Result<RunReport> {
        error!(run_id = %run.run_id, reason = %reason, "run halted");
        for c in reason.conflicts() {
            error!(
                run_id = %run.run_id,
                conflict_id = %c.id,
                kind = c.kind.as_str(),
                fields = ?c.fields,
                "halting conflict"
            );
        }
        self.advance(&mut run, PipelineState::Halted)?;
        self.finish(run, Some(reason)).await
    }

    async fn finish(&self, run: RunState, halt: Option<HaltReason>) -> Result<RunReport> {
        let terminal = run.machine.state();
        let head = run.store.head();
        let aggregate_confidence = head
            .as_deref()
            .map(|h| self.aggregator.aggregate(h))
            .unwrap_or(0.0);
        let final_digest = head.as_deref().map(ContextSnapshot::digest).transpose()?;
        let metrics = run.store.metrics().flush(&run.run_id);
        let report = RunReport {
            run_id: run.run_id.clone(),
            work_item: run.work_item.clone(),
            terminal_state: terminal,
            conflicts: head
                .as_deref()
                .map(|h| h.validation.conflicts.clone())
                .unwrap_or_default(),
            final_snapshot: head.as_deref().cloned(),
            final_digest,
            aggregate_confidence,
            halt,
            dropped: run.dropped,
            transitions: run.machine.into_log(),
            history_versions: run.store.history().iter().map(|s| s.version()).collect(),
            metrics,
            started_at: run.started_at,
            finished_at: Utc::now(),
        };

        if let Some(archive) = &self.archive {
            if let Err(e) = report.archive_to(archive.as_ref()).await {
                warn!(run_id = %report.run_id, error = %e, "failed to archive run report");
            }
        }
        obs::emit_run_finished(
            &report.run_id,
            terminal,
            aggregate_confidence,
            report.duration_ms(),
        );
        Ok(report)
    }
}

fn violation(message: String) -> ContextError {
    error!(%message, "scheduler invariant violated");
    ContextError::SchedulerInvariantViolation(message)
}
