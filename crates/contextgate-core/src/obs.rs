//! Structured lifecycle events for pipeline runs.
//!
//! Every event carries an `event` field (`run.started`, `phase.transition`,
//! `gate.decision`, `conflict.raised`, `run.finished`) so log pipelines can
//! filter on it regardless of output format.

use tracing::{info, warn};

use crate::domain::{AgentName, ConflictRecord, WorkItem};
use crate::evidence_gate::AdmitDecision;
use crate::scheduler::PipelineState;

/// Span tagging all events of one run with `run_id` and `work_item`.
///
/// Attach with `tracing::Instrument`; agent tasks inherit it through
/// `in_current_span`.
pub fn run_span(run_id: &str, work_item: &WorkItem) -> tracing::Span {
    tracing::info_span!("contextgate.run", run_id = %run_id, work_item = %work_item)
}

pub fn emit_run_started(run_id: &str, work_item: &WorkItem, agents: usize) {
    info!(event = "run.started", run_id = %run_id, work_item = %work_item, agents);
}

pub fn emit_phase_transition(run_id: &str, from: PipelineState, to: PipelineState, version: u64) {
    info!(
        event = "phase.transition",
        run_id = %run_id,
        from = %from,
        to = %to,
        snapshot_version = version,
    );
}

/// Allowed decisions log at `info`, blocks at `warn`.
pub fn emit_gate_decision(run_id: &str, agent: AgentName, attempt: u32, decision: &AdmitDecision) {
    match decision {
        AdmitDecision::Allow => {
            info!(event = "gate.decision", run_id = %run_id, agent = %agent, attempt, decision = "allow");
        }
        AdmitDecision::Blocked { reason, keys } => {
            warn!(
                event = "gate.decision",
                run_id = %run_id,
                agent = %agent,
                attempt,
                decision = "blocked",
                reason = %reason,
                keys = ?keys,
            );
        }
    }
}

pub fn emit_conflict_raised(run_id: &str, conflict: &ConflictRecord) {
    warn!(
        event = "conflict.raised",
        run_id = %run_id,
        conflict_id = %conflict.id,
        kind = conflict.kind.as_str(),
        severity = ?conflict.severity,
        fields = ?conflict.fields,
    );
}

pub fn emit_run_finished(
    run_id: &str,
    terminal: PipelineState,
    aggregate_confidence: f64,
    duration_ms: u64,
) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        terminal = %terminal,
        aggregate_confidence,
        duration_ms,
        success = terminal == PipelineState::Done,
    );
}
