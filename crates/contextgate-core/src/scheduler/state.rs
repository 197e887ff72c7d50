//! Pipeline state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ContextError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Init,
    FoundationReady,
    Phase1Running,
    Phase1Validated,
    Phase2Running,
    Phase2Validated,
    SynthesisReady,
    Done,
    Halted,
}

impl PipelineState {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineState::Init => "init",
            PipelineState::FoundationReady => "foundation_ready",
            PipelineState::Phase1Running => "phase1_running",
            PipelineState::Phase1Validated => "phase1_validated",
            PipelineState::Phase2Running => "phase2_running",
            PipelineState::Phase2Validated => "phase2_validated",
            PipelineState::SynthesisReady => "synthesis_ready",
            PipelineState::Done => "done",
            PipelineState::Halted => "halted",
        }
    }

    /// States reachable from `self` in one step.
    pub fn allowed_transitions(self) -> &'static [PipelineState] {
        use PipelineState::*;
        match self {
            Init => &[FoundationReady, Halted],
            FoundationReady => &[Phase1Running, Halted],
            Phase1Running => &[Phase1Validated, Halted],
            Phase1Validated => &[Phase2Running, Halted],
            Phase2Running => &[Phase2Validated, Halted],
            Phase2Validated => &[SynthesisReady, Halted],
            SynthesisReady => &[Done, Halted],
            Done | Halted => &[],
        }
    }

    pub fn can_transition_to(self, to: PipelineState) -> bool {
        self.allowed_transitions().contains(&to)
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: PipelineState,
    pub to: PipelineState,
    pub at: DateTime<Utc>,
}

/// Current state plus every transition taken so far.
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: PipelineState,
    log: Vec<StateTransition>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: PipelineState::Init,
            log: Vec::new(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn log(&self) -> &[StateTransition] {
        &self.log
    }

    pub fn into_log(self) -> Vec<StateTransition> {
        self.log
    }

    /// Move to `to`, or fail with `SchedulerInvariantViolation`.
    pub fn transition(&mut self, to: PipelineState) -> Result<StateTransition> {
        if !self.state.can_transition_to(to) {
            return Err(ContextError::SchedulerInvariantViolation(format!(
                "illegal transition {} -> {}",
                self.state, to
            )));
        }
        let t = StateTransition {
            from: self.state,
            to,
            at: Utc::now(),
        };
        self.state = to;
        self.log.push(t.clone());
        Ok(t)
    }
}
