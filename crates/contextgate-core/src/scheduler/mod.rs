//! Pipeline Scheduler.
//!
//! - [`state`]: `PipelineState` machine and its transition log
//! - [`plan`]: phase membership and dependencies
//! - [`agent`]: `AnalysisAgent` / `FoundationSource` contracts
//! - [`executor`]: concurrent phase execution with timeouts and retries
//! - [`pipeline`]: `Scheduler`, which drives a run end to end

pub mod agent;
pub mod executor;
pub mod pipeline;
pub mod plan;
pub mod state;

pub use agent::{
    AgentInstruction, AgentOutput, AgentRequest, AnalysisAgent, FoundationSource, StaticFoundation,
};
pub use executor::{DropCause, DroppedContribution, PhaseExecutor, PhaseRun};
pub use pipeline::{HaltReason, Scheduler};
pub use plan::{Phase, PhasePlan};
pub use state::{PipelineState, StateMachine, StateTransition};
