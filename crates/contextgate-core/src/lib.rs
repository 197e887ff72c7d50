//! Contextgate-Core: progressive context propagation for multi-agent runs.
//!
//! Several analysis agents contribute findings about one work item. This
//! crate merges their output into versioned, append-only context snapshots,
//! refuses unverified factual claims, checks contributions for mutual
//! consistency, resolves or escalates conflicts, and scores the result.
//!
//! Flow of a run:
//!
//! 1. foundation data is bootstrapped into snapshot version 1;
//! 2. phase 1 agents run concurrently; each output passes the
//!    [`EvidenceGate`] before the [`ContextManager`] merges it into the
//!    [`ContextStore`];
//! 3. the [`ConsistencyValidator`] checks the merged snapshot and the
//!    [`ConflictResolver`] handles what it flags;
//! 4. phase 2 repeats on the validated snapshot;
//! 5. the [`ConfidenceAggregator`] produces the final score and the
//!    [`Scheduler`] emits a [`RunReport`].

pub mod aggregate;
pub mod config;
pub mod context;
pub mod domain;
pub mod evidence_gate;
pub mod metrics;
pub mod obs;
pub mod report;
pub mod resolver;
pub mod scheduler;
pub mod telemetry;
pub mod validation;

pub use aggregate::{ConfidenceAggregator, ConfidenceBreakdown};
pub use config::{ConfidenceConfig, PipelineConfig};
pub use context::{Admission, ContextManager, ContextStore, ContributionDraft, ForkCommit};
pub use domain::{
    AgentName, BlockReason, CheckName, CheckOutcome, ConflictKind, ConflictRecord,
    ConflictingValue, ContextError, ContextSnapshot, Contribution, ContributionStatus,
    Enhancement, EnhancementCategory, EvidenceRecord, FoundationData, ResolutionStatus, Result,
    Severity, SnapshotMetadata, SourceKind, TicketInfo, ValidationState, ValueSource,
    VersionContext, WorkItem,
};
pub use evidence_gate::{AdmitDecision, EvidenceGate, EvidencePolicy};
pub use metrics::{Metrics, MetricsSnapshot};
pub use report::{write_run_report_json, RunReport, RUN_REPORT_FILE};
pub use resolver::{
    Advice, ConflictResolver, ConflictSignature, EscalationHandler, ManualDecision, NoopAdvisor,
    PatternLibrary, Resolution, ResolutionAction, ResolutionAdvisor, ResolutionOrigin,
};
pub use scheduler::{
    AgentInstruction, AgentOutput, AgentRequest, AnalysisAgent, DropCause, DroppedContribution,
    FoundationSource, HaltReason, Phase, PhasePlan, PipelineState, Scheduler, StateTransition,
    StaticFoundation,
};
pub use validation::{ConsistencyValidator, ValidationLevel, ValidationResult, ValidatorConfig};
