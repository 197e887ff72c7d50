//! Run report: the artifact external tooling consumes at `Done` or `Halted`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use contextgate_state::{ArchivedReport, ContentDigest, ReportArchive};

use crate::domain::{ConflictRecord, ContextSnapshot, Result, WorkItem};
use crate::metrics::MetricsSnapshot;
use crate::scheduler::{DroppedContribution, HaltReason, PipelineState, StateTransition};

/// File name written by [`write_run_report_json`].
pub const RUN_REPORT_FILE: &str = "run_report.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub work_item: WorkItem,
    pub terminal_state: PipelineState,
    /// Latest committed snapshot; `None` when the foundation never landed.
    pub final_snapshot: Option<ContextSnapshot>,
    /// Content digest of `final_snapshot`, for audit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_digest: Option<ContentDigest>,
    /// Every conflict raised during the run, resolved or not.
    pub conflicts: Vec<ConflictRecord>,
    pub aggregate_confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halt: Option<HaltReason>,
    pub dropped: Vec<DroppedContribution>,
    pub transitions: Vec<StateTransition>,
    /// Committed snapshot versions, oldest first.
    pub history_versions: Vec<u64>,
    /// Counters collected during this run only.
    #[serde(default)]
    pub metrics: MetricsSnapshot,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.terminal_state == PipelineState::Done
    }

    pub fn unresolved_conflicts(&self) -> impl Iterator<Item = &ConflictRecord> {
        self.conflicts.iter().filter(|c| !c.is_resolved())
    }

    pub fn duration_ms(&self) -> u64 {
        u64::try_from((self.finished_at - self.started_at).num_milliseconds()).unwrap_or(0)
    }

    /// Store this report in `archive`.
    pub async fn archive_to(&self, archive: &dyn ReportArchive) -> Result<()> {
        let record = ArchivedReport::new(
            self.run_id.as_str(),
            self.work_item.as_str(),
            self.terminal_state.as_str(),
            serde_json::to_value(self)?,
        )?;
        archive.put(record).await?;
        Ok(())
    }
}

/// Write `report` as pretty JSON into `dir/run_report.json`.
///
/// Creates `dir` if needed and returns the path written.
pub fn write_run_report_json(report: &RunReport, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(RUN_REPORT_FILE);
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(&path, json)?;
    info!(run_id = %report.run_id, path = %path.display(), "run report written");
    Ok(path)
}
