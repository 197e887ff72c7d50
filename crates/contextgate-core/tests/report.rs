mod common;

use contextgate_core::{write_run_report_json, PipelineState, RunReport, RUN_REPORT_FILE};

#[tokio::test]
async fn run_report_is_written_as_json() {
    let report = common::with_agents(
        common::scheduler(common::config()),
        &common::consistent_agents(),
    )
    .run(common::work_item())
    .await
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("reports");
    let path = write_run_report_json(&report, &out).unwrap();
    assert_eq!(path, out.join(RUN_REPORT_FILE));

    let raw = std::fs::read_to_string(&path).unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["terminal_state"], "done");
    assert_eq!(value["work_item"], common::TICKET);
    assert!(value.get("halt").is_none());

    let back: RunReport = serde_json::from_str(&raw).unwrap();
    assert_eq!(back.run_id, report.run_id);
    assert_eq!(back.terminal_state, PipelineState::Done);
    assert_eq!(back.history_versions, report.history_versions);
}

#[tokio::test]
async fn report_carries_final_digest_and_its_own_counters() {
    let pipeline = common::with_agents(
        common::scheduler(common::config()),
        &common::consistent_agents(),
    );
    let first = pipeline.run(common::work_item()).await.unwrap();
    let second = pipeline.run(common::work_item()).await.unwrap();

    let head = first.final_snapshot.as_ref().unwrap();
    assert_eq!(first.final_digest, Some(head.digest().unwrap()));

    // Counters cover one run each, not everything since process start.
    for report in [&first, &second] {
        assert_eq!(
            report.metrics.snapshots_committed,
            report.history_versions.len() as u64
        );
        assert_eq!(report.metrics.contributions_dropped, 0);
        assert_eq!(report.metrics.gate_blocks, 0);
    }
}
