//! Observability tests for pipeline run lifecycle tracing.
//!
//! These tests verify that structured tracing events are emitted for the
//! key lifecycle points: run start, stage completion, run finish, gate
//! evaluation and rollback outcome.

use std::sync::Arc;

use serde_json::json;
use storefront_core::{
    emit_gate_evaluated, emit_rollback_completed, emit_run_finished, emit_run_started,
    emit_stage_finished, EventKind, PipelineRecorder, RunSpan,
};
use storefront_state::{ContentDigest, MemoryRunLedger, RunLedger, RunMetadata, RunStatus};
use tracing_test::traced_test;

fn metadata() -> RunMetadata {
    RunMetadata {
        revision: Some("abc1234".to_string()),
        pipeline: "production".to_string(),
        trigger: "merge_queue".to_string(),
        tags: json!({}),
    }
}

/// Test: emit_run_started logs the run id and pipeline
#[traced_test]
#[test]
fn test_emit_run_started_logs_run_id_and_pipeline() {
    emit_run_started("run-123", "preview");

    assert!(logs_contain("run.started"));
    assert!(logs_contain("run-123"));
    assert!(logs_contain("preview"));
}

/// Test: emit_stage_finished logs stage name and status
#[traced_test]
#[test]
fn test_emit_stage_finished_logs_status() {
    emit_stage_finished("typecheck", "failed", 812);

    assert!(logs_contain("run.stage"));
    assert!(logs_contain("typecheck"));
    assert!(logs_contain("failed"));
}

/// Test: emit_run_finished logs the terminal status
#[traced_test]
#[test]
fn test_emit_run_finished_logs_status() {
    emit_run_finished("run-456", RunStatus::Blocked, 5000, 12);

    assert!(logs_contain("run.finished"));
    assert!(logs_contain("Blocked"));
}

/// Test: emit_gate_evaluated logs the verdict
#[traced_test]
#[test]
fn test_emit_gate_evaluated_logs_verdict() {
    emit_gate_evaluated("run-gate-001", false, 2);

    assert!(logs_contain("gate.evaluated"));
    assert!(logs_contain("run-gate-001"));
}

/// Test: a failed rollback is logged at warn level
#[traced_test]
#[test]
fn test_failed_rollback_logs_warning() {
    emit_rollback_completed("good000", Some("bad0000"), false);

    assert!(logs_contain("rollback.completed"));
    assert!(logs_contain("WARN"));
    assert!(logs_contain("good000"));
}

/// Test: events inside an instrumented run carry the run span's fields
#[traced_test]
#[tokio::test]
async fn test_run_span_tags_events_inside_the_run() {
    RunSpan::new("rollback", "abc1234")
        .instrument(async {
            tokio::task::yield_now().await;
            tracing::info!("inside run span");
        })
        .await;
    tracing::info!("outside run span");

    assert!(logs_contain("inside run span"));
    assert!(logs_contain("storefront.run"));
    logs_assert(|lines: &[&str]| {
        let outside: Vec<&&str> = lines
            .iter()
            .filter(|line| line.contains("outside run span"))
            .collect();
        match outside.as_slice() {
            [line] if !line.contains("storefront.run") => Ok(()),
            other => Err(format!("unexpected outside lines: {other:?}")),
        }
    });
}

/// Test: a recorded run emits start and finish events and lands in the ledger
#[traced_test]
#[tokio::test]
async fn test_recorder_lifecycle_is_traced() {
    let ledger: Arc<dyn RunLedger> = Arc::new(MemoryRunLedger::new());
    let recorder = PipelineRecorder::start(
        ledger.clone(),
        &ContentDigest::from_bytes(b"plan"),
        metadata(),
    )
    .await
    .expect("start recorder");

    recorder
        .record(
            EventKind::StageStarted {
                stage: "deploy".to_string(),
            },
            json!({}),
        )
        .await
        .expect("record");
    let run_id = recorder.run_id().clone();
    let summary = recorder
        .finish(RunStatus::Passed, 42, None)
        .await
        .expect("finish");

    assert_eq!(summary.total_events, 1);
    assert!(logs_contain("run.started"));
    assert!(logs_contain("run.finished"));

    let record = ledger.get_run(&run_id).await.expect("get run");
    assert_eq!(record.status, RunStatus::Passed);
    assert_eq!(record.metadata.pipeline, "production");
}
