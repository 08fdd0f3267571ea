//! Run recording adapter: bridges domain [`Event`]s to `RunLedger` persistence.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use storefront_state::{
    ContentDigest, RunEvent, RunId, RunLedger, RunMetadata, RunStatus, RunSummary, StorageResult,
};

use crate::domain::run::{Event, EventKind};

/// Adapter that records pipeline [`Event`]s into a [`RunLedger`].
///
/// Usage:
/// 1. [`PipelineRecorder::start`] creates the run.
/// 2. [`PipelineRecorder::record`] appends events; sequence numbers are
///    assigned here so callers cannot reorder them.
/// 3. [`PipelineRecorder::finish`] moves the run to its terminal status.
pub struct PipelineRecorder {
    ledger: Arc<dyn RunLedger>,
    run_id: RunId,
    next_seq: AtomicU64,
}

impl PipelineRecorder {
    /// Start a new run in the ledger, returning a recorder bound to that run.
    pub async fn start(
        ledger: Arc<dyn RunLedger>,
        plan_digest: &ContentDigest,
        metadata: RunMetadata,
    ) -> StorageResult<Self> {
        let pipeline = metadata.pipeline.clone();
        let run_id = ledger.create_run(plan_digest, metadata).await?;
        crate::obs::emit_run_started(&run_id.to_string(), &pipeline);
        Ok(Self {
            ledger,
            run_id,
            next_seq: AtomicU64::new(1),
        })
    }

    /// Record one event, returning its sequence number.
    pub async fn record(&self, kind: EventKind, payload: serde_json::Value) -> StorageResult<u64> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let event = Event::new(seq, kind, payload);
        let run_event = RunEvent {
            seq: event.seq,
            kind: event.kind.as_str().to_string(),
            payload: merge_kind_fields(&event.kind, event.payload),
            timestamp: event.timestamp,
        };
        crate::obs::emit_event_appended(&self.run_id.to_string(), &run_event.kind, seq);
        self.ledger.append_event(&self.run_id, run_event).await?;
        Ok(seq)
    }

    /// Finalize the run.
    pub async fn finish(
        self,
        status: RunStatus,
        duration_ms: u64,
        failed_stage: Option<String>,
    ) -> StorageResult<RunSummary> {
        let summary = RunSummary {
            total_events: self.events_recorded(),
            duration_ms,
            failed_stage,
        };
        crate::obs::emit_run_finished(
            &self.run_id.to_string(),
            status,
            summary.duration_ms,
            summary.total_events,
        );
        self.ledger
            .finish_run(&self.run_id, status, summary.clone())
            .await?;
        Ok(summary)
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn ledger(&self) -> &Arc<dyn RunLedger> {
        &self.ledger
    }

    pub fn events_recorded(&self) -> u64 {
        self.next_seq.load(Ordering::SeqCst) - 1
    }
}

/// Fold the kind's own fields (stage, environment, ...) into the payload so
/// ledger readers see them without decoding the kind.
fn merge_kind_fields(kind: &EventKind, payload: serde_json::Value) -> serde_json::Value {
    let mut merged = match serde_json::to_value(kind) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };
    merged.remove("type");
    match payload {
        serde_json::Value::Object(extra) => merged.extend(extra),
        serde_json::Value::Null => {}
        other => {
            merged.insert("value".to_string(), other);
        }
    }
    serde_json::Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use storefront_state::MemoryRunLedger;

    fn metadata() -> RunMetadata {
        RunMetadata {
            revision: Some("abc123".to_string()),
            pipeline: "integration".to_string(),
            trigger: "manual".to_string(),
            tags: json!({}),
        }
    }

    #[tokio::test]
    async fn records_events_with_increasing_seq() {
        let ledger: Arc<dyn RunLedger> = Arc::new(MemoryRunLedger::new());
        let recorder =
            PipelineRecorder::start(ledger.clone(), &ContentDigest::from_bytes(b"p"), metadata())
                .await
                .unwrap();

        let first = recorder
            .record(EventKind::StageStarted { stage: "lint".into() }, json!({}))
            .await
            .unwrap();
        let second = recorder
            .record(
                EventKind::StagePassed { stage: "lint".into() },
                json!({ "exit_code": 0 }),
            )
            .await
            .unwrap();
        assert_eq!((first, second), (1, 2));

        let run_id = recorder.run_id().clone();
        let summary = recorder.finish(RunStatus::Passed, 12, None).await.unwrap();
        assert_eq!(summary.total_events, 2);

        let events = ledger.get_events(&run_id).await.unwrap();
        assert_eq!(events[1].kind, "stage_passed");
        assert_eq!(events[1].payload["stage"], "lint");
        assert_eq!(events[1].payload["exit_code"], 0);

        let run = ledger.get_run(&run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Passed);
    }

    #[test]
    fn kind_fields_are_merged_into_payload() {
        let merged = merge_kind_fields(
            &EventKind::DeploymentRecorded {
                environment: "preview".into(),
            },
            json!({ "url": "https://x.example" }),
        );
        assert_eq!(merged["environment"], "preview");
        assert_eq!(merged["url"], "https://x.example");
        assert!(merged.get("type").is_none());
    }
}
