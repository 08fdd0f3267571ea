//! Stage bookkeeping shared by every pipeline.
//!
//! A [`TrackedRun`] owns the ledger recorder for one run and the ordered
//! stage outcomes, so each stage produces exactly one `stage_started`
//! event followed by one terminal event.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use storefront_core::{
    emit_stage_finished, EventKind, PipelineRecorder, PipelineRun, Result, Revision,
    StageOutcome, StageStatus, TriggerKind,
};
use storefront_state::{RunEvent, RunLedger, RunStatus};
use tracing::info;

use crate::plan::RunPlan;
use crate::runner::{tail_lines, StageRunner};
use crate::stage::StageConfig;

pub(crate) struct TrackedRun {
    recorder: PipelineRecorder,
    pipeline: String,
    trigger: TriggerKind,
    revision: Option<Revision>,
    stages: Vec<StageOutcome>,
    start: Instant,
}

impl TrackedRun {
    pub async fn start(
        ledger: Arc<dyn RunLedger>,
        plan: &RunPlan,
        trigger: TriggerKind,
        revision: Option<&Revision>,
    ) -> Result<Self> {
        let recorder =
            PipelineRecorder::start(ledger, &plan.digest(), plan.metadata(trigger)).await?;
        Ok(Self {
            recorder,
            pipeline: plan.pipeline.clone(),
            trigger,
            revision: revision.cloned(),
            stages: Vec::new(),
            start: Instant::now(),
        })
    }

    pub fn run_id(&self) -> String {
        self.recorder.run_id().to_string()
    }

    pub async fn record(&self, kind: EventKind, payload: Value) -> Result<()> {
        self.recorder.record(kind, payload).await?;
        Ok(())
    }

    pub async fn started(&self, stage: &str, payload: Value) -> Result<()> {
        info!(stage = %stage, "Executing stage");
        self.record(
            EventKind::StageStarted {
                stage: stage.to_string(),
            },
            payload,
        )
        .await
    }

    pub async fn passed(&mut self, stage: &str, duration_ms: u64, payload: Value) -> Result<()> {
        self.record(
            EventKind::StagePassed {
                stage: stage.to_string(),
            },
            payload,
        )
        .await?;
        self.push(StageOutcome::passed(stage, duration_ms));
        Ok(())
    }

    pub async fn failed(
        &mut self,
        stage: &str,
        duration_ms: u64,
        detail: &str,
        mut payload: Value,
    ) -> Result<()> {
        if let Value::Object(map) = &mut payload {
            map.insert("error".to_string(), json!(detail));
        } else {
            payload = json!({ "error": detail });
        }
        self.record(
            EventKind::StageFailed {
                stage: stage.to_string(),
            },
            payload,
        )
        .await?;
        self.push(StageOutcome::failed(stage, duration_ms, detail));
        Ok(())
    }

    pub async fn skipped(&mut self, stage: &str, reason: &str) -> Result<()> {
        info!(stage = %stage, reason = %reason, "Skipping stage");
        self.record(
            EventKind::StageSkipped {
                stage: stage.to_string(),
            },
            json!({ "reason": reason }),
        )
        .await?;
        self.push(StageOutcome::skipped(stage, reason));
        Ok(())
    }

    /// Run one command stage, recording its events. Returns whether it passed.
    pub async fn run_command(&mut self, config: &StageConfig, workdir: &Path) -> Result<bool> {
        if !config.enabled {
            self.skipped(&config.name, "disabled").await?;
            return Ok(true);
        }

        self.started(
            &config.name,
            json!({
                "command": &config.command,
                "timeout_secs": config.timeout_secs,
            }),
        )
        .await?;

        let stage_start = Instant::now();
        match StageRunner::execute_stage(config, workdir).await {
            Ok(result) if result.passed() => {
                self.passed(
                    &config.name,
                    result.duration_ms,
                    json!({ "exit_code": result.exit_code }),
                )
                .await?;
                Ok(true)
            }
            Ok(result) => {
                self.failed(
                    &config.name,
                    result.duration_ms,
                    &result.failure_detail(),
                    json!({
                        "exit_code": result.exit_code,
                        "stdout_tail": tail_lines(&result.stdout, 20),
                        "stderr_tail": tail_lines(&result.stderr, 20),
                    }),
                )
                .await?;
                Ok(false)
            }
            Err(e) => {
                let duration_ms = stage_start.elapsed().as_millis() as u64;
                self.failed(
                    &config.name,
                    duration_ms,
                    &e.to_string(),
                    json!({ "exit_code": -1 }),
                )
                .await?;
                Ok(false)
            }
        }
    }

    /// Events recorded so far.
    pub async fn events(&self) -> Result<Vec<RunEvent>> {
        Ok(self
            .recorder
            .ledger()
            .get_events(self.recorder.run_id())
            .await?)
    }

    pub fn stages(&self) -> &[StageOutcome] {
        &self.stages
    }

    pub fn any_failed(&self) -> bool {
        self.stages.iter().any(|s| s.status == StageStatus::Failed)
    }

    /// Finalize the run in the ledger.
    pub async fn finish(self, status: RunStatus) -> Result<PipelineRun> {
        let duration_ms = self.start.elapsed().as_millis() as u64;
        let run_id = self.run_id();
        let failed_stage = self
            .stages
            .iter()
            .find(|s| s.status == StageStatus::Failed)
            .map(|s| s.stage.clone());
        self.recorder
            .finish(status, duration_ms, failed_stage)
            .await?;

        Ok(PipelineRun {
            run_id,
            pipeline: self.pipeline,
            trigger: self.trigger,
            revision: self.revision,
            stages: self.stages,
            status,
            duration_ms,
        })
    }

    fn push(&mut self, outcome: StageOutcome) {
        let status = match outcome.status {
            StageStatus::Passed => "passed",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
        };
        emit_stage_finished(&outcome.stage, status, outcome.duration_ms);
        self.stages.push(outcome);
    }
}
