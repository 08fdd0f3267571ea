//! Integration Check: verify a revision's source, optionally followed by
//! acceptance tests against a running deployment.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use storefront_core::{PipelineConfig, PipelineRun, Result, Revision, RunSpan, TriggerKind};
use storefront_state::{RunLedger, RunStatus};
use tracing::{info, warn};

use crate::acceptance::{AcceptanceSuite, SuiteReport};
use crate::plan::RunPlan;
use crate::stage::{verification_stages, StageConfig, ACCEPTANCE_STAGE};
use crate::tracking::TrackedRun;

pub const PIPELINE: &str = "integration";

/// Runs the verification stages in order, stopping at the first failure.
#[derive(Debug, Clone)]
pub struct IntegrationCheck {
    stages: Vec<StageConfig>,
    workdir: PathBuf,
}

impl IntegrationCheck {
    pub fn new(stages: Vec<StageConfig>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            stages,
            workdir: workdir.into(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(verification_stages(config), config.workdir.clone())
    }

    /// Names of the enabled verification stages, in order.
    pub fn stage_names(&self) -> Vec<String> {
        self.stages
            .iter()
            .filter(|s| s.enabled)
            .map(|s| s.name.clone())
            .collect()
    }

    /// Run a standalone check as its own ledger run.
    ///
    /// Acceptance runs only when `acceptance` carries a suite and base URL;
    /// otherwise the acceptance stage is recorded as skipped.
    pub async fn run(
        &self,
        ledger: Arc<dyn RunLedger>,
        acceptance: Option<(&dyn AcceptanceSuite, &str)>,
        trigger: TriggerKind,
        revision: Option<&Revision>,
    ) -> Result<PipelineRun> {
        RunSpan::new(PIPELINE, revision.map(|r| r.short()).unwrap_or("workdir"))
            .instrument(self.run_stages(ledger, acceptance, trigger, revision))
            .await
    }

    async fn run_stages(
        &self,
        ledger: Arc<dyn RunLedger>,
        acceptance: Option<(&dyn AcceptanceSuite, &str)>,
        trigger: TriggerKind,
        revision: Option<&Revision>,
    ) -> Result<PipelineRun> {
        let mut names = self.stage_names();
        names.push(ACCEPTANCE_STAGE.to_string());
        let plan = RunPlan::new(PIPELINE, names, revision);
        let mut run = TrackedRun::start(ledger, &plan, trigger, revision).await?;

        if self.verify(&mut run).await? {
            match acceptance {
                Some((suite, base_url)) => {
                    run_acceptance(&mut run, suite, base_url).await?;
                }
                None => {
                    run.skipped(ACCEPTANCE_STAGE, "no base URL supplied").await?;
                }
            }
        }

        let status = if run.any_failed() {
            RunStatus::Failed
        } else {
            RunStatus::Passed
        };
        run.finish(status).await
    }

    /// Run the verification stages into an existing run. Returns whether
    /// every enabled stage passed.
    pub(crate) async fn verify(&self, run: &mut TrackedRun) -> Result<bool> {
        for stage in &self.stages {
            if !run.run_command(stage, &self.workdir).await? {
                warn!(stage = %stage.name, "Verification failed, stopping");
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Run the acceptance suite as the `acceptance` stage of `run`.
pub(crate) async fn run_acceptance(
    run: &mut TrackedRun,
    suite: &dyn AcceptanceSuite,
    base_url: &str,
) -> Result<SuiteReport> {
    run.started(ACCEPTANCE_STAGE, json!({ "base_url": base_url }))
        .await?;
    let start = Instant::now();
    let report = suite.run(base_url).await;
    let duration_ms = start.elapsed().as_millis() as u64;
    let payload = json!({
        "base_url": base_url,
        "scenarios": serde_json::to_value(&report.scenarios)?,
    });

    if report.passed() {
        info!(base_url = %base_url, "Acceptance suite passed");
        run.passed(ACCEPTANCE_STAGE, duration_ms, payload).await?;
    } else {
        run.failed(
            ACCEPTANCE_STAGE,
            duration_ms,
            &report.failure_summary(),
            payload,
        )
        .await?;
    }
    Ok(report)
}
