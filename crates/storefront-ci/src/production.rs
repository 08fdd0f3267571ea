//! Production Publisher: the merge-queue gate.
//!
//! Check, deploy, resolve the URL and run acceptance tests, strictly in that
//! order. The change is admitted only when the merge gate passes over the
//! recorded events; anything else blocks the merge and yields exactly one
//! [`RollbackRequest`].

use std::sync::Arc;

use serde_json::json;
use storefront_core::{
    emit_gate_evaluated, DeploymentResult, Environment, EventKind, PipelineRun, Result, Revision,
    RunSpan, StageStatus, TriggerKind,
};
use storefront_state::{RunLedger, RunStatus};
use tracing::{info, warn};

use crate::acceptance::{AcceptanceSuite, SuiteReport};
use crate::deploy::{deploy_stage, Deployer};
use crate::gate::{GateVerdict, MergeGate};
use crate::integration::{run_acceptance, IntegrationCheck};
use crate::plan::RunPlan;
use crate::rollback::RollbackRequest;
use crate::stage::{ACCEPTANCE_STAGE, DEPLOY_STAGE};
use crate::tracking::TrackedRun;

pub const PIPELINE: &str = "production";

/// Result of one production run.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductionOutcome {
    pub run: PipelineRun,
    pub deployment: Option<DeploymentResult>,
    /// URL the acceptance suite ran against.
    pub url: Option<String>,
    pub acceptance: Option<SuiteReport>,
    pub verdict: GateVerdict,
    /// Set exactly when the merge is blocked.
    pub rollback: Option<RollbackRequest>,
}

impl ProductionOutcome {
    /// Whether the change may merge.
    pub fn admitted(&self) -> bool {
        self.run.passed() && self.verdict.passed
    }
}

pub struct ProductionPublisher {
    check: IntegrationCheck,
    deployer: Arc<dyn Deployer>,
    suite: Arc<dyn AcceptanceSuite>,
    ledger: Arc<dyn RunLedger>,
    production_url: Option<String>,
}

impl ProductionPublisher {
    pub fn new(
        check: IntegrationCheck,
        deployer: Arc<dyn Deployer>,
        suite: Arc<dyn AcceptanceSuite>,
        ledger: Arc<dyn RunLedger>,
    ) -> Self {
        Self {
            check,
            deployer,
            suite,
            ledger,
            production_url: None,
        }
    }

    /// Static production URL; always preferred over the deployed URL.
    pub fn with_production_url(mut self, url: Option<String>) -> Self {
        self.production_url = url;
        self
    }

    pub async fn publish(
        &self,
        revision: &Revision,
        trigger: TriggerKind,
    ) -> Result<ProductionOutcome> {
        RunSpan::new(PIPELINE, revision.short())
            .instrument(self.run_revision(revision, trigger))
            .await
    }

    async fn run_revision(
        &self,
        revision: &Revision,
        trigger: TriggerKind,
    ) -> Result<ProductionOutcome> {
        let verification = self.check.stage_names();

        let mut stages = verification.clone();
        stages.push(DEPLOY_STAGE.to_string());
        stages.push(ACCEPTANCE_STAGE.to_string());
        let plan = RunPlan::new(PIPELINE, stages, Some(revision));
        let mut run =
            TrackedRun::start(self.ledger.clone(), &plan, trigger, Some(revision)).await?;

        let mut deployment = None;
        let mut url = None;
        let mut acceptance = None;

        if self.check.verify(&mut run).await? {
            let deployed = deploy_stage(
                &mut run,
                self.deployer.as_ref(),
                Environment::Production,
                revision,
                self.production_url.as_deref(),
                true,
            )
            .await?;
            if let Some((result, Some(resolved))) = deployed {
                deployment = Some(result);
                acceptance =
                    Some(run_acceptance(&mut run, self.suite.as_ref(), &resolved).await?);
                url = Some(resolved);
            }
        }

        let events = run.events().await?;
        let verdict = MergeGate::evaluate_production(&events, &verification);
        emit_gate_evaluated(&run.run_id(), verdict.passed, verdict.violations.len());

        let admitted = verdict.passed && !run.any_failed();
        let rollback = if admitted {
            info!(revision = %revision.short(), "Production run passed, change admitted");
            None
        } else {
            let reason = match run.stages().iter().find(|s| s.status == StageStatus::Failed) {
                Some(stage) => format!(
                    "{} failed: {}",
                    stage.stage,
                    stage.detail.as_deref().unwrap_or("unknown error")
                ),
                None => verdict.violations.join("; "),
            };
            warn!(revision = %revision.short(), reason = %reason, "Merge blocked");
            run.record(
                EventKind::RollbackRequested {
                    failed_revision: revision.id.clone(),
                },
                json!({ "reason": &reason }),
            )
            .await?;
            Some(RollbackRequest::automatic(revision.clone(), reason))
        };

        let status = if admitted {
            RunStatus::Passed
        } else {
            RunStatus::Blocked
        };
        Ok(ProductionOutcome {
            run: run.finish(status).await?,
            deployment,
            url,
            acceptance,
            verdict,
            rollback,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeDeployer, FakeSuite};
    use crate::stage::StageConfig;
    use storefront_state::MemoryRunLedger;

    fn publisher(
        verify: &str,
        deployer: Arc<FakeDeployer>,
        suite: Arc<FakeSuite>,
    ) -> ProductionPublisher {
        let check = IntegrationCheck::new(
            vec![StageConfig::custom("build".to_string(), vec![verify.to_string()], 30)],
            std::env::current_dir().unwrap(),
        );
        ProductionPublisher::new(check, deployer, suite, Arc::new(MemoryRunLedger::new()))
    }

    fn revision() -> Revision {
        Revision::new("feedface00")
    }

    #[tokio::test]
    async fn passing_run_is_admitted() {
        let deployer = Arc::new(FakeDeployer::succeeding("https://deploy.example.dev"));
        let suite = Arc::new(FakeSuite::passing());
        let outcome = publisher("true", deployer, suite.clone())
            .publish(&revision(), TriggerKind::MergeQueue)
            .await
            .unwrap();

        assert!(outcome.admitted(), "{:?}", outcome.verdict);
        assert!(outcome.rollback.is_none());
        assert_eq!(outcome.run.status, RunStatus::Passed);
        assert_eq!(suite.base_urls(), vec!["https://deploy.example.dev"]);
    }

    #[tokio::test]
    async fn static_url_overrides_deployed_url() {
        let deployer = Arc::new(FakeDeployer::succeeding("https://deploy.example.dev"));
        let suite = Arc::new(FakeSuite::passing());
        let outcome = publisher("true", deployer, suite.clone())
            .with_production_url(Some("https://shop.example.com".to_string()))
            .publish(&revision(), TriggerKind::MergeQueue)
            .await
            .unwrap();

        assert!(outcome.admitted());
        assert_eq!(outcome.url.as_deref(), Some("https://shop.example.com"));
        assert_eq!(suite.base_urls(), vec!["https://shop.example.com"]);
    }

    #[tokio::test]
    async fn acceptance_failure_blocks_and_requests_one_rollback() {
        let deployer = Arc::new(FakeDeployer::succeeding("https://deploy.example.dev"));
        let suite = Arc::new(FakeSuite::failing("no add-to-cart control"));
        let outcome = publisher("true", deployer, suite)
            .publish(&revision(), TriggerKind::MergeQueue)
            .await
            .unwrap();

        assert!(!outcome.admitted());
        assert_eq!(outcome.run.status, RunStatus::Blocked);
        let request = outcome.rollback.unwrap();
        assert_eq!(request.failed_revision, Some(revision()));
        assert!(request.reason.contains("no add-to-cart control"));
    }

    #[tokio::test]
    async fn deploy_without_any_url_fails() {
        let deployer = Arc::new(FakeDeployer::without_url());
        let suite = Arc::new(FakeSuite::passing());
        let outcome = publisher("true", deployer, suite.clone())
            .publish(&revision(), TriggerKind::MergeQueue)
            .await
            .unwrap();

        assert!(!outcome.admitted());
        let deploy = outcome.run.stage(DEPLOY_STAGE).unwrap();
        assert_eq!(deploy.status, StageStatus::Failed);
        assert!(deploy.detail.as_deref().unwrap().contains("no production URL"));
        assert!(suite.base_urls().is_empty());
        assert!(outcome.rollback.is_some());
    }

    #[tokio::test]
    async fn verification_failure_never_deploys() {
        let deployer = Arc::new(FakeDeployer::succeeding("https://deploy.example.dev"));
        let suite = Arc::new(FakeSuite::passing());
        let outcome = publisher("false", deployer.clone(), suite)
            .publish(&revision(), TriggerKind::MergeQueue)
            .await
            .unwrap();

        assert!(!outcome.admitted());
        assert!(deployer.calls().is_empty());
        assert!(outcome.rollback.is_some());
    }

    #[tokio::test]
    async fn missing_token_blocks_merge() {
        let deployer = Arc::new(FakeDeployer::unauthenticated());
        let suite = Arc::new(FakeSuite::passing());
        let outcome = publisher("true", deployer, suite)
            .publish(&revision(), TriggerKind::MergeQueue)
            .await
            .unwrap();

        assert_eq!(outcome.run.status, RunStatus::Blocked);
        let deploy = outcome.run.stage(DEPLOY_STAGE).unwrap();
        assert!(deploy.detail.as_deref().unwrap().contains("authentication"));
    }
}
