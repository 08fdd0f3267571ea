//! Rollback Agent: put the last good revision back on production.
//!
//! Only the deployment step is re-run; there is no retry. When the
//! redeploy fails the outcome says manual intervention is required.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use storefront_core::{
    emit_rollback_completed, git, DeploymentResult, Environment, EventKind, PipelineError,
    PipelineRun, Result, Revision, RunSpan, TriggerKind,
};
use storefront_state::{RunLedger, RunStatus};
use tracing::{info, warn};

use crate::deploy::{deploy_stage, Deployer};
use crate::notify::{RollbackNotice, RollbackNotifier};
use crate::plan::RunPlan;
use crate::stage::DEPLOY_STAGE;
use crate::tracking::TrackedRun;

pub const PIPELINE: &str = "rollback";

pub const RESOLVE_STAGE: &str = "resolve_target";
pub const CHECKOUT_STAGE: &str = "checkout";

/// Why a rollback was requested.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RollbackOrigin {
    /// A production run failed.
    Automatic,
    /// An operator asked for it.
    Manual,
}

/// A request to restore production.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RollbackRequest {
    /// The revision that must not stay deployed.
    pub failed_revision: Option<Revision>,
    /// Explicit target; the failed revision's predecessor when unset.
    pub target: Option<Revision>,
    pub reason: String,
    pub origin: RollbackOrigin,
}

impl RollbackRequest {
    /// Roll back to the predecessor of `failed`.
    pub fn automatic(failed: Revision, reason: impl Into<String>) -> Self {
        Self {
            failed_revision: Some(failed),
            target: None,
            reason: reason.into(),
            origin: RollbackOrigin::Automatic,
        }
    }

    /// Roll back to an operator-chosen revision.
    pub fn manual(target: Revision, failed: Option<Revision>) -> Self {
        Self {
            failed_revision: failed,
            target: Some(target),
            reason: "manual rollback".to_string(),
            origin: RollbackOrigin::Manual,
        }
    }
}

/// Source history the agent resolves and checks out revisions from.
#[async_trait]
pub trait SourceRepository: Send + Sync {
    /// Currently checked-out revision.
    async fn head(&self) -> Result<Revision>;

    /// Resolve a ref or abbreviated id to a full revision.
    async fn resolve(&self, revision: &str) -> Result<Revision>;

    /// The revision immediately before `revision`.
    async fn predecessor(&self, revision: &Revision) -> Result<Revision>;

    async fn checkout(&self, revision: &Revision) -> Result<()>;
}

/// A local git checkout.
#[derive(Debug, Clone)]
pub struct GitRepository {
    dir: PathBuf,
}

impl GitRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(PathBuf) -> Result<T> + Send + 'static,
    {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || f(dir))
            .await
            .map_err(|e| PipelineError::Git(format!("git task failed: {e}")))?
    }
}

#[async_trait]
impl SourceRepository for GitRepository {
    async fn head(&self) -> Result<Revision> {
        self.blocking(|dir| git::capture_head_sha(&dir).map(Revision::new))
            .await
    }

    async fn resolve(&self, revision: &str) -> Result<Revision> {
        let revision = revision.to_string();
        self.blocking(move |dir| git::resolve_revision(&dir, &revision).map(Revision::new))
            .await
    }

    async fn predecessor(&self, revision: &Revision) -> Result<Revision> {
        if let Some(parent) = &revision.predecessor {
            return Ok(Revision::new(parent.clone()));
        }
        let id = revision.id.clone();
        self.blocking(move |dir| git::resolve_parent(&dir, &id).map(Revision::new))
            .await
    }

    async fn checkout(&self, revision: &Revision) -> Result<()> {
        let id = revision.id.clone();
        self.blocking(move |dir| git::checkout(&dir, &id)).await
    }
}

/// Result of one rollback attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RollbackReport {
    pub run: PipelineRun,
    pub target: Option<Revision>,
    pub failed_revision: Option<Revision>,
    pub deployment: Option<DeploymentResult>,
    pub notice: RollbackNotice,
}

impl RollbackReport {
    pub fn succeeded(&self) -> bool {
        self.run.passed()
    }

    pub fn requires_manual_intervention(&self) -> bool {
        self.notice.requires_manual_intervention
    }
}

pub struct RollbackAgent {
    repo: Arc<dyn SourceRepository>,
    deployer: Arc<dyn Deployer>,
    notifiers: Vec<Arc<dyn RollbackNotifier>>,
    ledger: Arc<dyn RunLedger>,
    production_url: Option<String>,
}

impl RollbackAgent {
    pub fn new(
        repo: Arc<dyn SourceRepository>,
        deployer: Arc<dyn Deployer>,
        ledger: Arc<dyn RunLedger>,
    ) -> Self {
        Self {
            repo,
            deployer,
            notifiers: Vec::new(),
            ledger,
            production_url: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn RollbackNotifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn with_production_url(mut self, url: Option<String>) -> Self {
        self.production_url = url;
        self
    }

    pub fn repository(&self) -> &Arc<dyn SourceRepository> {
        &self.repo
    }

    /// Execute a rollback.
    ///
    /// Outcomes, including a refusal to redeploy the failed revision, are
    /// reported in the returned [`RollbackReport`] and sent to every
    /// notifier. `Err` is reserved for ledger failures.
    pub async fn rollback(
        &self,
        request: &RollbackRequest,
        trigger: TriggerKind,
    ) -> Result<RollbackReport> {
        let label = request
            .failed_revision
            .as_ref()
            .map(|r| r.short())
            .unwrap_or("manual");
        RunSpan::new(PIPELINE, label)
            .instrument(self.run_rollback(request, trigger))
            .await
    }

    async fn run_rollback(
        &self,
        request: &RollbackRequest,
        trigger: TriggerKind,
    ) -> Result<RollbackReport> {
        let failed = request.failed_revision.clone();
        let stages = vec![
            RESOLVE_STAGE.to_string(),
            CHECKOUT_STAGE.to_string(),
            DEPLOY_STAGE.to_string(),
        ];
        let plan = RunPlan::new(PIPELINE, stages, failed.as_ref());
        let mut run =
            TrackedRun::start(self.ledger.clone(), &plan, trigger, failed.as_ref()).await?;

        run.record(
            EventKind::RollbackRequested {
                failed_revision: failed.as_ref().map(|r| r.id.clone()).unwrap_or_default(),
            },
            json!({ "reason": &request.reason, "origin": request.origin }),
        )
        .await?;

        // Resolve the target.
        run.started(RESOLVE_STAGE, json!({ "explicit": request.target.is_some() }))
            .await?;
        let start = Instant::now();
        let resolved = match (&request.target, &failed) {
            (Some(target), _) => self.repo.resolve(&target.id).await,
            (None, Some(failed)) => self.repo.predecessor(failed).await,
            (None, None) => Err(PipelineError::Rollback(
                "no target and no failed revision to derive one from".to_string(),
            )),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let target = match resolved {
            Ok(target) => target,
            Err(e) => {
                run.failed(RESOLVE_STAGE, duration_ms, &e.to_string(), json!({}))
                    .await?;
                return self
                    .conclude(run, None, failed, None, None, Some(e.to_string()))
                    .await;
            }
        };

        if let Some(failed) = &failed {
            if same_revision(&target.id, &failed.id) {
                let refusal = PipelineError::SameRevision {
                    revision: failed.id.clone(),
                }
                .to_string();
                warn!(target = %target.short(), "{refusal}");
                run.failed(RESOLVE_STAGE, duration_ms, &refusal, json!({}))
                    .await?;
                return self
                    .conclude(run, None, Some(failed.clone()), None, None, Some(refusal))
                    .await;
            }
        }
        run.passed(RESOLVE_STAGE, duration_ms, json!({ "target": &target.id }))
            .await?;
        info!(target = %target.short(), "Rollback target resolved");

        // Check it out.
        run.started(CHECKOUT_STAGE, json!({ "target": &target.id }))
            .await?;
        let start = Instant::now();
        if let Err(e) = self.repo.checkout(&target).await {
            let duration_ms = start.elapsed().as_millis() as u64;
            run.failed(CHECKOUT_STAGE, duration_ms, &e.to_string(), json!({}))
                .await?;
            return self
                .conclude(run, Some(target), failed, None, None, Some(e.to_string()))
                .await;
        }
        run.passed(CHECKOUT_STAGE, start.elapsed().as_millis() as u64, json!({}))
            .await?;

        // Redeploy. No retry.
        let deployed = deploy_stage(
            &mut run,
            self.deployer.as_ref(),
            Environment::Production,
            &target,
            self.production_url.as_deref(),
            false,
        )
        .await?;

        let detail = match &deployed {
            Some(_) => None,
            None => run
                .stages()
                .last()
                .and_then(|s| s.detail.clone())
                .or_else(|| Some("redeploy failed".to_string())),
        };
        let (deployment, url) = match deployed {
            Some((deployment, url)) => (Some(deployment), url),
            None => (None, None),
        };

        self.conclude(run, Some(target), failed, deployment, url, detail)
            .await
    }

    async fn conclude(
        &self,
        run: TrackedRun,
        target: Option<Revision>,
        failed: Option<Revision>,
        deployment: Option<DeploymentResult>,
        url: Option<String>,
        detail: Option<String>,
    ) -> Result<RollbackReport> {
        let success = detail.is_none() && !run.any_failed();
        let notice = RollbackNotice {
            target: target.as_ref().map(|t| t.id.clone()),
            failed_revision: failed.as_ref().map(|f| f.id.clone()),
            success,
            requires_manual_intervention: !success,
            deployment_url: url,
            detail,
        };

        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(&notice).await {
                warn!(error = %e, "Rollback notification failed");
            }
        }
        emit_rollback_completed(
            notice.target.as_deref().unwrap_or("none"),
            notice.failed_revision.as_deref(),
            success,
        );

        let status = if success {
            RunStatus::Passed
        } else {
            RunStatus::Failed
        };
        Ok(RollbackReport {
            run: run.finish(status).await?,
            target,
            failed_revision: failed,
            deployment,
            notice,
        })
    }
}

/// Whether two revision ids name the same commit, allowing either to be
/// abbreviated.
fn same_revision(a: &str, b: &str) -> bool {
    let (a, b) = (a.to_ascii_lowercase(), b.to_ascii_lowercase());
    if a == b {
        return true;
    }
    let (short, long) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };
    short.len() >= 7 && long.starts_with(short.as_str())
}
