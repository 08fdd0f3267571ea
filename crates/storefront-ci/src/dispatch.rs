//! Route trigger events to the pipeline that handles them.
//!
//! | Event                        | Pipeline                               |
//! |------------------------------|----------------------------------------|
//! | proposed change              | preview publisher                      |
//! | merge queue                  | production publisher (+ rollback)      |
//! | failed production workflow   | rollback agent, when configured        |
//! | manual dispatch              | rollback agent                         |
//!
//! A blocked production run is rolled back exactly once: either here,
//! right after the run, or later from the failed workflow-run event when
//! `rollback.on_workflow_failure` is set. Never both. Only workflow runs
//! started by the merge queue (and named `rollback.workflow`, when set)
//! count as production failures.

use std::sync::Arc;

use storefront_core::{PipelineConfig, Result, Revision, TriggerEvent, WorkflowConclusion};
use storefront_state::RunLedger;
use tracing::{info, warn};

use crate::acceptance::{AcceptanceSuite, HttpAcceptanceSuite};
use crate::deploy::{CliDeployer, Deployer};
use crate::integration::IntegrationCheck;
use crate::notify::{
    ChangeCommenter, GithubCommenter, RollbackNotifier, TracingNotifier, UnavailableCommenter,
    WebhookNotifier,
};
use crate::preview::{PreviewOutcome, PreviewPublisher};
use crate::production::{ProductionOutcome, ProductionPublisher};
use crate::rollback::{
    GitRepository, RollbackAgent, RollbackOrigin, RollbackReport, RollbackRequest,
    SourceRepository,
};

/// Everything the pipelines talk to.
pub struct Components {
    pub ledger: Arc<dyn RunLedger>,
    pub check: IntegrationCheck,
    pub deployer: Arc<dyn Deployer>,
    pub suite: Arc<dyn AcceptanceSuite>,
    pub commenter: Arc<dyn ChangeCommenter>,
    pub repository: Arc<dyn SourceRepository>,
    pub notifiers: Vec<Arc<dyn RollbackNotifier>>,
    pub production_url: Option<String>,
    pub rollback_on_workflow_failure: bool,
    /// Name of the production workflow; any merge-queue workflow when unset.
    pub production_workflow: Option<String>,
}

impl Components {
    /// Real collaborators for `config`.
    ///
    /// A missing GitHub repository or token is not an error here; the
    /// preview comment stage fails with the reason instead.
    pub fn from_config(config: &PipelineConfig, ledger: Arc<dyn RunLedger>) -> Result<Self> {
        let commenter: Arc<dyn ChangeCommenter> = match GithubCommenter::from_config(&config.github)
        {
            Ok(commenter) => Arc::new(commenter),
            Err(e) => Arc::new(UnavailableCommenter::new(e.to_string())),
        };

        let mut notifiers: Vec<Arc<dyn RollbackNotifier>> = vec![Arc::new(TracingNotifier)];
        if let Some(url) = &config.rollback.webhook_url {
            notifiers.push(Arc::new(WebhookNotifier::new(url.clone())?));
        }

        Ok(Self {
            ledger,
            check: IntegrationCheck::from_config(config),
            deployer: Arc::new(CliDeployer::from_config(config)),
            suite: Arc::new(HttpAcceptanceSuite::from_config(&config.acceptance)?),
            commenter,
            repository: Arc::new(GitRepository::new(config.workdir.clone())),
            notifiers,
            production_url: config.production_url.clone(),
            rollback_on_workflow_failure: config.rollback.on_workflow_failure,
            production_workflow: config.rollback.workflow.clone(),
        })
    }
}

/// What handling one event produced.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Preview(PreviewOutcome),
    Production {
        outcome: ProductionOutcome,
        /// Present when the run was blocked and rolled back in-process.
        rollback: Option<RollbackReport>,
    },
    Rollback(RollbackReport),
    Ignored {
        reason: String,
    },
}

impl DispatchOutcome {
    /// Whether the CI job should report success.
    ///
    /// A blocked production run is a failure even when its rollback
    /// succeeded.
    pub fn succeeded(&self) -> bool {
        match self {
            DispatchOutcome::Preview(outcome) => outcome.succeeded(),
            DispatchOutcome::Production { outcome, .. } => outcome.admitted(),
            DispatchOutcome::Rollback(report) => report.succeeded(),
            DispatchOutcome::Ignored { .. } => true,
        }
    }
}

pub struct Dispatcher {
    preview: PreviewPublisher,
    production: ProductionPublisher,
    rollback: RollbackAgent,
    rollback_on_workflow_failure: bool,
    production_workflow: Option<String>,
}

impl Dispatcher {
    pub fn new(components: Components) -> Self {
        let Components {
            ledger,
            check,
            deployer,
            suite,
            commenter,
            repository,
            notifiers,
            production_url,
            rollback_on_workflow_failure,
            production_workflow,
        } = components;

        let preview =
            PreviewPublisher::new(check.clone(), deployer.clone(), commenter, ledger.clone());
        let production =
            ProductionPublisher::new(check, deployer.clone(), suite, ledger.clone())
                .with_production_url(production_url.clone());
        let rollback = notifiers.into_iter().fold(
            RollbackAgent::new(repository, deployer, ledger).with_production_url(production_url),
            RollbackAgent::with_notifier,
        );

        Self {
            preview,
            production,
            rollback,
            rollback_on_workflow_failure,
            production_workflow,
        }
    }

    pub fn from_config(config: &PipelineConfig, ledger: Arc<dyn RunLedger>) -> Result<Self> {
        Ok(Self::new(Components::from_config(config, ledger)?))
    }

    pub fn rollback_agent(&self) -> &RollbackAgent {
        &self.rollback
    }

    /// Whether a completed workflow run is a production run: started by the
    /// merge queue, and named as configured when a name is set.
    fn is_production_workflow(&self, workflow: &str, event: &str) -> bool {
        event == "merge_group"
            && self
                .production_workflow
                .as_deref()
                .map_or(true, |name| name.eq_ignore_ascii_case(workflow))
    }

    pub async fn dispatch(&self, event: &TriggerEvent) -> Result<DispatchOutcome> {
        info!(trigger = event.kind().as_str(), "Dispatching event");
        match event {
            TriggerEvent::ProposedChange { .. } => {
                Ok(DispatchOutcome::Preview(self.preview.publish(event).await?))
            }

            TriggerEvent::MergeQueue { head_sha, base_sha } => {
                let mut revision = Revision::new(head_sha.clone());
                if let Some(base) = base_sha {
                    revision = revision.with_predecessor(base.clone());
                }
                let outcome = self.production.publish(&revision, event.kind()).await?;

                let rollback = match &outcome.rollback {
                    Some(request) if !self.rollback_on_workflow_failure => {
                        Some(self.rollback.rollback(request, event.kind()).await?)
                    }
                    Some(_) => {
                        info!(
                            revision = %revision.short(),
                            "Merge blocked; rollback deferred to the workflow-run trigger"
                        );
                        None
                    }
                    None => None,
                };
                Ok(DispatchOutcome::Production { outcome, rollback })
            }

            TriggerEvent::WorkflowRunCompleted {
                workflow,
                event: origin,
                conclusion,
                head_sha,
            } => {
                if *conclusion != WorkflowConclusion::Failure {
                    return Ok(DispatchOutcome::Ignored {
                        reason: format!("workflow '{workflow}' did not fail"),
                    });
                }
                if !self.is_production_workflow(workflow, origin) {
                    return Ok(DispatchOutcome::Ignored {
                        reason: format!(
                            "workflow '{workflow}' started by '{origin}' is not the production run"
                        ),
                    });
                }
                if !self.rollback_on_workflow_failure {
                    return Ok(DispatchOutcome::Ignored {
                        reason: "failed production runs are rolled back in-process".to_string(),
                    });
                }
                warn!(workflow = %workflow, head = %head_sha, "Workflow failed, rolling back");
                let request = RollbackRequest::automatic(
                    Revision::new(head_sha.clone()),
                    format!("workflow '{workflow}' failed"),
                );
                Ok(DispatchOutcome::Rollback(
                    self.rollback.rollback(&request, event.kind()).await?,
                ))
            }

            TriggerEvent::Manual { revision } => {
                let request = match revision.as_deref().map(str::trim) {
                    Some(target) if !target.is_empty() => {
                        RollbackRequest::manual(Revision::new(target), None)
                    }
                    _ => {
                        let head = self.rollback.repository().head().await?;
                        RollbackRequest {
                            failed_revision: Some(head),
                            target: None,
                            reason: "manual rollback of the current revision".to_string(),
                            origin: RollbackOrigin::Manual,
                        }
                    }
                };
                Ok(DispatchOutcome::Rollback(
                    self.rollback.rollback(&request, event.kind()).await?,
                ))
            }
        }
    }

    /// Parse a raw source host event and dispatch it.
    pub async fn dispatch_github(
        &self,
        event_name: &str,
        payload: &serde_json::Value,
    ) -> Result<DispatchOutcome> {
        let event = TriggerEvent::from_github(event_name, payload)?;
        self.dispatch(&event).await
    }
}
