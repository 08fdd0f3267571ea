//! Preview Publisher: verify a proposed change, deploy it to the preview
//! environment and link the preview from the change.

use std::sync::Arc;

use serde_json::json;
use storefront_core::{
    DeploymentResult, Environment, PipelineError, PipelineRun, Result, Revision, RunSpan,
    TriggerEvent,
};
use storefront_state::{RunLedger, RunStatus};
use tracing::info;

use crate::deploy::{deploy_stage, Deployer};
use crate::integration::IntegrationCheck;
use crate::notify::{with_marker, ChangeCommenter, CommentAction};
use crate::plan::RunPlan;
use crate::stage::DEPLOY_STAGE;
use crate::tracking::TrackedRun;

pub const PIPELINE: &str = "preview";

/// Stage name for posting the preview link.
pub const COMMENT_STAGE: &str = "comment";

/// Result of handling one proposed-change event.
#[derive(Debug, Clone, PartialEq)]
pub enum PreviewOutcome {
    /// Nothing ran (fork-originated change, or an action that does not
    /// publish).
    NotEligible { reason: String },

    Published {
        run: PipelineRun,
        deployment: DeploymentResult,
        url: String,
        comment: CommentAction,
    },

    Failed { run: PipelineRun },
}

impl PreviewOutcome {
    /// False only when a run was attempted and failed.
    pub fn succeeded(&self) -> bool {
        !matches!(self, PreviewOutcome::Failed { .. })
    }

    pub fn run(&self) -> Option<&PipelineRun> {
        match self {
            PreviewOutcome::NotEligible { .. } => None,
            PreviewOutcome::Published { run, .. } | PreviewOutcome::Failed { run } => Some(run),
        }
    }
}

pub struct PreviewPublisher {
    check: IntegrationCheck,
    deployer: Arc<dyn Deployer>,
    commenter: Arc<dyn ChangeCommenter>,
    ledger: Arc<dyn RunLedger>,
}

impl PreviewPublisher {
    pub fn new(
        check: IntegrationCheck,
        deployer: Arc<dyn Deployer>,
        commenter: Arc<dyn ChangeCommenter>,
        ledger: Arc<dyn RunLedger>,
    ) -> Self {
        Self {
            check,
            deployer,
            commenter,
            ledger,
        }
    }

    /// Handle a proposed-change event.
    pub async fn publish(&self, event: &TriggerEvent) -> Result<PreviewOutcome> {
        let TriggerEvent::ProposedChange {
            number,
            action,
            head_repository,
            head_sha,
            ..
        } = event
        else {
            return Err(PipelineError::UnsupportedTrigger(format!(
                "preview needs a proposed change, got {}",
                event.kind().as_str()
            )));
        };

        if event.is_from_fork() {
            let head = head_repository.as_deref().unwrap_or("a deleted repository");
            info!(change = number, head = %head, "Change comes from a fork, skipping preview");
            return Ok(PreviewOutcome::NotEligible {
                reason: format!("change #{number} comes from fork {head}"),
            });
        }
        if !action.publishes_preview() {
            return Ok(PreviewOutcome::NotEligible {
                reason: format!("action {action:?} does not publish a preview"),
            });
        }

        let revision = Revision::new(head_sha.clone());
        RunSpan::new(PIPELINE, revision.short())
            .instrument(self.run_change(event, *number, &revision))
            .await
    }

    async fn run_change(
        &self,
        event: &TriggerEvent,
        number: u64,
        revision: &Revision,
    ) -> Result<PreviewOutcome> {
        let mut stages = self.check.stage_names();
        stages.push(DEPLOY_STAGE.to_string());
        stages.push(COMMENT_STAGE.to_string());
        let plan = RunPlan::new(PIPELINE, stages, Some(revision));
        let mut run =
            TrackedRun::start(self.ledger.clone(), &plan, event.kind(), Some(revision)).await?;

        if !self.check.verify(&mut run).await? {
            return Ok(PreviewOutcome::Failed {
                run: run.finish(RunStatus::Failed).await?,
            });
        }

        let deployed = deploy_stage(
            &mut run,
            self.deployer.as_ref(),
            Environment::Preview,
            revision,
            None,
            true,
        )
        .await?;
        let Some((deployment, Some(url))) = deployed else {
            return Ok(PreviewOutcome::Failed {
                run: run.finish(RunStatus::Failed).await?,
            });
        };

        run.started(COMMENT_STAGE, json!({ "change": number })).await?;
        let start = std::time::Instant::now();
        let body = preview_comment(&url, revision);
        match self.commenter.upsert(number, &body).await {
            Ok(comment) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                run.passed(COMMENT_STAGE, duration_ms, json!({ "url": &url }))
                    .await?;
                info!(change = number, url = %url, "Preview published");
                Ok(PreviewOutcome::Published {
                    run: run.finish(RunStatus::Passed).await?,
                    deployment,
                    url,
                    comment,
                })
            }
            Err(e) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                run.failed(COMMENT_STAGE, duration_ms, &e.to_string(), json!({}))
                    .await?;
                Ok(PreviewOutcome::Failed {
                    run: run.finish(RunStatus::Failed).await?,
                })
            }
        }
    }
}

/// Body of the preview comment.
pub fn preview_comment(url: &str, revision: &Revision) -> String {
    with_marker(&format!(
        "**Preview deployment ready** for `{}`\n\n{}\n",
        revision.short(),
        url
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeDeployer, RecordingCommenter};
    use crate::notify::PREVIEW_MARKER;
    use crate::stage::StageConfig;
    use storefront_core::ChangeAction;
    use storefront_state::MemoryRunLedger;

    fn change(head_repository: &str) -> TriggerEvent {
        TriggerEvent::ProposedChange {
            number: 42,
            action: ChangeAction::Opened,
            head_repository: Some(head_repository.to_string()),
            base_repository: "acme/storefront".to_string(),
            head_sha: "0123456789abcdef".to_string(),
        }
    }

    fn publisher(
        verify: &str,
        deployer: Arc<FakeDeployer>,
        commenter: Arc<RecordingCommenter>,
    ) -> PreviewPublisher {
        let check = IntegrationCheck::new(
            vec![StageConfig::custom("lint".to_string(), vec![verify.to_string()], 30)],
            std::env::current_dir().unwrap(),
        );
        PreviewPublisher::new(check, deployer, commenter, Arc::new(MemoryRunLedger::new()))
    }

    #[tokio::test]
    async fn fork_changes_are_not_eligible() {
        let deployer = Arc::new(FakeDeployer::succeeding("https://preview.example.dev"));
        let commenter = Arc::new(RecordingCommenter::default());
        let outcome = publisher("true", deployer.clone(), commenter.clone())
            .publish(&change("mallory/storefront"))
            .await
            .unwrap();

        assert!(matches!(outcome, PreviewOutcome::NotEligible { .. }));
        assert!(outcome.succeeded());
        assert_eq!(deployer.calls().len(), 0);
        assert!(commenter.bodies().is_empty());
    }

    #[tokio::test]
    async fn deleted_head_repository_is_not_eligible() {
        let deployer = Arc::new(FakeDeployer::succeeding("https://preview.example.dev"));
        let commenter = Arc::new(RecordingCommenter::default());
        let event = TriggerEvent::ProposedChange {
            number: 42,
            action: ChangeAction::Opened,
            head_repository: None,
            base_repository: "acme/storefront".to_string(),
            head_sha: "0123456789abcdef".to_string(),
        };
        let outcome = publisher("true", deployer.clone(), commenter.clone())
            .publish(&event)
            .await
            .unwrap();

        let PreviewOutcome::NotEligible { reason } = outcome else {
            panic!("expected not eligible, got {outcome:?}");
        };
        assert!(reason.contains("deleted repository"));
        assert!(deployer.calls().is_empty());
        assert!(commenter.bodies().is_empty());
    }

    #[tokio::test]
    async fn edited_description_is_not_eligible() {
        let deployer = Arc::new(FakeDeployer::succeeding("https://preview.example.dev"));
        let commenter = Arc::new(RecordingCommenter::default());
        let event = TriggerEvent::ProposedChange {
            number: 42,
            action: ChangeAction::Other("edited".to_string()),
            head_repository: Some("acme/storefront".to_string()),
            base_repository: "acme/storefront".to_string(),
            head_sha: "0123456789abcdef".to_string(),
        };
        let outcome = publisher("true", deployer.clone(), commenter.clone())
            .publish(&event)
            .await
            .unwrap();

        assert!(matches!(outcome, PreviewOutcome::NotEligible { .. }));
        assert!(deployer.calls().is_empty());
        assert!(commenter.bodies().is_empty());
    }

    #[tokio::test]
    async fn publishes_and_comments_url() {
        let deployer = Arc::new(FakeDeployer::succeeding("https://preview.example.dev"));
        let commenter = Arc::new(RecordingCommenter::default());
        let outcome = publisher("true", deployer.clone(), commenter.clone())
            .publish(&change("acme/storefront"))
            .await
            .unwrap();

        let PreviewOutcome::Published { url, run, .. } = outcome else {
            panic!("expected publish, got {outcome:?}");
        };
        assert_eq!(url, "https://preview.example.dev");
        assert!(run.passed());
        assert_eq!(deployer.calls(), vec![(Environment::Preview, "0123456789abcdef".to_string())]);

        let bodies = commenter.bodies();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0].0, 42);
        assert!(bodies[0].1.contains(PREVIEW_MARKER));
        assert!(bodies[0].1.contains("https://preview.example.dev"));
    }

    #[tokio::test]
    async fn deploy_failure_posts_no_comment() {
        let deployer = Arc::new(FakeDeployer::failing());
        let commenter = Arc::new(RecordingCommenter::default());
        let outcome = publisher("true", deployer, commenter.clone())
            .publish(&change("acme/storefront"))
            .await
            .unwrap();

        assert!(!outcome.succeeded());
        assert_eq!(outcome.run().unwrap().failed_stage().unwrap().stage, DEPLOY_STAGE);
        assert!(commenter.bodies().is_empty());
    }

    #[tokio::test]
    async fn verification_failure_skips_deploy() {
        let deployer = Arc::new(FakeDeployer::succeeding("https://preview.example.dev"));
        let commenter = Arc::new(RecordingCommenter::default());
        let outcome = publisher("false", deployer.clone(), commenter)
            .publish(&change("acme/storefront"))
            .await
            .unwrap();

        assert!(!outcome.succeeded());
        assert!(deployer.calls().is_empty());
    }

    #[tokio::test]
    async fn rejects_non_change_events() {
        let deployer = Arc::new(FakeDeployer::succeeding("https://x.dev"));
        let commenter = Arc::new(RecordingCommenter::default());
        let err = publisher("true", deployer, commenter)
            .publish(&TriggerEvent::Manual { revision: None })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedTrigger(_)));
    }

    #[test]
    fn comment_body_is_marked() {
        let body = preview_comment("https://x.dev", &Revision::new("0123456789"));
        assert!(body.starts_with(PREVIEW_MARKER));
        assert!(body.contains("`0123456`"));
    }
}
