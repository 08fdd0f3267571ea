//! In-memory stand-ins for the pipeline's external collaborators.
//!
//! Used by unit tests here and by the integration tests under `tests/`.

use std::sync::Mutex;

use async_trait::async_trait;
use storefront_core::{
    DeploymentResult, DeploymentStatus, Environment, PipelineError, Result, Revision,
};

use crate::acceptance::{AcceptanceSuite, Scenario, ScenarioResult, SuiteReport};
use crate::deploy::Deployer;
use crate::notify::{ChangeCommenter, CommentAction, RollbackNotice, RollbackNotifier};
use crate::rollback::SourceRepository;

/// Deployer that records calls and never spawns anything.
#[derive(Debug, Default)]
pub struct FakeDeployer {
    url: Option<String>,
    fail_all: bool,
    fail_revisions: Vec<String>,
    unauthenticated: bool,
    calls: Mutex<Vec<(Environment, String)>>,
}

impl FakeDeployer {
    /// Every deployment succeeds and reports `url`.
    pub fn succeeding(url: &str) -> Self {
        Self {
            url: Some(url.to_string()),
            ..Self::default()
        }
    }

    /// Every deployment succeeds without reporting a URL.
    pub fn without_url() -> Self {
        Self::default()
    }

    /// Every deployment runs and fails.
    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::default()
        }
    }

    /// No deployment token is available.
    pub fn unauthenticated() -> Self {
        Self {
            unauthenticated: true,
            ..Self::default()
        }
    }

    /// Deployments of `revision` fail; others succeed.
    pub fn failing_for(mut self, revision: &str) -> Self {
        self.fail_revisions.push(revision.to_string());
        self
    }

    pub fn calls(&self) -> Vec<(Environment, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Deployer for FakeDeployer {
    async fn deploy(
        &self,
        environment: Environment,
        revision: &Revision,
    ) -> Result<DeploymentResult> {
        if self.unauthenticated {
            return Err(PipelineError::Authentication(
                "no deployment token configured".to_string(),
            ));
        }
        self.calls
            .lock()
            .unwrap()
            .push((environment, revision.id.clone()));

        let failed = self.fail_all || self.fail_revisions.contains(&revision.id);
        Ok(DeploymentResult {
            environment,
            revision: revision.clone(),
            url: if failed { None } else { self.url.clone() },
            status: if failed {
                DeploymentStatus::Failed
            } else {
                DeploymentStatus::Succeeded
            },
            output_tail: if failed {
                "Error: deployment rejected".to_string()
            } else {
                String::new()
            },
        })
    }
}

/// Acceptance suite with a fixed verdict.
#[derive(Debug, Default)]
pub struct FakeSuite {
    failure: Option<String>,
    base_urls: Mutex<Vec<String>>,
}

impl FakeSuite {
    pub fn passing() -> Self {
        Self::default()
    }

    /// The product detail scenario fails with `detail`.
    pub fn failing(detail: &str) -> Self {
        Self {
            failure: Some(detail.to_string()),
            ..Self::default()
        }
    }

    /// Base URLs the suite was run against.
    pub fn base_urls(&self) -> Vec<String> {
        self.base_urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AcceptanceSuite for FakeSuite {
    async fn run(&self, base_url: &str) -> SuiteReport {
        self.base_urls.lock().unwrap().push(base_url.to_string());
        let scenarios = Scenario::ALL
            .iter()
            .map(|&scenario| {
                let failed = scenario == Scenario::ProductDetail && self.failure.is_some();
                ScenarioResult {
                    scenario,
                    passed: !failed,
                    duration_ms: 1,
                    detail: if failed { self.failure.clone() } else { None },
                }
            })
            .collect();
        SuiteReport {
            base_url: base_url.to_string(),
            scenarios,
        }
    }
}

/// Commenter that keeps one comment per change in memory.
#[derive(Debug, Default)]
pub struct RecordingCommenter {
    bodies: Mutex<Vec<(u64, String)>>,
}

impl RecordingCommenter {
    /// Every body written, in order.
    pub fn bodies(&self) -> Vec<(u64, String)> {
        self.bodies.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChangeCommenter for RecordingCommenter {
    async fn upsert(&self, change: u64, body: &str) -> Result<CommentAction> {
        let mut bodies = self.bodies.lock().unwrap();
        let existing = bodies.iter().any(|(c, _)| *c == change);
        bodies.push((change, body.to_string()));
        Ok(if existing {
            CommentAction::Updated(change)
        } else {
            CommentAction::Created(change)
        })
    }
}

/// Notifier that keeps every notice.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<RollbackNotice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<RollbackNotice> {
        self.notices.lock().unwrap().clone()
    }
}

#[async_trait]
impl RollbackNotifier for RecordingNotifier {
    async fn notify(&self, notice: &RollbackNotice) -> Result<()> {
        self.notices.lock().unwrap().push(notice.clone());
        Ok(())
    }
}

/// Linear history of revision ids, oldest first.
#[derive(Debug, Default)]
pub struct FakeRepository {
    history: Vec<String>,
    checked_out: Mutex<Vec<String>>,
}

impl FakeRepository {
    pub fn linear(ids: &[&str]) -> Self {
        Self {
            history: ids.iter().map(|s| s.to_string()).collect(),
            checked_out: Mutex::new(Vec::new()),
        }
    }

    /// Revisions checked out so far, in order.
    pub fn checked_out(&self) -> Vec<String> {
        self.checked_out.lock().unwrap().clone()
    }

    fn position(&self, id: &str) -> Result<usize> {
        self.history
            .iter()
            .position(|h| h == id)
            .ok_or_else(|| PipelineError::Git(format!("unknown revision {id}")))
    }
}

#[async_trait]
impl SourceRepository for FakeRepository {
    async fn head(&self) -> Result<Revision> {
        let checked_out = self.checked_out.lock().unwrap();
        checked_out
            .last()
            .or_else(|| self.history.last())
            .map(|id| Revision::new(id.clone()))
            .ok_or_else(|| PipelineError::Git("empty repository".to_string()))
    }

    async fn resolve(&self, revision: &str) -> Result<Revision> {
        let index = self.position(revision)?;
        Ok(Revision::new(self.history[index].clone()))
    }

    async fn predecessor(&self, revision: &Revision) -> Result<Revision> {
        if let Some(parent) = &revision.predecessor {
            return Ok(Revision::new(parent.clone()));
        }
        let index = self.position(&revision.id)?;
        if index == 0 {
            return Err(PipelineError::Git(format!(
                "revision {} has no parent",
                revision.id
            )));
        }
        Ok(Revision::new(self.history[index - 1].clone()))
    }

    async fn checkout(&self, revision: &Revision) -> Result<()> {
        self.position(&revision.id)?;
        self.checked_out.lock().unwrap().push(revision.id.clone());
        Ok(())
    }
}
