//! Outbound messages: the preview comment on a proposed change, and the
//! rollback outcome notification.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use storefront_core::{GithubConfig, PipelineError, Result, Secret};
use tracing::{error, info};

/// Tag identifying the pipeline's own comment on a proposed change.
pub const PREVIEW_MARKER: &str = "<!-- storefront-ci:preview -->";

const USER_AGENT: &str = concat!("storefront-ci/", env!("CARGO_PKG_VERSION"));

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentAction {
    Created(u64),
    Updated(u64),
}

/// Posts the preview comment on a proposed change.
#[async_trait]
pub trait ChangeCommenter: Send + Sync {
    /// Create or update the single marker-tagged comment on `change`.
    async fn upsert(&self, change: u64, body: &str) -> Result<CommentAction>;
}

#[derive(Debug, Deserialize)]
struct IssueComment {
    id: u64,
    #[serde(default)]
    body: Option<String>,
}

/// Comments through the GitHub REST API.
pub struct GithubCommenter {
    client: reqwest::Client,
    api_url: String,
    repository: String,
    token: Secret,
}

impl GithubCommenter {
    pub fn new(api_url: &str, repository: &str, token: Secret) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PipelineError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            repository: repository.to_string(),
            token,
        })
    }

    pub fn from_config(config: &GithubConfig) -> Result<Self> {
        let repository = config
            .repository
            .as_deref()
            .ok_or_else(|| PipelineError::Config("github.repository is not set".to_string()))?;
        let token = config
            .token
            .clone()
            .ok_or_else(|| PipelineError::Config("github.token is not set".to_string()))?;
        Self::new(&config.api_url, repository, token)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.token.expose()))
            .header("Accept", "application/vnd.github+json")
    }

    async fn send<T: for<'de> Deserialize<'de>>(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<T> {
        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::Http(format!("{what} failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PipelineError::Http(format!(
                "{what} returned {}: {}",
                status.as_u16(),
                text.trim()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| PipelineError::Http(format!("{what} returned invalid JSON: {e}")))
    }

    async fn find_marked(&self, change: u64) -> Result<Option<u64>> {
        let url = format!(
            "{}/repos/{}/issues/{}/comments?per_page=100",
            self.api_url, self.repository, change
        );
        let comments: Vec<IssueComment> = self
            .send(self.request(reqwest::Method::GET, &url), "listing comments")
            .await?;
        Ok(comments
            .into_iter()
            .find(|c| c.body.as_deref().is_some_and(|b| b.contains(PREVIEW_MARKER)))
            .map(|c| c.id))
    }
}

#[async_trait]
impl ChangeCommenter for GithubCommenter {
    async fn upsert(&self, change: u64, body: &str) -> Result<CommentAction> {
        let body = with_marker(body);
        let payload = serde_json::json!({ "body": body });

        match self.find_marked(change).await? {
            Some(id) => {
                let url = format!(
                    "{}/repos/{}/issues/comments/{}",
                    self.api_url, self.repository, id
                );
                let _: IssueComment = self
                    .send(
                        self.request(reqwest::Method::PATCH, &url).json(&payload),
                        "updating comment",
                    )
                    .await?;
                info!(change, comment_id = id, "Updated preview comment");
                Ok(CommentAction::Updated(id))
            }
            None => {
                let url = format!(
                    "{}/repos/{}/issues/{}/comments",
                    self.api_url, self.repository, change
                );
                let created: IssueComment = self
                    .send(
                        self.request(reqwest::Method::POST, &url).json(&payload),
                        "creating comment",
                    )
                    .await?;
                info!(change, comment_id = created.id, "Created preview comment");
                Ok(CommentAction::Created(created.id))
            }
        }
    }
}

/// Stands in when the source host is not configured; every upsert fails
/// with the configuration problem.
pub struct UnavailableCommenter {
    reason: String,
}

impl UnavailableCommenter {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ChangeCommenter for UnavailableCommenter {
    async fn upsert(&self, _change: u64, _body: &str) -> Result<CommentAction> {
        Err(PipelineError::Config(format!(
            "cannot comment on changes: {}",
            self.reason
        )))
    }
}

/// Prefix `body` with the preview marker unless it already carries it.
pub fn with_marker(body: &str) -> String {
    if body.contains(PREVIEW_MARKER) {
        body.to_string()
    } else {
        format!("{PREVIEW_MARKER}\n{body}")
    }
}

/// Outcome of a rollback, as reported to operators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RollbackNotice {
    /// Revision that was (or would have been) redeployed.
    pub target: Option<String>,
    pub failed_revision: Option<String>,
    pub success: bool,
    pub requires_manual_intervention: bool,
    pub deployment_url: Option<String>,
    pub detail: Option<String>,
}

impl RollbackNotice {
    pub fn summary(&self) -> String {
        let target = self.target.as_deref().unwrap_or("unknown revision");
        let failed = self
            .failed_revision
            .as_deref()
            .map(|f| format!(" (replacing {f})"))
            .unwrap_or_default();
        if self.success {
            format!("Rolled back production to {target}{failed}")
        } else {
            format!(
                "Rollback to {target}{failed} failed: {}. Manual intervention required.",
                self.detail.as_deref().unwrap_or("unknown error")
            )
        }
    }
}

/// Receives rollback outcomes.
#[async_trait]
pub trait RollbackNotifier: Send + Sync {
    async fn notify(&self, notice: &RollbackNotice) -> Result<()>;
}

/// Reports rollbacks through the structured log.
pub struct TracingNotifier;

#[async_trait]
impl RollbackNotifier for TracingNotifier {
    async fn notify(&self, notice: &RollbackNotice) -> Result<()> {
        if notice.success {
            info!(
                event = "rollback.notice",
                target = ?notice.target,
                failed_revision = ?notice.failed_revision,
                "{}",
                notice.summary()
            );
        } else {
            error!(
                event = "rollback.notice",
                target = ?notice.target,
                failed_revision = ?notice.failed_revision,
                requires_manual_intervention = notice.requires_manual_intervention,
                "{}",
                notice.summary()
            );
        }
        Ok(())
    }
}

/// Posts rollback outcomes as JSON to a webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PipelineError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl RollbackNotifier for WebhookNotifier {
    async fn notify(&self, notice: &RollbackNotice) -> Result<()> {
        let payload = serde_json::json!({
            "text": notice.summary(),
            "rollback": notice,
        });
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| PipelineError::Http(format!("webhook POST failed: {e}")))?;
        if !response.status().is_success() {
            return Err(PipelineError::Http(format!(
                "webhook returned {}",
                response.status().as_u16()
            )));
        }
        Ok(())
    }
}
