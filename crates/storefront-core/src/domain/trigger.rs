//! Repository events that start a pipeline run.
//!
//! Events arrive as the source host's webhook payload (the CI runner writes
//! it to disk and passes the event name separately). Only the fields the
//! pipeline acts on are extracted.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{PipelineError, Result};

/// Coarse event classification, recorded on every run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    ProposedChange,
    MergeQueue,
    WorkflowRun,
    Manual,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::ProposedChange => "proposed_change",
            TriggerKind::MergeQueue => "merge_queue",
            TriggerKind::WorkflowRun => "workflow_run",
            TriggerKind::Manual => "manual",
        }
    }
}

/// What happened to a proposed change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Opened,
    /// New commits were pushed.
    Updated,
    Reopened,
    Other(String),
}

impl ChangeAction {
    fn parse(action: &str) -> Self {
        match action {
            "opened" => ChangeAction::Opened,
            "synchronize" => ChangeAction::Updated,
            "reopened" => ChangeAction::Reopened,
            other => ChangeAction::Other(other.to_string()),
        }
    }

    /// Whether this action should publish a preview.
    pub fn publishes_preview(&self) -> bool {
        !matches!(self, ChangeAction::Other(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowConclusion {
    Success,
    Failure,
    Cancelled,
    Other(String),
}

impl WorkflowConclusion {
    fn parse(conclusion: &str) -> Self {
        match conclusion {
            "success" => WorkflowConclusion::Success,
            "failure" | "timed_out" => WorkflowConclusion::Failure,
            "cancelled" => WorkflowConclusion::Cancelled,
            other => WorkflowConclusion::Other(other.to_string()),
        }
    }
}

/// A trigger event with the fields the pipeline needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerEvent {
    ProposedChange {
        number: u64,
        action: ChangeAction,
        /// `owner/name` the change's commits live in; `None` when that
        /// repository has been deleted.
        head_repository: Option<String>,
        /// `owner/name` the change targets.
        base_repository: String,
        head_sha: String,
    },
    MergeQueue {
        head_sha: String,
        base_sha: Option<String>,
    },
    WorkflowRunCompleted {
        workflow: String,
        /// Event that started the workflow run (e.g. "merge_group").
        event: String,
        conclusion: WorkflowConclusion,
        head_sha: String,
    },
    Manual {
        revision: Option<String>,
    },
}

impl TriggerEvent {
    pub fn kind(&self) -> TriggerKind {
        match self {
            TriggerEvent::ProposedChange { .. } => TriggerKind::ProposedChange,
            TriggerEvent::MergeQueue { .. } => TriggerKind::MergeQueue,
            TriggerEvent::WorkflowRunCompleted { .. } => TriggerKind::WorkflowRun,
            TriggerEvent::Manual { .. } => TriggerKind::Manual,
        }
    }

    /// True for proposed changes whose head lives outside the base repository,
    /// or whose head repository is gone. Secrets are not exposed to such runs.
    pub fn is_from_fork(&self) -> bool {
        match self {
            TriggerEvent::ProposedChange {
                head_repository,
                base_repository,
                ..
            } => !head_repository
                .as_deref()
                .is_some_and(|head| head.eq_ignore_ascii_case(base_repository)),
            _ => false,
        }
    }

    /// Parse a source host webhook payload.
    pub fn from_github(event_name: &str, payload: &Value) -> Result<Self> {
        match event_name {
            "pull_request" | "pull_request_target" => {
                let pr = &payload["pull_request"];
                Ok(TriggerEvent::ProposedChange {
                    number: payload["number"]
                        .as_u64()
                        .or_else(|| pr["number"].as_u64())
                        .ok_or_else(|| missing(event_name, "number"))?,
                    action: ChangeAction::parse(payload["action"].as_str().unwrap_or_default()),
                    head_repository: pr["head"]["repo"]["full_name"]
                        .as_str()
                        .filter(|s| !s.is_empty())
                        .map(str::to_string),
                    base_repository: required_str(
                        &pr["base"]["repo"]["full_name"],
                        event_name,
                        "pull_request.base.repo.full_name",
                    )?,
                    head_sha: required_str(
                        &pr["head"]["sha"],
                        event_name,
                        "pull_request.head.sha",
                    )?,
                })
            }
            "merge_group" => {
                let group = &payload["merge_group"];
                Ok(TriggerEvent::MergeQueue {
                    head_sha: required_str(&group["head_sha"], event_name, "merge_group.head_sha")?,
                    base_sha: group["base_sha"].as_str().map(str::to_string),
                })
            }
            "workflow_run" => {
                let run = &payload["workflow_run"];
                Ok(TriggerEvent::WorkflowRunCompleted {
                    workflow: run["name"].as_str().unwrap_or_default().to_string(),
                    event: run["event"].as_str().unwrap_or_default().to_string(),
                    conclusion: WorkflowConclusion::parse(
                        run["conclusion"].as_str().unwrap_or_default(),
                    ),
                    head_sha: required_str(&run["head_sha"], event_name, "workflow_run.head_sha")?,
                })
            }
            "workflow_dispatch" => Ok(TriggerEvent::Manual {
                revision: payload["inputs"]["revision"]
                    .as_str()
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
            }),
            other => Err(PipelineError::UnsupportedTrigger(other.to_string())),
        }
    }
}

fn missing(event_name: &str, field: &str) -> PipelineError {
    PipelineError::UnsupportedTrigger(format!("{event_name} payload is missing {field}"))
}

fn required_str(value: &Value, event_name: &str, field: &str) -> Result<String> {
    value
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| missing(event_name, field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pr_payload(head_repo: &str) -> Value {
        json!({
            "action": "synchronize",
            "number": 42,
            "pull_request": {
                "head": { "sha": "abc123", "repo": { "full_name": head_repo } },
                "base": { "repo": { "full_name": "acme/storefront" } }
            }
        })
    }

    #[test]
    fn parses_pull_request() {
        let event = TriggerEvent::from_github("pull_request", &pr_payload("acme/storefront")).unwrap();
        assert_eq!(
            event,
            TriggerEvent::ProposedChange {
                number: 42,
                action: ChangeAction::Updated,
                head_repository: Some("acme/storefront".to_string()),
                base_repository: "acme/storefront".to_string(),
                head_sha: "abc123".to_string(),
            }
        );
        assert!(!event.is_from_fork());
        assert_eq!(event.kind(), TriggerKind::ProposedChange);
    }

    #[test]
    fn fork_is_detected() {
        let event = TriggerEvent::from_github("pull_request", &pr_payload("mallory/storefront")).unwrap();
        assert!(event.is_from_fork());
    }

    #[test]
    fn fork_check_ignores_case() {
        let event = TriggerEvent::from_github("pull_request", &pr_payload("ACME/Storefront")).unwrap();
        assert!(!event.is_from_fork());
    }

    #[test]
    fn deleted_head_repository_counts_as_fork() {
        let payload = json!({
            "action": "synchronize",
            "number": 42,
            "pull_request": {
                "head": { "sha": "abc123", "repo": null },
                "base": { "repo": { "full_name": "acme/storefront" } }
            }
        });
        let event = TriggerEvent::from_github("pull_request", &payload).unwrap();
        assert!(matches!(
            &event,
            TriggerEvent::ProposedChange { head_repository: None, .. }
        ));
        assert!(event.is_from_fork());
    }

    #[test]
    fn parses_merge_group() {
        let payload = json!({ "merge_group": { "head_sha": "def456", "base_sha": "abc123" } });
        let event = TriggerEvent::from_github("merge_group", &payload).unwrap();
        assert_eq!(
            event,
            TriggerEvent::MergeQueue {
                head_sha: "def456".to_string(),
                base_sha: Some("abc123".to_string()),
            }
        );
    }

    #[test]
    fn parses_failed_workflow_run() {
        let payload = json!({
            "workflow_run": {
                "name": "production",
                "event": "merge_group",
                "conclusion": "failure",
                "head_sha": "def456"
            }
        });
        let event = TriggerEvent::from_github("workflow_run", &payload).unwrap();
        let TriggerEvent::WorkflowRunCompleted {
            event, conclusion, ..
        } = event
        else {
            panic!("expected a workflow run");
        };
        assert_eq!(event, "merge_group");
        assert_eq!(conclusion, WorkflowConclusion::Failure);
    }

    #[test]
    fn manual_with_empty_revision_is_none() {
        let payload = json!({ "inputs": { "revision": "" } });
        let event = TriggerEvent::from_github("workflow_dispatch", &payload).unwrap();
        assert_eq!(event, TriggerEvent::Manual { revision: None });
    }

    #[test]
    fn missing_head_sha_is_an_error() {
        let payload = json!({ "merge_group": {} });
        let err = TriggerEvent::from_github("merge_group", &payload).unwrap_err();
        assert!(err.to_string().contains("merge_group.head_sha"));
    }

    #[test]
    fn unknown_event_is_unsupported() {
        let err = TriggerEvent::from_github("push", &json!({})).unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedTrigger(_)));
    }

    #[test]
    fn closed_action_does_not_publish() {
        assert!(!ChangeAction::parse("closed").publishes_preview());
        assert!(ChangeAction::parse("opened").publishes_preview());
    }

    #[test]
    fn edited_description_does_not_publish() {
        let action = ChangeAction::parse("edited");
        assert_eq!(action, ChangeAction::Other("edited".to_string()));
        assert!(!action.publishes_preview());
    }
}
