//! Pipeline runs, stage outcomes and run events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storefront_state::RunStatus;

use super::revision::Revision;
use super::trigger::TriggerKind;

/// Result of one stage within a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Passed,
    Failed,
    /// Not executed. Skipping never counts as a failure.
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageOutcome {
    /// Stage name (e.g. "lint", "deploy", "acceptance").
    pub stage: String,

    pub status: StageStatus,

    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,

    /// Failure or skip reason.
    pub detail: Option<String>,
}

impl StageOutcome {
    pub fn passed(stage: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            stage: stage.into(),
            status: StageStatus::Passed,
            duration_ms,
            detail: None,
        }
    }

    pub fn failed(stage: impl Into<String>, duration_ms: u64, detail: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            status: StageStatus::Failed,
            duration_ms,
            detail: Some(detail.into()),
        }
    }

    pub fn skipped(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            status: StageStatus::Skipped,
            duration_ms: 0,
            detail: Some(reason.into()),
        }
    }
}

/// One execution of a pipeline for a single trigger event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineRun {
    /// Ledger run id.
    pub run_id: String,

    /// Pipeline name ("integration", "preview", "production", "rollback").
    pub pipeline: String,

    pub trigger: TriggerKind,

    pub revision: Option<Revision>,

    /// Stage outcomes in execution order.
    pub stages: Vec<StageOutcome>,

    /// Terminal status.
    pub status: RunStatus,

    pub duration_ms: u64,
}

impl PipelineRun {
    pub fn passed(&self) -> bool {
        self.status == RunStatus::Passed
    }

    /// The stage that ended the run, if any stage failed.
    pub fn failed_stage(&self) -> Option<&StageOutcome> {
        self.stages.iter().find(|s| s.status == StageStatus::Failed)
    }

    pub fn stage(&self, name: &str) -> Option<&StageOutcome> {
        self.stages.iter().find(|s| s.stage == name)
    }

    pub fn passed_count(&self) -> usize {
        self.stages
            .iter()
            .filter(|s| s.status == StageStatus::Passed)
            .count()
    }
}

/// Classification of an event recorded during a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    StageStarted { stage: String },

    StagePassed { stage: String },

    StageFailed { stage: String },

    StageSkipped { stage: String },

    /// The deployment CLI confirmed a deployment.
    DeploymentRecorded { environment: String },

    /// The run asked for the Rollback Agent.
    RollbackRequested { failed_revision: String },
}

impl EventKind {
    /// Snake-case tag, as stored in the ledger.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::StageStarted { .. } => "stage_started",
            EventKind::StagePassed { .. } => "stage_passed",
            EventKind::StageFailed { .. } => "stage_failed",
            EventKind::StageSkipped { .. } => "stage_skipped",
            EventKind::DeploymentRecorded { .. } => "deployment_recorded",
            EventKind::RollbackRequested { .. } => "rollback_requested",
        }
    }
}

/// A single event in a run's execution trace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Monotonically increasing sequence number within the run.
    pub seq: u64,

    pub timestamp: DateTime<Utc>,

    pub kind: EventKind,

    /// Event-specific payload.
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(seq: u64, kind: EventKind, payload: serde_json::Value) -> Self {
        Self {
            seq,
            timestamp: Utc::now(),
            kind,
            payload,
        }
    }
}
