//! storefront-ci core library
//!
//! Domain types, configuration, run recording and observability shared by
//! the pipeline stages and the CLI.

pub mod config;
pub mod domain;
pub mod git;
pub mod obs;
pub mod recording;
pub mod telemetry;

pub use config::{
    AcceptanceConfig, CommandConfig, DeployConfig, GithubConfig, PipelineConfig, RollbackConfig,
    Secret, StagesConfig, StoreConfig,
};
pub use domain::{
    ChangeAction, DeploymentResult, DeploymentStatus, Environment, Event, EventKind,
    PipelineError, PipelineRun, Result, Revision, StageOutcome, StageStatus, TriggerEvent,
    TriggerKind, WorkflowConclusion,
};
pub use git::{capture_head_sha, is_git_repo};
pub use obs::{
    emit_gate_evaluated, emit_rollback_completed, emit_run_finished, emit_run_started,
    emit_stage_finished, RunSpan,
};
pub use recording::PipelineRecorder;
pub use telemetry::init_tracing;

pub use storefront_state::{RunStatus, MemoryRunLedger, RunLedger};

/// storefront-ci version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
