//! storefront-ci pipelines
//!
//! Provides the deploy-test-rollback pipelines for a commerce storefront:
//! - Integration check (lint, typecheck, build, optional acceptance)
//! - Preview publishing for proposed changes
//! - Production publishing behind the merge queue, gated on acceptance
//! - Rollback of production to the last good revision
//!
//! Every run is recorded as an event stream in a run ledger.

pub mod acceptance;
pub mod deploy;
pub mod dispatch;
pub mod fakes;
pub mod gate;
pub mod integration;
pub mod notify;
pub mod plan;
pub mod preview;
pub mod production;
pub mod rollback;
pub mod runner;
pub mod stage;

mod tracking;

// Re-export key types
pub use acceptance::{AcceptanceSuite, HttpAcceptanceSuite, Scenario, ScenarioResult, SuiteReport};
pub use deploy::{parse_deploy_url, resolve_production_url, CliDeployer, Deployer};
pub use dispatch::{Components, DispatchOutcome, Dispatcher};
pub use gate::{GateVerdict, MergeGate};
pub use integration::IntegrationCheck;
pub use notify::{
    ChangeCommenter, CommentAction, GithubCommenter, RollbackNotice, RollbackNotifier,
    TracingNotifier, WebhookNotifier, PREVIEW_MARKER,
};
pub use preview::{PreviewOutcome, PreviewPublisher};
pub use production::{ProductionOutcome, ProductionPublisher};
pub use rollback::{
    GitRepository, RollbackAgent, RollbackOrigin, RollbackReport, RollbackRequest,
    SourceRepository,
};
pub use runner::{StageRunner, StageResult};
pub use stage::{BuiltinStage, StageConfig};
