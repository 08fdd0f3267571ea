//! Domain models for storefront-ci.
//!
//! Canonical definitions for the transient pipeline artifacts:
//! - `Revision`: a source snapshot and its predecessor
//! - `DeploymentResult`: outcome of one call to the deployment CLI
//! - `PipelineRun`: stage outcomes and terminal status of one trigger event
//! - `TriggerEvent`: the repository event that started a run

pub mod deployment;
pub mod error;
pub mod revision;
pub mod run;
pub mod trigger;

pub use deployment::{DeploymentResult, DeploymentStatus, Environment};
pub use error::{PipelineError, Result};
pub use revision::Revision;
pub use run::{Event, EventKind, PipelineRun, StageOutcome, StageStatus};
pub use trigger::{ChangeAction, TriggerEvent, TriggerKind, WorkflowConclusion};
