//! Storefront-State: run ledger for storefront-ci
//!
//! Pipeline runs live only for the duration of one trigger event. This crate
//! holds the ledger abstraction the orchestrator records stage events into,
//! so the merge gate can evaluate a run from its recorded event sequence.
//!
//! ## Key Components
//!
//! - `RunLedger`: append-only event log per run with a terminal status
//! - `MemoryRunLedger`: process-local implementation
//! - `ContentDigest`: SHA-256 identity of a run's stage plan

mod error;
pub mod fakes;
pub mod storage_traits;

pub use error::StorageError;
pub use fakes::MemoryRunLedger;
pub use storage_traits::{
    ContentDigest, RunEvent, RunId, RunLedger, RunMetadata, RunRecord, RunStatus, RunSummary,
    StorageResult,
};
