//! Structured observability hooks for pipeline run lifecycle events.
//!
//! This module provides:
//! - Run-scoped tracing spans via `RunSpan`, attached to the run's future
//! - Emission functions for key lifecycle events: start, event append,
//!   stage completion, finish, gate evaluation and rollback outcome
//!
//! Events are emitted at `info!` level (filter with `RUST_LOG`).
//! For JSON output, pass `--json` to the CLI.

use std::future::Future;

use storefront_state::RunStatus;
use tracing::instrument::Instrumented;
use tracing::{info, warn, Instrument, Span};

/// Run-scoped tracing span tagged with the pipeline and revision.
///
/// The span is attached to the run's future rather than entered, so it is
/// only active while that future is being polled.
///
/// # Example
///
/// ```ignore
/// RunSpan::new("production", "abc123")
///     .instrument(async {
///         // every tracing call in here carries pipeline=production revision=abc123
///     })
///     .await;
/// ```
#[derive(Debug, Clone)]
pub struct RunSpan {
    span: Span,
}

impl RunSpan {
    pub fn new(pipeline: &str, revision: &str) -> Self {
        Self {
            span: tracing::info_span!("storefront.run", pipeline = %pipeline, revision = %revision),
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Run `future` inside this span.
    pub fn instrument<F: Future>(self, future: F) -> Instrumented<F> {
        future.instrument(self.span)
    }
}

/// Emit event: run started.
pub fn emit_run_started(run_id: &str, pipeline: &str) {
    info!(event = "run.started", run_id = %run_id, pipeline = %pipeline);
}

/// Emit event: a single event appended to the run.
pub fn emit_event_appended(run_id: &str, event_kind: &str, seq: u64) {
    tracing::debug!(event = "run.event_appended", run_id = %run_id, kind = %event_kind, seq = seq);
}

/// Emit event: a stage finished.
pub fn emit_stage_finished(stage: &str, status: &str, duration_ms: u64) {
    info!(
        event = "run.stage",
        stage = %stage,
        status = %status,
        duration_ms = duration_ms,
    );
}

/// Emit event: run reached its terminal status.
pub fn emit_run_finished(run_id: &str, status: RunStatus, duration_ms: u64, total_events: u64) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        status = ?status,
        duration_ms = duration_ms,
        total_events = total_events,
    );
}

/// Emit event: merge gate evaluated.
pub fn emit_gate_evaluated(run_id: &str, passed: bool, violations: usize) {
    info!(
        event = "gate.evaluated",
        run_id = %run_id,
        passed = passed,
        violations = violations,
    );
}

/// Emit event: rollback finished. Failures are logged at warn level since
/// they need an operator.
pub fn emit_rollback_completed(target: &str, failed: Option<&str>, success: bool) {
    if success {
        info!(event = "rollback.completed", target = %target, failed = ?failed, success = true);
    } else {
        warn!(event = "rollback.completed", target = %target, failed = ?failed, success = false);
    }
}
