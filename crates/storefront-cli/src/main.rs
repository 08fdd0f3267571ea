//! storefront-ci - deploy, verify and roll back a commerce storefront
//!
//! The `storefront-ci` command is invoked by the CI runner once per trigger
//! event.
//!
//! ## Commands
//!
//! - `check`: lint, typecheck and build, then acceptance when a URL is known
//! - `acceptance`: run the acceptance suite against a live storefront
//! - `preview`: publish a preview deployment for a proposed change
//! - `production`: deploy to production behind the merge queue
//! - `rollback`: redeploy the last good revision
//! - `dispatch`: handle a raw source host event

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

use storefront_ci::{
    AcceptanceSuite, DispatchOutcome, Dispatcher, HttpAcceptanceSuite, IntegrationCheck,
    PreviewOutcome, ProductionOutcome, RollbackOrigin, RollbackReport, RollbackRequest,
    SuiteReport,
};
use storefront_core::{
    capture_head_sha, is_git_repo, ChangeAction, PipelineConfig, PipelineRun, Revision,
    StageStatus, TriggerEvent, TriggerKind,
};
use storefront_state::{MemoryRunLedger, RunEvent, RunLedger, RunRecord};

#[derive(Parser)]
#[command(name = "storefront-ci")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Deploy-test-rollback pipeline for a commerce storefront", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Pipeline configuration file (TOML)
    #[arg(short, long, global = true, env = "STOREFRONT_CI_CONFIG")]
    config: Option<PathBuf>,

    /// Write every recorded run and its events to this JSON file on exit
    #[arg(long, global = true)]
    report: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the integration check (lint, typecheck, build, acceptance)
    Check {
        /// Storefront to run acceptance against; skipped when unset
        #[arg(long)]
        base_url: Option<String>,
    },

    /// Run the acceptance suite against a live storefront
    Acceptance {
        #[arg(long)]
        base_url: String,
    },

    /// Verify and publish a preview for a proposed change
    Preview {
        /// Proposed change number
        #[arg(long)]
        change: u64,

        /// Repository the change's commits live in (owner/name)
        #[arg(long)]
        head_repo: String,

        /// Repository the change targets (default: github.repository)
        #[arg(long)]
        base_repo: Option<String>,

        #[arg(long)]
        head_sha: String,
    },

    /// Verify, deploy and accept a revision in production
    Production {
        /// Revision admitted to the merge queue
        #[arg(long)]
        revision: String,

        /// Revision production currently runs; rollback target on failure
        #[arg(long)]
        base_revision: Option<String>,
    },

    /// Redeploy a known-good revision to production
    Rollback {
        /// Revision that must be replaced; its parent is the default target
        #[arg(long, required_unless_present = "revision")]
        failed_revision: Option<String>,

        /// Explicit revision to redeploy
        #[arg(long)]
        revision: Option<String>,
    },

    /// Handle a source host event payload
    Dispatch {
        /// Event name (pull_request, merge_group, workflow_run, workflow_dispatch)
        #[arg(long, env = "GITHUB_EVENT_NAME")]
        event_name: String,

        /// Path to the event payload JSON
        #[arg(long, env = "GITHUB_EVENT_PATH")]
        payload: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    storefront_core::init_tracing(cli.json, level);

    let config =
        PipelineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let ledger = Arc::new(MemoryRunLedger::new());

    let result = match cli.command {
        Commands::Check { base_url } => cmd_check(&config, ledger.clone(), base_url).await,
        Commands::Acceptance { base_url } => cmd_acceptance(&config, &base_url).await,
        Commands::Preview {
            change,
            head_repo,
            base_repo,
            head_sha,
        } => {
            let base_repo = base_repo
                .or_else(|| config.github.repository.clone())
                .context("Base repository unknown: pass --base-repo or set GITHUB_REPOSITORY")?;
            let event = TriggerEvent::ProposedChange {
                number: change,
                action: ChangeAction::Updated,
                head_repository: Some(head_repo),
                base_repository: base_repo,
                head_sha,
            };
            cmd_dispatch_event(&config, ledger.clone(), &event).await
        }
        Commands::Production {
            revision,
            base_revision,
        } => {
            let event = TriggerEvent::MergeQueue {
                head_sha: revision,
                base_sha: base_revision,
            };
            cmd_dispatch_event(&config, ledger.clone(), &event).await
        }
        Commands::Rollback {
            failed_revision,
            revision,
        } => cmd_rollback(&config, ledger.clone(), failed_revision, revision).await,
        Commands::Dispatch {
            event_name,
            payload,
        } => cmd_dispatch(&config, ledger.clone(), &event_name, &payload).await,
    };

    if let Some(path) = &cli.report {
        write_report(ledger.as_ref(), path).await?;
    }
    result
}

async fn cmd_check(
    config: &PipelineConfig,
    ledger: Arc<MemoryRunLedger>,
    base_url: Option<String>,
) -> Result<()> {
    let base_url = base_url.or_else(|| config.acceptance.base_url.clone());
    let revision = if is_git_repo(&config.workdir) {
        capture_head_sha(&config.workdir).ok().map(Revision::new)
    } else {
        None
    };

    println!("Running integration check in {:?}", config.workdir);
    if let Some(revision) = &revision {
        println!("Revision: {}", revision.short());
    }
    println!();

    let suite = HttpAcceptanceSuite::from_config(&config.acceptance)?;
    let acceptance = base_url
        .as_deref()
        .map(|url| (&suite as &dyn AcceptanceSuite, url));
    let run = IntegrationCheck::from_config(config)
        .run(ledger, acceptance, TriggerKind::Manual, revision.as_ref())
        .await
        .context("Integration check failed to run")?;

    print_run(&run);
    if run.passed() {
        println!("\n✓ All checks passed!");
        Ok(())
    } else {
        anyhow::bail!("Integration check failed")
    }
}

async fn cmd_acceptance(config: &PipelineConfig, base_url: &str) -> Result<()> {
    let suite = HttpAcceptanceSuite::from_config(&config.acceptance)?;
    let report = suite.run(base_url).await;
    print_suite(&report);
    if report.passed() {
        Ok(())
    } else {
        anyhow::bail!("Acceptance failed: {}", report.failure_summary())
    }
}

async fn cmd_rollback(
    config: &PipelineConfig,
    ledger: Arc<MemoryRunLedger>,
    failed_revision: Option<String>,
    revision: Option<String>,
) -> Result<()> {
    let request = rollback_request(failed_revision, revision)?;
    let dispatcher = Dispatcher::from_config(config, ledger)?;
    let report = dispatcher
        .rollback_agent()
        .rollback(&request, TriggerKind::Manual)
        .await
        .context("Rollback could not be recorded")?;

    print_rollback(&report);
    if report.succeeded() {
        Ok(())
    } else {
        anyhow::bail!("Rollback failed; manual intervention required")
    }
}

fn rollback_request(
    failed_revision: Option<String>,
    revision: Option<String>,
) -> Result<RollbackRequest> {
    let failed = failed_revision.map(Revision::new);
    match (revision, failed) {
        (Some(target), failed) => Ok(RollbackRequest::manual(Revision::new(target), failed)),
        (None, Some(failed)) => Ok(RollbackRequest {
            failed_revision: Some(failed),
            target: None,
            reason: "manual rollback".to_string(),
            origin: RollbackOrigin::Manual,
        }),
        (None, None) => anyhow::bail!("Pass --failed-revision or --revision"),
    }
}

async fn cmd_dispatch(
    config: &PipelineConfig,
    ledger: Arc<MemoryRunLedger>,
    event_name: &str,
    payload_path: &Path,
) -> Result<()> {
    let raw = std::fs::read_to_string(payload_path)
        .with_context(|| format!("Failed to read event payload: {:?}", payload_path))?;
    let payload: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("Event payload is not valid JSON: {:?}", payload_path))?;
    let event = TriggerEvent::from_github(event_name, &payload)?;
    cmd_dispatch_event(config, ledger, &event).await
}

async fn cmd_dispatch_event(
    config: &PipelineConfig,
    ledger: Arc<MemoryRunLedger>,
    event: &TriggerEvent,
) -> Result<()> {
    let dispatcher = Dispatcher::from_config(config, ledger)?;
    let outcome = dispatcher.dispatch(event).await?;
    print_outcome(&outcome);
    if outcome.succeeded() {
        Ok(())
    } else {
        anyhow::bail!("{} pipeline failed", event.kind().as_str())
    }
}

fn status_icon(status: StageStatus) -> &'static str {
    match status {
        StageStatus::Passed => "✓",
        StageStatus::Failed => "✗",
        StageStatus::Skipped => "-",
    }
}

fn print_run(run: &PipelineRun) {
    println!("Run ID: {}", run.run_id);
    println!("Pipeline: {}", run.pipeline);
    println!("Status: {:?}", run.status);
    println!("Duration: {}ms", run.duration_ms);
    println!();
    for stage in &run.stages {
        match &stage.detail {
            Some(detail) => println!(
                "  {} {} ({}ms): {}",
                status_icon(stage.status),
                stage.stage,
                stage.duration_ms,
                detail
            ),
            None => println!(
                "  {} {} ({}ms)",
                status_icon(stage.status),
                stage.stage,
                stage.duration_ms
            ),
        }
    }
    println!();
    println!(
        "Summary: {}/{} stages passed",
        run.passed_count(),
        run.stages.len()
    );
}

fn print_suite(report: &SuiteReport) {
    println!("Acceptance against {}", report.base_url);
    for scenario in &report.scenarios {
        let icon = if scenario.passed { "✓" } else { "✗" };
        match &scenario.detail {
            Some(detail) => println!(
                "  {} {} ({}ms): {}",
                icon,
                scenario.scenario.name(),
                scenario.duration_ms,
                detail
            ),
            None => println!(
                "  {} {} ({}ms)",
                icon,
                scenario.scenario.name(),
                scenario.duration_ms
            ),
        }
    }
}

fn print_production(outcome: &ProductionOutcome) {
    print_run(&outcome.run);
    if let Some(url) = &outcome.url {
        println!("Production URL: {}", url);
    }
    println!(
        "Gate: {}",
        if outcome.verdict.passed {
            "✓ PASSED"
        } else {
            "✗ FAILED"
        }
    );
    if !outcome.verdict.violations.is_empty() {
        println!("Violations:");
        for violation in &outcome.verdict.violations {
            println!("  - {}", violation);
        }
    }
}

fn print_rollback(report: &RollbackReport) {
    print_run(&report.run);
    println!("{}", report.notice.summary());
}

fn print_outcome(outcome: &DispatchOutcome) {
    match outcome {
        DispatchOutcome::Preview(PreviewOutcome::NotEligible { reason }) => {
            println!("Preview skipped: {}", reason);
        }
        DispatchOutcome::Preview(PreviewOutcome::Published { run, url, .. }) => {
            print_run(run);
            println!("Preview URL: {}", url);
        }
        DispatchOutcome::Preview(PreviewOutcome::Failed { run }) => print_run(run),
        DispatchOutcome::Production { outcome, rollback } => {
            print_production(outcome);
            if let Some(report) = rollback {
                println!();
                print_rollback(report);
            }
        }
        DispatchOutcome::Rollback(report) => print_rollback(report),
        DispatchOutcome::Ignored { reason } => println!("Nothing to do: {}", reason),
    }
}

#[derive(Serialize)]
struct RecordedRun {
    run: RunRecord,
    events: Vec<RunEvent>,
}

async fn write_report(ledger: &dyn RunLedger, path: &Path) -> Result<()> {
    let mut runs = Vec::new();
    for run in ledger.list_runs(None).await? {
        let events = ledger.get_events(&run.run_id).await?;
        runs.push(RecordedRun { run, events });
    }
    let json = serde_json::to_string_pretty(&runs)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write report: {:?}", path))?;
    info!(path = %path.display(), runs = runs.len(), "Run report written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use storefront_state::{ContentDigest, RunMetadata, RunStatus, RunSummary};

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn rollback_needs_a_revision() {
        assert!(Cli::try_parse_from(["storefront-ci", "rollback"]).is_err());
        assert!(
            Cli::try_parse_from(["storefront-ci", "rollback", "--failed-revision", "abc1234"])
                .is_ok()
        );
        assert!(Cli::try_parse_from(["storefront-ci", "rollback", "--revision", "abc1234"]).is_ok());
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::try_parse_from([
            "storefront-ci",
            "check",
            "--base-url",
            "https://shop.example.com",
            "--json",
            "--config",
            "ci.toml",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.config, Some(PathBuf::from("ci.toml")));
        let Commands::Check { base_url } = cli.command else {
            panic!("expected check");
        };
        assert_eq!(base_url.as_deref(), Some("https://shop.example.com"));
    }

    #[test]
    fn rollback_request_prefers_explicit_target() {
        let request =
            rollback_request(Some("bad0000".to_string()), Some("good000".to_string())).unwrap();
        assert_eq!(request.target.unwrap().id, "good000");
        assert_eq!(request.failed_revision.unwrap().id, "bad0000");
        assert_eq!(request.origin, RollbackOrigin::Manual);

        let request = rollback_request(Some("bad0000".to_string()), None).unwrap();
        assert!(request.target.is_none());
        assert_eq!(request.failed_revision.unwrap().id, "bad0000");

        assert!(rollback_request(None, None).is_err());
    }

    #[tokio::test]
    async fn report_contains_runs_and_events() {
        let ledger = MemoryRunLedger::new();
        let metadata = RunMetadata {
            revision: Some("abc1234".to_string()),
            pipeline: "integration".to_string(),
            trigger: "manual".to_string(),
            tags: serde_json::json!({}),
        };
        let run_id = ledger
            .create_run(&ContentDigest::from_bytes(b"plan"), metadata)
            .await
            .unwrap();
        let summary = RunSummary {
            total_events: 0,
            duration_ms: 1,
            failed_stage: None,
        };
        ledger
            .finish_run(&run_id, RunStatus::Passed, summary)
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.json");
        write_report(&ledger, &path).await.unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.as_array().unwrap().len(), 1);
        assert_eq!(written[0]["run"]["metadata"]["pipeline"], "integration");
        assert!(written[0]["events"].as_array().unwrap().is_empty());
    }
}
