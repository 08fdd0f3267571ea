//! Publishing a revision to a hosting environment.

use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Instant;

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use storefront_core::{
    DeployConfig, DeploymentResult, DeploymentStatus, Environment, EventKind, PipelineConfig,
    PipelineError, Result, Revision, Secret,
};
use tracing::{info, warn};

use crate::runner::{tail_lines, StageRunner};
use crate::stage::{StageConfig, DEPLOY_STAGE};
use crate::tracking::TrackedRun;

static URL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https://[^\s"'<>`]+"#).unwrap());

/// Publishes a revision to an environment.
///
/// A deployment that ran but failed is an `Ok` result with
/// [`DeploymentStatus::Failed`]; `Err` is reserved for deployments that
/// could not be attempted (missing credentials, spawn failure, timeout).
#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(&self, environment: Environment, revision: &Revision)
        -> Result<DeploymentResult>;
}

/// Deploys by running the hosting provider's CLI.
#[derive(Debug, Clone)]
pub struct CliDeployer {
    command: Vec<String>,
    token: Option<Secret>,
    token_env: String,
    timeout_secs: u64,
    workdir: PathBuf,
    env: Vec<(String, String)>,
}

impl CliDeployer {
    pub fn new(config: &DeployConfig, workdir: impl Into<PathBuf>) -> Self {
        Self {
            command: config.command.clone(),
            token: config.token.clone(),
            token_env: config.token_env.clone(),
            timeout_secs: config.timeout_secs,
            workdir: workdir.into(),
            env: Vec::new(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(&config.deploy, config.workdir.clone()).with_env(config.command_env())
    }

    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env.extend(env);
        self
    }

    fn command_for(&self, environment: Environment) -> Vec<String> {
        self.command
            .iter()
            .map(|part| part.replace("{environment}", environment.as_str()))
            .collect()
    }
}

#[async_trait]
impl Deployer for CliDeployer {
    async fn deploy(
        &self,
        environment: Environment,
        revision: &Revision,
    ) -> Result<DeploymentResult> {
        let token = self
            .token
            .as_ref()
            .filter(|t| !t.expose().is_empty())
            .ok_or_else(|| {
                PipelineError::Authentication(format!(
                    "no deployment token configured (set {})",
                    self.token_env
                ))
            })?;

        let mut env = self.env.clone();
        env.push((self.token_env.clone(), token.expose().to_string()));
        let stage = StageConfig::custom(
            DEPLOY_STAGE.to_string(),
            self.command_for(environment),
            self.timeout_secs,
        )
        .with_env(env);

        info!(
            environment = %environment,
            revision = %revision.short(),
            "Deploying"
        );

        let result = StageRunner::execute_stage(&stage, &self.workdir)
            .await
            .map_err(|e| PipelineError::Deployment(e.to_string()))?;

        let output_tail = tail_lines(&format!("{}\n{}", result.stdout, result.stderr), 20);
        if !result.passed() {
            warn!(
                environment = %environment,
                exit_code = result.exit_code,
                "Deployment command failed"
            );
            return Ok(DeploymentResult {
                environment,
                revision: revision.clone(),
                url: None,
                status: DeploymentStatus::Failed,
                output_tail,
            });
        }

        let url = parse_deploy_url(&result.stdout).or_else(|| parse_deploy_url(&result.stderr));
        info!(environment = %environment, url = ?url, "Deployment finished");
        Ok(DeploymentResult {
            environment,
            revision: revision.clone(),
            url,
            status: DeploymentStatus::Succeeded,
            output_tail,
        })
    }
}

/// The last `https://` URL printed by the deployment CLI.
pub fn parse_deploy_url(output: &str) -> Option<String> {
    URL_REGEX
        .find_iter(output)
        .last()
        .map(|m| m.as_str().trim_end_matches(['.', ',', ')', ';', ':']).to_string())
}

/// The URL production acceptance tests run against.
///
/// A configured static production URL wins over whatever the deployment
/// reported; `None` means there is nothing to test.
pub fn resolve_production_url(configured: Option<&str>, deployed: Option<&str>) -> Option<String> {
    configured
        .filter(|u| !u.trim().is_empty())
        .or(deployed)
        .map(str::to_string)
}

/// Run the deployment as the `deploy` stage of `run`.
///
/// Returns the deployment and its resolved URL when the deployment
/// succeeded, or `None` after recording the failure. `configured_url` takes
/// precedence over the deployed URL for production. With `require_url`, a
/// deployment that leaves no URL to test counts as failed.
pub(crate) async fn deploy_stage(
    run: &mut TrackedRun,
    deployer: &dyn Deployer,
    environment: Environment,
    revision: &Revision,
    configured_url: Option<&str>,
    require_url: bool,
) -> Result<Option<(DeploymentResult, Option<String>)>> {
    run.started(
        DEPLOY_STAGE,
        json!({ "environment": environment.as_str(), "revision": &revision.id }),
    )
    .await?;
    let start = Instant::now();
    let outcome = deployer.deploy(environment, revision).await;
    let duration_ms = start.elapsed().as_millis() as u64;

    let deployment = match outcome {
        Ok(deployment) if deployment.succeeded() => deployment,
        Ok(deployment) => {
            let detail = match deployment.output_tail.lines().last() {
                Some(line) => format!("{environment} deployment failed: {line}"),
                None => format!("{environment} deployment failed"),
            };
            run.failed(
                DEPLOY_STAGE,
                duration_ms,
                &detail,
                json!({ "output_tail": &deployment.output_tail }),
            )
            .await?;
            return Ok(None);
        }
        Err(e) => {
            run.failed(DEPLOY_STAGE, duration_ms, &e.to_string(), json!({}))
                .await?;
            return Ok(None);
        }
    };

    let url = match environment {
        Environment::Production => {
            resolve_production_url(configured_url, deployment.url.as_deref())
        }
        Environment::Preview => deployment.url.clone(),
    };
    if url.is_none() && require_url {
        run.failed(
            DEPLOY_STAGE,
            duration_ms,
            &format!("no {environment} URL"),
            json!({ "output_tail": &deployment.output_tail }),
        )
        .await?;
        return Ok(None);
    }

    run.record(
        EventKind::DeploymentRecorded {
            environment: environment.as_str().to_string(),
        },
        json!({ "url": &url, "revision": &revision.id }),
    )
    .await?;
    run.passed(DEPLOY_STAGE, duration_ms, json!({ "url": &url }))
        .await?;
    Ok(Some((deployment, url)))
}
