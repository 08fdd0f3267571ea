//! Pipeline configuration.
//!
//! Resolution order: built-in defaults, then an optional TOML file, then
//! environment variables. Every field has a default so an empty file (or no
//! file) is a valid configuration.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::domain::{PipelineError, Result};

/// A credential. `Debug` never prints the value.
#[derive(Clone, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// An external verification command.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CommandConfig {
    /// Program followed by its arguments.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub enabled: bool,
}

impl CommandConfig {
    fn npm_script(script: &str, timeout_secs: u64) -> Self {
        Self {
            command: vec!["npm".to_string(), "run".to_string(), script.to_string()],
            timeout_secs,
            enabled: true,
        }
    }
}

/// A `[stages.<name>]` table replaces the built-in command entirely.
impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 600,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct StagesConfig {
    pub lint: CommandConfig,
    pub typecheck: CommandConfig,
    pub build: CommandConfig,
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            lint: CommandConfig::npm_script("lint", 300),
            typecheck: CommandConfig::npm_script("typecheck", 300),
            build: CommandConfig::npm_script("build", 900),
        }
    }
}

/// Commerce backend the storefront talks to.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub url: Option<String>,
    pub access_token: Option<Secret>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeployConfig {
    /// Deployment CLI invocation. `{environment}` is replaced with
    /// `preview` or `production`.
    pub command: Vec<String>,
    pub token: Option<Secret>,
    /// Environment variable the CLI reads its token from.
    pub token_env: String,
    pub timeout_secs: u64,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            command: ["npx", "shopify", "hydrogen", "deploy", "--force", "--env", "{environment}"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            token: None,
            token_env: "SHOPIFY_HYDROGEN_DEPLOYMENT_TOKEN".to_string(),
            timeout_secs: 900,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AcceptanceConfig {
    /// Overrides the URL acceptance tests run against.
    pub base_url: Option<String>,
    /// Text the root page `<title>` must contain.
    pub title_marker: String,
    pub scenario_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for AcceptanceConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            title_marker: "Hydrogen".to_string(),
            scenario_timeout_secs: 10,
            poll_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct GithubConfig {
    pub api_url: String,
    /// `owner/name`
    pub repository: Option<String>,
    pub token: Option<Secret>,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            repository: None,
            token: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct RollbackConfig {
    /// Roll back from a completed-workflow event instead of in-process
    /// after a failed production run. Exactly one of the two paths is live.
    pub on_workflow_failure: bool,
    /// Name of the production workflow. When set, only failures of that
    /// workflow roll back; merge-queue origin is required either way.
    pub workflow: Option<String>,
    pub webhook_url: Option<String>,
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Storefront source checkout.
    pub workdir: PathBuf,
    /// Required runtime major version (e.g. "20"); unchecked when unset.
    pub runtime_version: Option<String>,
    /// Fixed production URL; always wins over the URL parsed from deploy output.
    pub production_url: Option<String>,
    pub store: StoreConfig,
    pub stages: StagesConfig,
    pub deploy: DeployConfig,
    pub acceptance: AcceptanceConfig,
    pub github: GithubConfig,
    pub rollback: RollbackConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("."),
            runtime_version: None,
            production_url: None,
            store: StoreConfig::default(),
            stages: StagesConfig::default(),
            deploy: DeployConfig::default(),
            acceptance: AcceptanceConfig::default(),
            github: GithubConfig::default(),
            rollback: RollbackConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from an optional TOML file, then apply process environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| PipelineError::Config(e.to_string()))
    }

    /// Apply environment overrides through `lookup`. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let deploy_token = get("STOREFRONT_DEPLOY_TOKEN").or_else(|| get(&self.deploy.token_env));
        if let Some(token) = deploy_token {
            self.deploy.token = Some(Secret::new(token));
        }
        if let Some(url) = get("STOREFRONT_STORE_URL") {
            self.store.url = Some(url);
        }
        if let Some(token) = get("STOREFRONT_STORE_TOKEN") {
            self.store.access_token = Some(Secret::new(token));
        }
        if let Some(url) = get("STOREFRONT_PRODUCTION_URL") {
            self.production_url = Some(url);
        }
        if let Some(version) = get("STOREFRONT_RUNTIME_VERSION") {
            self.runtime_version = Some(version);
        }
        if let Some(url) = get("STOREFRONT_BASE_URL") {
            self.acceptance.base_url = Some(url);
        }
        if let Some(token) = get("GITHUB_TOKEN") {
            self.github.token = Some(Secret::new(token));
        }
        if let Some(repo) = get("GITHUB_REPOSITORY") {
            self.github.repository = Some(repo);
        }
        if let Some(api) = get("GITHUB_API_URL") {
            self.github.api_url = api;
        }
        if let Some(url) = get("STOREFRONT_NOTIFY_WEBHOOK") {
            self.rollback.webhook_url = Some(url);
        }
        if let Some(workflow) = get("STOREFRONT_ROLLBACK_WORKFLOW") {
            self.rollback.workflow = Some(workflow);
        }
    }

    /// Reject configurations that cannot run.
    pub fn validate(&self) -> Result<()> {
        for (name, stage) in [
            ("lint", &self.stages.lint),
            ("typecheck", &self.stages.typecheck),
            ("build", &self.stages.build),
        ] {
            if stage.enabled && stage.command.is_empty() {
                return Err(PipelineError::Config(format!(
                    "stage '{name}' is enabled but has no command"
                )));
            }
        }
        if self.deploy.command.is_empty() {
            return Err(PipelineError::Config("deploy.command is empty".to_string()));
        }
        for (name, url) in [
            ("production_url", &self.production_url),
            ("acceptance.base_url", &self.acceptance.base_url),
            ("store.url", &self.store.url),
            ("rollback.webhook_url", &self.rollback.webhook_url),
        ] {
            if let Some(url) = url {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(PipelineError::Config(format!(
                        "{name} must be an http(s) URL, got '{url}'"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Environment forwarded to verification and deploy commands.
    pub fn command_env(&self) -> Vec<(String, String)> {
        let mut env = Vec::new();
        if let Some(url) = &self.store.url {
            env.push(("PUBLIC_STORE_DOMAIN".to_string(), url.clone()));
        }
        if let Some(token) = &self.store.access_token {
            env.push((
                "PUBLIC_STOREFRONT_API_TOKEN".to_string(),
                token.expose().to_string(),
            ));
        }
        env
    }
}
