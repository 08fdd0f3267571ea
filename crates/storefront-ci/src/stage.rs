//! Stage definitions and configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use storefront_core::{CommandConfig, PipelineConfig};

/// Stage name recorded for the deployment step.
pub const DEPLOY_STAGE: &str = "deploy";

/// Stage name recorded for the acceptance suite.
pub const ACCEPTANCE_STAGE: &str = "acceptance";

/// Builtin verification stages, in the order Integration Check runs them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinStage {
    /// node --version, checked against the configured runtime selector
    Runtime,

    /// npm run lint
    Lint,

    /// npm run typecheck
    Typecheck,

    /// npm run build
    Build,
}

impl BuiltinStage {
    /// Get the stage name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinStage::Runtime => "runtime",
            BuiltinStage::Lint => "lint",
            BuiltinStage::Typecheck => "typecheck",
            BuiltinStage::Build => "build",
        }
    }

    /// Get the stage's default command.
    pub fn command(&self) -> Vec<String> {
        let parts: &[&str] = match self {
            BuiltinStage::Runtime => &["node", "--version"],
            BuiltinStage::Lint => &["npm", "run", "lint"],
            BuiltinStage::Typecheck => &["npm", "run", "typecheck"],
            BuiltinStage::Build => &["npm", "run", "build"],
        };
        parts.iter().map(|s| s.to_string()).collect()
    }
}

/// Configuration for a single stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageConfig {
    /// Human-readable stage name.
    pub name: String,

    /// Command to execute (first element is executable).
    pub command: Vec<String>,

    /// Timeout in seconds. Zero means unbounded.
    pub timeout_secs: u64,

    /// Whether this stage is enabled.
    pub enabled: bool,

    /// Extra environment for the command.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// When set, stdout must start with this text for the stage to pass.
    #[serde(default)]
    pub expect_stdout_prefix: Option<String>,
}

impl StageConfig {
    /// Create a stage configuration from a builtin stage.
    pub fn from_builtin(stage: BuiltinStage, timeout_secs: u64) -> Self {
        Self::custom(stage.name().to_string(), stage.command(), timeout_secs)
    }

    /// Create a custom stage configuration.
    pub fn custom(name: String, command: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            name,
            command,
            timeout_secs,
            enabled: true,
            env: BTreeMap::new(),
            expect_stdout_prefix: None,
        }
    }

    /// Runtime check requiring `node --version` to report `major`.
    pub fn runtime(major: &str, timeout_secs: u64) -> Self {
        let mut config = Self::from_builtin(BuiltinStage::Runtime, timeout_secs);
        let major = major.trim_start_matches('v');
        config.expect_stdout_prefix = Some(format!("v{major}"));
        config
    }

    fn from_command_config(stage: BuiltinStage, command: &CommandConfig) -> Self {
        Self {
            enabled: command.enabled,
            ..Self::custom(
                stage.name().to_string(),
                command.command.clone(),
                command.timeout_secs,
            )
        }
    }

    /// Disable this stage.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Add environment variables.
    pub fn with_env<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.env.extend(vars);
        self
    }
}

/// Verification stages derived from configuration: an optional runtime
/// check, then lint, typecheck and build.
pub fn verification_stages(config: &PipelineConfig) -> Vec<StageConfig> {
    let mut stages = Vec::new();
    if let Some(version) = &config.runtime_version {
        stages.push(StageConfig::runtime(version, 30));
    }
    stages.push(StageConfig::from_command_config(
        BuiltinStage::Lint,
        &config.stages.lint,
    ));
    stages.push(StageConfig::from_command_config(
        BuiltinStage::Typecheck,
        &config.stages.typecheck,
    ));
    stages.push(StageConfig::from_command_config(
        BuiltinStage::Build,
        &config.stages.build,
    ));
    let env = config.command_env();
    stages
        .into_iter()
        .map(|stage| stage.with_env(env.clone()))
        .collect()
}
