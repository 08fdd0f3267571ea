//! Deployment results.

use serde::{Deserialize, Serialize};

use super::revision::Revision;

/// Deployment target on the hosting platform.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Preview,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Preview => "preview",
            Environment::Production => "production",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Succeeded,
    Failed,
}

/// Outcome of one deployment attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentResult {
    pub environment: Environment,

    /// Revision that was deployed.
    pub revision: Revision,

    /// URL reported by the deployment CLI, if any.
    pub url: Option<String>,

    pub status: DeploymentStatus,

    /// Last lines of CLI output, kept for failure reports.
    pub output_tail: String,
}

impl DeploymentResult {
    pub fn succeeded(&self) -> bool {
        self.status == DeploymentStatus::Succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_names() {
        assert_eq!(Environment::Preview.to_string(), "preview");
        assert_eq!(Environment::Production.as_str(), "production");
    }

    #[test]
    fn environment_serde_is_snake_case() {
        let json = serde_json::to_string(&Environment::Production).unwrap();
        assert_eq!(json, "\"production\"");
    }
}
