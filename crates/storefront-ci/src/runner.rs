//! Stage execution.

use std::path::Path;
use std::process::Stdio;
use std::time::Instant;

use tokio::process::Command;

use crate::stage::StageConfig;

/// Result of a stage execution.
#[derive(Debug, Clone)]
pub struct StageResult {
    /// Stage name.
    pub stage_name: String,

    /// Exit code (0 = success).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Whether execution succeeded.
    pub success: bool,
}

impl StageResult {
    /// Whether this stage passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }

    /// Short failure description for reports.
    pub fn failure_detail(&self) -> String {
        let tail = tail_lines(&self.stderr, 5);
        if tail.is_empty() {
            format!("exited with code {}", self.exit_code)
        } else {
            format!("exited with code {}: {}", self.exit_code, tail)
        }
    }
}

/// Last `n` non-empty lines of `text`, joined with newlines.
pub fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

/// Runs a stage's command as a child process.
pub struct StageRunner;

impl StageRunner {
    /// Execute a single stage in `workdir` and return the result.
    ///
    /// A spawn failure or timeout is an `Err`; a non-zero exit is an `Ok`
    /// result with `success == false`. A timed-out child is killed.
    pub async fn execute_stage(config: &StageConfig, workdir: &Path) -> anyhow::Result<StageResult> {
        let start = Instant::now();

        if config.command.is_empty() {
            anyhow::bail!("Stage {} has empty command", config.name);
        }

        let exe = &config.command[0];
        let args = &config.command[1..];

        let child = Command::new(exe)
            .args(args)
            .envs(&config.env)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow::anyhow!("Stage {} failed to spawn {}: {}", config.name, exe, e))?;

        let output = if config.timeout_secs > 0 {
            tokio::time::timeout(
                std::time::Duration::from_secs(config.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "Stage {} timed out after {} seconds",
                    config.name,
                    config.timeout_secs
                )
            })??
        } else {
            child.wait_with_output().await?
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let mut exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let mut stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let mut success = output.status.success();

        if success {
            if let Some(prefix) = &config.expect_stdout_prefix {
                if !stdout.trim_start().starts_with(prefix.as_str()) {
                    success = false;
                    exit_code = 1;
                    stderr.push_str(&format!(
                        "expected output starting with '{}', got '{}'",
                        prefix,
                        stdout.trim()
                    ));
                }
            }
        }

        Ok(StageResult {
            stage_name: config.name.clone(),
            exit_code,
            stdout,
            stderr,
            duration_ms,
            success,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn here() -> std::path::PathBuf {
        std::env::current_dir().unwrap()
    }

    #[test]
    fn test_stage_result_passed() {
        let result = StageResult {
            stage_name: "lint".to_string(),
            exit_code: 0,
            stdout: "".to_string(),
            stderr: "".to_string(),
            duration_ms: 100,
            success: true,
        };
        assert!(result.passed());
    }

    #[test]
    fn test_stage_result_failed() {
        let result = StageResult {
            stage_name: "lint".to_string(),
            exit_code: 1,
            stdout: "".to_string(),
            stderr: "a\n\nb\nc".to_string(),
            duration_ms: 100,
            success: false,
        };
        assert!(!result.passed());
        assert_eq!(result.failure_detail(), "exited with code 1: a\nb\nc");
    }

    #[test]
    fn tail_keeps_last_lines() {
        assert_eq!(tail_lines("1\n2\n3\n4", 2), "3\n4");
        assert_eq!(tail_lines("", 3), "");
    }

    #[tokio::test]
    async fn test_execute_simple_command() {
        let config = StageConfig::custom(
            "echo_test".to_string(),
            vec!["echo".to_string(), "hello".to_string()],
            60,
        );

        let result = StageRunner::execute_stage(&config, &here())
            .await
            .expect("execute failed");
        assert!(result.success);
        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_execute_failing_command() {
        let config = StageConfig::custom("false_test".to_string(), vec!["false".to_string()], 60);

        let result = StageRunner::execute_stage(&config, &here())
            .await
            .expect("execute failed");
        assert!(!result.success);
        assert_ne!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn test_env_is_passed_to_command() {
        let config = StageConfig::custom(
            "env_test".to_string(),
            vec!["sh".to_string(), "-c".to_string(), "echo $STORE".to_string()],
            60,
        )
        .with_env([("STORE".to_string(), "acme".to_string())]);

        let result = StageRunner::execute_stage(&config, &here()).await.unwrap();
        assert_eq!(result.stdout.trim(), "acme");
    }

    #[tokio::test]
    async fn test_timeout_is_an_error() {
        let config = StageConfig::custom(
            "sleepy".to_string(),
            vec!["sleep".to_string(), "5".to_string()],
            1,
        );
        let err = StageRunner::execute_stage(&config, &here())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_unexpected_stdout_fails_stage() {
        let mut config = StageConfig::custom(
            "runtime".to_string(),
            vec!["echo".to_string(), "v18.19.0".to_string()],
            60,
        );
        config.expect_stdout_prefix = Some("v20".to_string());

        let result = StageRunner::execute_stage(&config, &here()).await.unwrap();
        assert!(!result.passed());
        assert!(result.stderr.contains("v20"));
    }

    #[tokio::test]
    async fn test_empty_command_is_rejected() {
        let config = StageConfig::custom("empty".to_string(), vec![], 60);
        assert!(StageRunner::execute_stage(&config, &here()).await.is_err());
    }
}
