//! Git helpers for locating and checking out revisions.

use std::path::Path;
use std::process::Command;

use crate::domain::error::{PipelineError, Result};

fn run_git(repo_dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .map_err(|e| PipelineError::Git(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PipelineError::Git(format!(
            "git {} failed: {}",
            args.join(" "),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Capture the HEAD commit SHA of the repository at `repo_dir`.
pub fn capture_head_sha(repo_dir: &Path) -> Result<String> {
    let sha = run_git(repo_dir, &["rev-parse", "HEAD"])?;
    if sha.is_empty() {
        return Err(PipelineError::Git(
            "git rev-parse HEAD returned empty output".to_string(),
        ));
    }
    Ok(sha)
}

/// Resolve the first parent of `revision`.
///
/// Fails for a root commit, which has no predecessor to roll back to.
pub fn resolve_parent(repo_dir: &Path, revision: &str) -> Result<String> {
    let spec = format!("{revision}^");
    run_git(repo_dir, &["rev-parse", "--verify", "--quiet", &spec])
        .map_err(|_| PipelineError::Git(format!("revision {revision} has no parent")))
}

/// Resolve any revision expression to a full commit SHA.
pub fn resolve_revision(repo_dir: &Path, revision: &str) -> Result<String> {
    let spec = format!("{revision}^{{commit}}");
    run_git(repo_dir, &["rev-parse", "--verify", "--quiet", &spec])
        .map_err(|_| PipelineError::Git(format!("unknown revision {revision}")))
}

/// Check out `revision` as a detached HEAD.
pub fn checkout(repo_dir: &Path, revision: &str) -> Result<()> {
    run_git(repo_dir, &["checkout", "--detach", "--quiet", revision]).map(|_| ())
}

/// Check whether a directory is inside a git work tree.
pub fn is_git_repo(dir: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(dir)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
