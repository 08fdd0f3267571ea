//! Domain-level error taxonomy for storefront-ci.

use storefront_state::StorageError;

/// Pipeline errors.
///
/// The first four variants map one-to-one onto the failure classes the
/// pipeline reports: verification, deployment, acceptance and rollback.
/// None of them are retried.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("verification failed at stage '{stage}': {detail}")]
    Verification { stage: String, detail: String },

    #[error("deployment failed: {0}")]
    Deployment(String),

    #[error("acceptance scenario '{scenario}' failed: {detail}")]
    Acceptance { scenario: String, detail: String },

    #[error("rollback failed: {0}")]
    Rollback(String),

    #[error("deployment authentication failed: {0}")]
    Authentication(String),

    #[error("scenario '{scenario}' found no URL to follow")]
    MissingUrl { scenario: String },

    #[error("refusing to redeploy failed revision {revision}")]
    SameRevision { revision: String },

    #[error("unsupported trigger: {0}")]
    UnsupportedTrigger(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("git error: {0}")]
    Git(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storefront-ci domain operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_error_names_stage() {
        let err = PipelineError::Verification {
            stage: "typecheck".to_string(),
            detail: "exit code 2".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("typecheck"));
        assert!(msg.contains("exit code 2"));
    }

    #[test]
    fn same_revision_error_names_revision() {
        let err = PipelineError::SameRevision {
            revision: "deadbeef".to_string(),
        };
        assert!(err.to_string().contains("deadbeef"));
    }

    #[test]
    fn storage_error_converts() {
        let err: PipelineError = StorageError::RunNotFound {
            run_id: "r1".to_string(),
        }
        .into();
        assert!(err.to_string().contains("storage error"));
    }
}
