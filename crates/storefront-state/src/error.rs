//! Error types for storefront-state

use thiserror::Error;

/// Errors raised by a [`crate::RunLedger`] implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// No run with this ID exists in the ledger.
    #[error("run not found: {run_id}")]
    RunNotFound { run_id: String },

    /// The run is not in the state the operation requires.
    #[error("run {run_id} is {status}, expected {expected}")]
    InvalidRunState {
        run_id: String,
        status: String,
        expected: String,
    },

    /// Event sequence numbers must strictly increase within a run.
    #[error("run {run_id}: event seq {seq} is not after {last}")]
    OutOfOrderEvent { run_id: String, seq: u64, last: u64 },

    /// A digest string was not 64 hex characters.
    #[error("invalid digest: {digest}")]
    InvalidDigest { digest: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_state_names_both_statuses() {
        let err = StorageError::InvalidRunState {
            run_id: "r1".to_string(),
            status: "Completed".to_string(),
            expected: "Running".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Completed"));
        assert!(msg.contains("Running"));
    }
}
