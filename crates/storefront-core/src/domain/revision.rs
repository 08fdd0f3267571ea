//! Source revisions.

use serde::{Deserialize, Serialize};

/// A source snapshot identified by its commit id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Revision {
    /// Commit id.
    pub id: String,

    /// Parent commit id, when already known.
    pub predecessor: Option<String>,
}

impl Revision {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            predecessor: None,
        }
    }

    pub fn with_predecessor(mut self, predecessor: impl Into<String>) -> Self {
        self.predecessor = Some(predecessor.into());
        self
    }

    /// First 7 characters of the id.
    pub fn short(&self) -> &str {
        &self.id[..7.min(self.id.len())]
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}
