//! Run plan identity.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use storefront_core::{Revision, TriggerKind};
use storefront_state::{ContentDigest, RunMetadata};

/// What a run intends to execute, used to key its ledger record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunPlan {
    /// Pipeline name ("integration", "preview", "production", "rollback").
    pub pipeline: String,

    /// Ordered stage names.
    pub stages: Vec<String>,

    /// Revision under test or being deployed, when known.
    pub revision: Option<String>,
}

impl RunPlan {
    pub fn new(pipeline: &str, stages: Vec<String>, revision: Option<&Revision>) -> Self {
        Self {
            pipeline: pipeline.to_string(),
            stages,
            revision: revision.map(|r| r.id.clone()),
        }
    }

    /// Deterministic digest over pipeline, ordered stages and revision.
    pub fn digest(&self) -> ContentDigest {
        let mut hasher = Sha256::new();
        hasher.update(self.pipeline.as_bytes());
        hasher.update(b"\0");
        hasher.update(compute_stages_digest(&self.stages).as_bytes());
        hasher.update(b"\0");
        hasher.update(self.revision.as_deref().unwrap_or("").as_bytes());
        ContentDigest::from_bytes(&hasher.finalize())
    }

    /// Ledger metadata for a run of this plan.
    pub fn metadata(&self, trigger: TriggerKind) -> RunMetadata {
        RunMetadata {
            revision: self.revision.clone(),
            pipeline: self.pipeline.clone(),
            trigger: trigger.as_str().to_string(),
            tags: serde_json::json!({ "stages": self.stages }),
        }
    }
}

/// Compute deterministic digest of ordered stage names.
fn compute_stages_digest(stages: &[String]) -> String {
    let mut hasher = Sha256::new();
    for stage in stages {
        hasher.update(stage.as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}
