//! Rollback of irrecoverable artifacts

use crate::store::ArtifactStore;
use crate::types::{Artifact, ArtifactId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What rollback did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackReport {
    /// Original content written back
    pub restored: Vec<ArtifactId>,
    /// No backup available; left as-is
    pub missing: Vec<ArtifactId>,
    /// Restore attempted but the write failed
    pub errors: Vec<(ArtifactId, String)>,
}

/// Restores pre-regeneration content for artifacts that still fail
#[derive(Debug, Clone)]
pub struct RollbackManager {
    store: Arc<ArtifactStore>,
}

impl RollbackManager {
    #[must_use]
    pub fn new(store: Arc<ArtifactStore>) -> Self {
        Self { store }
    }

    /// Restore every artifact in `failed`
    pub fn rollback(&self, failed: &[Artifact]) -> RollbackReport {
        let mut report = RollbackReport::default();
        for artifact in failed {
            match self.store.restore(artifact) {
                Ok(true) => report.restored.push(artifact.id.clone()),
                Ok(false) => report.missing.push(artifact.id.clone()),
                Err(e) => {
                    tracing::error!(artifact = %artifact.id, error = %e, "rollback failed");
                    report.errors.push((artifact.id.clone(), e.to_string()));
                }
            }
        }
        report.restored.sort();
        report.missing.sort();
        if !failed.is_empty() {
            tracing::info!(
                restored = report.restored.len(),
                missing = report.missing.len(),
                "rollback complete"
            );
        }
        report
    }
}
