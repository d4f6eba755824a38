//! Result aggregation and the persisted run summary
//!
//! Provides:
//! - [`ResultAggregator`], the single collection point for build results
//! - [`RunSummary`], written as `recheck_summary.json`
//! - The regeneration error log `recheck_errors.log`

use crate::config::SecondPassScope;
use crate::error::{PipelineError, PipelineResult};
use crate::types::{ArtifactId, BuildRecord, BuildResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Summary filename inside the logs directory
pub const SUMMARY_FILE: &str = "recheck_summary.json";

/// Regeneration error log filename inside the logs directory
pub const ERRORS_FILE: &str = "recheck_errors.log";

/// `successes / total * 100`, or 0 for an empty run
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn success_rate(successes: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        successes as f64 / total as f64 * 100.0
    }
}

/// A regeneration that surfaced an error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegenerationError {
    pub id: ArtifactId,
    pub error: String,
}

/// Classification decided by the pipeline
#[derive(Debug, Clone, Default)]
pub struct Classification {
    pub recovered: Vec<ArtifactId>,
    pub repaired: Vec<ArtifactId>,
    pub regenerated: Vec<ArtifactId>,
    pub restored: Vec<ArtifactId>,
    pub restore_missing: Vec<ArtifactId>,
    pub regressed: Vec<ArtifactId>,
    pub regeneration_errors: Vec<RegenerationError>,
    pub regeneration_ran: bool,
}

/// Final report of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub timestamp: DateTime<Utc>,
    pub total: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub success_rate: f64,
    pub successful_ids: Vec<ArtifactId>,
    pub failed_ids: Vec<ArtifactId>,
    /// Failed pass 1, passed the plain retry
    pub recovered: Vec<ArtifactId>,
    /// Failed pass 1 and still failing at run end
    pub still_failed: Vec<ArtifactId>,
    pub regeneration_ran: bool,
    #[serde(default)]
    pub regenerated: Vec<ArtifactId>,
    /// Passed only after regeneration
    #[serde(default)]
    pub repaired: Vec<ArtifactId>,
    #[serde(default)]
    pub restored: Vec<ArtifactId>,
    #[serde(default)]
    pub restore_missing: Vec<ArtifactId>,
    /// Passed earlier, failed the full rebuild
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regressed: Vec<ArtifactId>,
    #[serde(default)]
    pub regeneration_errors: Vec<RegenerationError>,
    pub second_pass_scope: SecondPassScope,
    pub logs_dir: PathBuf,
    /// Every attempt, in the order recorded
    pub attempts: Vec<BuildRecord>,
}

impl RunSummary {
    /// The run succeeded iff nothing ends failed
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed_ids.is_empty()
    }
}

#[derive(Debug, Default)]
struct AggregatorState {
    attempts: Vec<BuildRecord>,
    /// Latest success flag per artifact
    latest: BTreeMap<ArtifactId, bool>,
}

/// Accumulates results from all passes
#[derive(Debug, Default)]
pub struct ResultAggregator {
    state: Mutex<AggregatorState>,
}

impl ResultAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record results of one pass; later attempts supersede earlier ones
    pub fn record(&self, results: &[BuildResult]) {
        let mut state = self.state.lock();
        for result in results {
            state.attempts.push(result.to_record());
            state
                .latest
                .insert(result.artifact_id().clone(), result.success());
        }
    }

    /// Current success flag for an artifact
    #[must_use]
    pub fn status(&self, id: &ArtifactId) -> Option<bool> {
        self.state.lock().latest.get(id).copied()
    }

    /// Ids whose latest attempt failed, sorted
    #[must_use]
    pub fn failing(&self) -> Vec<ArtifactId> {
        self.state
            .lock()
            .latest
            .iter()
            .filter(|(_, ok)| !**ok)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Build the final summary
    #[must_use]
    pub fn finalize(
        &self,
        initial_failed: &[ArtifactId],
        classification: Classification,
        scope: SecondPassScope,
        logs_dir: &Path,
    ) -> RunSummary {
        let state = self.state.lock();
        let (successful_ids, failed_ids): (Vec<ArtifactId>, Vec<ArtifactId>) = {
            let (ok, bad): (Vec<_>, Vec<_>) = state.latest.iter().partition(|(_, ok)| **ok);
            (
                ok.into_iter().map(|(id, _)| id.clone()).collect(),
                bad.into_iter().map(|(id, _)| id.clone()).collect(),
            )
        };
        let still_failed = sorted(
            initial_failed
                .iter()
                .filter(|id| failed_ids.contains(id))
                .cloned()
                .collect(),
        );

        let total = state.latest.len();
        RunSummary {
            timestamp: Utc::now(),
            total,
            success_count: successful_ids.len(),
            failure_count: failed_ids.len(),
            success_rate: success_rate(successful_ids.len(), total),
            successful_ids,
            failed_ids,
            recovered: sorted(classification.recovered),
            still_failed,
            regeneration_ran: classification.regeneration_ran,
            regenerated: sorted(classification.regenerated),
            repaired: sorted(classification.repaired),
            restored: sorted(classification.restored),
            restore_missing: sorted(classification.restore_missing),
            regressed: sorted(classification.regressed),
            regeneration_errors: classification.regeneration_errors,
            second_pass_scope: scope,
            logs_dir: logs_dir.to_path_buf(),
            attempts: state.attempts.clone(),
        }
    }
}

fn sorted(mut ids: Vec<ArtifactId>) -> Vec<ArtifactId> {
    ids.sort();
    ids.dedup();
    ids
}

/// Write `recheck_summary.json` (and `recheck_errors.log` when needed)
///
/// # Returns
/// Path of the summary file
pub fn persist(summary: &RunSummary, logs_dir: &Path) -> PipelineResult<PathBuf> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| PipelineError::Report { path, source }
    };

    std::fs::create_dir_all(logs_dir).map_err(io_err(logs_dir))?;
    let path = logs_dir.join(SUMMARY_FILE);
    let json = serde_json::to_string_pretty(summary)?;
    std::fs::write(&path, json).map_err(io_err(&path))?;

    if !summary.regeneration_errors.is_empty() {
        let errors_path = logs_dir.join(ERRORS_FILE);
        let text: String = summary
            .regeneration_errors
            .iter()
            .map(|e| format!("{}: {}\n", e.id, e.error))
            .collect();
        std::fs::write(&errors_path, text).map_err(io_err(&errors_path))?;
    }

    tracing::info!(path = %path.display(), "summary written");
    Ok(path)
}
