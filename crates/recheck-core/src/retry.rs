//! Single plain retry of pass-1 failures

use crate::error::PipelineResult;
use crate::events::ProgressObserver;
use crate::invoker::Compiler;
use crate::pool::WorkerPool;
use crate::types::{Artifact, ArtifactId, AttemptLabel, BuildResult};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Classification after the retry pass
#[derive(Debug, Clone, Default)]
pub struct RetryOutcome {
    /// Retry results, completion order
    pub results: Vec<BuildResult>,
    /// Failed pass 1, passed the retry
    pub recovered: Vec<ArtifactId>,
    /// Failed both
    pub still_failed: Vec<ArtifactId>,
}

/// Split `initial_failed` by retry success
///
/// Ids without a retry result count as still failed. Output is sorted.
#[must_use]
pub fn reconcile(
    initial_failed: &[ArtifactId],
    retry_results: &[BuildResult],
) -> (Vec<ArtifactId>, Vec<ArtifactId>) {
    let passed: BTreeSet<&ArtifactId> = retry_results
        .iter()
        .filter(|r| r.success())
        .map(BuildResult::artifact_id)
        .collect();
    let unique: BTreeSet<&ArtifactId> = initial_failed.iter().collect();

    let (recovered, still_failed): (Vec<&ArtifactId>, Vec<&ArtifactId>) =
        unique.into_iter().partition(|id| passed.contains(id));
    (
        recovered.into_iter().cloned().collect(),
        still_failed.into_iter().cloned().collect(),
    )
}

/// Re-runs pass-1 failures once on a fresh pool
pub struct RetryManager {
    compiler: Arc<dyn Compiler>,
    concurrency: usize,
}

impl std::fmt::Debug for RetryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryManager")
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl RetryManager {
    #[must_use]
    pub fn new(compiler: Arc<dyn Compiler>, concurrency: usize) -> Self {
        Self {
            compiler,
            concurrency,
        }
    }

    /// Retry exactly `failed` with attempt label `retry`
    pub async fn retry(
        &self,
        failed: &[Artifact],
        observer: &dyn ProgressObserver,
    ) -> PipelineResult<RetryOutcome> {
        if failed.is_empty() {
            return Ok(RetryOutcome::default());
        }
        tracing::info!(count = failed.len(), "retrying failed artifacts");

        let pool = WorkerPool::new(Arc::clone(&self.compiler), self.concurrency);
        let results = pool.run(failed, AttemptLabel::Retry, observer).await?;

        let ids: Vec<ArtifactId> = failed.iter().map(|a| a.id.clone()).collect();
        let (recovered, still_failed) = reconcile(&ids, &results);
        tracing::info!(
            recovered = recovered.len(),
            still_failed = still_failed.len(),
            "retry complete"
        );
        Ok(RetryOutcome {
            results,
            recovered,
            still_failed,
        })
    }
}
