//! Pipeline orchestration
//!
//! Runs the full verification and recovery flow:
//! 1. Scan and one-time project preparation
//! 2. Pass 1 over every artifact
//! 3. Single plain retry of pass-1 failures
//! 4. Regeneration of what still fails
//! 5. Post-regeneration pass (regenerated subset or all)
//! 6. Rollback of artifacts that still fail
//! 7. Summary

use crate::backoff::{Sleeper, TokioSleeper};
use crate::config::{PipelineConfig, SecondPassScope};
use crate::error::PipelineResult;
use crate::events::{NoopObserver, ProgressObserver};
use crate::generation::{GenerationService, RegenerationGateway};
use crate::invoker::Compiler;
use crate::pool::WorkerPool;
use crate::report::{self, Classification, RegenerationError, ResultAggregator, RunSummary};
use crate::retry::RetryManager;
use crate::rollback::RollbackManager;
use crate::store::ArtifactStore;
use crate::types::{Artifact, ArtifactId, AttemptLabel};
use std::collections::BTreeSet;
use std::sync::Arc;

/// The verification and recovery pipeline
pub struct Pipeline {
    config: PipelineConfig,
    compiler: Arc<dyn Compiler>,
    generator: Option<Arc<dyn GenerationService>>,
    store: Arc<ArtifactStore>,
    observer: Arc<dyn ProgressObserver>,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("has_generator", &self.generator.is_some())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Create pipeline without a generation service
    #[must_use]
    pub fn new(config: PipelineConfig, compiler: Arc<dyn Compiler>) -> Self {
        let store = Arc::new(ArtifactStore::new(config.backup_dir()));
        Self {
            config,
            compiler,
            generator: None,
            store,
            observer: Arc::new(NoopObserver),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    #[must_use]
    pub fn with_generator(mut self, generator: Arc<dyn GenerationService>) -> Self {
        self.generator = Some(generator);
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    /// Execute one full run
    ///
    /// Per-artifact failures never abort the run; they end up in the
    /// summary. The summary is also written to the logs directory.
    ///
    /// # Errors
    /// - `PipelineError::Config` for invalid configuration
    /// - `PipelineError::Store` if the artifact directory cannot be scanned
    /// - `PipelineError::Report` if the summary cannot be written
    pub async fn run(&self) -> PipelineResult<RunSummary> {
        self.config.validate()?;
        self.store.begin_run();
        let observer = &*self.observer;

        let artifacts = self
            .store
            .list(&self.config.artifact_dir, &self.config.pattern)?;
        tracing::info!(
            dir = %self.config.artifact_dir.display(),
            count = artifacts.len(),
            "starting verification run"
        );

        if let Err(e) = self.compiler.prepare(&artifacts).await {
            tracing::warn!(error = %e, "project preparation failed; continuing");
        }

        let aggregator = ResultAggregator::new();
        let mut classification = Classification::default();

        // Pass 1
        let pool = WorkerPool::new(Arc::clone(&self.compiler), self.config.workers);
        let initial = pool.run(&artifacts, AttemptLabel::Initial, observer).await?;
        aggregator.record(&initial);
        let initial_failed: Vec<ArtifactId> = aggregator.failing();

        // Pass 2
        let failed_artifacts = select(&artifacts, &initial_failed);
        let retry = RetryManager::new(Arc::clone(&self.compiler), self.config.workers)
            .retry(&failed_artifacts, observer)
            .await?;
        aggregator.record(&retry.results);
        classification.recovered = retry.recovered;

        if !retry.still_failed.is_empty() && self.config.regenerate {
            match &self.generator {
                Some(generator) => {
                    self.recover(
                        &artifacts,
                        &retry.still_failed,
                        Arc::clone(generator),
                        &aggregator,
                        &mut classification,
                    )
                    .await?;
                }
                None => tracing::warn!("regeneration enabled but no generation service configured"),
            }
        }

        self.store.discard_backups();

        let summary = aggregator.finalize(
            &initial_failed,
            classification,
            self.config.second_pass_scope,
            &self.config.logs_dir,
        );
        report::persist(&summary, &self.config.logs_dir)?;
        tracing::info!(
            total = summary.total,
            succeeded = summary.success_count,
            failed = summary.failure_count,
            rate = summary.success_rate,
            "run complete"
        );
        Ok(summary)
    }

    /// Regenerate, re-verify and roll back
    async fn recover(
        &self,
        artifacts: &[Artifact],
        still_failed: &[ArtifactId],
        generator: Arc<dyn GenerationService>,
        aggregator: &ResultAggregator,
        classification: &mut Classification,
    ) -> PipelineResult<()> {
        let targets = select(artifacts, still_failed);
        tracing::info!(count = targets.len(), "regenerating still-failed artifacts");

        let gateway = RegenerationGateway::new(
            generator,
            Arc::clone(&self.store),
            Arc::clone(&self.sleeper),
            self.config.generation.clone(),
            self.config.regen_workers,
        );
        let outcomes = gateway.regenerate_all(&targets).await?;
        classification.regeneration_ran = true;

        let mut regenerated = Vec::new();
        for outcome in outcomes {
            if let Some(error) = outcome.error {
                classification.regeneration_errors.push(RegenerationError {
                    id: outcome.id.clone(),
                    error,
                });
            }
            if outcome.ok {
                regenerated.push(outcome.id);
            }
        }

        // Pass 3
        let passing_before: BTreeSet<ArtifactId> = artifacts
            .iter()
            .filter(|a| aggregator.status(&a.id) == Some(true))
            .map(|a| a.id.clone())
            .collect();
        let rebuild = match self.config.second_pass_scope {
            SecondPassScope::Failed => select(artifacts, &regenerated),
            SecondPassScope::All => artifacts.to_vec(),
        };
        let pool = WorkerPool::new(Arc::clone(&self.compiler), self.config.workers);
        let post = pool
            .run(&rebuild, AttemptLabel::Postregen, &*self.observer)
            .await?;
        aggregator.record(&post);

        classification.repaired = still_failed
            .iter()
            .filter(|id| aggregator.status(id) == Some(true))
            .cloned()
            .collect();
        classification.regressed = passing_before
            .into_iter()
            .filter(|id| aggregator.status(id) == Some(false))
            .collect();
        classification.regenerated = regenerated;
        // a recovered artifact that fails the full rebuild counts as failed
        classification
            .recovered
            .retain(|id| aggregator.status(id) == Some(true));

        // Rollback
        let failing = select(artifacts, &aggregator.failing());
        let rollback = RollbackManager::new(Arc::clone(&self.store)).rollback(&failing);
        classification.restored = rollback.restored;
        classification.restore_missing = rollback.missing;
        for (id, error) in rollback.errors {
            classification
                .regeneration_errors
                .push(RegenerationError { id, error });
        }
        Ok(())
    }
}

/// Artifacts whose id is in `ids`, in scan order
fn select(artifacts: &[Artifact], ids: &[ArtifactId]) -> Vec<Artifact> {
    let wanted: BTreeSet<&ArtifactId> = ids.iter().collect();
    artifacts
        .iter()
        .filter(|a| wanted.contains(&a.id))
        .cloned()
        .collect()
}
