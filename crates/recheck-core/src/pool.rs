//! Bounded-concurrency worker pool
//!
//! Fans out one task per artifact, at most `concurrency` compiling at a
//! time, and collects results as they complete.

use crate::error::{PipelineError, PipelineResult};
use crate::events::{ProgressEvent, ProgressObserver};
use crate::invoker::Compiler;
use crate::types::{Artifact, AttemptLabel, BuildResult};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Worker pool for one pass
pub struct WorkerPool {
    compiler: Arc<dyn Compiler>,
    concurrency: usize,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Create pool. A concurrency of zero is treated as one.
    #[must_use]
    pub fn new(compiler: Arc<dyn Compiler>, concurrency: usize) -> Self {
        Self {
            compiler,
            concurrency: concurrency.max(1),
        }
    }

    #[inline]
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Compile every artifact once with the given attempt label
    ///
    /// # Returns
    /// One result per artifact, in completion order
    ///
    /// # Errors
    /// - `PipelineError::Worker` if a worker task panicked
    pub async fn run(
        &self,
        artifacts: &[Artifact],
        attempt: AttemptLabel,
        observer: &dyn ProgressObserver,
    ) -> PipelineResult<Vec<BuildResult>> {
        let total = artifacts.len();
        observer.on_event(ProgressEvent::Init { attempt, total });

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        for artifact in artifacts {
            let compiler = Arc::clone(&self.compiler);
            let semaphore = Arc::clone(&semaphore);
            let artifact = artifact.clone();
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| PipelineError::Worker(e.to_string()))?;
                Ok::<_, PipelineError>(compiler.compile(&artifact, attempt).await)
            });
        }

        let mut results = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            let result = joined.map_err(|e| PipelineError::Worker(e.to_string()))??;
            observer.on_event(ProgressEvent::File {
                record: result.to_record(),
                completed: results.len() + 1,
                total,
            });
            results.push(result);
        }

        let succeeded = results.iter().filter(|r| r.success()).count();
        observer.on_event(ProgressEvent::Done {
            attempt,
            total,
            succeeded,
        });
        tracing::info!(%attempt, total, succeeded, "pass complete");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChannelObserver, NoopObserver};
    use crate::types::BuildOutcome;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fails every id ending in an even digit and tracks peak concurrency
    #[derive(Default)]
    struct CountingCompiler {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Compiler for CountingCompiler {
        async fn compile(&self, artifact: &Artifact, attempt: AttemptLabel) -> BuildResult {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            let even = artifact
                .id
                .as_str()
                .chars()
                .last()
                .and_then(|c| c.to_digit(10))
                .is_some_and(|d| d % 2 == 0);
            let outcome = if even {
                BuildOutcome::Rejected { exit_code: Some(1) }
            } else {
                BuildOutcome::Passed
            };
            BuildResult::new(
                artifact.id.clone(),
                attempt,
                outcome,
                String::new(),
                String::new(),
                None,
            )
        }
    }

    fn artifacts(n: usize) -> Vec<Artifact> {
        (1..=n)
            .map(|i| Artifact::new(format!("/blocks/Block_{i}.lean")))
            .collect()
    }

    #[tokio::test]
    async fn respects_concurrency_bound() {
        let compiler = Arc::new(CountingCompiler::default());
        let pool = WorkerPool::new(compiler.clone(), 2);

        let results = pool
            .run(&artifacts(8), AttemptLabel::Initial, &NoopObserver)
            .await
            .unwrap();

        assert_eq!(results.len(), 8);
        assert!(compiler.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(results.iter().filter(|r| r.success()).count(), 4);
    }

    #[tokio::test]
    async fn emits_init_files_done() {
        let pool = WorkerPool::new(Arc::new(CountingCompiler::default()), 4);
        let (observer, mut events) = ChannelObserver::new();

        pool.run(&artifacts(3), AttemptLabel::Retry, &observer)
            .await
            .unwrap();
        drop(observer);

        let mut collected = Vec::new();
        while let Some(event) = events.recv().await {
            collected.push(event);
        }
        assert_eq!(collected.len(), 5);
        assert!(matches!(collected[0], ProgressEvent::Init { total: 3, .. }));
        assert!(matches!(
            collected[3],
            ProgressEvent::File { completed: 3, total: 3, .. }
        ));
        assert!(matches!(
            collected[4],
            ProgressEvent::Done { succeeded: 2, .. }
        ));
    }

    #[tokio::test]
    async fn empty_pass_is_fine() {
        let pool = WorkerPool::new(Arc::new(CountingCompiler::default()), 0);
        assert_eq!(pool.concurrency(), 1);
        let results = pool
            .run(&[], AttemptLabel::Postregen, &NoopObserver)
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
