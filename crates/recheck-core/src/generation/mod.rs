//! Regeneration gateway
//!
//! Replaces the content of still-failed artifacts with output from a
//! [`GenerationService`]:
//! - Backup before any write
//! - Bounded exponential backoff for transient service errors
//! - Re-requests on empty replies
//! - Deterministic local fallback when nothing usable comes back

pub mod skeleton;

use crate::backoff::{Backoff, Sleeper};
use crate::config::GenerationConfig;
use crate::error::{GenerationError, PipelineError, PipelineResult};
use crate::store::ArtifactStore;
use crate::types::{Artifact, ArtifactId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

pub use skeleton::{build_fallback_skeleton, ensure_header, minimal_skeleton, strip_code_fences};

/// Fixed system instruction sent with every regeneration request
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert Lean 4 engineer.
Task: A Lean file failed to compile. Regenerate the entire file so that it typechecks.

Rules:
1. Keep or add necessary imports/opens/namespaces. Ensure `import Mathlib` appears exactly once at the top.
2. Preserve the file's intent and main statements when possible; you may simplify proofs and replace bodies with `:= by sorry` to recover typechecking.
3. Do not add commentary or code fences; output only the final Lean source.";

const USER_PREFIX: &str =
    "This Lean file failed to compile. Please return a compiling Lean file (no fences):\n\n";

/// One system + user exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub system: String,
    pub user: String,
}

/// External text generation service
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Return the reply text for `request`
    async fn complete(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}

/// Where the written content came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentSource {
    /// Service reply
    Model,
    /// Skeleton derived from the original content
    Fallback,
    /// Trivial always-valid skeleton
    Minimal,
}

/// Result of regenerating one artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegenerationOutcome {
    pub id: ArtifactId,
    /// `None` when nothing was written
    pub source: Option<ContentSource>,
    /// Whether new content was written
    pub ok: bool,
    /// Last service or store error, if any
    pub error: Option<String>,
}

/// Drives regeneration for a set of artifacts
#[derive(Clone)]
pub struct RegenerationGateway {
    service: Arc<dyn GenerationService>,
    store: Arc<ArtifactStore>,
    sleeper: Arc<dyn Sleeper>,
    config: GenerationConfig,
    backoff: Backoff,
    concurrency: usize,
}

impl std::fmt::Debug for RegenerationGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegenerationGateway")
            .field("config", &self.config)
            .field("backoff", &self.backoff)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl RegenerationGateway {
    #[must_use]
    pub fn new(
        service: Arc<dyn GenerationService>,
        store: Arc<ArtifactStore>,
        sleeper: Arc<dyn Sleeper>,
        config: GenerationConfig,
        concurrency: usize,
    ) -> Self {
        let backoff = Backoff::new(
            Duration::from_millis(config.initial_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        );
        Self {
            service,
            store,
            sleeper,
            config,
            backoff,
            concurrency: concurrency.max(1),
        }
    }

    /// System instruction including any configured guidance
    #[must_use]
    pub fn system_prompt(&self) -> String {
        match self.config.append_system.as_deref().map(str::trim) {
            Some(extra) if !extra.is_empty() => {
                format!("{DEFAULT_SYSTEM_PROMPT}\n\nAdditional guidance:\n{extra}")
            }
            _ => DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    /// Regenerate every artifact, bounded by the gateway's own concurrency
    ///
    /// Outcomes are returned sorted by id.
    pub async fn regenerate_all(
        &self,
        artifacts: &[Artifact],
    ) -> PipelineResult<Vec<RegenerationOutcome>> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        for artifact in artifacts {
            let gateway = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let artifact = artifact.clone();
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| PipelineError::Worker(e.to_string()))?;
                Ok::<_, PipelineError>(gateway.regenerate(&artifact).await)
            });
        }

        let mut outcomes = Vec::with_capacity(artifacts.len());
        while let Some(joined) = tasks.join_next().await {
            outcomes.push(joined.map_err(|e| PipelineError::Worker(e.to_string()))??);
        }
        outcomes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(outcomes)
    }

    /// Regenerate one artifact
    ///
    /// Always backs up first. Writes model output when usable, otherwise a
    /// fallback or minimal skeleton.
    pub async fn regenerate(&self, artifact: &Artifact) -> RegenerationOutcome {
        let failed = |error: String| RegenerationOutcome {
            id: artifact.id.clone(),
            source: None,
            ok: false,
            error: Some(error),
        };

        if let Err(e) = self.store.backup(artifact) {
            tracing::error!(artifact = %artifact.id, error = %e, "backup failed; not regenerating");
            return failed(e.to_string());
        }
        let original = match self.store.read(artifact) {
            Ok(content) => content,
            Err(e) => return failed(e.to_string()),
        };

        let request = GenerationRequest {
            system: self.system_prompt(),
            user: format!("{USER_PREFIX}{original}"),
        };
        let (reply, error) = self.request_with_retries(&artifact.id, &request).await;

        let header = &self.config.required_header;
        let (source, content) = match reply {
            Some(text) if self.config.normalize => (ContentSource::Model, ensure_header(&text, header)),
            Some(text) => (ContentSource::Model, format!("{text}\n")),
            None => match build_fallback_skeleton(&original) {
                Some(skeleton) => (ContentSource::Fallback, ensure_header(&skeleton, header)),
                None => (
                    ContentSource::Minimal,
                    minimal_skeleton(artifact.id.as_str(), header),
                ),
            },
        };

        if let Err(e) = self.store.write(artifact, &content) {
            tracing::error!(artifact = %artifact.id, error = %e, "could not write regenerated content");
            return failed(e.to_string());
        }
        tracing::info!(artifact = %artifact.id, source = ?source, "regenerated");

        RegenerationOutcome {
            id: artifact.id.clone(),
            source: Some(source),
            ok: true,
            error,
        }
    }

    /// Call the service until a non-empty reply or the retry budgets run out
    ///
    /// # Returns
    /// Cleaned reply text (if any) and the last terminal error (if any)
    async fn request_with_retries(
        &self,
        id: &ArtifactId,
        request: &GenerationRequest,
    ) -> (Option<String>, Option<String>) {
        let mut failures = 0u32;
        let mut empties = 0u32;
        loop {
            match self.service.complete(request).await {
                Ok(reply) => {
                    let cleaned = strip_code_fences(&reply);
                    if !cleaned.is_empty() {
                        return (Some(cleaned), None);
                    }
                    if empties >= self.config.empty_retries {
                        tracing::warn!(artifact = %id, "empty reply; using fallback");
                        return (None, None);
                    }
                    empties += 1;
                    tracing::warn!(artifact = %id, retry = empties, "empty reply; asking again");
                    self.sleeper.sleep(Backoff::empty_delay(empties)).await;
                }
                Err(e) => {
                    failures += 1;
                    if e.is_retryable() && failures < self.config.max_attempts {
                        let delay = self.backoff.delay_for(failures, e.retry_after());
                        tracing::warn!(
                            artifact = %id,
                            attempt = failures,
                            error = %e,
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            "transient generation error"
                        );
                        self.sleeper.sleep(delay).await;
                        continue;
                    }
                    tracing::error!(artifact = %id, error = %e, "generation failed");
                    return (None, Some(e.to_string()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::TokioSleeper;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays canned replies and records requests
    struct Canned {
        replies: Mutex<VecDeque<Result<String, GenerationError>>>,
        requests: Mutex<Vec<GenerationRequest>>,
    }

    impl Canned {
        fn new(replies: Vec<Result<String, GenerationError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl GenerationService for Canned {
        async fn complete(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
            self.requests.lock().push(request.clone());
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(String::new()))
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        artifact: Artifact,
        store: Arc<ArtifactStore>,
    }

    fn fixture(content: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Block_004.lean");
        std::fs::write(&path, content).unwrap();
        let store = Arc::new(ArtifactStore::new(dir.path().join("backups")));
        Fixture {
            artifact: Artifact::new(path),
            store,
            _dir: dir,
        }
    }

    fn gateway(service: Arc<Canned>, store: Arc<ArtifactStore>, config: GenerationConfig) -> RegenerationGateway {
        RegenerationGateway::new(service, store, Arc::new(TokioSleeper), config, 2)
    }

    fn http(status: u16) -> GenerationError {
        GenerationError::Http {
            status,
            body: "boom".into(),
            retry_after: None,
        }
    }

    const ORIGINAL: &str = "import Mathlib\n\ntheorem t : 1 + 1 = 2 := by\n  simp?\n";

    #[tokio::test(start_paused = true)]
    async fn model_reply_is_cleaned_and_written() {
        let fx = fixture(ORIGINAL);
        let service = Canned::new(vec![Ok("```lean\ntheorem t : 1 + 1 = 2 := by\n  norm_num\n```".into())]);
        let gw = gateway(service.clone(), fx.store.clone(), GenerationConfig::default());

        let outcome = gw.regenerate(&fx.artifact).await;
        assert!(outcome.ok);
        assert_eq!(outcome.source, Some(ContentSource::Model));
        assert_eq!(
            fx.store.read(&fx.artifact).unwrap(),
            "import Mathlib\ntheorem t : 1 + 1 = 2 := by\n  norm_num\n"
        );
        assert_eq!(fx.store.backup_content(&fx.artifact).as_deref(), Some(ORIGINAL));

        let requests = service.requests.lock();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].user.ends_with(ORIGINAL));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_exhaust_to_fallback() {
        let fx = fixture(ORIGINAL);
        let service = Canned::new(vec![Err(http(500)), Err(http(503)), Err(http(500))]);
        let gw = gateway(service.clone(), fx.store.clone(), GenerationConfig::default());

        let outcome = gw.regenerate(&fx.artifact).await;
        assert_eq!(service.requests.lock().len(), 3);
        assert_eq!(outcome.source, Some(ContentSource::Fallback));
        assert!(outcome.error.as_deref().is_some_and(|e| e.contains("500")));
        assert_eq!(
            fx.store.read(&fx.artifact).unwrap(),
            "import Mathlib\n\ntheorem t : 1 + 1 = 2 := by\n  sorry\n"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_status_not_retried() {
        let fx = fixture(ORIGINAL);
        let service = Canned::new(vec![Err(http(401)), Ok("never".into())]);
        let gw = gateway(service.clone(), fx.store.clone(), GenerationConfig::default());

        let outcome = gw.regenerate(&fx.artifact).await;
        assert_eq!(service.requests.lock().len(), 1);
        assert_eq!(outcome.source, Some(ContentSource::Fallback));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_reply_requested_again() {
        let fx = fixture(ORIGINAL);
        let service = Canned::new(vec![Ok("  ".into()), Ok("theorem t : 1 + 1 = 2 := rfl".into())]);
        let gw = gateway(service.clone(), fx.store.clone(), GenerationConfig::default());

        let outcome = gw.regenerate(&fx.artifact).await;
        assert_eq!(service.requests.lock().len(), 2);
        assert_eq!(outcome.source, Some(ContentSource::Model));
        assert_eq!(outcome.error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn minimal_skeleton_when_no_theorem() {
        let fx = fixture("def x := 1\n");
        let service = Canned::new(vec![]);
        let gw = gateway(service, fx.store.clone(), GenerationConfig::default());

        let outcome = gw.regenerate(&fx.artifact).await;
        assert_eq!(outcome.source, Some(ContentSource::Minimal));
        assert!(fx
            .store
            .read(&fx.artifact)
            .unwrap()
            .contains("theorem Block_004_main : True := by"));
    }

    #[tokio::test(start_paused = true)]
    async fn unnormalized_reply_kept_verbatim() {
        let fx = fixture(ORIGINAL);
        let service = Canned::new(vec![Ok("theorem t : True := trivial".into())]);
        let config = GenerationConfig {
            normalize: false,
            ..GenerationConfig::default()
        };
        let gw = gateway(service, fx.store.clone(), config);

        gw.regenerate(&fx.artifact).await;
        assert_eq!(fx.store.read(&fx.artifact).unwrap(), "theorem t : True := trivial\n");
    }

    #[test]
    fn system_prompt_guidance_appended() {
        let fx = fixture(ORIGINAL);
        let config = GenerationConfig {
            append_system: Some("  Prefer `omega`.  ".into()),
            ..GenerationConfig::default()
        };
        let gw = gateway(Canned::new(vec![]), fx.store.clone(), config);
        assert!(gw
            .system_prompt()
            .ends_with("\n\nAdditional guidance:\nPrefer `omega`."));
    }
}
