//! Testing utilities for the recheck workspace
//!
//! Shared doubles and fixtures: a scripted compiler, a scripted generation
//! service, a recording sleeper, and artifact tree writers.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use recheck_core::{
    Artifact, ArtifactId, AttemptLabel, BuildOutcome, BuildResult, Compiler, GenerationError,
    GenerationRequest, GenerationService, Sleeper,
};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Marker that makes [`ScriptedCompiler`] reject an artifact by content
pub const BROKEN: &str = "BROKEN";

/// Compiler double
///
/// Per-id scripted verdicts are consumed first. Without a script an
/// artifact passes iff its on-disk content does not contain [`BROKEN`].
#[derive(Debug, Default)]
pub struct ScriptedCompiler {
    scripts: Mutex<HashMap<ArtifactId, VecDeque<bool>>>,
    calls: Mutex<Vec<(ArtifactId, AttemptLabel)>>,
    prepares: Mutex<usize>,
}

impl ScriptedCompiler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue verdicts for the next compiles of `id`
    pub fn script(&self, id: &str, verdicts: &[bool]) {
        self.scripts
            .lock()
            .entry(ArtifactId::new(id))
            .or_default()
            .extend(verdicts.iter().copied());
    }

    pub fn calls(&self) -> Vec<(ArtifactId, AttemptLabel)> {
        self.calls.lock().clone()
    }

    /// Ids compiled with the given attempt label, sorted
    pub fn compiled(&self, attempt: AttemptLabel) -> Vec<String> {
        let mut ids: Vec<String> = self
            .calls
            .lock()
            .iter()
            .filter(|(_, a)| *a == attempt)
            .map(|(id, _)| id.to_string())
            .collect();
        ids.sort();
        ids
    }

    pub fn prepare_count(&self) -> usize {
        *self.prepares.lock()
    }
}

#[async_trait]
impl Compiler for ScriptedCompiler {
    async fn compile(&self, artifact: &Artifact, attempt: AttemptLabel) -> BuildResult {
        self.calls.lock().push((artifact.id.clone(), attempt));
        let scripted = self
            .scripts
            .lock()
            .get_mut(&artifact.id)
            .and_then(VecDeque::pop_front);
        let pass = scripted.unwrap_or_else(|| {
            std::fs::read_to_string(&artifact.path).is_ok_and(|c| !c.contains(BROKEN))
        });

        let (outcome, stderr) = if pass {
            (BuildOutcome::Passed, String::new())
        } else {
            (
                BuildOutcome::Rejected { exit_code: Some(1) },
                format!("{}: error: scripted failure\n", artifact.file_name()),
            )
        };
        BuildResult::new(artifact.id.clone(), attempt, outcome, String::new(), stderr, None)
    }

    async fn prepare(&self, _artifacts: &[Artifact]) -> Result<(), String> {
        *self.prepares.lock() += 1;
        Ok(())
    }
}

/// Generation service double replaying queued replies
///
/// Once the queue is empty every call returns `fallback_reply`.
#[derive(Debug)]
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<Result<String, GenerationError>>>,
    fallback_reply: String,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    /// Always answer with `reply`
    pub fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            fallback_reply: reply.to_string(),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Replay `replies`, then answer with empty content
    pub fn scripted(replies: Vec<Result<String, GenerationError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            fallback_reply: String::new(),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl GenerationService for ScriptedGenerator {
    async fn complete(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.requests.lock().push(request.clone());
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback_reply.clone()))
    }
}

/// HTTP error shorthand
pub fn http_error(status: u16) -> GenerationError {
    GenerationError::Http {
        status,
        body: format!("status {status}"),
        retry_after: None,
    }
}

/// Sleeper that records requested delays and returns immediately
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().push(duration);
    }
}

/// Write `files` into `dir`, returning their paths
pub fn write_artifacts(dir: &Path, files: &[(&str, &str)]) -> Vec<PathBuf> {
    files
        .iter()
        .map(|(name, content)| {
            let path = dir.join(name);
            std::fs::write(&path, content).unwrap();
            path
        })
        .collect()
}

/// Passing block with the given theorem name
pub fn passing_block(name: &str) -> String {
    format!("import Mathlib\n\n/-- {name} holds. -/\ntheorem {name} : 1 + 1 = 2 := by\n  norm_num\n")
}

/// Failing block whose proof body carries the [`BROKEN`] marker
pub fn broken_block(name: &str) -> String {
    format!("import Mathlib\n\n/-- {name} holds. -/\ntheorem {name} : 1 + 1 = 2 := by\n  exact {BROKEN}\n")
}

/// Temp directory with `Block_001.lean` .. `Block_00n.lean`
///
/// Ids listed in `broken` get a failing body.
pub fn block_tree(n: usize, broken: &[usize]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for i in 1..=n {
        let name = format!("Block_{i:03}");
        let content = if broken.contains(&i) {
            broken_block(&format!("block_{i}"))
        } else {
            passing_block(&format!("block_{i}"))
        };
        std::fs::write(dir.path().join(format!("{name}.lean")), content).unwrap();
    }
    dir
}
