//! Core types for recheck
//!
//! Defines the fundamental types for the pipeline:
//! - Artifact identity and location
//! - Attempt labels for the three passes
//! - Per-attempt build results and their derived metrics

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Stable artifact identifier (the filename stem, e.g. `Block_017`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(pub String);

impl ArtifactId {
    /// Create identifier from a string
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive identifier from a file path
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self(stem)
    }

    /// Borrow as str
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ArtifactId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A unit of generated content discovered on disk
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Artifact {
    /// Stable identifier
    pub id: ArtifactId,
    /// Source path
    pub path: PathBuf,
}

impl Artifact {
    /// Create artifact for a path, deriving its id from the filename
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            id: ArtifactId::from_path(&path),
            path,
        }
    }

    /// Filename component, used for backup names
    #[must_use]
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.id.0.clone())
    }
}

/// Which pass produced a build result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptLabel {
    /// First pass over all artifacts
    Initial,
    /// Single plain retry of pass-1 failures
    Retry,
    /// Verification after regeneration
    Postregen,
}

impl AttemptLabel {
    /// Label as embedded in log filenames
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptLabel::Initial => "initial",
            AttemptLabel::Retry => "retry",
            AttemptLabel::Postregen => "postregen",
        }
    }
}

impl std::fmt::Display for AttemptLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified outcome of one compiler invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildOutcome {
    /// Exit code zero
    Passed,
    /// Compiler ran and rejected the artifact
    Rejected {
        /// Exit code, `None` when killed by a signal
        exit_code: Option<i32>,
    },
    /// Wall-clock budget exceeded; child was killed
    TimedOut {
        /// Budget in seconds
        after_secs: u64,
    },
    /// Compiler could not be started
    SpawnFailed {
        /// OS error text
        message: String,
    },
}

impl BuildOutcome {
    /// Success is strictly exit code zero
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, BuildOutcome::Passed)
    }

    /// Timeouts and spawn errors are harness problems, not compiler verdicts
    #[inline]
    #[must_use]
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            BuildOutcome::TimedOut { .. } | BuildOutcome::SpawnFailed { .. }
        )
    }

    /// Short human tag for log lines
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            BuildOutcome::Passed => "OK",
            BuildOutcome::Rejected { .. } => "FAILED",
            BuildOutcome::TimedOut { .. } => "TIMEOUT",
            BuildOutcome::SpawnFailed { .. } => "ERROR",
        }
    }
}

/// Metrics derived from captured output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildMetrics {
    /// Number of stdout lines
    pub stdout_lines: usize,
    /// Number of stderr lines
    pub stderr_lines: usize,
    /// Whether stderr contains anything but whitespace
    pub has_errors: bool,
}

impl BuildMetrics {
    /// Derive metrics from captured output
    #[must_use]
    pub fn from_output(stdout: &str, stderr: &str) -> Self {
        Self {
            stdout_lines: stdout.lines().count(),
            stderr_lines: stderr.lines().count(),
            has_errors: !stderr.trim().is_empty(),
        }
    }
}

/// One (artifact, attempt) build result. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
    artifact_id: ArtifactId,
    attempt: AttemptLabel,
    outcome: BuildOutcome,
    stdout: String,
    stderr: String,
    log_path: Option<PathBuf>,
    metrics: BuildMetrics,
}

impl BuildResult {
    /// Create a result, deriving its metrics from the captured output
    #[must_use]
    pub fn new(
        artifact_id: ArtifactId,
        attempt: AttemptLabel,
        outcome: BuildOutcome,
        stdout: String,
        stderr: String,
        log_path: Option<PathBuf>,
    ) -> Self {
        let metrics = BuildMetrics::from_output(&stdout, &stderr);
        Self {
            artifact_id,
            attempt,
            outcome,
            stdout,
            stderr,
            log_path,
            metrics,
        }
    }

    #[inline]
    #[must_use]
    pub fn artifact_id(&self) -> &ArtifactId {
        &self.artifact_id
    }

    #[inline]
    #[must_use]
    pub fn attempt(&self) -> AttemptLabel {
        self.attempt
    }

    #[inline]
    #[must_use]
    pub fn outcome(&self) -> &BuildOutcome {
        &self.outcome
    }

    #[inline]
    #[must_use]
    pub fn success(&self) -> bool {
        self.outcome.is_success()
    }

    #[inline]
    #[must_use]
    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    #[inline]
    #[must_use]
    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    #[inline]
    #[must_use]
    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    #[inline]
    #[must_use]
    pub fn metrics(&self) -> BuildMetrics {
        self.metrics
    }

    /// Output-free record kept in the run summary
    #[must_use]
    pub fn to_record(&self) -> BuildRecord {
        BuildRecord {
            artifact_id: self.artifact_id.clone(),
            attempt: self.attempt,
            success: self.success(),
            outcome: self.outcome.clone(),
            log_file: self.log_path.clone(),
            metrics: self.metrics,
        }
    }
}

/// Serialized per-attempt entry of the run summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub artifact_id: ArtifactId,
    pub attempt: AttemptLabel,
    pub success: bool,
    pub outcome: BuildOutcome,
    pub log_file: Option<PathBuf>,
    #[serde(flatten)]
    pub metrics: BuildMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_id_from_path_uses_stem() {
        let artifact = Artifact::new("/data/blocks/Block_017.lean");
        assert_eq!(artifact.id.as_str(), "Block_017");
        assert_eq!(artifact.file_name(), "Block_017.lean");
    }

    #[test]
    fn attempt_labels_serialize_lowercase() {
        let json = serde_json::to_string(&AttemptLabel::Postregen).unwrap();
        assert_eq!(json, "\"postregen\"");
        assert_eq!(AttemptLabel::Retry.to_string(), "retry");
    }

    #[test]
    fn only_passed_is_success() {
        assert!(BuildOutcome::Passed.is_success());
        assert!(!BuildOutcome::Rejected { exit_code: Some(1) }.is_success());
        assert!(!BuildOutcome::TimedOut { after_secs: 60 }.is_success());
        assert!(BuildOutcome::TimedOut { after_secs: 60 }.is_infrastructure());
        assert!(!BuildOutcome::Rejected { exit_code: Some(1) }.is_infrastructure());
    }

    #[test]
    fn metrics_derived_from_output() {
        let result = BuildResult::new(
            ArtifactId::new("Block_001"),
            AttemptLabel::Initial,
            BuildOutcome::Rejected { exit_code: Some(1) },
            "line one\nline two\n".into(),
            "  \n".into(),
            None,
        );
        let metrics = result.metrics();
        assert_eq!(metrics.stdout_lines, 2);
        assert_eq!(metrics.stderr_lines, 1);
        assert!(!metrics.has_errors);
        assert!(!result.success());
    }

    #[test]
    fn record_flattens_metrics() {
        let result = BuildResult::new(
            ArtifactId::new("Block_002"),
            AttemptLabel::Retry,
            BuildOutcome::Passed,
            String::new(),
            "warning\n".into(),
            None,
        );
        let value = serde_json::to_value(result.to_record()).unwrap();
        assert_eq!(value["attempt"], "retry");
        assert_eq!(value["has_errors"], true);
        assert_eq!(value["outcome"]["kind"], "passed");
    }
}
