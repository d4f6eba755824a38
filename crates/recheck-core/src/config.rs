//! Pipeline configuration
//!
//! Every knob has a default matching the production setup (Lean 4 via
//! `lake`). Values can be loaded from a TOML file and adjusted with the
//! `with_*` builders.

use crate::error::ConfigError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which artifacts the post-regeneration pass rebuilds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecondPassScope {
    /// Only the regenerated artifacts
    #[default]
    Failed,
    /// Every artifact in the run
    All,
}

impl SecondPassScope {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SecondPassScope::Failed => "failed",
            SecondPassScope::All => "all",
        }
    }
}

impl std::str::FromStr for SecondPassScope {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "failed" => Ok(Self::Failed),
            "all" => Ok(Self::All),
            other => Err(ConfigError::invalid(
                "second_pass_scope",
                format!("expected 'failed' or 'all', got '{other}'"),
            )),
        }
    }
}

/// External command line with `{file}` and `{root}` placeholders
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplate {
    /// Executable name or path
    pub program: String,
    /// Arguments, placeholders substituted per artifact
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandTemplate {
    /// Create template
    #[must_use]
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Substitute placeholders
    #[must_use]
    pub fn render(&self, file: &str, root: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.replace("{file}", file).replace("{root}", root))
            .collect()
    }

    /// Render as a single display line
    #[must_use]
    pub fn display(&self, file: &str, root: &str) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.render(file, root));
        parts.join(" ")
    }
}

/// Regeneration gateway settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Total service calls per artifact for transient errors
    pub max_attempts: u32,
    /// Extra calls when the service answers with empty content
    pub empty_retries: u32,
    /// First backoff delay
    pub initial_delay_ms: u64,
    /// Backoff ceiling
    pub max_delay_ms: u64,
    /// Ensure `required_header` appears once at the top of written content
    pub normalize: bool,
    /// Header line enforced by normalization and skeletons
    pub required_header: String,
    /// Extra guidance appended to the system instruction
    pub append_system: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            empty_retries: 1,
            initial_delay_ms: 1_000,
            max_delay_ms: 20_000,
            normalize: true,
            required_header: "import Mathlib".to_string(),
            append_system: None,
        }
    }
}

/// Full pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding the artifacts
    pub artifact_dir: PathBuf,
    /// Filename glob selecting artifacts
    pub pattern: String,
    /// Where logs, backups and the summary go
    ///
    /// The CLI treats this as a root and runs in a fresh
    /// [`run_logs_dir`] below it unless `--logs-dir` is given.
    pub logs_dir: PathBuf,
    /// Compile concurrency
    pub workers: usize,
    /// Wall-clock budget per compile
    pub compile_timeout_secs: u64,
    /// Compiler invocation
    pub compiler: CommandTemplate,
    /// Files marking a project root
    pub project_markers: Vec<String>,
    /// One-time preparation commands, run in each project root
    pub prepare_commands: Vec<CommandTemplate>,
    /// Whether still-failed artifacts are regenerated
    pub regenerate: bool,
    /// Regeneration concurrency, independent of `workers`
    pub regen_workers: usize,
    /// Scope of the post-regeneration pass
    pub second_pass_scope: SecondPassScope,
    /// Gateway settings
    pub generation: GenerationConfig,
}

impl PipelineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a TOML file. Missing keys take their defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    #[must_use]
    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    #[must_use]
    pub fn with_logs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.logs_dir = dir.into();
        self
    }

    /// Move `logs_dir` into a fresh per-run subdirectory of itself
    #[must_use]
    pub fn with_run_logs_dir(mut self, started: DateTime<Utc>) -> Self {
        self.logs_dir = run_logs_dir(&self.logs_dir, started);
        self
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    #[must_use]
    pub fn with_regen_workers(mut self, workers: usize) -> Self {
        self.regen_workers = workers;
        self
    }

    #[must_use]
    pub fn with_regenerate(mut self, enabled: bool) -> Self {
        self.regenerate = enabled;
        self
    }

    #[must_use]
    pub fn with_second_pass_scope(mut self, scope: SecondPassScope) -> Self {
        self.second_pass_scope = scope;
        self
    }

    #[must_use]
    pub fn with_compile_timeout(mut self, secs: u64) -> Self {
        self.compile_timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn with_compiler(mut self, compiler: CommandTemplate) -> Self {
        self.compiler = compiler;
        self
    }

    #[must_use]
    pub fn with_prepare_commands(mut self, commands: Vec<CommandTemplate>) -> Self {
        self.prepare_commands = commands;
        self
    }

    #[must_use]
    pub fn with_generation(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    /// Compile timeout as a duration
    #[inline]
    #[must_use]
    pub fn compile_timeout(&self) -> Duration {
        Duration::from_secs(self.compile_timeout_secs)
    }

    /// Directory holding persisted backups
    #[must_use]
    pub fn backup_dir(&self) -> PathBuf {
        self.logs_dir.join("backups")
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::invalid("workers", "must be at least 1"));
        }
        if self.regen_workers == 0 {
            return Err(ConfigError::invalid("regen_workers", "must be at least 1"));
        }
        if self.compile_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "compile_timeout_secs",
                "must be at least 1",
            ));
        }
        if self.compiler.program.trim().is_empty() {
            return Err(ConfigError::invalid("compiler.program", "must not be empty"));
        }
        if self.generation.max_attempts == 0 {
            return Err(ConfigError::invalid(
                "generation.max_attempts",
                "must be at least 1",
            ));
        }
        if self.generation.initial_delay_ms > self.generation.max_delay_ms {
            return Err(ConfigError::invalid(
                "generation.initial_delay_ms",
                "must not exceed max_delay_ms",
            ));
        }
        glob::Pattern::new(&self.pattern)
            .map_err(|e| ConfigError::invalid("pattern", e.to_string()))?;
        Ok(())
    }
}

/// Per-run logs directory `<root>/recheck_<UTC timestamp>`
///
/// A numeric suffix is added while the name is taken, so sequential runs
/// never share summaries, build logs or backups.
#[must_use]
pub fn run_logs_dir(root: &Path, started: DateTime<Utc>) -> PathBuf {
    let base = format!("recheck_{}", started.format("%Y%m%d_%H%M%S"));
    let mut candidate = root.join(&base);
    let mut n = 1u32;
    while candidate.exists() {
        candidate = root.join(format!("{base}_{n}"));
        n += 1;
    }
    candidate
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            artifact_dir: PathBuf::from("."),
            pattern: "*.lean".to_string(),
            logs_dir: PathBuf::from("build_check_logs"),
            workers: 4,
            compile_timeout_secs: 60,
            compiler: CommandTemplate::new("lake", ["env", "lean", "{file}"]),
            project_markers: vec![
                "lakefile.lean".to_string(),
                "lakefile.toml".to_string(),
                "lean-toolchain".to_string(),
            ],
            prepare_commands: vec![
                CommandTemplate::new("lake", ["exe", "cache", "get"]),
                CommandTemplate::new("lake", ["build"]),
            ],
            regenerate: true,
            regen_workers: 8,
            second_pass_scope: SecondPassScope::Failed,
            generation: GenerationConfig::default(),
        }
    }
}
