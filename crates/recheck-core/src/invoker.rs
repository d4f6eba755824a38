//! Compiler invocation
//!
//! Provides the [`Compiler`] seam and its subprocess implementation:
//! - Project root discovery by marker files
//! - Hard wall-clock timeout with the child killed on expiry
//! - One log file per (artifact, attempt)
//! - One-time project preparation

use crate::config::{CommandTemplate, PipelineConfig};
use crate::types::{Artifact, AttemptLabel, BuildOutcome, BuildResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::OnceCell;

/// Verification oracle for one artifact
#[async_trait]
pub trait Compiler: Send + Sync {
    /// Compile one artifact. Never fails: every problem is a [`BuildOutcome`].
    async fn compile(&self, artifact: &Artifact, attempt: AttemptLabel) -> BuildResult;

    /// One-time setup before the first pass
    ///
    /// Errors are reported back as text and treated as warnings.
    async fn prepare(&self, _artifacts: &[Artifact]) -> Result<(), String> {
        Ok(())
    }
}

/// Runs an external compiler as a subprocess
#[derive(Debug)]
pub struct ProcessCompiler {
    command: CommandTemplate,
    markers: Vec<String>,
    prepare_commands: Vec<CommandTemplate>,
    timeout: Duration,
    logs_dir: PathBuf,
    prepared: OnceCell<Result<(), String>>,
}

impl ProcessCompiler {
    /// Create compiler from pipeline configuration
    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            command: config.compiler.clone(),
            markers: config.project_markers.clone(),
            prepare_commands: config.prepare_commands.clone(),
            timeout: config.compile_timeout(),
            logs_dir: config.logs_dir.clone(),
            prepared: OnceCell::new(),
        }
    }

    /// Walk upward from the artifact looking for a marker file
    ///
    /// Falls back to the grandparent directory, or the parent when there is
    /// no grandparent.
    #[must_use]
    pub fn find_project_root(&self, path: &Path) -> PathBuf {
        let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let parent = path.parent().unwrap_or_else(|| Path::new("."));

        for dir in parent.ancestors() {
            if self.markers.iter().any(|m| dir.join(m).is_file()) {
                return dir.to_path_buf();
            }
        }

        parent
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(parent)
            .to_path_buf()
    }

    /// Log file location for an (artifact, attempt)
    #[must_use]
    pub fn log_path(&self, artifact: &Artifact, attempt: AttemptLabel) -> PathBuf {
        self.logs_dir
            .join(format!("{}_{}_build.log", artifact.id, attempt))
    }

    async fn execute(&self, root: &Path, args: Vec<String>) -> (BuildOutcome, String, String) {
        let mut cmd = Command::new(&self.command.program);
        cmd.args(args)
            .current_dir(root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                let outcome = if output.status.success() {
                    BuildOutcome::Passed
                } else {
                    BuildOutcome::Rejected {
                        exit_code: output.status.code(),
                    }
                };
                (outcome, stdout, stderr)
            }
            Ok(Err(e)) => (
                BuildOutcome::SpawnFailed {
                    message: e.to_string(),
                },
                String::new(),
                format!("Failed to run compiler '{}': {e}", self.command.program),
            ),
            Err(_) => {
                let secs = self.timeout.as_secs();
                (
                    BuildOutcome::TimedOut { after_secs: secs },
                    String::new(),
                    format!("Build timeout after {secs} seconds"),
                )
            }
        }
    }

    async fn write_log(&self, path: &Path, entry: &LogEntry<'_>) -> Option<PathBuf> {
        let write = async {
            tokio::fs::create_dir_all(&self.logs_dir).await?;
            tokio::fs::write(path, entry.render()).await
        };
        match write.await {
            Ok(()) => Some(path.to_path_buf()),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "could not write build log");
                None
            }
        }
    }

    async fn run_prepare(&self, artifacts: &[Artifact]) -> Result<(), String> {
        let mut roots: Vec<PathBuf> = artifacts
            .iter()
            .map(|a| self.find_project_root(&a.path))
            .collect();
        roots.sort();
        roots.dedup();

        let mut failures = Vec::new();
        for root in &roots {
            let root_str = root.to_string_lossy();
            for template in &self.prepare_commands {
                let line = template.display("", &root_str);
                tracing::info!(root = %root.display(), command = %line, "preparing project");
                let status = Command::new(&template.program)
                    .args(template.render("", &root_str))
                    .current_dir(root)
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .kill_on_drop(true)
                    .status()
                    .await;
                match status {
                    Ok(s) if s.success() => {}
                    Ok(s) => failures.push(format!("`{line}` in {} exited with {s}", root.display())),
                    Err(e) => failures.push(format!("`{line}` in {}: {e}", root.display())),
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.join("; "))
        }
    }
}

#[async_trait]
impl Compiler for ProcessCompiler {
    async fn compile(&self, artifact: &Artifact, attempt: AttemptLabel) -> BuildResult {
        let root = self.find_project_root(&artifact.path);
        let absolute = std::fs::canonicalize(&artifact.path).unwrap_or_else(|_| artifact.path.clone());
        let target = absolute
            .strip_prefix(&root)
            .map_or_else(|_| absolute.clone(), Path::to_path_buf);
        let target = target.to_string_lossy().into_owned();
        let root_str = root.to_string_lossy().into_owned();

        let args = self.command.render(&target, &root_str);
        let command_line = self.command.display(&target, &root_str);
        tracing::debug!(artifact = %artifact.id, %attempt, command = %command_line, "compiling");

        let (outcome, stdout, stderr) = self.execute(&root, args).await;
        if outcome.is_infrastructure() {
            tracing::warn!(artifact = %artifact.id, %attempt, error = %stderr, "compile did not complete");
        }

        let log_path = self.log_path(artifact, attempt);
        let entry = LogEntry {
            command: &command_line,
            root: &root,
            attempt,
            outcome: &outcome,
            stdout: &stdout,
            stderr: &stderr,
        };
        let log_path = self.write_log(&log_path, &entry).await;

        BuildResult::new(artifact.id.clone(), attempt, outcome, stdout, stderr, log_path)
    }

    async fn prepare(&self, artifacts: &[Artifact]) -> Result<(), String> {
        if self.prepare_commands.is_empty() {
            return Ok(());
        }
        self.prepared
            .get_or_init(|| self.run_prepare(artifacts))
            .await
            .clone()
    }
}

struct LogEntry<'a> {
    command: &'a str,
    root: &'a Path,
    attempt: AttemptLabel,
    outcome: &'a BuildOutcome,
    stdout: &'a str,
    stderr: &'a str,
}

impl LogEntry<'_> {
    fn render(&self) -> String {
        let return_code = match self.outcome {
            BuildOutcome::Passed => "0".to_string(),
            BuildOutcome::Rejected {
                exit_code: Some(code),
            } => code.to_string(),
            BuildOutcome::Rejected { exit_code: None } => "signal".to_string(),
            BuildOutcome::TimedOut { .. } => "timeout".to_string(),
            BuildOutcome::SpawnFailed { .. } => "spawn error".to_string(),
        };
        format!(
            "Command: {}\nWorking Directory: {}\nAttempt: {}\nReturn Code: {}\nSuccess: {}\n\n--- STDOUT ---\n{}\n\n--- STDERR ---\n{}\n",
            self.command,
            self.root.display(),
            self.attempt,
            return_code,
            self.outcome.is_success(),
            self.stdout,
            self.stderr,
        )
    }
}
