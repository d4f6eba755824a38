//! Settings resolution: config file first, then command-line overrides

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::ArgMatches;
use recheck_core::{PipelineConfig, SecondPassScope};
use recheck_openrouter::OpenRouterConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Contents of a `recheck.toml`
///
/// Pipeline keys live at the top level, client keys under `[openrouter]`.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct FileConfig {
    #[serde(flatten)]
    pub(crate) pipeline: PipelineConfig,
    #[serde(default)]
    pub(crate) openrouter: OpenRouterConfig,
}

impl FileConfig {
    pub(crate) fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Apply command-line overrides on top of file values
    ///
    /// Without `--logs-dir` the run gets its own directory under the
    /// configured `logs_dir`, named after `started`.
    pub(crate) fn apply(
        &mut self,
        args: &ArgMatches,
        check_only: bool,
        started: DateTime<Utc>,
    ) -> Result<()> {
        let pipeline = &mut self.pipeline;
        if let Some(dir) = args.get_one::<PathBuf>("dir") {
            pipeline.artifact_dir.clone_from(dir);
        }
        if let Some(pattern) = args.get_one::<String>("pattern") {
            pipeline.pattern.clone_from(pattern);
        }
        match args.get_one::<PathBuf>("logs-dir") {
            Some(logs) => pipeline.logs_dir.clone_from(logs),
            None => {
                pipeline.logs_dir = recheck_core::run_logs_dir(&pipeline.logs_dir, started);
            }
        }
        if let Some(workers) = args.get_one::<usize>("workers") {
            pipeline.workers = *workers;
        }
        if let Some(timeout) = args.get_one::<u64>("timeout") {
            pipeline.compile_timeout_secs = *timeout;
        }

        if check_only {
            pipeline.regenerate = false;
        } else {
            if let Some(workers) = args.get_one::<usize>("regen-workers") {
                pipeline.regen_workers = *workers;
            }
            if args.get_flag("no-regenerate") {
                pipeline.regenerate = false;
            }
            if let Some(scope) = args.get_one::<String>("second-build-scope") {
                pipeline.second_pass_scope = scope.parse::<SecondPassScope>()?;
            }
            if let Some(extra) = args.get_one::<String>("append-system") {
                pipeline.generation.append_system = Some(extra.clone());
            }
            if args.get_flag("no-normalize") {
                pipeline.generation.normalize = false;
            }
            if let Some(model) = args.get_one::<String>("model") {
                self.openrouter.model.clone_from(model);
            }
            if let Some(url) = args.get_one::<String>("base-url") {
                self.openrouter.base_url.clone_from(url);
            }
            if let Some(max) = args.get_one::<u32>("max-tokens") {
                self.openrouter.max_tokens = Some(*max);
            }
        }

        self.pipeline.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn matches(args: &[&str]) -> (String, ArgMatches) {
        let m = crate::build_cli().try_get_matches_from(args).unwrap();
        let (name, sub) = m.subcommand().unwrap();
        (name.to_string(), sub.clone())
    }

    #[test]
    fn file_then_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recheck.toml");
        std::fs::write(
            &path,
            "workers = 6\npattern = \"Block_*.lean\"\n\n[openrouter]\nmodel = \"from/file\"\n",
        )
        .unwrap();

        let mut config = FileConfig::load(Some(&path)).unwrap();
        assert_eq!(config.pipeline.workers, 6);
        assert_eq!(config.openrouter.model, "from/file");

        let (_, args) = matches(&[
            "recheck",
            "run",
            "Blocks",
            "--workers",
            "12",
            "--second-build-scope",
            "all",
            "--model",
            "from/flag",
        ]);
        config.apply(&args, false, Utc::now()).unwrap();
        assert_eq!(config.pipeline.workers, 12);
        assert_eq!(config.pipeline.pattern, "Block_*.lean");
        assert_eq!(config.pipeline.artifact_dir, PathBuf::from("Blocks"));
        assert_eq!(config.pipeline.second_pass_scope, SecondPassScope::All);
        assert_eq!(config.openrouter.model, "from/flag");
        assert!(config.pipeline.regenerate);
    }

    #[test]
    fn check_never_regenerates() {
        let (name, args) = matches(&["recheck", "check", "--workers", "2"]);
        assert_eq!(name, "check");
        let mut config = FileConfig::default();
        config.apply(&args, true, Utc::now()).unwrap();
        assert!(!config.pipeline.regenerate);
        assert_eq!(config.pipeline.workers, 2);
    }

    #[test]
    fn zero_workers_rejected() {
        let (_, args) = matches(&["recheck", "run", "--workers", "0"]);
        let mut config = FileConfig::default();
        assert!(config.apply(&args, false, Utc::now()).is_err());
    }

    #[test]
    fn logs_go_to_a_fresh_directory_per_run() {
        let root = tempfile::tempdir().unwrap();
        let started = Utc::now();
        let fresh = || {
            let mut config = FileConfig::default();
            config.pipeline.logs_dir = root.path().to_path_buf();
            config
        };

        let (_, args) = matches(&["recheck", "check"]);
        let mut first = fresh();
        first.apply(&args, true, started).unwrap();
        assert!(first.pipeline.logs_dir.starts_with(root.path()));
        assert_ne!(first.pipeline.logs_dir, root.path());
        std::fs::create_dir_all(&first.pipeline.logs_dir).unwrap();

        let mut second = fresh();
        second.apply(&args, true, started).unwrap();
        assert_ne!(first.pipeline.logs_dir, second.pipeline.logs_dir);

        let explicit = root.path().join("exact");
        let explicit_arg = explicit.to_string_lossy().into_owned();
        let (_, args) = matches(&["recheck", "check", "--logs-dir", explicit_arg.as_str()]);
        let mut pinned = fresh();
        pinned.apply(&args, true, started).unwrap();
        assert_eq!(pinned.pipeline.logs_dir, explicit);
    }

    #[test]
    fn missing_config_file_is_error() {
        assert!(FileConfig::load(Some(Path::new("/nonexistent/recheck.toml"))).is_err());
    }
}
