mod settings;

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use recheck_core::{Pipeline, ProcessCompiler, RunSummary, TracingObserver};
use recheck_openrouter::{resolve_api_key, OpenRouterClient, API_KEY_ENV, DEFAULT_KEYFILE};
use settings::FileConfig;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

fn common_args() -> Vec<Arg> {
    vec![
        Arg::new("dir")
            .value_parser(value_parser!(PathBuf))
            .help("Directory containing the artifacts"),
        Arg::new("pattern")
            .long("pattern")
            .help("Filename glob selecting artifacts [default: *.lean]"),
        Arg::new("workers")
            .long("workers")
            .value_parser(value_parser!(usize))
            .help("Concurrent compiles [default: 4]"),
        Arg::new("logs-dir")
            .long("logs-dir")
            .value_parser(value_parser!(PathBuf))
            .help("Where build logs, backups and the summary go [default: build_check_logs/recheck_<timestamp>]"),
        Arg::new("timeout")
            .long("timeout")
            .value_parser(value_parser!(u64))
            .help("Per-artifact compile timeout in seconds [default: 60]"),
        Arg::new("config")
            .long("config")
            .value_parser(value_parser!(PathBuf))
            .help("TOML configuration file"),
    ]
}

pub(crate) fn build_cli() -> Command {
    Command::new("recheck")
        .version(recheck_core::VERSION)
        .about("Parallel verification and recovery for generated proof artifacts")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("run")
                .about("Verify, retry, regenerate failures, and roll back what stays broken")
                .args(common_args())
                .arg(
                    Arg::new("regen-workers")
                        .long("regen-workers")
                        .value_parser(value_parser!(usize))
                        .help("Concurrent regeneration requests [default: 8]"),
                )
                .arg(
                    Arg::new("no-regenerate")
                        .long("no-regenerate")
                        .action(ArgAction::SetTrue)
                        .help("Stop after the retry pass"),
                )
                .arg(
                    Arg::new("second-build-scope")
                        .long("second-build-scope")
                        .value_parser(["failed", "all"])
                        .help("Rebuild only regenerated artifacts or all of them [default: failed]"),
                )
                .arg(
                    Arg::new("append-system")
                        .long("append-system")
                        .help("Extra guidance appended to the system instruction"),
                )
                .arg(
                    Arg::new("no-normalize")
                        .long("no-normalize")
                        .action(ArgAction::SetTrue)
                        .help("Write replies without enforcing the header line"),
                )
                .arg(Arg::new("model").long("model").help("Generation model id"))
                .arg(
                    Arg::new("base-url")
                        .long("base-url")
                        .help("OpenAI-compatible API base URL"),
                )
                .arg(
                    Arg::new("max-tokens")
                        .long("max-tokens")
                        .value_parser(value_parser!(u32))
                        .help("Reply token limit"),
                )
                .arg(
                    Arg::new("api-key")
                        .long("api-key")
                        .help("API key (else OPENROUTER_API_KEY, else .openrouter_key)"),
                ),
        )
        .subcommand(
            Command::new("check")
                .about("Verify and retry only; never modifies artifacts")
                .args(common_args()),
        )
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false).compact())
            .init();
    }
}

async fn execute(name: &str, args: &ArgMatches) -> Result<RunSummary> {
    let check_only = name == "check";
    let mut settings = FileConfig::load(args.get_one::<PathBuf>("config").map(PathBuf::as_path))?;
    settings.apply(args, check_only, chrono::Utc::now())?;

    let config = settings.pipeline;
    let compiler = Arc::new(ProcessCompiler::from_config(&config));
    let mut pipeline = Pipeline::new(config.clone(), compiler).with_observer(Arc::new(TracingObserver));

    if config.regenerate {
        let key = resolve_api_key(
            args.get_one::<String>("api-key").map(String::as_str),
            std::env::var(API_KEY_ENV).ok(),
            Path::new(DEFAULT_KEYFILE),
        );
        let Some(key) = key else {
            bail!(
                "no API key: pass --api-key, set {API_KEY_ENV}, or create {DEFAULT_KEYFILE} (use `check` to skip regeneration)"
            );
        };
        let client = OpenRouterClient::new(&key, settings.openrouter)
            .context("building OpenRouter client")?;
        pipeline = pipeline.with_generator(Arc::new(client));
    }

    pipeline.run().await.context("verification run failed")
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("Run summary:");
    println!("  Total: {}", summary.total);
    println!("  Succeeded: {}", summary.success_count);
    println!("  Failed: {}", summary.failure_count);
    println!("  Success rate: {:.1}%", summary.success_rate);
    println!("  Recovered by retry: {}", summary.recovered.len());
    if summary.regeneration_ran {
        println!("  Regenerated: {}", summary.regenerated.len());
        println!("  Repaired: {}", summary.repaired.len());
        println!("  Restored: {}", summary.restored.len());
    }
    if !summary.failed_ids.is_empty() {
        let failed: Vec<&str> = summary.failed_ids.iter().map(|id| id.as_str()).collect();
        println!("  Still failing: {}", failed.join(", "));
    }
    println!(
        "  Summary: {}",
        summary.logs_dir.join(recheck_core::report::SUMMARY_FILE).display()
    );
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = build_cli().get_matches();
    init_logging(matches.get_flag("log-json"));

    let Some((name, args)) = matches.subcommand() else {
        return ExitCode::from(2);
    };

    match execute(name, args).await {
        Ok(summary) => {
            print_summary(&summary);
            if summary.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        build_cli().debug_assert();
    }

    #[test]
    fn scope_values_restricted() {
        let result = build_cli().try_get_matches_from(["recheck", "run", "--second-build-scope", "some"]);
        assert!(result.is_err());
    }

    #[test]
    fn log_json_is_global() {
        let m = build_cli()
            .try_get_matches_from(["recheck", "check", "--log-json", "Blocks"])
            .unwrap();
        assert!(m.get_flag("log-json"));
    }
}
