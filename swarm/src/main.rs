//! Iterative code-repair CLI.
//!
//! `swarm run` repairs the artifacts of a target directory, printing one
//! final report per artifact as a JSON line. The experiment log of every run
//! lands in `.swarm/logs/` of the target.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{ArgAction, Parser, Subcommand};
use tracing::warn;

use swarm::batch::{dedup_targets, discover_targets, run_batch};
use swarm::exit_codes;
use swarm::io::backend::CommandBackend;
use swarm::io::config::load_config;
use swarm::io::init::{InitOptions, SwarmPaths, init_swarm};
use swarm::io::recorder::{ExperimentRecorder, JsonlRecorder, validate_run_id};
use swarm::io::test_runner::CommandTestRunner;
use swarm::logging;
use swarm::orchestrator::{Orchestrator, worst_status};

#[derive(Parser)]
#[command(
    name = "swarm",
    version,
    about = "Iterative audit / fix / judge repair of code artifacts"
)]
struct Cli {
    /// Raise diagnostic verbosity (-v info, -vv debug). `RUST_LOG` overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.swarm/config.toml` and `.swarm/.gitignore` in the target directory.
    Init {
        target_dir: PathBuf,
        /// Overwrite an existing `.swarm/` setup.
        #[arg(short, long)]
        force: bool,
    },
    /// Repair artifacts of the target directory.
    Run(RunArgs),
    /// Print the experiment log of one run.
    History {
        target_dir: PathBuf,
        #[arg(long)]
        run_id: String,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    target_dir: PathBuf,
    /// Repair only this file (relative to the target directory). Repeatable.
    #[arg(long = "file", value_name = "FILE")]
    files: Vec<PathBuf>,
    #[arg(long)]
    max_iterations: Option<u32>,
    #[arg(long)]
    failure_budget: Option<u32>,
    /// Concurrent artifact runs.
    #[arg(long)]
    jobs: Option<usize>,
    /// Config file (default: `<target_dir>/.swarm/config.toml`).
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() {
                exit_codes::FAILED
            } else {
                exit_codes::DONE
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };
    logging::init(cli.verbose);

    match run(cli.command) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::FAILED);
        }
    }
}

fn run(command: Command) -> Result<i32> {
    match command {
        Command::Init { target_dir, force } => cmd_init(&target_dir, force),
        Command::Run(args) => cmd_run(&args),
        Command::History { target_dir, run_id } => cmd_history(&target_dir, &run_id),
    }
}

fn cmd_init(target_dir: &Path, force: bool) -> Result<i32> {
    let root = resolve_root(target_dir)?;
    let paths = init_swarm(&root, &InitOptions { force })?;
    println!("{}", paths.config_path.display());
    Ok(exit_codes::DONE)
}

fn cmd_run(args: &RunArgs) -> Result<i32> {
    let root = resolve_root(&args.target_dir)?;
    let paths = SwarmPaths::new(&root);
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| paths.config_path.clone());
    let mut config = load_config(&config_path)?;
    if let Some(max_iterations) = args.max_iterations {
        config.max_iterations = max_iterations;
    }
    if let Some(failure_budget) = args.failure_budget {
        config.failure_budget = failure_budget;
    }
    if let Some(jobs) = args.jobs {
        config.jobs = jobs;
    }
    config.validate().context("invalid run options")?;

    let targets = if args.files.is_empty() {
        discover_targets(&root, &config.targets)?
    } else {
        dedup_targets(&root, &args.files)
    };
    if targets.is_empty() {
        return Err(anyhow!("no artifacts to repair under {}", root.display()));
    }

    if paths.stop_path.exists() {
        warn!(path = %paths.stop_path.display(), "removing stale stop file");
        fs::remove_file(&paths.stop_path)
            .with_context(|| format!("remove {}", paths.stop_path.display()))?;
    }

    let recorder = Arc::new(JsonlRecorder::new(paths.log_dir(&config))?);
    let backend = CommandBackend::new(&config.backend, &root)?;
    let runner = CommandTestRunner::new(&config.judge, &root, &paths.judge_dir);
    let (jobs, max_iterations, failure_budget) =
        (config.jobs, config.max_iterations, config.failure_budget);
    let orchestrator = Orchestrator::new(&root, config, backend, runner, recorder);

    let reports = run_batch(&orchestrator, &targets, jobs, max_iterations, failure_budget);
    for report in &reports {
        println!(
            "{}",
            serde_json::to_string(report).context("serialize final report")?
        );
    }
    Ok(exit_codes::for_status(worst_status(
        reports.iter().map(|report| report.status),
    )))
}

fn cmd_history(target_dir: &Path, run_id: &str) -> Result<i32> {
    validate_run_id(run_id)?;
    let root = resolve_root(target_dir)?;
    let paths = SwarmPaths::new(&root);
    let config = load_config(&paths.config_path)?;
    let recorder = JsonlRecorder::new(paths.log_dir(&config))?;

    let records = recorder.query(run_id)?;
    let final_report = recorder.final_report(run_id)?;
    if records.is_empty() && final_report.is_none() {
        return Err(anyhow!("unknown run '{run_id}'"));
    }
    for record in &records {
        println!(
            "{}",
            serde_json::to_string(record).context("serialize record")?
        );
    }
    if let Some(report) = final_report {
        println!(
            "{}",
            serde_json::to_string(&report).context("serialize final report")?
        );
    }
    Ok(exit_codes::DONE)
}

fn resolve_root(target_dir: &Path) -> Result<PathBuf> {
    let root = target_dir
        .canonicalize()
        .with_context(|| format!("resolve target dir {}", target_dir.display()))?;
    if !root.is_dir() {
        return Err(anyhow!("{} is not a directory", target_dir.display()));
    }
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["swarm", "init", "proj", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true, .. }));
    }

    #[test]
    fn parse_run_with_overrides() {
        let cli = Cli::parse_from([
            "swarm",
            "-vv",
            "run",
            "proj",
            "--file",
            "a.py",
            "--file",
            "pkg/b.py",
            "--max-iterations",
            "4",
            "--failure-budget",
            "2",
            "--jobs",
            "3",
        ]);
        assert_eq!(cli.verbose, 2);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.files, vec![PathBuf::from("a.py"), PathBuf::from("pkg/b.py")]);
        assert_eq!(args.max_iterations, Some(4));
        assert_eq!(args.failure_budget, Some(2));
        assert_eq!(args.jobs, Some(3));
        assert!(args.config.is_none());
    }

    #[test]
    fn parse_history_requires_run_id() {
        assert!(Cli::try_parse_from(["swarm", "history", "proj"]).is_err());
        let cli = Cli::parse_from(["swarm", "history", "proj", "--run-id", "run-1"]);
        assert!(matches!(cli.command, Command::History { ref run_id, .. } if run_id == "run-1"));
    }
}
