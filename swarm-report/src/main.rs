mod cli;
mod logs;
mod report;
mod validate;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "swarm-report",
    version,
    about = "Validate and summarize swarm experiment logs"
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
    /// Check every record against the schema and the log invariants.
    Validate { log_dir: PathBuf },
    /// Per-run and aggregate counts.
    Summary {
        log_dir: PathBuf,
        /// Print one JSON document instead of text lines.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    swarm::logging::init(cli.verbose);
    match cli.command {
        Command::Validate { log_dir } => {
            let valid = cli::validate_logs(&log_dir)?;
            Ok(if valid {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Summary { log_dir, json } => {
            cli::summarize_logs(&log_dir, json)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
