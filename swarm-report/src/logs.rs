//! Loading experiment logs from a log directory.
//!
//! A log directory holds `<run_id>.jsonl` (one iteration record per line) and,
//! once the run finished, `<run_id>.final.json`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::debug;

use swarm::core::types::FinalReport;

const LOG_SUFFIX: &str = ".jsonl";
const FINAL_SUFFIX: &str = ".final.json";

/// Raw contents of one run's log files.
#[derive(Debug)]
pub struct RunLog {
    pub run_id: String,
    pub log_path: PathBuf,
    /// Non-empty lines with their 1-based line numbers.
    pub lines: Vec<(usize, String)>,
    pub final_report: FinalFile,
}

/// State of `<run_id>.final.json`.
#[derive(Debug)]
pub enum FinalFile {
    Missing,
    Invalid(String),
    Present(Box<FinalReport>),
}

impl FinalFile {
    pub fn report(&self) -> Option<&FinalReport> {
        match self {
            FinalFile::Present(report) => Some(report.as_ref()),
            FinalFile::Missing | FinalFile::Invalid(_) => None,
        }
    }
}

/// Load every run log under `dir`, sorted by run id.
pub fn load_logs(dir: &Path) -> Result<Vec<RunLog>> {
    if !dir.is_dir() {
        bail!("log dir {} does not exist", dir.display());
    }
    let mut logs = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let entry = entry.context("read entry")?;
        let path = entry.path();
        let name = entry.file_name();
        let Some(run_id) = name.to_str().and_then(|name| name.strip_suffix(LOG_SUFFIX)) else {
            continue;
        };
        if !path.is_file() {
            continue;
        }
        logs.push(load_run(dir, run_id, &path)?);
    }
    logs.sort_by(|a, b| a.run_id.cmp(&b.run_id));
    debug!(runs = logs.len(), dir = %dir.display(), "logs loaded");
    Ok(logs)
}

fn load_run(dir: &Path, run_id: &str, log_path: &Path) -> Result<RunLog> {
    let contents =
        fs::read_to_string(log_path).with_context(|| format!("read {}", log_path.display()))?;
    let lines = contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| (idx + 1, line.to_string()))
        .collect();

    let final_path = dir.join(format!("{run_id}{FINAL_SUFFIX}"));
    let final_report = match fs::read_to_string(&final_path) {
        Ok(contents) => match serde_json::from_str::<FinalReport>(&contents) {
            Ok(report) => FinalFile::Present(Box::new(report)),
            Err(err) => FinalFile::Invalid(err.to_string()),
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => FinalFile::Missing,
        Err(err) => {
            return Err(err).with_context(|| format!("read {}", final_path.display()));
        }
    };

    Ok(RunLog {
        run_id: run_id.to_string(),
        log_path: log_path.to_path_buf(),
        lines,
        final_report,
    })
}
