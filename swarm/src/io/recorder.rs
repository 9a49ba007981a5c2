//! Append-only experiment log.
//!
//! Every iteration of every run is recorded, whatever its outcome. Records of
//! one run are strictly ordered by iteration index; a run ends with exactly
//! one [`FinalReport`].

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::core::types::{FinalReport, IterationRecord};
use crate::io::config::write_atomic;

/// JSON Schema for one line of a run log.
pub const ITERATION_RECORD_SCHEMA: &str = include_str!("../../schemas/iteration_record.schema.json");

/// Sink for iteration records, shared by concurrent runs.
pub trait ExperimentRecorder: Send + Sync {
    /// Append `record` to the log of `run_id`.
    ///
    /// Fails if the record belongs to another run or does not advance the iteration index.
    fn append(&self, run_id: &str, record: &IterationRecord) -> Result<()>;

    /// All records of `run_id` in append order. Unknown runs have no records.
    fn query(&self, run_id: &str) -> Result<Vec<IterationRecord>>;

    /// Store the terminal report of a run.
    fn finish(&self, report: &FinalReport) -> Result<()>;

    fn final_report(&self, run_id: &str) -> Result<Option<FinalReport>>;
}

/// Run ids become file names, so they are restricted to `[A-Za-z0-9._-]` without a leading dot.
pub fn validate_run_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(anyhow!("run id must not be empty"));
    }
    if id.starts_with('.') {
        return Err(anyhow!("run id must not start with '.'"));
    }
    if id
        .chars()
        .any(|c| !(c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'))
    {
        return Err(anyhow!("run id must be [A-Za-z0-9._-] only (got '{id}')"));
    }
    Ok(())
}

static RUN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Fresh run id: `run-<utc timestamp>-<8 hex>`.
pub fn new_run_id(now: DateTime<Utc>, artifact: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(now.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    hasher.update(std::process::id().to_le_bytes());
    hasher.update(RUN_COUNTER.fetch_add(1, Ordering::Relaxed).to_le_bytes());
    hasher.update(artifact.as_os_str().as_encoded_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("run-{}-{}", now.format("%Y%m%dT%H%M%S"), &digest[..8])
}

fn check_order(run_id: &str, record: &IterationRecord, last: Option<u32>) -> Result<()> {
    validate_run_id(run_id)?;
    if record.run_id != run_id {
        bail!(
            "record for run '{}' appended to run '{}'",
            record.run_id,
            run_id
        );
    }
    if let Some(last) = last
        && record.iteration <= last
    {
        bail!(
            "run '{}': iteration {} appended after iteration {}",
            run_id,
            record.iteration,
            last
        );
    }
    Ok(())
}

/// One JSON line per record in `<dir>/<run_id>.jsonl`, final report in `<dir>/<run_id>.final.json`.
#[derive(Debug)]
pub struct JsonlRecorder {
    dir: PathBuf,
    /// Last appended iteration per run, seeded from disk on first use.
    last_iteration: Mutex<HashMap<String, u32>>,
}

impl JsonlRecorder {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).with_context(|| format!("create log dir {}", dir.display()))?;
        Ok(Self {
            dir,
            last_iteration: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn log_path(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}.jsonl"))
    }

    pub fn final_path(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}.final.json"))
    }
}

impl ExperimentRecorder for JsonlRecorder {
    fn append(&self, run_id: &str, record: &IterationRecord) -> Result<()> {
        validate_run_id(run_id)?;
        let mut last_iteration = self
            .last_iteration
            .lock()
            .map_err(|_| anyhow!("recorder lock poisoned"))?;

        let last = match last_iteration.get(run_id) {
            Some(last) => Some(*last),
            None => self.query(run_id)?.last().map(|r| r.iteration),
        };
        check_order(run_id, record, last)?;

        let mut line = serde_json::to_vec(record).context("serialize iteration record")?;
        line.push(b'\n');
        let path = self.log_path(run_id);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open {}", path.display()))?;
        file.write_all(&line)
            .with_context(|| format!("append {}", path.display()))?;
        file.sync_data()
            .with_context(|| format!("sync {}", path.display()))?;

        last_iteration.insert(run_id.to_string(), record.iteration);
        debug!(run_id, iteration = record.iteration, outcome = ?record.outcome, "record appended");
        Ok(())
    }

    fn query(&self, run_id: &str) -> Result<Vec<IterationRecord>> {
        validate_run_id(run_id)?;
        let path = self.log_path(run_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                serde_json::from_str(line)
                    .with_context(|| format!("parse {} line {}", path.display(), idx + 1))
            })
            .collect()
    }

    fn finish(&self, report: &FinalReport) -> Result<()> {
        validate_run_id(&report.run_id)?;
        let mut buf = serde_json::to_string_pretty(report).context("serialize final report")?;
        buf.push('\n');
        write_atomic(&self.final_path(&report.run_id), buf.as_bytes())
    }

    fn final_report(&self, run_id: &str) -> Result<Option<FinalReport>> {
        validate_run_id(run_id)?;
        let path = self.final_path(run_id);
        if !path.exists() {
            return Ok(None);
        }
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let report =
            serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
        Ok(Some(report))
    }
}

/// In-memory recorder with the same ordering rules as [`JsonlRecorder`].
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    runs: Mutex<HashMap<String, Vec<IterationRecord>>>,
    finals: Mutex<HashMap<String, FinalReport>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExperimentRecorder for MemoryRecorder {
    fn append(&self, run_id: &str, record: &IterationRecord) -> Result<()> {
        let mut runs = self
            .runs
            .lock()
            .map_err(|_| anyhow!("recorder lock poisoned"))?;
        let records = runs.entry(run_id.to_string()).or_default();
        check_order(run_id, record, records.last().map(|r| r.iteration))?;
        records.push(record.clone());
        Ok(())
    }

    fn query(&self, run_id: &str) -> Result<Vec<IterationRecord>> {
        let runs = self
            .runs
            .lock()
            .map_err(|_| anyhow!("recorder lock poisoned"))?;
        Ok(runs.get(run_id).cloned().unwrap_or_default())
    }

    fn finish(&self, report: &FinalReport) -> Result<()> {
        validate_run_id(&report.run_id)?;
        let mut finals = self
            .finals
            .lock()
            .map_err(|_| anyhow!("recorder lock poisoned"))?;
        finals.insert(report.run_id.clone(), report.clone());
        Ok(())
    }

    fn final_report(&self, run_id: &str) -> Result<Option<FinalReport>> {
        let finals = self
            .finals
            .lock()
            .map_err(|_| anyhow!("recorder lock poisoned"))?;
        Ok(finals.get(run_id).cloned())
    }
}
