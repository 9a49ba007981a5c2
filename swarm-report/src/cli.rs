//! CLI command implementations.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use swarm::core::types::IterationRecord;

use crate::logs::load_logs;
use crate::report::{RunSummary, aggregate, summarize_run};
use crate::validate::validate_run;

/// Validate every run under `log_dir`. Returns false if any issue was found.
pub fn validate_logs(log_dir: &Path) -> Result<bool> {
    let logs = load_logs(log_dir)?;
    let mut issues = 0;
    let mut records = 0;
    for log in &logs {
        let result = validate_run(log);
        records += result.records.len();
        for issue in &result.issues {
            println!("invalid: {issue}");
        }
        for warning in &result.warnings {
            eprintln!("warning: {warning}");
        }
        issues += result.issues.len();
    }
    info!(runs = logs.len(), records, issues, "validation finished");
    println!(
        "validate: runs={} records={} issues={}",
        logs.len(),
        records,
        issues
    );
    Ok(issues == 0)
}

/// Print per-run and aggregate counts for `log_dir`.
pub fn summarize_logs(log_dir: &Path, json: bool) -> Result<()> {
    let logs = load_logs(log_dir)?;
    let mut runs: Vec<RunSummary> = Vec::new();
    let mut all_records: Vec<IterationRecord> = Vec::new();
    for log in &logs {
        let result = validate_run(log);
        if !result.issues.is_empty() {
            eprintln!(
                "warning: {} has {} issues, counts may be off",
                log.run_id,
                result.issues.len()
            );
        }
        runs.push(summarize_run(log, &result.records));
        all_records.extend(result.records);
    }
    let summary = aggregate(&runs, &all_records);

    if json {
        let doc = serde_json::json!({ "runs": runs, "summary": summary });
        println!(
            "{}",
            serde_json::to_string_pretty(&doc).context("serialize summary")?
        );
        return Ok(());
    }

    for run in &runs {
        println!(
            "run: id={} artifact={} status={} iterations={} committed={} rolled_back={} failed={}",
            run.run_id,
            run.artifact.as_deref().unwrap_or("-"),
            run.status.as_deref().unwrap_or("UNFINISHED"),
            run.iterations,
            run.committed,
            run.rolled_back,
            run.failed
        );
        if let Some(by) = &run.exhausted_by {
            println!("run: id={} exhausted_by={}", run.run_id, by);
        }
        if let Some(secs) = run.duration_secs {
            println!("run: id={} duration_secs={:.2}", run.run_id, secs);
        }
    }
    println!(
        "summary: runs={} iterations={} committed={} rolled_back={}",
        summary.runs, summary.iterations, summary.committed, summary.rolled_back
    );
    for (status, n) in &summary.by_status {
        println!("summary: status {status} {n}");
    }
    for (reason, n) in &summary.failure_reasons {
        println!("summary: failure_reason {} {}", reason.as_str(), n);
    }
    for (kind, n) in &summary.error_kinds {
        println!("summary: error {kind} {n}");
    }
    if let Some(avg) = summary.avg_duration_secs {
        println!("summary: avg_duration_secs={avg:.2}");
    }
    Ok(())
}
