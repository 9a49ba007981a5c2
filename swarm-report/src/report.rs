use std::collections::BTreeMap;

use serde::Serialize;

use swarm::core::types::{FailureReason, IterationOutcome, IterationRecord};

use crate::logs::RunLog;

/// Counts for one run, taken from its records and final report.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub artifact: Option<String>,
    /// `None` while the run has no final report.
    pub status: Option<String>,
    pub exhausted_by: Option<String>,
    pub iterations: usize,
    pub committed: usize,
    pub rolled_back: usize,
    pub clean: usize,
    pub failed: usize,
    pub failure_reasons: BTreeMap<FailureReason, usize>,
    pub duration_secs: Option<f64>,
}

/// Totals over every run of a log directory.
#[derive(Debug, Default, Serialize)]
pub struct ReportSummary {
    pub runs: usize,
    pub by_status: BTreeMap<String, usize>,
    pub iterations: usize,
    pub committed: usize,
    pub rolled_back: usize,
    pub failure_reasons: BTreeMap<FailureReason, usize>,
    pub error_kinds: BTreeMap<String, usize>,
    pub avg_duration_secs: Option<f64>,
}

pub fn summarize_run(log: &RunLog, records: &[IterationRecord]) -> RunSummary {
    let count = |outcome: IterationOutcome| {
        records
            .iter()
            .filter(|record| record.outcome == outcome)
            .count()
    };
    let mut failure_reasons = BTreeMap::new();
    for reason in records
        .iter()
        .filter_map(|record| record.verdict.as_ref()?.failure_reason())
    {
        *failure_reasons.entry(reason).or_insert(0) += 1;
    }

    let report = log.final_report.report();
    RunSummary {
        run_id: log.run_id.clone(),
        artifact: report.map(|report| report.artifact.display().to_string()),
        status: report.map(|report| report.status.as_str().to_string()),
        exhausted_by: report
            .and_then(|report| report.exhausted_by)
            .map(|exhaustion| format!("{exhaustion:?}")),
        iterations: records.len(),
        committed: count(IterationOutcome::Committed),
        rolled_back: count(IterationOutcome::RolledBack),
        clean: count(IterationOutcome::Clean),
        failed: count(IterationOutcome::Failed),
        failure_reasons,
        duration_secs: report.map(|report| {
            (report.finished_at - report.started_at).num_milliseconds() as f64 / 1000.0
        }),
    }
}

pub fn aggregate(runs: &[RunSummary], records: &[IterationRecord]) -> ReportSummary {
    let mut summary = ReportSummary {
        runs: runs.len(),
        ..ReportSummary::default()
    };
    let mut durations = Vec::new();
    for run in runs {
        let status = run.status.clone().unwrap_or_else(|| "UNFINISHED".to_string());
        *summary.by_status.entry(status).or_insert(0) += 1;
        summary.iterations += run.iterations;
        summary.committed += run.committed;
        summary.rolled_back += run.rolled_back;
        for (reason, n) in &run.failure_reasons {
            *summary.failure_reasons.entry(*reason).or_insert(0) += n;
        }
        durations.extend(run.duration_secs);
    }
    for record in records {
        if let Some(error) = &record.error {
            *summary
                .error_kinds
                .entry(error.kind.as_str().to_string())
                .or_insert(0) += 1;
        }
    }
    if !durations.is_empty() {
        summary.avg_duration_secs =
            Some(durations.iter().sum::<f64>() / durations.len() as f64);
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::FinalFile;
    use chrono::{Duration, Utc};
    use std::path::PathBuf;
    use swarm::core::types::{Exhaustion, FinalReport, RunStatus, Verdict};
    use swarm::error::{ErrorKind, ErrorReport};

    fn record(iteration: u32, outcome: IterationOutcome, verdict: Option<Verdict>) -> IterationRecord {
        IterationRecord {
            run_id: "run-1".to_string(),
            iteration,
            timestamp: Utc::now(),
            artifact_checksum: None,
            findings: Vec::new(),
            patch: None,
            verdict,
            outcome,
            error: None,
        }
    }

    fn fail(reason: FailureReason) -> Option<Verdict> {
        Some(Verdict::Fail {
            reason,
            report: String::new(),
        })
    }

    fn log(run_id: &str, final_report: FinalFile) -> RunLog {
        RunLog {
            run_id: run_id.to_string(),
            log_path: PathBuf::from(format!("{run_id}.jsonl")),
            lines: Vec::new(),
            final_report,
        }
    }

    fn exhausted(secs: i64) -> FinalFile {
        let started_at = Utc::now();
        FinalFile::Present(Box::new(FinalReport {
            run_id: "run-1".to_string(),
            artifact: "calc.py".into(),
            status: RunStatus::Exhausted,
            iterations: 3,
            commits: 0,
            rollbacks: 3,
            exhausted_by: Some(Exhaustion::FailureBudget),
            last_error: None,
            artifact_checksum: None,
            started_at,
            finished_at: started_at + Duration::seconds(secs),
        }))
    }

    #[test]
    fn run_summary_histograms_failure_reasons() {
        let records = [
            record(1, IterationOutcome::RolledBack, fail(FailureReason::AssertionFailed)),
            record(2, IterationOutcome::RolledBack, fail(FailureReason::Timeout)),
            record(3, IterationOutcome::RolledBack, fail(FailureReason::AssertionFailed)),
        ];
        let summary = summarize_run(&log("run-1", exhausted(12)), &records);

        assert_eq!(summary.status.as_deref(), Some("EXHAUSTED"));
        assert_eq!(summary.exhausted_by.as_deref(), Some("FailureBudget"));
        assert_eq!(summary.rolled_back, 3);
        assert_eq!(summary.failure_reasons.get(&FailureReason::AssertionFailed), Some(&2));
        assert_eq!(summary.failure_reasons.get(&FailureReason::Timeout), Some(&1));
        assert_eq!(summary.duration_secs, Some(12.0));
    }

    #[test]
    fn aggregate_counts_unfinished_runs_and_error_kinds() {
        let mut failed = record(1, IterationOutcome::Failed, None);
        failed.error = Some(ErrorReport {
            kind: ErrorKind::AgentResponseParse,
            message: "no json".to_string(),
        });
        let finished = summarize_run(
            &log("run-1", exhausted(10)),
            &[record(1, IterationOutcome::RolledBack, fail(FailureReason::CollectionError))],
        );
        let unfinished = summarize_run(&log("run-2", FinalFile::Missing), std::slice::from_ref(&failed));

        let summary = aggregate(&[finished, unfinished], &[failed]);
        assert_eq!(summary.runs, 2);
        assert_eq!(summary.by_status.get("EXHAUSTED"), Some(&1));
        assert_eq!(summary.by_status.get("UNFINISHED"), Some(&1));
        assert_eq!(summary.iterations, 2);
        assert_eq!(summary.error_kinds.get("AgentResponseParseError"), Some(&1));
        assert_eq!(summary.avg_duration_secs, Some(10.0));
    }
}
