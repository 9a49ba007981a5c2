//! Experiment-log validation.
//!
//! Every line must parse, match the iteration record schema and decode into an
//! [`IterationRecord`]. The decoded log must then obey the recorder's ordering
//! and the orchestrator's outcome rules, and agree with the final report.

use std::sync::LazyLock;

use jsonschema::Validator;
use serde_json::Value;
use tracing::{debug, instrument};

use swarm::core::types::{IterationOutcome, IterationRecord, RunStatus};
use swarm::io::recorder::ITERATION_RECORD_SCHEMA;

use crate::logs::{FinalFile, RunLog};

static RECORD_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(ITERATION_RECORD_SCHEMA)
        .unwrap_or_else(|err| panic!("iteration record schema should be valid json: {err}"));
    jsonschema::validator_for(&schema)
        .unwrap_or_else(|err| panic!("iteration record schema should compile: {err}"))
});

/// A rule broken by one run's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub run_id: String,
    /// 1-based line of the offending record, if the issue is line-local.
    pub line: Option<usize>,
    pub message: String,
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{}: {}", self.run_id, line, self.message),
            None => write!(f, "{}: {}", self.run_id, self.message),
        }
    }
}

/// Result of validating one run.
#[derive(Debug, Default)]
pub struct RunValidation {
    pub records: Vec<IterationRecord>,
    pub issues: Vec<Issue>,
    /// Conditions worth reporting that do not make the log invalid.
    pub warnings: Vec<String>,
}

#[instrument(skip_all, fields(run_id = %log.run_id, path = %log.log_path.display()))]
pub fn validate_run(log: &RunLog) -> RunValidation {
    let mut out = RunValidation::default();
    let issue = |line: Option<usize>, message: String| Issue {
        run_id: log.run_id.clone(),
        line,
        message,
    };

    let mut last_iteration: Option<u32> = None;
    for (line, raw) in &log.lines {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(err) => {
                out.issues.push(issue(Some(*line), format!("invalid json: {err}")));
                continue;
            }
        };
        let schema_errors: Vec<String> = RECORD_VALIDATOR
            .iter_errors(&value)
            .map(|err| err.to_string())
            .collect();
        if !schema_errors.is_empty() {
            out.issues.push(issue(
                Some(*line),
                format!("schema: {}", schema_errors.join("; ")),
            ));
            continue;
        }
        let record: IterationRecord = match serde_json::from_value(value) {
            Ok(record) => record,
            Err(err) => {
                out.issues.push(issue(Some(*line), format!("decode: {err}")));
                continue;
            }
        };

        if record.run_id != log.run_id {
            out.issues.push(issue(
                Some(*line),
                format!("record belongs to run '{}'", record.run_id),
            ));
        }
        if let Some(last) = last_iteration
            && record.iteration <= last
        {
            out.issues.push(issue(
                Some(*line),
                format!("iteration {} does not follow {last}", record.iteration),
            ));
        }
        last_iteration = Some(record.iteration);

        if let Some(problem) = outcome_problem(&record) {
            out.issues.push(issue(Some(*line), problem));
        }
        out.records.push(record);
    }

    if let Some(pos) = out
        .records
        .iter()
        .position(|record| matches!(record.outcome, IterationOutcome::Clean | IterationOutcome::Failed))
        && pos + 1 < out.records.len()
    {
        out.issues.push(issue(
            None,
            format!(
                "iteration {} ended the run but {} more records follow",
                out.records[pos].iteration,
                out.records.len() - pos - 1
            ),
        ));
    }

    match &log.final_report {
        FinalFile::Missing => out
            .warnings
            .push(format!("{}: no final report (run unfinished?)", log.run_id)),
        FinalFile::Invalid(err) => out
            .issues
            .push(issue(None, format!("final report unreadable: {err}"))),
        FinalFile::Present(report) => {
            for problem in report_problems(report, &out.records) {
                out.issues.push(issue(None, problem));
            }
        }
    }

    debug!(
        records = out.records.len(),
        issues = out.issues.len(),
        "run validated"
    );
    out
}

/// Outcome rules: COMMITTED needs a passing verdict, ROLLED_BACK a failing one,
/// CLEAN has nothing to fix and FAILED says why.
fn outcome_problem(record: &IterationRecord) -> Option<String> {
    let verdict = record.verdict.as_ref();
    match record.outcome {
        IterationOutcome::Committed if !verdict.is_some_and(|v| v.passed()) => {
            Some("COMMITTED without a passing verdict".to_string())
        }
        IterationOutcome::RolledBack if !verdict.is_some_and(|v| !v.passed()) => {
            Some("ROLLED_BACK without a failing verdict".to_string())
        }
        IterationOutcome::Committed | IterationOutcome::RolledBack if record.patch.is_none() => {
            Some(format!("{:?} without a patch", record.outcome))
        }
        IterationOutcome::Clean if !record.findings.is_empty() || record.patch.is_some() => {
            Some("CLEAN with findings or a patch".to_string())
        }
        IterationOutcome::Failed if record.error.is_none() => {
            Some("FAILED without an error".to_string())
        }
        _ if record.outcome != IterationOutcome::Failed && record.error.is_some() => {
            Some(format!("{:?} carries an error", record.outcome))
        }
        _ => None,
    }
}

fn report_problems(
    report: &swarm::core::types::FinalReport,
    records: &[IterationRecord],
) -> Vec<String> {
    let mut problems = Vec::new();
    let count = |outcome: IterationOutcome| {
        records
            .iter()
            .filter(|record| record.outcome == outcome)
            .count() as u32
    };
    let checks = [
        ("iterations", report.iterations, records.len() as u32),
        ("commits", report.commits, count(IterationOutcome::Committed)),
        ("rollbacks", report.rollbacks, count(IterationOutcome::RolledBack)),
    ];
    for (field, reported, logged) in checks {
        if reported != logged {
            problems.push(format!(
                "final report has {field}={reported} but the log shows {logged}"
            ));
        }
    }

    let last = records.last().map(|record| record.outcome);
    match report.status {
        RunStatus::Done if last != Some(IterationOutcome::Clean) => {
            problems.push("DONE but the last iteration is not CLEAN".to_string());
        }
        RunStatus::Exhausted if report.exhausted_by.is_none() => {
            problems.push("EXHAUSTED without exhausted_by".to_string());
        }
        RunStatus::Failed if report.last_error.is_none() => {
            problems.push("FAILED without last_error".to_string());
        }
        _ => {}
    }
    if report.status != RunStatus::Exhausted && report.exhausted_by.is_some() {
        problems.push(format!("{} with exhausted_by", report.status.as_str()));
    }
    problems
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::load_logs;
    use chrono::Utc;
    use std::fs;
    use std::path::Path;
    use swarm::core::checksum::Checksum;
    use swarm::core::types::{
        Exhaustion, FailureReason, FinalReport, Finding, Location, Patch, Severity, Verdict,
    };
    use tempfile::tempdir;

    fn record(iteration: u32, outcome: IterationOutcome) -> IterationRecord {
        let finding = Finding {
            category: "bug".to_string(),
            severity: Severity::High,
            location: Location {
                line: 2,
                column: None,
            },
            description: "subtracts instead of adding".to_string(),
        };
        let patch = Patch {
            content: "def add(a, b):\n    return a + b\n".to_string(),
            rationale: "use +".to_string(),
            targeted: vec![finding.clone()],
        };
        let (findings, patch, verdict) = match outcome {
            IterationOutcome::Clean => (Vec::new(), None, None),
            IterationOutcome::Committed => (
                vec![finding],
                Some(patch),
                Some(Verdict::Pass {
                    report: "1 passed".to_string(),
                }),
            ),
            IterationOutcome::RolledBack => (
                vec![finding],
                Some(patch),
                Some(Verdict::Fail {
                    reason: FailureReason::AssertionFailed,
                    report: "1 failed".to_string(),
                }),
            ),
            IterationOutcome::Failed => (vec![finding], None, None),
        };
        IterationRecord {
            run_id: "run-1".to_string(),
            iteration,
            timestamp: Utc::now(),
            artifact_checksum: Some(Checksum::of(b"x = 1\n")),
            findings,
            patch,
            verdict,
            outcome,
            error: None,
        }
    }

    fn report(status: RunStatus, iterations: u32, commits: u32, rollbacks: u32) -> FinalReport {
        FinalReport {
            run_id: "run-1".to_string(),
            artifact: "calc.py".into(),
            status,
            iterations,
            commits,
            rollbacks,
            exhausted_by: (status == RunStatus::Exhausted).then_some(Exhaustion::FailureBudget),
            last_error: None,
            artifact_checksum: None,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    fn write_run(dir: &Path, records: &[IterationRecord], report: Option<&FinalReport>) {
        let mut lines = String::new();
        for record in records {
            lines.push_str(&serde_json::to_string(record).expect("record json"));
            lines.push('\n');
        }
        fs::write(dir.join("run-1.jsonl"), lines).expect("write log");
        if let Some(report) = report {
            let json = serde_json::to_string_pretty(report).expect("report json");
            fs::write(dir.join("run-1.final.json"), json).expect("write final");
        }
    }

    fn validate(records: &[IterationRecord], report: Option<&FinalReport>) -> RunValidation {
        let temp = tempdir().expect("tempdir");
        write_run(temp.path(), records, report);
        let logs = load_logs(temp.path()).expect("load");
        validate_run(&logs[0])
    }

    #[test]
    fn well_formed_run_has_no_issues() {
        let records = [
            record(1, IterationOutcome::RolledBack),
            record(2, IterationOutcome::Committed),
            record(3, IterationOutcome::Clean),
        ];
        let result = validate(&records, Some(&report(RunStatus::Done, 3, 1, 1)));
        assert!(result.issues.is_empty(), "{:?}", result.issues);
        assert!(result.warnings.is_empty());
        assert_eq!(result.records.len(), 3);
    }

    #[test]
    fn non_increasing_iterations_are_reported() {
        let records = [
            record(1, IterationOutcome::RolledBack),
            record(1, IterationOutcome::RolledBack),
        ];
        let result = validate(&records, None);
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].line, Some(2));
        assert!(result.issues[0].message.contains("does not follow 1"));
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn committed_with_failing_verdict_is_reported() {
        let mut bad = record(1, IterationOutcome::RolledBack);
        bad.outcome = IterationOutcome::Committed;
        let result = validate(&[bad], None);
        assert_eq!(result.issues.len(), 1);
        assert!(result.issues[0].message.contains("COMMITTED"));
    }

    #[test]
    fn clean_with_findings_is_reported() {
        let mut bad = record(1, IterationOutcome::Committed);
        bad.outcome = IterationOutcome::Clean;
        bad.verdict = None;
        let result = validate(&[bad], None);
        assert!(result.issues.iter().any(|issue| issue.message.contains("CLEAN")));
    }

    #[test]
    fn foreign_run_id_and_schema_violations_are_reported() {
        let mut foreign = record(1, IterationOutcome::RolledBack);
        foreign.run_id = "run-2".to_string();
        let temp = tempdir().expect("tempdir");
        write_run(temp.path(), &[foreign], None);
        let mut log = fs::read_to_string(temp.path().join("run-1.jsonl")).expect("read");
        log.push_str("{\"run_id\":\"run-1\",\"iteration\":0}\nnot json\n");
        fs::write(temp.path().join("run-1.jsonl"), log).expect("write");

        let logs = load_logs(temp.path()).expect("load");
        let result = validate_run(&logs[0]);
        let lines: Vec<Option<usize>> = result.issues.iter().map(|issue| issue.line).collect();
        assert_eq!(lines, vec![Some(1), Some(2), Some(3)]);
        assert!(result.issues[0].message.contains("run-2"));
        assert!(result.issues[1].message.starts_with("schema:"));
        assert!(result.issues[2].message.starts_with("invalid json"));
    }

    #[test]
    fn final_report_must_match_log() {
        let records = [
            record(1, IterationOutcome::RolledBack),
            record(2, IterationOutcome::RolledBack),
        ];
        let result = validate(&records, Some(&report(RunStatus::Exhausted, 2, 1, 2)));
        assert_eq!(result.issues.len(), 1);
        assert!(result.issues[0].message.contains("commits=1"));

        let result = validate(&records, Some(&report(RunStatus::Done, 2, 0, 2)));
        assert!(result.issues.iter().any(|issue| issue.message.contains("DONE")));
    }

    #[test]
    fn records_after_terminal_iteration_are_reported() {
        let records = [
            record(1, IterationOutcome::Clean),
            record(2, IterationOutcome::RolledBack),
        ];
        let result = validate(&records, None);
        assert_eq!(result.issues.len(), 1);
        assert!(result.issues[0].message.contains("1 more records follow"));
    }
}
