//! Shared deterministic types for repair runs.
//!
//! These types define stable contracts between the roles, the orchestrator and
//! the experiment log. They carry no I/O and serialize to the log format
//! described by `schemas/iteration_record.schema.json`.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::checksum::Checksum;
use crate::error::ErrorReport;

/// Finding severity. Declaration order is ascending, so `Critical` is the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// Position of a finding inside the artifact (1-based line).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Location {
    pub line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

/// A single issue reported by the auditor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Finding {
    pub category: String,
    pub severity: Severity,
    pub location: Location,
    pub description: String,
}

/// Full replacement content proposed by the fixer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub content: String,
    pub rationale: String,
    pub targeted: Vec<Finding>,
}

/// Fixed taxonomy for failed validations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    AssertionFailed,
    Timeout,
    CollectionError,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::AssertionFailed => "ASSERTION_FAILED",
            FailureReason::Timeout => "TIMEOUT",
            FailureReason::CollectionError => "COLLECTION_ERROR",
        }
    }
}

/// Judge decision for one staged candidate.
///
/// A `Fail` always carries a reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum Verdict {
    Pass {
        report: String,
    },
    Fail {
        reason: FailureReason,
        report: String,
    },
}

impl Verdict {
    pub fn passed(&self) -> bool {
        matches!(self, Verdict::Pass { .. })
    }

    pub fn report(&self) -> &str {
        match self {
            Verdict::Pass { report } | Verdict::Fail { report, .. } => report,
        }
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            Verdict::Pass { .. } => None,
            Verdict::Fail { reason, .. } => Some(*reason),
        }
    }
}

/// Where the judge's test file came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestOrigin {
    Existing { path: PathBuf },
    Generated { path: PathBuf },
}

/// Test file the judge runs against every candidate of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestSpec {
    pub file_name: String,
    pub content: String,
    pub origin: TestOrigin,
}

/// How an iteration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IterationOutcome {
    /// Auditor reported no findings.
    Clean,
    Committed,
    RolledBack,
    /// An unrecoverable error ended the iteration.
    Failed,
}

/// One appended entry of the experiment log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub run_id: String,
    pub iteration: u32,
    pub timestamp: DateTime<Utc>,
    /// Checksum of the committed artifact when the iteration started.
    pub artifact_checksum: Option<Checksum>,
    pub findings: Vec<Finding>,
    pub patch: Option<Patch>,
    pub verdict: Option<Verdict>,
    pub outcome: IterationOutcome,
    pub error: Option<ErrorReport>,
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Done,
    Exhausted,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Done => "DONE",
            RunStatus::Exhausted => "EXHAUSTED",
            RunStatus::Failed => "FAILED",
        }
    }
}

/// Which budget ended an `EXHAUSTED` run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Exhaustion {
    FailureBudget,
    IterationBudget,
}

/// Summary produced at the end of every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalReport {
    pub run_id: String,
    pub artifact: PathBuf,
    pub status: RunStatus,
    pub iterations: u32,
    pub commits: u32,
    pub rollbacks: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exhausted_by: Option<Exhaustion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_checksum: Option<Checksum>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
