//! Deterministic classification of test reports into verdicts.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{FailureReason, Verdict};

/// Markers of a test file that could not be loaded, as opposed to one that ran and failed.
static COLLECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(SyntaxError|IndentationError|TabError|ImportError|ModuleNotFoundError|error collecting|errors? during collection|no tests ran)\b",
    )
    .expect("collection regex should be valid")
});

/// Turn a finished (not timed out) test execution into a verdict.
pub fn classify_report(passed: bool, report: &str) -> Verdict {
    if passed {
        return Verdict::Pass {
            report: report.to_string(),
        };
    }
    let reason = if COLLECTION_RE.is_match(report) {
        FailureReason::CollectionError
    } else {
        FailureReason::AssertionFailed
    };
    Verdict::Fail {
        reason,
        report: report.to_string(),
    }
}

/// Verdict for an execution that exceeded its time budget.
pub fn timeout_verdict(secs: u64, partial_report: &str) -> Verdict {
    let mut report = format!("test execution exceeded {secs}s");
    if !partial_report.trim().is_empty() {
        report.push_str("\n\n");
        report.push_str(partial_report.trim_end());
    }
    Verdict::Fail {
        reason: FailureReason::Timeout,
        report,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passing_run_is_pass_regardless_of_text() {
        let verdict = classify_report(true, "1 passed, 1 warning: SyntaxError in docstring");
        assert!(verdict.passed());
    }

    #[test]
    fn assertion_failure_is_classified() {
        let report = "E       assert 3 == 4\nFAILED test_calc.py::test_add - assert 3 == 4\n1 failed";
        assert_eq!(
            classify_report(false, report).failure_reason(),
            Some(FailureReason::AssertionFailed)
        );
    }

    #[test]
    fn import_failure_is_collection_error() {
        let report = "ERROR collecting test_calc.py\nE   ModuleNotFoundError: No module named 'calc'\n";
        assert_eq!(
            classify_report(false, report).failure_reason(),
            Some(FailureReason::CollectionError)
        );
    }

    #[test]
    fn syntax_error_in_candidate_is_collection_error() {
        let report = "  File \"calc.py\", line 3\n    def add(a, b)\n                ^\nSyntaxError: expected ':'";
        assert_eq!(
            classify_report(false, report).failure_reason(),
            Some(FailureReason::CollectionError)
        );
    }

    #[test]
    fn runtime_error_inside_test_is_assertion_failed() {
        let report = "E       ZeroDivisionError: division by zero\n1 failed in 0.01s";
        assert_eq!(
            classify_report(false, report).failure_reason(),
            Some(FailureReason::AssertionFailed)
        );
    }

    #[test]
    fn timeout_verdict_keeps_partial_output() {
        let verdict = timeout_verdict(30, "collected 3 items\n");
        assert_eq!(verdict.failure_reason(), Some(FailureReason::Timeout));
        assert!(verdict.report().starts_with("test execution exceeded 30s"));
        assert!(verdict.report().ends_with("collected 3 items"));
    }
}
