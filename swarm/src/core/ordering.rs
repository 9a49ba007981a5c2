//! Deterministic ordering of auditor findings.

use std::cmp::Ordering;

use crate::core::types::Finding;

/// Compare findings: severity descending, then location, category and description ascending.
pub fn compare_findings(a: &Finding, b: &Finding) -> Ordering {
    b.severity
        .cmp(&a.severity)
        .then_with(|| a.location.cmp(&b.location))
        .then_with(|| a.category.cmp(&b.category))
        .then_with(|| a.description.cmp(&b.description))
}

/// Sort findings in place and drop exact duplicates.
pub fn sort_findings(findings: &mut Vec<Finding>) {
    findings.sort_by(compare_findings);
    findings.dedup();
}

/// Pick the findings a single patch should target.
///
/// Input order is irrelevant; the result is the `max` highest-ranked findings.
pub fn select_for_patch(findings: &[Finding], max: usize) -> Vec<Finding> {
    let mut selected = findings.to_vec();
    sort_findings(&mut selected);
    selected.truncate(max);
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Location, Severity};

    fn finding(category: &str, severity: Severity, line: u32) -> Finding {
        Finding {
            category: category.to_string(),
            severity,
            location: Location { line, column: None },
            description: format!("{category} at {line}"),
        }
    }

    #[test]
    fn sorts_by_severity_then_location_then_category() {
        let mut findings = vec![
            finding("style", Severity::Low, 1),
            finding("bug", Severity::Critical, 40),
            finding("security", Severity::High, 7),
            finding("bug", Severity::High, 7),
            finding("bug", Severity::High, 2),
        ];
        sort_findings(&mut findings);

        let keys: Vec<(Severity, u32, &str)> = findings
            .iter()
            .map(|f| (f.severity, f.location.line, f.category.as_str()))
            .collect();
        assert_eq!(
            keys,
            vec![
                (Severity::Critical, 40, "bug"),
                (Severity::High, 2, "bug"),
                (Severity::High, 7, "bug"),
                (Severity::High, 7, "security"),
                (Severity::Low, 1, "style"),
            ]
        );
    }

    #[test]
    fn sort_is_independent_of_input_order() {
        let a = finding("bug", Severity::Medium, 3);
        let b = finding("perf", Severity::Medium, 3);
        let c = finding("bug", Severity::Info, 1);

        let mut forward = vec![a.clone(), b.clone(), c.clone()];
        let mut reversed = vec![c, b, a];
        sort_findings(&mut forward);
        sort_findings(&mut reversed);
        assert_eq!(forward, reversed);
    }

    #[test]
    fn duplicate_findings_collapse() {
        let mut findings = vec![
            finding("bug", Severity::High, 3),
            finding("bug", Severity::High, 3),
        ];
        sort_findings(&mut findings);
        assert_eq!(findings.len(), 1);
    }

    #[test]
    fn select_for_patch_keeps_highest_ranked() {
        let findings: Vec<Finding> = (1..=8)
            .map(|line| finding("bug", Severity::Low, line))
            .chain(std::iter::once(finding("bug", Severity::Critical, 99)))
            .collect();

        let selected = select_for_patch(&findings, 5);
        assert_eq!(selected.len(), 5);
        assert_eq!(selected[0].severity, Severity::Critical);
        assert_eq!(selected[1].location.line, 1);
        assert_eq!(selected[4].location.line, 4);
    }
}
