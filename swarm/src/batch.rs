//! Directory runs: discover eligible artifacts and repair them concurrently.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::core::sandbox::normalize;
use crate::core::types::FinalReport;
use crate::io::backend::Backend;
use crate::io::config::TargetConfig;
use crate::io::test_runner::TestRunner;
use crate::orchestrator::Orchestrator;

/// Artifacts under `root` eligible for repair, relative to `root`, sorted.
///
/// Hidden directories (including `.swarm/`) are skipped, as are files
/// matching the configured test-file conventions.
pub fn discover_targets(root: &Path, targets: &TargetConfig) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry));
    for entry in walker {
        let entry = entry.with_context(|| format!("walk {}", root.display()))?;
        if !entry.file_type().is_file() || !is_eligible(entry.path(), targets) {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .with_context(|| format!("relativize {}", entry.path().display()))?;
        found.push(rel.to_path_buf());
    }
    found.sort();
    debug!(count = found.len(), "targets discovered");
    Ok(found)
}

/// Drop targets that name an artifact already listed, keeping the first spelling.
///
/// Targets are compared after resolving against `root`: canonically when the
/// file exists, lexically otherwise.
pub fn dedup_targets(root: &Path, targets: &[PathBuf]) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(targets.len());
    for target in targets {
        let joined = root.join(target);
        let key = joined
            .canonicalize()
            .ok()
            .or_else(|| normalize(&joined))
            .unwrap_or(joined);
        if seen.insert(key) {
            unique.push(target.clone());
        } else {
            warn!(target = %target.display(), "duplicate target skipped");
        }
    }
    unique
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

fn is_eligible(path: &Path, targets: &TargetConfig) -> bool {
    let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
        return false;
    };
    if !targets.extensions.iter().any(|allowed| allowed == ext) {
        return false;
    }
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy())
        .unwrap_or_default();
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy())
        .unwrap_or_default();
    if targets
        .exclude_prefixes
        .iter()
        .any(|prefix| name.starts_with(prefix.as_str()))
    {
        return false;
    }
    !targets
        .exclude_suffixes
        .iter()
        .any(|suffix| stem.ends_with(suffix.as_str()))
}

/// Repair every target with at most `jobs` runs in flight.
///
/// Reports come back in target order.
pub fn run_batch<B, R>(
    orchestrator: &Orchestrator<B, R>,
    targets: &[PathBuf],
    jobs: usize,
    max_iterations: u32,
    failure_budget: u32,
) -> Vec<FinalReport>
where
    B: Backend,
    R: TestRunner,
{
    let workers = jobs.clamp(1, targets.len().max(1));
    info!(targets = targets.len(), workers, "batch started");
    let next = AtomicUsize::new(0);
    let reports: Mutex<Vec<Option<FinalReport>>> = Mutex::new(vec![None; targets.len()]);

    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| {
                loop {
                    let idx = next.fetch_add(1, Ordering::SeqCst);
                    let Some(target) = targets.get(idx) else {
                        break;
                    };
                    let report = orchestrator.run(target, max_iterations, failure_budget);
                    if let Ok(mut reports) = reports.lock() {
                        reports[idx] = Some(report);
                    }
                }
            });
        }
    });

    reports
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .into_iter()
        .flatten()
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::core::types::RunStatus;
    use crate::error::Role;
    use crate::io::backend::BackendRequest;
    use crate::io::recorder::{ExperimentRecorder, MemoryRecorder};
    use crate::test_support::{ScriptedTestRunner, TestSandbox, findings_response};

    struct CleanBackend;

    impl Backend for CleanBackend {
        fn complete(&self, request: &BackendRequest) -> Result<String> {
            assert_eq!(request.role, Role::Auditor);
            Ok(findings_response(&[]))
        }
    }

    #[test]
    fn discovery_skips_tests_hidden_dirs_and_other_extensions() {
        let sandbox = TestSandbox::new().expect("sandbox");
        for rel in [
            "calc.py",
            "pkg/util.py",
            "test_calc.py",
            "pkg/util_test.py",
            "notes.txt",
            ".swarm/specs/run-1/test_calc.py",
            ".venv/lib/site.py",
        ] {
            sandbox.write(rel, "x = 1\n").expect("write");
        }

        let targets =
            discover_targets(sandbox.path(), &TargetConfig::default()).expect("discover");
        assert_eq!(
            targets,
            vec![PathBuf::from("calc.py"), PathBuf::from("pkg/util.py")]
        );
    }

    #[test]
    fn duplicate_spellings_of_one_target_are_dropped() {
        let sandbox = TestSandbox::new().expect("sandbox");
        sandbox.write("a.py", "x = 1\n").expect("write a");
        sandbox.write("pkg/b.py", "x = 1\n").expect("write b");
        let root = sandbox.path().canonicalize().expect("root");

        let targets = dedup_targets(
            &root,
            &[
                PathBuf::from("a.py"),
                PathBuf::from("./a.py"),
                PathBuf::from("pkg/b.py"),
                PathBuf::from("pkg/../a.py"),
                root.join("pkg/b.py"),
                PathBuf::from("missing.py"),
                PathBuf::from("./missing.py"),
            ],
        );
        assert_eq!(
            targets,
            vec![
                PathBuf::from("a.py"),
                PathBuf::from("pkg/b.py"),
                PathBuf::from("missing.py"),
            ]
        );
    }

    #[test]
    fn batch_reports_every_target_in_order() {
        let sandbox = TestSandbox::new().expect("sandbox");
        let targets: Vec<PathBuf> = (0..5)
            .map(|n| {
                let rel = format!("mod_{n}.py");
                sandbox.write(&rel, "x = 1\n").expect("write");
                PathBuf::from(rel)
            })
            .collect();
        let recorder = Arc::new(MemoryRecorder::new());
        let orchestrator = Orchestrator::new(
            sandbox.path(),
            sandbox.config(3, 2),
            CleanBackend,
            ScriptedTestRunner::new(Vec::new()),
            recorder.clone(),
        );

        let reports = run_batch(&orchestrator, &targets, 3, 3, 2);
        let artifacts: Vec<PathBuf> = reports.iter().map(|r| r.artifact.clone()).collect();
        assert_eq!(artifacts, targets);
        assert!(reports.iter().all(|r| r.status == RunStatus::Done));

        let mut run_ids = HashSet::new();
        for report in &reports {
            assert_eq!(recorder.query(&report.run_id).expect("query").len(), 1);
            assert!(run_ids.insert(report.run_id.clone()));
        }
    }
}
