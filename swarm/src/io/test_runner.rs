//! Test-execution port.
//!
//! The judge never runs tests against the live artifact. A [`TestRunner`]
//! receives the candidate content and the test file, and executes them in a
//! scratch directory of its own.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::error::SwarmError;
use crate::io::config::JudgeConfig;
use crate::io::process::run_command_with_timeout;

/// Inputs for one isolated test execution.
#[derive(Debug, Clone)]
pub struct TestRequest {
    /// File name the candidate is written under (the artifact's own name).
    pub candidate_name: String,
    pub candidate: String,
    pub test_name: String,
    pub test: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestReport {
    pub passed: bool,
    pub report: String,
    pub duration: Duration,
}

/// Abstraction over test sandboxes.
pub trait TestRunner: Send + Sync {
    /// Run the test against the candidate.
    ///
    /// Returns `SwarmError::ValidationTimeout` in the chain when the time budget is exceeded.
    fn run(&self, request: &TestRequest) -> Result<TestReport>;
}

static NEXT_WORKDIR: AtomicU64 = AtomicU64::new(1);

/// Runs the configured test command in a fresh directory under `scratch_dir`.
#[derive(Debug, Clone)]
pub struct CommandTestRunner {
    command: Vec<String>,
    root: PathBuf,
    scratch_dir: PathBuf,
    output_limit_bytes: usize,
}

impl CommandTestRunner {
    pub fn new(config: &JudgeConfig, root: impl Into<PathBuf>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: config.command.clone(),
            root: root.into(),
            scratch_dir: scratch_dir.into(),
            output_limit_bytes: config.output_limit_bytes,
        }
    }

    fn create_workdir(&self) -> Result<PathBuf> {
        let dir = self.scratch_dir.join(format!(
            "{}-{}",
            std::process::id(),
            NEXT_WORKDIR.fetch_add(1, Ordering::Relaxed)
        ));
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .with_context(|| format!("clear stale workdir {}", dir.display()))?;
        }
        fs::create_dir_all(&dir).with_context(|| format!("create workdir {}", dir.display()))?;
        Ok(dir)
    }
}

/// Substitute `{test}`, `{candidate}`, `{workdir}` and `{root}` in one argument.
pub fn substitute(arg: &str, test: &Path, candidate: &Path, workdir: &Path, root: &Path) -> String {
    arg.replace("{test}", &test.to_string_lossy())
        .replace("{candidate}", &candidate.to_string_lossy())
        .replace("{workdir}", &workdir.to_string_lossy())
        .replace("{root}", &root.to_string_lossy())
}

fn plain_file_name(name: &str) -> Result<&str> {
    let path = Path::new(name);
    match path.file_name() {
        Some(file) if file == path.as_os_str() && !name.starts_with('.') => Ok(name),
        _ => Err(anyhow!("'{name}' is not a plain file name")),
    }
}

impl TestRunner for CommandTestRunner {
    #[instrument(skip_all, fields(candidate = %request.candidate_name, test = %request.test_name))]
    fn run(&self, request: &TestRequest) -> Result<TestReport> {
        let candidate_name = plain_file_name(&request.candidate_name)?;
        let test_name = plain_file_name(&request.test_name)?;
        if candidate_name == test_name {
            return Err(anyhow!("test file and candidate share the name '{test_name}'"));
        }

        let workdir = self.create_workdir()?;
        let result = (|| -> Result<TestReport> {
            let candidate_path = workdir.join(candidate_name);
            let test_path = workdir.join(test_name);
            fs::write(&candidate_path, &request.candidate)
                .with_context(|| format!("write {}", candidate_path.display()))?;
            fs::write(&test_path, &request.test)
                .with_context(|| format!("write {}", test_path.display()))?;

            let args: Vec<String> = self
                .command
                .iter()
                .map(|arg| substitute(arg, &test_path, &candidate_path, &workdir, &self.root))
                .collect();
            let (program, rest) = args
                .split_first()
                .ok_or_else(|| anyhow!("judge.command is empty"))?;
            let mut cmd = Command::new(program);
            cmd.args(rest)
                .current_dir(&workdir)
                .env("SWARM_ROOT", &self.root)
                .env("SWARM_WORKDIR", &workdir);

            debug!(command = %args.join(" "), "running tests");
            let started = Instant::now();
            let output =
                run_command_with_timeout(cmd, None, request.timeout, self.output_limit_bytes)
                    .with_context(|| format!("run test command `{}`", args.join(" ")))?;
            let duration = started.elapsed();

            if output.timed_out {
                warn!(timeout_secs = request.timeout.as_secs(), "tests timed out");
                return Err(SwarmError::ValidationTimeout {
                    secs: request.timeout.as_secs(),
                }
                .into());
            }
            let passed = output.status.success();
            info!(passed, exit_code = ?output.status.code(), "tests finished");
            Ok(TestReport {
                passed,
                report: output.combined_text("tests"),
                duration,
            })
        })();

        if let Err(err) = fs::remove_dir_all(&workdir) {
            warn!(dir = %workdir.display(), err = %err, "failed to remove test workdir");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, classify};

    fn request(test: &str) -> TestRequest {
        TestRequest {
            candidate_name: "calc.py".to_string(),
            candidate: "def add(a, b):\n    return a + b\n".to_string(),
            test_name: "test_calc.py".to_string(),
            test: test.to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    fn runner(temp: &Path, command: &[&str]) -> CommandTestRunner {
        CommandTestRunner::new(
            &JudgeConfig {
                command: command.iter().map(|s| s.to_string()).collect(),
                ..JudgeConfig::default()
            },
            temp,
            temp.join(".swarm/judge"),
        )
    }

    #[test]
    fn substitute_replaces_all_placeholders() {
        let arg = substitute(
            "{workdir}/{test}:{candidate}@{root}",
            Path::new("t.py"),
            Path::new("c.py"),
            Path::new("/w"),
            Path::new("/r"),
        );
        assert_eq!(arg, "/w/t.py:c.py@/r");
    }

    #[test]
    fn rejects_nested_file_names() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = runner(temp.path(), &["true", "{test}"]);
        let mut req = request("x");
        req.test_name = "../test_calc.py".to_string();
        assert!(runner.run(&req).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn runs_in_isolated_workdir_and_cleans_up() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = runner(
            temp.path(),
            &["sh", "-c", "cat calc.py {test} && test -n \"$SWARM_WORKDIR\"", "{test}"],
        );
        let report = runner.run(&request("# test body\n")).expect("run");
        assert!(report.passed, "{}", report.report);
        assert!(report.report.contains("return a + b"));
        assert!(report.report.contains("# test body"));
        let leftovers = fs::read_dir(temp.path().join(".swarm/judge"))
            .expect("read scratch")
            .count();
        assert_eq!(leftovers, 0);
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_is_not_passed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = runner(temp.path(), &["sh", "-c", "echo 'assert 3 == 4'; exit 1", "{test}"]);
        let report = runner.run(&request("x")).expect("run");
        assert!(!report.passed);
        assert!(report.report.contains("assert 3 == 4"));
    }

    #[cfg(unix)]
    #[test]
    fn timeout_is_validation_timeout_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = runner(temp.path(), &["sh", "-c", "exec sleep 5", "{test}"]);
        let mut req = request("x");
        req.timeout = Duration::from_millis(200);
        let err = runner.run(&req).expect_err("timeout");
        assert_eq!(classify(&err).kind, ErrorKind::ValidationTimeout);
    }
}
