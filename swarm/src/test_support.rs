//! Scripted collaborators and fixtures for tests.
//!
//! Enabled for unit tests and, through the `test-support` feature, for the
//! integration tests under `tests/`.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use serde_json::json;

use crate::core::types::{Finding, Location, Severity};
use crate::error::{Role, SwarmError};
use crate::io::backend::{Backend, BackendRequest};
use crate::io::config::{BackendConfig, SwarmConfig};
use crate::io::test_runner::{TestReport, TestRequest, TestRunner};

/// One scripted backend answer.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Raw response text.
    Text(String),
    /// Transport failure with this message.
    Fail(String),
}

/// Backend returning queued replies in order, recording every request.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<BackendRequest>>,
}

impl ScriptedBackend {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .expect("requests lock")
            .iter()
            .map(|request| request.prompt.clone())
            .collect()
    }

    pub fn roles(&self) -> Vec<Role> {
        self.requests
            .lock()
            .expect("requests lock")
            .iter()
            .map(|request| request.role)
            .collect()
    }

    pub fn assert_drained(&self) {
        let left = self.replies.lock().expect("replies lock").len();
        assert_eq!(left, 0, "scripted backend has {left} unused replies");
    }
}

impl Backend for ScriptedBackend {
    fn complete(&self, request: &BackendRequest) -> Result<String> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        let reply = self.replies.lock().expect("replies lock").pop_front();
        match reply {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Fail(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted backend has no reply left for {}", request.role)),
        }
    }
}

/// One scripted test execution.
#[derive(Debug, Clone)]
pub enum RunReply {
    Pass(String),
    Fail(String),
    /// The run exceeds its time budget.
    Timeout,
    /// The runner itself fails.
    Error(String),
}

/// Test runner returning queued results in order, recording every request.
#[derive(Debug, Default)]
pub struct ScriptedTestRunner {
    replies: Mutex<VecDeque<RunReply>>,
    requests: Mutex<Vec<TestRequest>>,
}

impl ScriptedTestRunner {
    pub fn new(replies: Vec<RunReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<TestRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn assert_drained(&self) {
        let left = self.replies.lock().expect("replies lock").len();
        assert_eq!(left, 0, "scripted test runner has {left} unused replies");
    }
}

impl TestRunner for ScriptedTestRunner {
    fn run(&self, request: &TestRequest) -> Result<TestReport> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        let reply = self.replies.lock().expect("replies lock").pop_front();
        let (passed, report) = match reply {
            Some(RunReply::Pass(report)) => (true, report),
            Some(RunReply::Fail(report)) => (false, report),
            Some(RunReply::Timeout) => {
                return Err(SwarmError::ValidationTimeout {
                    secs: request.timeout.as_secs(),
                }
                .into());
            }
            Some(RunReply::Error(message)) => return Err(anyhow!(message)),
            None => return Err(anyhow!("scripted test runner has no reply left")),
        };
        Ok(TestReport {
            passed,
            report,
            duration: std::time::Duration::from_millis(1),
        })
    }
}

pub fn finding(severity: Severity, line: u32, category: &str) -> Finding {
    Finding {
        category: category.to_string(),
        severity,
        location: Location { line, column: None },
        description: format!("{category} issue on line {line}"),
    }
}

pub fn findings_response(findings: &[Finding]) -> String {
    json!({ "kind": "findings", "findings": findings }).to_string()
}

pub fn patch_response(content: &str) -> String {
    json!({
        "kind": "patch",
        "content": content,
        "rationale": "scripted fix",
    })
    .to_string()
}

pub fn test_spec_response(file_name: Option<&str>, content: &str) -> String {
    let mut value = json!({ "kind": "test_spec", "content": content });
    if let Some(name) = file_name {
        value["file_name"] = json!(name);
    }
    value.to_string()
}

/// Backend settings for tests: no backoff between retries.
pub fn fast_backend_config() -> BackendConfig {
    BackendConfig {
        retry_delay_ms: 0,
        ..BackendConfig::default()
    }
}

/// Temporary target directory holding artifacts to repair.
pub struct TestSandbox {
    temp: tempfile::TempDir,
}

impl TestSandbox {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create temp dir")?;
        Ok(Self { temp })
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    /// Write `contents` to `rel`, creating parent directories.
    pub fn write(&self, rel: &str, contents: &str) -> Result<PathBuf> {
        let path = self.temp.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    pub fn read(&self, rel: &str) -> Result<String> {
        let path = self.temp.path().join(rel);
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }

    /// Default configuration with the given budgets and no retry backoff.
    pub fn config(&self, max_iterations: u32, failure_budget: u32) -> SwarmConfig {
        SwarmConfig {
            max_iterations,
            failure_budget,
            backend: fast_backend_config(),
            ..SwarmConfig::default()
        }
    }
}
