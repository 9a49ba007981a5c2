//! Swarm configuration stored under `.swarm/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Swarm configuration (TOML).
///
/// Edited by humans; every field has a default so a partial file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SwarmConfig {
    /// Upper bound on iterations per artifact run.
    pub max_iterations: u32,

    /// Consecutive failed validations tolerated before a run is exhausted.
    pub failure_budget: u32,

    /// Concurrent artifact runs for `swarm run` on a directory.
    pub jobs: usize,

    /// Experiment log directory, relative to the target root.
    pub log_dir: PathBuf,

    pub backend: BackendConfig,
    pub fixer: FixerConfig,
    pub judge: JudgeConfig,
    pub targets: TargetConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackendConfig {
    /// Command that reads a prompt on stdin and prints the response on stdout.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    /// Attempts per role call, counting malformed responses and transport failures.
    pub max_attempts: u32,
    /// Delay before the first retry of a failed call; doubles per retry.
    pub retry_delay_ms: u64,
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FixerConfig {
    pub max_findings_per_patch: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JudgeConfig {
    /// Test command. `{test}`, `{candidate}`, `{workdir}` and `{root}` are substituted.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    /// Fixed test file (relative to the target root) used for every artifact.
    pub test_path: Option<PathBuf>,
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TargetConfig {
    /// File extensions (without dot) repaired when a directory is given.
    pub extensions: Vec<String>,
    /// File names starting with one of these are never repaired.
    pub exclude_prefixes: Vec<String>,
    /// File stems ending with one of these are never repaired.
    pub exclude_suffixes: Vec<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "llm".to_string(),
                "-m".to_string(),
                "llama-3.3-70b-versatile".to_string(),
            ],
            timeout_secs: 120,
            max_attempts: 3,
            retry_delay_ms: 1_000,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Default for FixerConfig {
    fn default() -> Self {
        Self {
            max_findings_per_patch: 5,
        }
    }
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            command: ["python", "-m", "pytest", "{test}", "-q", "--tb=short", "-p", "no:cacheprovider"]
                .map(String::from)
                .to_vec(),
            timeout_secs: 30,
            test_path: None,
            output_limit_bytes: 100_000,
        }
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["py".to_string()],
            exclude_prefixes: vec!["test_".to_string()],
            exclude_suffixes: vec!["_test".to_string()],
        }
    }
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            failure_budget: 3,
            jobs: 1,
            log_dir: PathBuf::from(".swarm/logs"),
            backend: BackendConfig::default(),
            fixer: FixerConfig::default(),
            judge: JudgeConfig::default(),
            targets: TargetConfig::default(),
        }
    }
}

const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Delay before retry number `retry` (1-based), capped at 30s.
    pub fn retry_delay(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_delay_ms.saturating_mul(factor)).min(MAX_RETRY_DELAY)
    }
}

impl JudgeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl SwarmConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.failure_budget == 0 {
            return Err(anyhow!("failure_budget must be > 0"));
        }
        if self.jobs == 0 {
            return Err(anyhow!("jobs must be > 0"));
        }
        if self.log_dir.as_os_str().is_empty() {
            return Err(anyhow!("log_dir must not be empty"));
        }
        if self.backend.command.is_empty() || self.backend.command[0].trim().is_empty() {
            return Err(anyhow!("backend.command must be a non-empty array"));
        }
        if self.backend.timeout_secs == 0 {
            return Err(anyhow!("backend.timeout_secs must be > 0"));
        }
        if self.backend.max_attempts == 0 {
            return Err(anyhow!("backend.max_attempts must be > 0"));
        }
        if self.backend.output_limit_bytes == 0 {
            return Err(anyhow!("backend.output_limit_bytes must be > 0"));
        }
        if self.fixer.max_findings_per_patch == 0 {
            return Err(anyhow!("fixer.max_findings_per_patch must be > 0"));
        }
        if self.judge.command.is_empty() || self.judge.command[0].trim().is_empty() {
            return Err(anyhow!("judge.command must be a non-empty array"));
        }
        if !self.judge.command.iter().any(|arg| arg.contains("{test}")) {
            return Err(anyhow!("judge.command must reference {{test}}"));
        }
        if self.judge.timeout_secs == 0 {
            return Err(anyhow!("judge.timeout_secs must be > 0"));
        }
        if self.judge.output_limit_bytes == 0 {
            return Err(anyhow!("judge.output_limit_bytes must be > 0"));
        }
        if self.targets.extensions.is_empty() {
            return Err(anyhow!("targets.extensions must not be empty"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `SwarmConfig::default()`.
pub fn load_config(path: &Path) -> Result<SwarmConfig> {
    if !path.exists() {
        let cfg = SwarmConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: SwarmConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &SwarmConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
}

/// Write `contents` to a sibling temp file, then rename over `path`.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let file_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
