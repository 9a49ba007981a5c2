//! Judge role: verdicts for staged candidates.
//!
//! The test file is resolved once per run and reused for every candidate, so
//! two candidates are always judged by the same test. Resolution order is the
//! configured `judge.test_path`, then a conventional sibling of the artifact,
//! then a test generated by the backend and persisted under the run's specs
//! directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument, warn};

use crate::core::classifier::{classify_report, timeout_verdict};
use crate::core::completeness::check_completeness;
use crate::core::payload::{AgentPayload, PayloadKind};
use crate::core::sandbox::resolve_within;
use crate::core::types::{TestOrigin, TestSpec, Verdict};
use crate::error::{Role, SwarmError, find_swarm_error};
use crate::io::backend::Backend;
use crate::io::config::{BackendConfig, JudgeConfig, write_atomic};
use crate::io::file_guard::{ArtifactSnapshot, StagedHandle};
use crate::io::prompt::PromptEngine;
use crate::io::test_runner::{TestRequest, TestRunner};

use super::request_payload;

pub struct Judge {
    prompts: PromptEngine,
    backend: BackendConfig,
    config: JudgeConfig,
    root: PathBuf,
    specs_dir: PathBuf,
    spec: Option<TestSpec>,
}

impl Judge {
    /// `root` is the canonical sandbox root; generated tests go to `specs_dir`.
    pub fn new(
        backend: BackendConfig,
        config: JudgeConfig,
        root: impl Into<PathBuf>,
        specs_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            prompts: PromptEngine::new(),
            backend,
            config,
            root: root.into(),
            specs_dir: specs_dir.into(),
            spec: None,
        }
    }

    /// Test file fixed for this run, once the first candidate was judged.
    pub fn test_spec(&self) -> Option<&TestSpec> {
        self.spec.as_ref()
    }

    /// Run the run's test against the staged candidate.
    ///
    /// `snapshot` is the committed artifact the candidate was derived from; it
    /// seeds test generation on first use.
    #[instrument(skip_all, fields(artifact = %snapshot.path.display(), candidate = %handle.checksum().short()))]
    pub fn validate<B, R>(
        &mut self,
        backend: &B,
        runner: &R,
        snapshot: &ArtifactSnapshot,
        handle: &StagedHandle,
    ) -> Result<Verdict>
    where
        B: Backend + ?Sized,
        R: TestRunner + ?Sized,
    {
        if self.spec.is_none() {
            let spec = self.resolve(backend, snapshot)?;
            info!(test = %spec.file_name, origin = ?spec.origin, "test resolved");
            self.spec = Some(spec);
        }
        let spec = self.spec.clone().context("test spec unresolved")?;

        let request = TestRequest {
            candidate_name: file_name(&snapshot.path)?,
            candidate: handle.content().to_string(),
            test_name: spec.file_name,
            test: spec.content,
            timeout: self.config.timeout(),
        };
        let verdict = match runner.run(&request) {
            Ok(report) => classify_report(report.passed, &report.report),
            Err(err) => {
                let timed_out = match find_swarm_error(&err) {
                    Some(SwarmError::ValidationTimeout { secs }) => Some(*secs),
                    _ => None,
                };
                let Some(secs) = timed_out else {
                    return Err(err.context("run tests"));
                };
                warn!(secs, "candidate timed out");
                timeout_verdict(secs, "")
            }
        };
        info!(passed = verdict.passed(), reason = ?verdict.failure_reason(), "verdict");
        Ok(verdict)
    }

    fn resolve<B: Backend + ?Sized>(&self, backend: &B, snapshot: &ArtifactSnapshot) -> Result<TestSpec> {
        if let Some(configured) = &self.config.test_path {
            let path = self.contained(configured)?;
            if !path.is_file() {
                return Err(anyhow!(
                    "judge.test_path {} is not a file",
                    configured.display()
                ));
            }
            return self.existing(&path);
        }

        for candidate in sibling_tests(&snapshot.path) {
            let path = self.contained(&candidate)?;
            if path.is_file() {
                return self.existing(&path);
            }
        }

        self.generate(backend, snapshot)
    }

    fn existing(&self, path: &Path) -> Result<TestSpec> {
        let content =
            fs::read_to_string(path).with_context(|| format!("read test {}", path.display()))?;
        Ok(TestSpec {
            file_name: file_name(path)?,
            content,
            origin: TestOrigin::Existing {
                path: self.relative(path),
            },
        })
    }

    fn generate<B: Backend + ?Sized>(&self, backend: &B, snapshot: &ArtifactSnapshot) -> Result<TestSpec> {
        let artifact_name = file_name(&snapshot.path)?;
        let default_name = format!("test_{artifact_name}");
        let prompt = self
            .prompts
            .render_test_writer(
                &snapshot.path,
                &snapshot.content,
                &default_name,
                self.config.timeout_secs,
            )
            .context("render test writer prompt")?;

        let (test_name, content) = request_payload(
            backend,
            &self.backend,
            Role::Judge,
            &prompt,
            PayloadKind::TestSpec,
            |payload| match payload {
                AgentPayload::TestSpec { file_name, content } => {
                    let name = file_name.unwrap_or_else(|| default_name.clone());
                    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
                        return Err(format!("test file name must be a plain file name, got {name:?}"));
                    }
                    if name == artifact_name {
                        return Err(format!("test file must not be named like the artifact ({name})"));
                    }
                    match check_completeness(Path::new(&name), &content) {
                        Some(problem) => Err(format!("test content is incomplete: {problem}")),
                        None => Ok((name, content)),
                    }
                }
                other => Err(format!("expected test_spec, got {other:?}")),
            },
        )?;

        let path = self.specs_dir.join(&test_name);
        write_atomic(&path, content.as_bytes())
            .with_context(|| format!("persist generated test {}", path.display()))?;
        Ok(TestSpec {
            file_name: test_name,
            content,
            origin: TestOrigin::Generated {
                path: self.relative(&path),
            },
        })
    }

    /// Resolve `path` inside the sandbox, following symlinks of existing files.
    fn contained(&self, path: &Path) -> Result<PathBuf> {
        let lexical = resolve_within(&self.root, path)?;
        if !lexical.exists() {
            return Ok(lexical);
        }
        let resolved = lexical
            .canonicalize()
            .with_context(|| format!("resolve {}", lexical.display()))?;
        if !resolved.starts_with(&self.root) {
            return Err(SwarmError::SandboxViolation {
                path: resolved,
                root: self.root.clone(),
            }
            .into());
        }
        Ok(resolved)
    }

    fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root).unwrap_or(path).to_path_buf()
    }
}

/// Conventional test locations for `artifact`, most specific first.
fn sibling_tests(artifact: &Path) -> Vec<PathBuf> {
    let Some(dir) = artifact.parent() else {
        return Vec::new();
    };
    let Some(name) = artifact.file_name().and_then(|name| name.to_str()) else {
        return Vec::new();
    };
    let mut candidates = vec![dir.join(format!("test_{name}"))];
    if let (Some(stem), Some(ext)) = (
        artifact.file_stem().and_then(|stem| stem.to_str()),
        artifact.extension().and_then(|ext| ext.to_str()),
    ) {
        candidates.push(dir.join(format!("{stem}_test.{ext}")));
    }
    candidates.push(dir.join("tests").join(format!("test_{name}")));
    candidates
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("{} has no UTF-8 file name", path.display()))
}
