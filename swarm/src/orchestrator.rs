//! Orchestration of a single artifact repair run.
//!
//! One run owns a [`FileGuard`] over its artifact and a [`SwarmState`], and
//! loops audit → fix → judge until the artifact is clean, a budget is spent,
//! or an unrecoverable error occurs. Every iteration that started is appended
//! to the experiment recorder, and every run ends with a [`FinalReport`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{error, info, info_span, warn};

use crate::agents::auditor::Auditor;
use crate::agents::fixer::Fixer;
use crate::agents::judge::Judge;
use crate::core::state_machine::{Event, Limits, Phase, SwarmState};
use crate::core::types::{FinalReport, IterationOutcome, IterationRecord, RunStatus, Verdict};
use crate::error::{ErrorKind, ErrorReport, SwarmError, classify};
use crate::io::backend::Backend;
use crate::io::config::SwarmConfig;
use crate::io::file_guard::FileGuard;
use crate::io::init::SwarmPaths;
use crate::io::recorder::{ExperimentRecorder, new_run_id};
use crate::io::test_runner::TestRunner;

/// Cooperative stop request, checked between iterations.
///
/// Cancelled by [`CancelToken::cancel`] or by the presence of a stop file.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    stop_file: Option<PathBuf>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stop_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.stop_file = Some(path.into());
        self
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self.stop_file.as_ref().is_some_and(|path| path.exists())
    }
}

/// Drives repair runs over artifacts of one sandbox root.
///
/// `run` takes `&self`, so one orchestrator serves concurrent runs.
pub struct Orchestrator<B, R> {
    backend: B,
    runner: R,
    recorder: Arc<dyn ExperimentRecorder>,
    paths: SwarmPaths,
    auditor: Auditor,
    fixer: Fixer,
    config: SwarmConfig,
    cancel: CancelToken,
}

impl<B: Backend, R: TestRunner> Orchestrator<B, R> {
    /// `root` is the sandbox root; the default cancel token watches `.swarm/STOP` in it.
    pub fn new(
        root: &Path,
        config: SwarmConfig,
        backend: B,
        runner: R,
        recorder: Arc<dyn ExperimentRecorder>,
    ) -> Self {
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let paths = SwarmPaths::new(root);
        let cancel = CancelToken::new().with_stop_file(paths.stop_path.clone());
        Self {
            auditor: Auditor::new(config.backend.clone()),
            fixer: Fixer::new(config.backend.clone(), config.fixer.clone()),
            backend,
            runner,
            recorder,
            paths,
            config,
            cancel,
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Repair `target` (relative to the sandbox root unless absolute).
    ///
    /// Never fails: errors end the run as `FAILED` and are reported in the result.
    pub fn run(&self, target: &Path, max_iterations: u32, failure_budget: u32) -> FinalReport {
        let started_at = Utc::now();
        let run_id = new_run_id(started_at, target);
        let span = info_span!("run", %run_id, artifact = %target.display());
        let _entered = span.enter();
        info!(max_iterations, failure_budget, "run started");

        let mut state = SwarmState::new(Limits {
            max_iterations,
            failure_budget,
        });

        let guard = FileGuard::open(
            &self.paths.root,
            target,
            &self.paths.staging_dir,
            &run_id,
        );
        let (artifact, artifact_checksum, last_error) = match guard {
            Ok(mut guard) => {
                let last_error = self.drive(&run_id, &mut state, &mut guard);
                (
                    guard.relative_artifact_path().to_path_buf(),
                    Some(guard.committed_checksum().clone()),
                    last_error,
                )
            }
            Err(err) => {
                let report = classify(&err.context("open artifact"));
                error!(kind = %report.kind, message = %report.message, "run failed before first iteration");
                fault(&mut state);
                (target.to_path_buf(), None, Some(report))
            }
        };

        let status = state.phase().run_status().unwrap_or(RunStatus::Failed);
        let report = FinalReport {
            run_id,
            artifact,
            status,
            iterations: state.iteration(),
            commits: state.commits(),
            rollbacks: state.rollbacks(),
            exhausted_by: state.exhausted_by(),
            last_error,
            artifact_checksum,
            started_at,
            finished_at: Utc::now(),
        };
        if let Err(err) = self.recorder.finish(&report) {
            error!(err = %format!("{err:#}"), "failed to store final report");
        }
        info!(
            status = report.status.as_str(),
            iterations = report.iterations,
            commits = report.commits,
            rollbacks = report.rollbacks,
            "run finished"
        );
        report
    }

    /// Loop until the state machine reaches a terminal phase. Returns the error that ended the run, if any.
    fn drive(&self, run_id: &str, state: &mut SwarmState, guard: &mut FileGuard) -> Option<ErrorReport> {
        let root = guard.root().to_path_buf();
        let mut judge = Judge::new(
            self.config.backend.clone(),
            self.config.judge.clone(),
            root.clone(),
            SwarmPaths::new(&root).run_specs_dir(run_id),
        );
        let mut feedback: Option<Verdict> = None;
        let mut last_error = None;

        loop {
            if self.cancel.is_cancelled() {
                warn!(iteration = state.iteration(), "run cancelled");
                terminate(state, Event::Cancel);
                let err = anyhow::Error::from(SwarmError::Cancelled);
                return Some(classify(&err));
            }
            match state.apply(Event::Begin) {
                Ok(Phase::Auditing) => {}
                Ok(phase) => {
                    info!(?phase, exhausted_by = ?state.exhausted_by(), "budget spent");
                    return last_error;
                }
                Err(err) => {
                    fault(state);
                    return Some(classify(&anyhow::Error::from(err)));
                }
            }

            let iteration = state.iteration();
            let mut record = IterationRecord {
                run_id: run_id.to_string(),
                iteration,
                timestamp: Utc::now(),
                artifact_checksum: Some(guard.committed_checksum().clone()),
                findings: Vec::new(),
                patch: None,
                verdict: None,
                outcome: IterationOutcome::Failed,
                error: None,
            };

            let result = {
                let _iter = info_span!("iteration", iteration).entered();
                self.iterate(state, guard, &mut judge, feedback.as_ref(), &mut record)
            };
            if let Err(err) = result {
                let report = classify(&err);
                error!(iteration, kind = %report.kind, message = %report.message, "iteration failed");
                fault(state);
                record.outcome = IterationOutcome::Failed;
                record.error = Some(report.clone());
                last_error = Some(report);
            }

            if let Err(err) = self.recorder.append(run_id, &record) {
                let err = err.context(format!("record iteration {iteration}"));
                error!(err = %format!("{err:#}"), "failed to append iteration record");
                if !state.phase().is_terminal() {
                    fault(state);
                }
                return Some(classify(&err));
            }

            if state.phase().is_terminal() {
                if state.phase() == Phase::Exhausted {
                    info!(exhausted_by = ?state.exhausted_by(), "budget spent");
                }
                return last_error;
            }
            feedback = record.verdict.filter(|verdict| !verdict.passed());
        }
    }

    /// One audit → fix → judge pass. Fills `record` as it goes.
    fn iterate(
        &self,
        state: &mut SwarmState,
        guard: &mut FileGuard,
        judge: &mut Judge,
        feedback: Option<&Verdict>,
        record: &mut IterationRecord,
    ) -> Result<()> {
        let snapshot = guard.snapshot().context("read committed artifact")?;
        record.artifact_checksum = Some(snapshot.checksum.clone());

        let findings = self
            .auditor
            .analyze(&self.backend, &snapshot, feedback)
            .context("audit")?;
        record.findings = findings.clone();
        if state.apply(Event::Findings {
            count: findings.len(),
        })? == Phase::Done
        {
            info!("no findings left");
            record.outcome = IterationOutcome::Clean;
            return Ok(());
        }

        let patch = self
            .fixer
            .apply(&self.backend, &snapshot, &findings)
            .context("fix")?;
        record.patch = Some(patch.clone());
        let handle = guard.stage(&patch.content).context("stage candidate")?;
        state.apply(Event::Staged)?;

        let verdict = match judge.validate(&self.backend, &self.runner, &snapshot, &handle) {
            Ok(verdict) => verdict,
            Err(err) => {
                if let Err(rollback_err) = guard.rollback(handle) {
                    warn!(err = %format!("{err:#}"), "judge failed before rollback error");
                    return Err(rollback_err.context("roll back after judge failure"));
                }
                return Err(err.context("judge"));
            }
        };
        record.verdict = Some(verdict.clone());

        if verdict.passed() {
            guard.commit(handle).context("commit candidate")?;
            state.apply(Event::Judged { passed: true })?;
            info!(checksum = guard.committed_checksum().short(), "candidate committed");
            record.outcome = IterationOutcome::Committed;
        } else {
            guard.rollback(handle).context("roll back candidate")?;
            state.apply(Event::Judged { passed: false })?;
            warn!(
                reason = ?verdict.failure_reason(),
                consecutive_failures = state.consecutive_failures(),
                "candidate rolled back"
            );
            record.outcome = IterationOutcome::RolledBack;
        }
        Ok(())
    }
}

fn fault(state: &mut SwarmState) {
    terminate(state, Event::Fault);
}

/// Apply a terminating event. A run that already ended keeps its phase.
fn terminate(state: &mut SwarmState, event: Event) -> Phase {
    match state.apply(event) {
        Ok(phase) => phase,
        Err(err) => {
            warn!(%err, "run already ended");
            state.phase()
        }
    }
}

/// Exit-status ordering of run statuses: `FAILED` > `EXHAUSTED` > `DONE`.
pub fn worst_status(statuses: impl IntoIterator<Item = RunStatus>) -> RunStatus {
    statuses
        .into_iter()
        .max_by_key(|status| match status {
            RunStatus::Done => 0,
            RunStatus::Exhausted => 1,
            RunStatus::Failed => 2,
        })
        .unwrap_or(RunStatus::Done)
}

/// Error kind that ended a run, if it ended on an error.
pub fn failure_kind(report: &FinalReport) -> Option<ErrorKind> {
    report.last_error.as_ref().map(|err| err.kind)
}
