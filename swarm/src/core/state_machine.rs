//! Iteration state machine for a single repair run.
//!
//! The orchestrator owns one [`SwarmState`] per run and mutates it only through
//! [`SwarmState::apply`]. Budgets are checked as soon as a verdict is applied
//! and again on [`Event::Begin`], so a spent budget ends the run before a
//! stop request is looked at and every path back into `Auditing` is bounded.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::{Exhaustion, RunStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Init,
    Auditing,
    Fixing,
    Judging,
    Committed,
    RolledBack,
    Done,
    Exhausted,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Exhausted | Phase::Failed)
    }

    /// Run status for a terminal phase.
    pub fn run_status(self) -> Option<RunStatus> {
        match self {
            Phase::Done => Some(RunStatus::Done),
            Phase::Exhausted => Some(RunStatus::Exhausted),
            Phase::Failed => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// Input driving a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Start the next iteration (or stop on a spent budget).
    Begin,
    /// Auditor finished with `count` findings.
    Findings { count: usize },
    /// Fixer candidate was staged.
    Staged,
    /// Judge returned a verdict.
    Judged { passed: bool },
    /// Unrecoverable error.
    Fault,
    /// Cooperative stop between iterations.
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_iterations: u32,
    pub failure_budget: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} in phase {phase:?}")]
pub struct TransitionError {
    pub phase: Phase,
    pub event: Event,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwarmState {
    limits: Limits,
    phase: Phase,
    iteration: u32,
    consecutive_failures: u32,
    commits: u32,
    rollbacks: u32,
    exhausted_by: Option<Exhaustion>,
}

impl SwarmState {
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            phase: Phase::Init,
            iteration: 0,
            consecutive_failures: 0,
            commits: 0,
            rollbacks: 0,
            exhausted_by: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Index of the current (or last started) iteration, 1-based. Zero before the first.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn commits(&self) -> u32 {
        self.commits
    }

    pub fn rollbacks(&self) -> u32 {
        self.rollbacks
    }

    pub fn exhausted_by(&self) -> Option<Exhaustion> {
        self.exhausted_by
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    pub fn apply(&mut self, event: Event) -> Result<Phase, TransitionError> {
        let next = match (self.phase, event) {
            (phase, _) if phase.is_terminal() => return Err(self.invalid(event)),
            (_, Event::Fault | Event::Cancel) => Phase::Failed,
            (Phase::Init | Phase::Committed | Phase::RolledBack, Event::Begin) => self.begin(),
            (Phase::Auditing, Event::Findings { count: 0 }) => Phase::Done,
            (Phase::Auditing, Event::Findings { .. }) => Phase::Fixing,
            (Phase::Fixing, Event::Staged) => Phase::Judging,
            (Phase::Judging, Event::Judged { passed: true }) => {
                self.commits += 1;
                self.consecutive_failures = 0;
                self.exhaust().unwrap_or(Phase::Committed)
            }
            (Phase::Judging, Event::Judged { passed: false }) => {
                self.rollbacks += 1;
                self.consecutive_failures += 1;
                self.exhaust().unwrap_or(Phase::RolledBack)
            }
            _ => return Err(self.invalid(event)),
        };
        self.phase = next;
        Ok(next)
    }

    fn begin(&mut self) -> Phase {
        if let Some(phase) = self.exhaust() {
            return phase;
        }
        self.iteration += 1;
        Phase::Auditing
    }

    /// `Exhausted` if no further iteration may start. The failure budget is checked first.
    fn exhaust(&mut self) -> Option<Phase> {
        let cause = if self.consecutive_failures >= self.limits.failure_budget {
            Exhaustion::FailureBudget
        } else if self.iteration >= self.limits.max_iterations {
            Exhaustion::IterationBudget
        } else {
            return None;
        };
        self.exhausted_by = Some(cause);
        Some(Phase::Exhausted)
    }

    fn invalid(&self, event: Event) -> TransitionError {
        TransitionError {
            phase: self.phase,
            event,
        }
    }
}
