//! Error taxonomy for repair runs.
//!
//! Components return `anyhow::Result` with context attached at each boundary.
//! The typed [`SwarmError`] rides inside that chain so the orchestrator can
//! classify a failure with [`classify`] without string matching.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Role of a backend collaborator, used in error messages and prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Auditor,
    Fixer,
    Judge,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Auditor => "auditor",
            Role::Fixer => "fixer",
            Role::Judge => "judge",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("{role} backend unreachable after {attempts} attempt(s): {message}")]
    AgentCommunication {
        role: Role,
        attempts: u32,
        message: String,
    },

    #[error("{role} response unusable after {attempts} attempt(s): {message}")]
    AgentResponseParse {
        role: Role,
        attempts: u32,
        message: String,
    },

    #[error("patch could not be applied: {0}")]
    PatchApplication(String),

    #[error("validation timed out after {secs}s")]
    ValidationTimeout { secs: u64 },

    #[error("path {} escapes sandbox root {}", path.display(), root.display())]
    SandboxViolation { path: PathBuf, root: PathBuf },

    #[error("artifact {} changed outside the run (expected {expected}, found {actual})", path.display())]
    CorruptedArtifact {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("run cancelled")]
    Cancelled,
}

impl SwarmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SwarmError::AgentCommunication { .. } => ErrorKind::AgentCommunication,
            SwarmError::AgentResponseParse { .. } => ErrorKind::AgentResponseParse,
            SwarmError::PatchApplication(_) => ErrorKind::PatchApplication,
            SwarmError::ValidationTimeout { .. } => ErrorKind::ValidationTimeout,
            SwarmError::SandboxViolation { .. } => ErrorKind::SandboxViolation,
            SwarmError::CorruptedArtifact { .. } => ErrorKind::CorruptedArtifact,
            SwarmError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Serialized name of a failure class in reports and the experiment log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "AgentCommunicationError")]
    AgentCommunication,
    #[serde(rename = "AgentResponseParseError")]
    AgentResponseParse,
    #[serde(rename = "PatchApplicationError")]
    PatchApplication,
    #[serde(rename = "ValidationTimeoutError")]
    ValidationTimeout,
    #[serde(rename = "SandboxViolationError")]
    SandboxViolation,
    #[serde(rename = "CorruptedArtifactError")]
    CorruptedArtifact,
    Cancelled,
    /// Filesystem or process failure with no more specific class.
    IoError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::AgentCommunication => "AgentCommunicationError",
            ErrorKind::AgentResponseParse => "AgentResponseParseError",
            ErrorKind::PatchApplication => "PatchApplicationError",
            ErrorKind::ValidationTimeout => "ValidationTimeoutError",
            ErrorKind::SandboxViolation => "SandboxViolationError",
            ErrorKind::CorruptedArtifact => "CorruptedArtifactError",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::IoError => "IoError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error summary persisted in records and final reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

/// Find the first [`SwarmError`] in the chain of `err`.
pub fn find_swarm_error(err: &anyhow::Error) -> Option<&SwarmError> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<SwarmError>())
}

/// Classify an error for reporting. Errors without a typed cause are `IoError`.
pub fn classify(err: &anyhow::Error) -> ErrorReport {
    let kind = find_swarm_error(err).map_or(ErrorKind::IoError, SwarmError::kind);
    ErrorReport {
        kind,
        message: format!("{err:#}"),
    }
}
