//! Language-model backend port.
//!
//! The [`Backend`] trait decouples the roles from the model provider. The
//! shipped [`CommandBackend`] pipes the prompt into a configured command and
//! treats its stdout as the response. Tests use scripted backends that return
//! predetermined responses without spawning processes.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::error::Role;
use crate::io::config::BackendConfig;
use crate::io::process::run_command_with_timeout;

/// One prompt for one role.
#[derive(Debug, Clone)]
pub struct BackendRequest {
    pub role: Role,
    pub prompt: String,
    pub timeout: Duration,
}

/// Abstraction over model providers.
///
/// Implementations must be usable from several runs at once.
pub trait Backend: Send + Sync {
    /// Return the raw response text. Transport failures, timeouts and non-zero exits are errors.
    fn complete(&self, request: &BackendRequest) -> Result<String>;
}

/// Backend that spawns a command per request: prompt on stdin, response on stdout.
///
/// The role is exported as `SWARM_ROLE` so one wrapper script can route roles to different models.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    command: Vec<String>,
    workdir: PathBuf,
    output_limit_bytes: usize,
}

impl CommandBackend {
    pub fn new(config: &BackendConfig, workdir: impl Into<PathBuf>) -> Result<Self> {
        if config.command.is_empty() {
            return Err(anyhow!("backend.command must be a non-empty array"));
        }
        Ok(Self {
            command: config.command.clone(),
            workdir: workdir.into(),
            output_limit_bytes: config.output_limit_bytes,
        })
    }
}

impl Backend for CommandBackend {
    #[instrument(skip_all, fields(role = %request.role, timeout_secs = request.timeout.as_secs()))]
    fn complete(&self, request: &BackendRequest) -> Result<String> {
        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..])
            .current_dir(&self.workdir)
            .env("SWARM_ROLE", request.role.as_str());

        let output = run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            request.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run backend command `{}`", self.command.join(" ")))?;

        if output.timed_out {
            warn!("backend timed out");
            return Err(anyhow!("backend timed out after {:?}", request.timeout));
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(exit_code = ?output.status.code(), "backend failed");
            return Err(anyhow!(
                "backend exited with status {:?}: {}",
                output.status.code(),
                tail(stderr.trim(), 2_000)
            ));
        }
        if output.stdout_truncated > 0 {
            return Err(anyhow!(
                "backend response exceeded {} bytes",
                self.output_limit_bytes
            ));
        }

        // Invalid bytes are replaced and left for the payload parser to reject.
        let response = match String::from_utf8(output.stdout) {
            Ok(response) => response,
            Err(err) => {
                warn!(
                    valid_up_to = err.utf8_error().valid_up_to(),
                    "backend response is not UTF-8"
                );
                String::from_utf8_lossy(err.as_bytes()).into_owned()
            }
        };
        debug!(bytes = response.len(), "backend responded");
        Ok(response)
    }
}

/// Last `max` bytes of `text`, on a char boundary.
pub(crate) fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn backend(script: &str) -> CommandBackend {
        let temp = std::env::temp_dir();
        CommandBackend::new(
            &BackendConfig {
                command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
                ..BackendConfig::default()
            },
            temp,
        )
        .expect("backend")
    }

    fn request(role: Role) -> BackendRequest {
        BackendRequest {
            role,
            prompt: "PROMPT".to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn response_is_stdout_and_role_is_exported() {
        let backend = backend(r#"printf '%s:' "$SWARM_ROLE"; cat"#);
        let response = backend.complete(&request(Role::Fixer)).expect("complete");
        assert_eq!(response, "fixer:PROMPT");
    }

    #[test]
    fn non_zero_exit_is_error_with_stderr() {
        let backend = backend("echo 'rate limited' >&2; exit 3");
        let err = backend.complete(&request(Role::Auditor)).expect_err("fail");
        let message = format!("{err:#}");
        assert!(message.contains("Some(3)"), "{message}");
        assert!(message.contains("rate limited"), "{message}");
    }

    #[test]
    fn timeout_is_error() {
        let backend = backend("exec sleep 5");
        let err = backend
            .complete(&BackendRequest {
                timeout: Duration::from_millis(200),
                ..request(Role::Judge)
            })
            .expect_err("timeout");
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn non_utf8_response_is_an_unusable_reply() {
        use crate::core::payload::PayloadKind;
        use crate::error::{ErrorKind, classify};

        let backend = backend(r"printf 'x\377y'");
        let response = backend.complete(&request(Role::Auditor)).expect("complete");
        assert_eq!(response, "x\u{FFFD}y");

        let config = BackendConfig {
            max_attempts: 2,
            retry_delay_ms: 0,
            ..BackendConfig::default()
        };
        let err = crate::agents::request_payload(
            &backend,
            &config,
            Role::Auditor,
            "PROMPT",
            PayloadKind::Findings,
            |_| Ok(()),
        )
        .expect_err("unusable");
        assert_eq!(classify(&err).kind, ErrorKind::AgentResponseParse);
    }

    #[test]
    fn tail_respects_char_boundaries() {
        assert_eq!(tail("héllo", 4), "llo");
        assert_eq!(tail("abc", 10), "abc");
    }
}
