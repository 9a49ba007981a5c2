//! Backend-driven roles of a repair iteration.
//!
//! Each role renders its prompt, sends it through the [`Backend`] port and
//! decodes one typed payload out of the response. The retry discipline is
//! shared: transport failures and unusable responses both consume an attempt,
//! and a response that fails to parse is answered with a correction note.

use std::thread;

use anyhow::Result;
use tracing::{debug, warn};

use crate::core::payload::{AgentPayload, PayloadKind, parse_payload};
use crate::error::{Role, SwarmError};
use crate::io::backend::{Backend, BackendRequest};
use crate::io::config::BackendConfig;

pub mod auditor;
pub mod fixer;
pub mod judge;

enum Failure {
    Transport(String),
    Unusable(String),
}

/// Ask `backend` for a payload of `kind` and decode it with `decode`.
///
/// `decode` rejects payloads that parsed but are unusable for the role; its
/// message is fed back to the backend like a parse error.
pub(crate) fn request_payload<B, T, F>(
    backend: &B,
    config: &BackendConfig,
    role: Role,
    prompt: &str,
    kind: PayloadKind,
    mut decode: F,
) -> Result<T>
where
    B: Backend + ?Sized,
    F: FnMut(AgentPayload) -> Result<T, String>,
{
    let attempts = config.max_attempts.max(1);
    let mut request = BackendRequest {
        role,
        prompt: prompt.to_string(),
        timeout: config.timeout(),
    };
    let mut last = None;

    for attempt in 1..=attempts {
        if attempt > 1
            && let Some(Failure::Transport(_)) = &last
        {
            let delay = config.retry_delay(attempt - 1);
            if !delay.is_zero() {
                debug!(%role, delay_ms = delay.as_millis() as u64, "backing off");
                thread::sleep(delay);
            }
        }

        let response = match backend.complete(&request) {
            Ok(response) => response,
            Err(err) => {
                warn!(%role, attempt, err = %format!("{err:#}"), "backend call failed");
                last = Some(Failure::Transport(format!("{err:#}")));
                continue;
            }
        };

        let decoded = parse_payload(&response, kind)
            .map_err(|err| err.to_string())
            .and_then(&mut decode);
        match decoded {
            Ok(value) => {
                debug!(%role, attempt, "payload accepted");
                return Ok(value);
            }
            Err(message) => {
                warn!(%role, attempt, %message, "unusable response");
                request.prompt = with_correction(prompt, kind, &message);
                last = Some(Failure::Unusable(message));
            }
        }
    }

    let err = match last {
        Some(Failure::Unusable(message)) => SwarmError::AgentResponseParse {
            role,
            attempts,
            message,
        },
        Some(Failure::Transport(message)) => SwarmError::AgentCommunication {
            role,
            attempts,
            message,
        },
        None => SwarmError::AgentCommunication {
            role,
            attempts,
            message: "no attempt was made".to_string(),
        },
    };
    Err(err.into())
}

fn with_correction(prompt: &str, kind: PayloadKind, message: &str) -> String {
    format!(
        "{prompt}\n\n## Correction\n\nYour previous response was rejected: {message}\n\
         Reply with exactly one JSON object whose \"kind\" is \"{}\".\n",
        kind.as_str()
    )
}
