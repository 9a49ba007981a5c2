//! Auditor role: findings for the current artifact.

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::core::ordering::sort_findings;
use crate::core::payload::{AgentPayload, PayloadKind};
use crate::core::types::{Finding, Verdict};
use crate::error::Role;
use crate::io::backend::Backend;
use crate::io::config::BackendConfig;
use crate::io::file_guard::ArtifactSnapshot;
use crate::io::prompt::PromptEngine;

use super::request_payload;

/// Auditor wrapper owning its prompt engine and call settings.
pub struct Auditor {
    prompts: PromptEngine,
    backend: BackendConfig,
}

impl Auditor {
    pub fn new(backend: BackendConfig) -> Self {
        Self {
            prompts: PromptEngine::new(),
            backend,
        }
    }

    /// Findings for `snapshot`, in canonical order.
    ///
    /// `feedback` is the failed verdict of the previous iteration, if any.
    #[instrument(skip_all, fields(artifact = %snapshot.path.display(), checksum = %snapshot.checksum.short()))]
    pub fn analyze<B: Backend + ?Sized>(
        &self,
        backend: &B,
        snapshot: &ArtifactSnapshot,
        feedback: Option<&Verdict>,
    ) -> Result<Vec<Finding>> {
        let prompt = self
            .prompts
            .render_auditor(&snapshot.path, &snapshot.content, feedback)
            .context("render auditor prompt")?;

        let mut findings = request_payload(
            backend,
            &self.backend,
            Role::Auditor,
            &prompt,
            PayloadKind::Findings,
            |payload| match payload {
                AgentPayload::Findings { findings } => Ok(findings),
                other => Err(format!("expected findings, got {other:?}")),
            },
        )?;
        sort_findings(&mut findings);
        info!(count = findings.len(), "audit finished");
        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::core::checksum::Checksum;
    use crate::core::types::{FailureReason, Severity};
    use crate::error::{ErrorKind, classify};
    use crate::test_support::{Reply, ScriptedBackend, finding, findings_response};

    fn snapshot() -> ArtifactSnapshot {
        let content = "def add(a, b):\n    return a - b\n".to_string();
        ArtifactSnapshot {
            path: PathBuf::from("calc.py"),
            checksum: Checksum::of(content.as_bytes()),
            content,
        }
    }

    fn auditor() -> Auditor {
        Auditor::new(BackendConfig {
            retry_delay_ms: 0,
            ..BackendConfig::default()
        })
    }

    #[test]
    fn findings_are_sorted_and_deduplicated() {
        let low = finding(Severity::Low, 1, "style");
        let high = finding(Severity::High, 2, "bug");
        let backend = ScriptedBackend::new(vec![Reply::Text(format!(
            "Here is what I found:\n```json\n{}\n```",
            findings_response(&[low.clone(), high.clone(), low.clone()])
        ))]);

        let findings = auditor().analyze(&backend, &snapshot(), None).expect("analyze");
        assert_eq!(findings, vec![high, low]);
        backend.assert_drained();
    }

    #[test]
    fn feedback_reaches_the_prompt() {
        let backend = ScriptedBackend::new(vec![Reply::Text(findings_response(&[]))]);
        let verdict = Verdict::Fail {
            reason: FailureReason::AssertionFailed,
            report: "E   assert -1 == 3".to_string(),
        };
        auditor()
            .analyze(&backend, &snapshot(), Some(&verdict))
            .expect("analyze");
        let prompts = backend.prompts();
        assert!(prompts[0].contains("E   assert -1 == 3"));
        assert!(prompts[0].contains("return a - b"));
    }

    #[test]
    fn unparsable_responses_fail_after_max_attempts() {
        let backend = ScriptedBackend::new(vec![Reply::Text("I think it's fine".to_string()); 3]);
        let err = auditor()
            .analyze(&backend, &snapshot(), None)
            .expect_err("parse failure");
        assert_eq!(classify(&err).kind, ErrorKind::AgentResponseParse);
        backend.assert_drained();
    }
}
