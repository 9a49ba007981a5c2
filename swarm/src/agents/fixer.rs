//! Fixer role: a full-replacement candidate addressing the top findings.

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument};

use crate::core::completeness::check_completeness;
use crate::core::ordering::select_for_patch;
use crate::core::payload::{AgentPayload, PayloadKind};
use crate::core::types::{Finding, Patch};
use crate::error::Role;
use crate::io::backend::Backend;
use crate::io::config::{BackendConfig, FixerConfig};
use crate::io::file_guard::ArtifactSnapshot;
use crate::io::prompt::PromptEngine;

use super::request_payload;

pub struct Fixer {
    prompts: PromptEngine,
    backend: BackendConfig,
    config: FixerConfig,
}

impl Fixer {
    pub fn new(backend: BackendConfig, config: FixerConfig) -> Self {
        Self {
            prompts: PromptEngine::new(),
            backend,
            config,
        }
    }

    /// Ask for a patch resolving the highest-ranked findings.
    ///
    /// Candidates that look truncated are rejected and retried like malformed responses.
    #[instrument(skip_all, fields(artifact = %snapshot.path.display(), findings = findings.len()))]
    pub fn apply<B: Backend + ?Sized>(
        &self,
        backend: &B,
        snapshot: &ArtifactSnapshot,
        findings: &[Finding],
    ) -> Result<Patch> {
        if findings.is_empty() {
            return Err(anyhow!("fixer called without findings"));
        }
        let targeted = select_for_patch(findings, self.config.max_findings_per_patch);
        let prompt = self
            .prompts
            .render_fixer(&snapshot.path, &snapshot.content, &targeted)
            .context("render fixer prompt")?;

        let (content, rationale) = request_payload(
            backend,
            &self.backend,
            Role::Fixer,
            &prompt,
            PayloadKind::Patch,
            |payload| match payload {
                AgentPayload::Patch { content, rationale } => {
                    match check_completeness(&snapshot.path, &content) {
                        Some(problem) => Err(format!("patch content is incomplete: {problem}")),
                        None => Ok((content, rationale)),
                    }
                }
                other => Err(format!("expected patch, got {other:?}")),
            },
        )?;

        info!(
            targeted = targeted.len(),
            bytes = content.len(),
            unchanged = content == snapshot.content,
            "patch proposed"
        );
        Ok(Patch {
            content,
            rationale,
            targeted,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::core::checksum::Checksum;
    use crate::core::types::Severity;
    use crate::error::{ErrorKind, classify};
    use crate::test_support::{Reply, ScriptedBackend, finding, patch_response};

    fn snapshot() -> ArtifactSnapshot {
        let content = "def add(a, b):\n    return a - b\n".to_string();
        ArtifactSnapshot {
            path: PathBuf::from("calc.py"),
            checksum: Checksum::of(content.as_bytes()),
            content,
        }
    }

    fn fixer(max_findings_per_patch: usize) -> Fixer {
        Fixer::new(
            BackendConfig {
                retry_delay_ms: 0,
                ..BackendConfig::default()
            },
            FixerConfig {
                max_findings_per_patch,
            },
        )
    }

    #[test]
    fn targets_highest_ranked_findings_only() {
        let findings: Vec<Finding> = (1..=4)
            .map(|line| finding(Severity::Low, line, "style"))
            .chain([finding(Severity::Critical, 2, "bug")])
            .collect();
        let backend = ScriptedBackend::new(vec![Reply::Text(patch_response(
            "def add(a, b):\n    return a + b\n",
        ))]);

        let patch = fixer(2)
            .apply(&backend, &snapshot(), &findings)
            .expect("patch");
        assert_eq!(patch.content, "def add(a, b):\n    return a + b\n");
        assert_eq!(patch.targeted.len(), 2);
        assert_eq!(patch.targeted[0].severity, Severity::Critical);
        assert_eq!(patch.targeted[1].location.line, 1);

        let prompt = &backend.prompts()[0];
        assert!(prompt.contains("1. [critical] bug at line 2"));
        assert!(!prompt.contains("3. ["));
    }

    #[test]
    fn truncated_patch_is_retried() {
        let backend = ScriptedBackend::new(vec![
            Reply::Text(patch_response("def add(a, b:\n    return a + b\n")),
            Reply::Text(patch_response("def add(a, b):\n    return a + b\n")),
        ]);
        let patch = fixer(5)
            .apply(&backend, &snapshot(), &[finding(Severity::High, 2, "bug")])
            .expect("patch");
        assert!(patch.content.contains("def add(a, b):"));
        assert!(backend.prompts()[1].contains("patch content is incomplete"));
        backend.assert_drained();
    }

    #[test]
    fn persistent_incomplete_patches_are_parse_errors() {
        let backend = ScriptedBackend::new(vec![
            Reply::Text(patch_response("```python\nx = 1\n```\n"));
            3
        ]);
        let err = fixer(5)
            .apply(&backend, &snapshot(), &[finding(Severity::High, 2, "bug")])
            .expect_err("incomplete");
        assert_eq!(classify(&err).kind, ErrorKind::AgentResponseParse);
    }
}
