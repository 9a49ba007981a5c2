//! Prompt rendering for the three roles.

use std::path::Path;

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::types::{Finding, Verdict};
use crate::io::backend::tail;

const AUDITOR_TEMPLATE: &str = include_str!("prompts/auditor.md");
const FIXER_TEMPLATE: &str = include_str!("prompts/fixer.md");
const TEST_WRITER_TEMPLATE: &str = include_str!("prompts/test_writer.md");

/// Failure reports fed back to the auditor are cut to their last bytes.
const FEEDBACK_LIMIT_BYTES: usize = 8_000;

#[derive(Debug, Clone, Serialize)]
struct FeedbackContext<'a> {
    reason: &'static str,
    report: &'a str,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("auditor", AUDITOR_TEMPLATE)
            .expect("auditor template should be valid");
        env.add_template("fixer", FIXER_TEMPLATE)
            .expect("fixer template should be valid");
        env.add_template("test_writer", TEST_WRITER_TEMPLATE)
            .expect("test_writer template should be valid");
        Self { env }
    }

    /// `feedback` is the failed verdict of the previous iteration, if any.
    pub fn render_auditor(
        &self,
        path: &Path,
        content: &str,
        feedback: Option<&Verdict>,
    ) -> Result<String> {
        let feedback = feedback.and_then(|verdict| match verdict {
            Verdict::Pass { .. } => None,
            Verdict::Fail { reason, report } => Some(FeedbackContext {
                reason: reason.as_str(),
                report: tail(report.trim(), FEEDBACK_LIMIT_BYTES),
            }),
        });
        let template = self.env.get_template("auditor")?;
        let rendered = template.render(context! {
            path => path.display().to_string(),
            language => language_tag(path),
            content => content,
            feedback => feedback,
        })?;
        Ok(rendered)
    }

    pub fn render_fixer(&self, path: &Path, content: &str, findings: &[Finding]) -> Result<String> {
        let template = self.env.get_template("fixer")?;
        let rendered = template.render(context! {
            path => path.display().to_string(),
            language => language_tag(path),
            content => content,
            findings => findings,
        })?;
        Ok(rendered)
    }

    pub fn render_test_writer(
        &self,
        path: &Path,
        content: &str,
        test_name: &str,
        timeout_secs: u64,
    ) -> Result<String> {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let module = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let template = self.env.get_template("test_writer")?;
        let rendered = template.render(context! {
            path => path.display().to_string(),
            language => language_tag(path),
            content => content,
            file_name => file_name,
            module => module,
            test_name => test_name,
            timeout_secs => timeout_secs,
        })?;
        Ok(rendered)
    }
}

fn language_tag(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("py") => "python",
        Some("rs") => "rust",
        Some("js") => "javascript",
        Some("ts") => "typescript",
        Some("go") => "go",
        Some("sh") => "sh",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{FailureReason, Location, Severity};

    #[test]
    fn auditor_prompt_includes_file_and_omits_feedback_by_default() {
        let engine = PromptEngine::new();
        let prompt = engine
            .render_auditor(Path::new("calc.py"), "def add(a, b): pass\n", None)
            .expect("render");
        assert!(prompt.contains("## File: calc.py"));
        assert!(prompt.contains("```python\ndef add(a, b): pass"));
        assert!(!prompt.contains("Previous fix attempt failed"));
        assert!(prompt.contains("\"kind\": \"findings\""));
    }

    #[test]
    fn auditor_prompt_carries_failed_verdict() {
        let engine = PromptEngine::new();
        let verdict = Verdict::Fail {
            reason: FailureReason::AssertionFailed,
            report: "E   assert 3 == 4".to_string(),
        };
        let prompt = engine
            .render_auditor(Path::new("calc.py"), "x = 1\n", Some(&verdict))
            .expect("render");
        assert!(prompt.contains("failed validation (ASSERTION_FAILED)"));
        assert!(prompt.contains("E   assert 3 == 4"));
    }

    #[test]
    fn fixer_prompt_lists_findings_in_order() {
        let engine = PromptEngine::new();
        let findings = vec![
            Finding {
                category: "bug".to_string(),
                severity: Severity::Critical,
                location: Location {
                    line: 2,
                    column: None,
                },
                description: "subtracts instead of adding".to_string(),
            },
            Finding {
                category: "style".to_string(),
                severity: Severity::Low,
                location: Location {
                    line: 1,
                    column: Some(4),
                },
                description: "missing docstring".to_string(),
            },
        ];
        let prompt = engine
            .render_fixer(Path::new("calc.py"), "x = 1\n", &findings)
            .expect("render");
        assert!(prompt.contains("1. [critical] bug at line 2: subtracts instead of adding"));
        assert!(prompt.contains("2. [low] style at line 1: missing docstring"));
    }

    #[test]
    fn test_writer_prompt_names_module_and_test_file() {
        let engine = PromptEngine::new();
        let prompt = engine
            .render_test_writer(Path::new("pkg/calc.py"), "x = 1\n", "test_calc.py", 30)
            .expect("render");
        assert!(prompt.contains("saved as `test_calc.py` next to `calc.py`"));
        assert!(prompt.contains("module `calc`"));
        assert!(prompt.contains("within 30 seconds"));
    }
}
