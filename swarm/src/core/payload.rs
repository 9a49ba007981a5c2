//! Parsing of structured payloads out of free-form backend responses.
//!
//! Backends answer in prose, often with the JSON wrapped in a markdown fence.
//! Extraction is lenient about the wrapping and strict about the payload: the
//! JSON must match the schema for the expected kind before it is deserialized.

use std::sync::LazyLock;

use jsonschema::Validator;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::types::Finding;

const FINDINGS_SCHEMA: &str = include_str!("../../schemas/findings.schema.json");
const PATCH_SCHEMA: &str = include_str!("../../schemas/patch.schema.json");
const TEST_SPEC_SCHEMA: &str = include_str!("../../schemas/test_spec.schema.json");

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n(.*?)```").expect("fence regex should be valid")
});

static FINDINGS_VALIDATOR: LazyLock<Validator> =
    LazyLock::new(|| compile(FINDINGS_SCHEMA, "findings"));
static PATCH_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| compile(PATCH_SCHEMA, "patch"));
static TEST_SPEC_VALIDATOR: LazyLock<Validator> =
    LazyLock::new(|| compile(TEST_SPEC_SCHEMA, "test_spec"));

fn compile(raw: &str, name: &str) -> Validator {
    let schema: Value = serde_json::from_str(raw)
        .unwrap_or_else(|err| panic!("{name} schema should be valid json: {err}"));
    jsonschema::validator_for(&schema)
        .unwrap_or_else(|err| panic!("{name} schema should compile: {err}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Findings,
    Patch,
    TestSpec,
}

impl PayloadKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PayloadKind::Findings => "findings",
            PayloadKind::Patch => "patch",
            PayloadKind::TestSpec => "test_spec",
        }
    }

    fn validator(self) -> &'static Validator {
        match self {
            PayloadKind::Findings => &FINDINGS_VALIDATOR,
            PayloadKind::Patch => &PATCH_VALIDATOR,
            PayloadKind::TestSpec => &TEST_SPEC_VALIDATOR,
        }
    }
}

/// Structured content a backend may return, discriminated by `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentPayload {
    Findings {
        findings: Vec<Finding>,
    },
    Patch {
        content: String,
        rationale: String,
    },
    TestSpec {
        #[serde(default)]
        file_name: Option<String>,
        content: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("response contains no JSON object")]
    NoJson,
    #[error("response JSON is malformed: {0}")]
    Malformed(String),
    #[error("expected payload kind `{expected}`, found `{found}`")]
    WrongKind {
        expected: &'static str,
        found: String,
    },
    #[error("payload violates {kind} schema:\n- {}", .errors.join("\n- "))]
    Schema {
        kind: &'static str,
        errors: Vec<String>,
    },
}

/// Extract, validate and decode the payload of `expected` kind from `response`.
pub fn parse_payload(response: &str, expected: PayloadKind) -> Result<AgentPayload, PayloadError> {
    let value = extract_json(response)?;
    let found = value
        .get("kind")
        .and_then(Value::as_str)
        .unwrap_or("<missing>");
    if found != expected.as_str() {
        return Err(PayloadError::WrongKind {
            expected: expected.as_str(),
            found: found.to_string(),
        });
    }

    let errors: Vec<String> = expected
        .validator()
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !errors.is_empty() {
        return Err(PayloadError::Schema {
            kind: expected.as_str(),
            errors,
        });
    }

    serde_json::from_value(value).map_err(|err| PayloadError::Malformed(err.to_string()))
}

/// Find the JSON object in a response.
///
/// Fenced blocks are tried first, in order; otherwise the span from the first
/// `{` to the last `}` of the whole response is used.
pub fn extract_json(response: &str) -> Result<Value, PayloadError> {
    let mut last_error = None;
    for caps in FENCE_RE.captures_iter(response) {
        let Some(body) = caps.get(1) else { continue };
        match object_span(body.as_str()) {
            Some(span) => match serde_json::from_str::<Value>(span) {
                Ok(value) if value.is_object() => return Ok(value),
                Ok(_) => {}
                Err(err) => last_error = Some(err.to_string()),
            },
            None => continue,
        }
    }

    let Some(span) = object_span(response) else {
        return Err(last_error.map_or(PayloadError::NoJson, PayloadError::Malformed));
    };
    match serde_json::from_str::<Value>(span) {
        Ok(value) if value.is_object() => Ok(value),
        Ok(_) => Err(PayloadError::NoJson),
        Err(err) => Err(PayloadError::Malformed(err.to_string())),
    }
}

fn object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
