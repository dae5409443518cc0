//! JSON shape of the model's answer and the validator that turns an untyped
//! object into a [`RawAnalysisOutput`].

use crate::types::{normalize_suggestion, RawAnalysisOutput, RawFinding};
use serde::Deserialize;
use thiserror::Error;

pub const ANALYSIS_SCHEMA_NAME: &str = "poll_text_analysis";

/// The model returned something that does not fit [`RawAnalysisOutput`].
///
/// This is the validation-class failure the orchestrator retries on.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaViolation {
    #[error("Invalid response format: {0}")]
    Malformed(String),
    #[error("Invalid response format: `{field}` {problem}")]
    Field { field: String, problem: &'static str },
}

/// Strict JSON schema sent with the completion request.
///
/// `suggestion` is nullable rather than optional because strict structured
/// output requires every property to be listed in `required`.
pub fn analysis_output_schema() -> serde_json::Value {
    let finding = serde_json::json!({
        "type": "object",
        "properties": {
            "substring": { "type": "string" },
            "reason": { "type": "string" },
            "suggestion": { "type": ["string", "null"] }
        },
        "required": ["substring", "reason", "suggestion"],
        "additionalProperties": false
    });
    serde_json::json!({
        "type": "object",
        "properties": {
            "bias_findings": { "type": "array", "items": finding.clone() },
            "grammar_findings": { "type": "array", "items": finding },
            "rewritten_text": { "type": "string" }
        },
        "required": ["bias_findings", "grammar_findings", "rewritten_text"],
        "additionalProperties": false
    })
}

#[derive(Deserialize)]
struct WireFinding {
    substring: String,
    reason: String,
    #[serde(default)]
    suggestion: Option<String>,
}

#[derive(Deserialize)]
struct WireOutput {
    bias_findings: Vec<WireFinding>,
    grammar_findings: Vec<WireFinding>,
    rewritten_text: String,
}

/// Validate an untyped completion object.
pub fn validate_analysis_output(
    value: serde_json::Value,
) -> Result<RawAnalysisOutput, SchemaViolation> {
    let wire: WireOutput =
        serde_json::from_value(value).map_err(|e| SchemaViolation::Malformed(e.to_string()))?;

    if wire.rewritten_text.trim().is_empty() {
        return Err(SchemaViolation::Field {
            field: "rewritten_text".to_string(),
            problem: "must not be empty",
        });
    }

    Ok(RawAnalysisOutput {
        bias_findings: validate_findings("bias_findings", wire.bias_findings)?,
        grammar_findings: validate_findings("grammar_findings", wire.grammar_findings)?,
        rewritten_text: wire.rewritten_text,
    })
}

fn validate_findings(
    list: &str,
    findings: Vec<WireFinding>,
) -> Result<Vec<RawFinding>, SchemaViolation> {
    findings
        .into_iter()
        .enumerate()
        .map(|(idx, f)| {
            if f.substring.trim().is_empty() {
                return Err(SchemaViolation::Field {
                    field: format!("{list}[{idx}].substring"),
                    problem: "must not be blank",
                });
            }
            if f.reason.trim().is_empty() {
                return Err(SchemaViolation::Field {
                    field: format!("{list}[{idx}].reason"),
                    problem: "must not be empty",
                });
            }
            Ok(RawFinding {
                substring: f.substring,
                reason: f.reason,
                suggestion: normalize_suggestion(f.suggestion),
            })
        })
        .collect()
}
