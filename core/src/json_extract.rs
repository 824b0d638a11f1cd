//! Pulls the single JSON object out of free-form engine output.

use crate::error::GatewayError;
use serde_json::Value;

/// Removes a wrapping ``` fence (with optional language tag) from fully fenced output.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    let rest = rest.trim_start_matches('`');
    let tag_len = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
        .unwrap_or(rest.len());
    let rest = &rest[tag_len..];

    rest.trim_end().trim_end_matches('`').trim()
}

pub fn extract_json(raw: &str) -> Result<Value, GatewayError> {
    let text = strip_code_fence(raw);

    let start = text.find('{');
    let end = text.rfind('}');
    let (start, end) = match (start, end) {
        (Some(s), Some(e)) if e > s => (s, e),
        _ => return Err(GatewayError::NoJsonObject),
    };

    serde_json::from_str(&text[start..=end]).map_err(|e| GatewayError::MalformedJson(e.to_string()))
}
