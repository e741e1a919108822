//! Structured-output handling for model responses
//!
//! A structured response is a JSON object or array. Parsing tries the text as
//! returned, then once more against a fence-stripped, trimmed variant. When
//! both fail the caller falls back to [`fallback_document`].

use crate::{Map, Value};

/// Append schema instructions to a prompt.
pub fn with_schema_instructions(prompt: &str, schema: &Value) -> String {
    let schema_text = serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string());
    format!(
        "{}\n\nRespond only with a JSON document that conforms to this schema:\n{}\nDo not add any text outside the JSON.",
        prompt, schema_text
    )
}

/// Remove a surrounding markdown code fence (with optional language tag).
pub fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag line
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Parse a model response as a structured document.
///
/// Returns the parse error text of the final attempt on failure.
pub fn parse_structured(raw: &str) -> Result<Value, String> {
    match parse_document(raw) {
        Ok(value) => Ok(value),
        Err(_) => parse_document(strip_fences(raw)),
    }
}

fn parse_document(text: &str) -> Result<Value, String> {
    let value: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    if value.is_object() || value.is_array() {
        Ok(value)
    } else {
        Err(format!("expected a JSON object or array, got {}", crate::type_name(&value)))
    }
}

/// Soft default used when a response cannot be parsed: `{"response": raw}`.
pub fn fallback_document(raw: &str) -> Value {
    let mut map = Map::new();
    map.insert("response".to_string(), Value::String(raw.to_string()));
    Value::Object(map)
}
