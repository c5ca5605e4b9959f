//! Structured-output extraction from free-form model text.
//!
//! Small local models rarely honor "return only JSON": they wrap correct
//! content in commentary, markdown fences, or inconsistent quoting. Each
//! extractor here is tiered — strict parse first, structural fallback second
//! — and never propagates a parse failure to the caller.

use serde_json::Value;

/// Extract a list of strings from model text.
///
/// Tier one: the first complete `[...]` span parsed as a JSON array (string
/// elements trimmed, empties dropped). Tier two: strip one surrounding
/// bracket pair if present, split on newlines and commas, trim quotes and
/// whitespace.
///
/// Never fails: a non-empty response always yields a (possibly empty) list.
#[must_use]
pub fn extract_string_list(raw: &str) -> Vec<String> {
    let text = raw.trim();

    if let Some(span) = first_bracketed_span(text) {
        if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(span) {
            return items
                .iter()
                .map(element_to_string)
                .filter(|s| !s.is_empty())
                .collect();
        }
    }

    // Fallback: bracket strip + split. Guarantees the operation never fails
    // outright for a non-empty model response.
    let mut stripped = text;
    if let Some(rest) = stripped.strip_prefix('[') {
        stripped = rest;
    }
    if let Some(rest) = stripped.strip_suffix(']') {
        stripped = rest;
    }
    stripped
        .replace('\n', ",")
        .split(',')
        .map(|piece| piece.trim().trim_matches(&['"', '\''][..]).trim().to_owned())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Render a JSON array element as a trimmed string.
fn element_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_owned(),
        other => other.to_string(),
    }
}

/// First complete `[...]` span: first `[`, first `]` after it.
fn first_bracketed_span(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text[start..].find(']')? + start;
    Some(&text[start..=end])
}

/// Parse model text as a JSON object, tolerating markdown code fences.
///
/// If the text begins with a fence marker, every line that is purely a fence
/// marker is dropped before parsing. Returns `None` when the remainder is
/// not a JSON object; callers degrade to a defaulted result instead of
/// erroring.
#[must_use]
pub fn extract_json_object(raw: &str) -> Option<serde_json::Map<String, Value>> {
    let text = strip_fence_lines(raw);
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Drop fence-marker lines when the text is fenced; pass through otherwise.
#[must_use]
pub fn strip_fence_lines(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_owned();
    }
    trimmed
        .lines()
        .filter(|line| !line.trim().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_owned()
}

/// Read a string field with a default.
#[must_use]
pub fn string_field(map: &serde_json::Map<String, Value>, key: &str, default: &str) -> String {
    map.get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_owned()
}
