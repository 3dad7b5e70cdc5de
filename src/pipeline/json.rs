//! Tolerant JSON recovery from free-text model completions.
//!
//! Models asked for "only JSON" still wrap it in reasoning preambles,
//! ```` ```json ```` fences or trailing remarks. [`extract_json`] cuts the
//! outermost `{ … }` span out of whatever surrounds it. It is best-effort:
//! when the span does not parse, the untouched input comes back and the
//! caller's strict parse ([`parse_object`]) reports the failure.
//!
//! [`merge_json_results`] folds several independently produced JSON objects
//! into one, later keys winning, skipping entries that do not decode.

use crate::error::ExtractError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

static RE_BEFORE_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^{]*").unwrap());
static RE_AFTER_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^}]*$").unwrap());

/// Return the best-guess JSON object substring of `text`.
///
/// * No `{` or no `}` at all → [`ExtractError::NoJsonFound`].
/// * The span from the first `{` to the last `}` parses → that span.
/// * Otherwise → `text` unchanged.
///
/// The last case means a successful return is not proof of valid JSON.
/// Callers must still parse the result themselves.
pub fn extract_json(text: &str) -> Result<String, ExtractError> {
    let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) else {
        return Err(ExtractError::NoJsonFound);
    };

    if end < start {
        debug!("Closing brace precedes opening brace, returning input unchanged");
        return Ok(text.to_string());
    }

    let span = &text[start..=end];
    let span = RE_BEFORE_OPEN.replace(span, "");
    let span = RE_AFTER_CLOSE.replace(&span, "");

    match serde_json::from_str::<Value>(&span) {
        Ok(_) => Ok(span.into_owned()),
        Err(e) => {
            warn!("Extracted span is not valid JSON ({e}), returning input unchanged");
            Ok(text.to_string())
        }
    }
}

/// Strictly parse `text` as a JSON object.
pub fn parse_object(text: &str) -> Result<Map<String, Value>, ExtractError> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ExtractError::invalid_json(
            format!("expected an object, got {}", value_kind(&other)),
            text,
        )),
        Err(e) => Err(ExtractError::invalid_json(e, text)),
    }
}

/// Merge JSON object strings into one mapping; later keys override earlier.
///
/// Entries that do not decode to an object are logged and skipped.
pub fn merge_json_results<I, S>(results: I) -> Map<String, Value>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut merged = Map::new();
    for result in results {
        let result = result.as_ref();
        match serde_json::from_str::<Value>(result) {
            Ok(Value::Object(map)) => merged.extend(map),
            Ok(other) => warn!(
                "Skipping JSON {} while merging: {}",
                value_kind(&other),
                result
            ),
            Err(e) => warn!("Error decoding JSON ({e}): {result}"),
        }
    }
    merged
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
