//! Turns free-form model output into validated [`Suggestion`]s.
//!
//! The model is untrusted. Its text is searched for a JSON array (first `[`
//! to last `]`), parsed into a loose `serde_json::Value` tree, and each
//! element is mapped field by field into the strict type. A bad element is
//! dropped on its own; a bad payload yields an empty list. Nothing here
//! returns an error to the caller.

use serde_json::{Map, Value};
use tracing::warn;

use crate::types::{Category, Severity, Suggestion, SuggestionStatus};

const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Parses every suggestion the model returned for `fallback_path`.
///
/// Elements without a `filePath` are attributed to `fallback_path`. The
/// returned suggestions are unscoped and always `Pending`.
pub fn parse_suggestions(model_output: &str, fallback_path: &str) -> Vec<Suggestion> {
    let payload = extract_json_array(model_output);

    let items = match serde_json::from_str::<Value>(payload) {
        Ok(Value::Array(items)) => items,
        Ok(other) => {
            warn!(file = fallback_path, kind = json_kind(&other), "model payload is not an array");
            return Vec::new();
        }
        Err(e) => {
            warn!(file = fallback_path, error = %e, "model payload is not valid JSON");
            return Vec::new();
        }
    };

    items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| match suggestion_from_value(item, fallback_path) {
            Ok(s) => Some(s),
            Err(reason) => {
                warn!(file = fallback_path, index, %reason, "dropping malformed suggestion");
                None
            }
        })
        .collect()
}

/// Slice from the first `[` to the last `]`, or `"[]"` when there is no such pair.
pub fn extract_json_array(text: &str) -> &str {
    match (text.find('['), text.rfind(']')) {
        (Some(start), Some(end)) if end > start => &text[start..=end],
        _ => "[]",
    }
}

fn suggestion_from_value(item: &Value, fallback_path: &str) -> Result<Suggestion, String> {
    let obj = item.as_object().ok_or_else(|| format!("expected object, got {}", json_kind(item)))?;

    let file_path = text_field(obj, "filePath")?
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| fallback_path.to_owned());

    let severity = match obj.get("severity") {
        Some(Value::String(raw)) => Severity::parse_or_default(raw),
        _ => Severity::Info,
    };
    let category = match obj.get("category") {
        Some(Value::String(raw)) => Category::parse_or_default(raw),
        _ => Category::BestPractice,
    };

    let mut suggestion = Suggestion::pending(file_path, severity, category);
    suggestion.start_line = line_field(obj, "startLine")?;
    suggestion.end_line = line_field(obj, "endLine")?;
    suggestion.original_code = text_field(obj, "originalCode")?.unwrap_or_default();
    suggestion.suggested_code = text_field(obj, "suggestedCode")?.unwrap_or_default();
    suggestion.explanation = text_field(obj, "explanation")?.unwrap_or_default();
    suggestion.confidence = confidence_field(obj)?;
    // Whatever the model says about status is ignored.
    suggestion.status = SuggestionStatus::Pending;
    Ok(suggestion)
}

/// Strings pass through; numbers and booleans are stringified; null or
/// absent is `None`; arrays and objects are malformed.
fn text_field(obj: &Map<String, Value>, key: &str) -> Result<Option<String>, String> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(v @ (Value::Number(_) | Value::Bool(_))) => Ok(Some(v.to_string())),
        Some(other) => Err(format!("{key}: expected string, got {}", json_kind(other))),
    }
}

fn line_field(obj: &Map<String, Value>, key: &str) -> Result<u32, String> {
    let value = match obj.get(key) {
        None | Some(Value::Null) => return Ok(0),
        Some(v) => v,
    };
    let number = match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    number
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| format!("{key}: not a line number: {value}"))
}

/// Missing means 0.5. Anything outside `[0, 1]` drops the element rather
/// than being clamped.
fn confidence_field(obj: &Map<String, Value>) -> Result<f64, String> {
    let value = match obj.get("confidence") {
        None | Some(Value::Null) => return Ok(DEFAULT_CONFIDENCE),
        Some(v) => v,
    };
    let confidence = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| format!("confidence: not a number: {value}"))?;

    if (0.0..=1.0).contains(&confidence) {
        Ok(confidence)
    } else {
        Err(format!("confidence {confidence} outside [0, 1]"))
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
