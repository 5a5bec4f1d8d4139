//! Normalization of `tools/call` results.
//!
//! Tool servers populate different fields for the same logical answer, so the
//! result is reduced to the most useful shape in this order:
//!
//! 1. A non-empty structured result (`structuredContent`, or a result object
//!    with no `content` field). A lone `{"result": x}` wrapper unwraps to `x`.
//! 2. Text from content blocks: one block becomes a bare string, several
//!    become an ordered list of strings.
//! 3. `{"raw": "<reply as text>"}` when nothing else applies.
//!
//! Normalization never fails.

use serde_json::{Map, Value, json};

/// Reduce the `result` field of a `tools/call` reply.
pub fn normalize_call_result(result: &Value) -> Value {
    if let Some(structured) = structured_part(result) {
        return unwrap_result_key(structured);
    }

    let texts = content_texts(result);
    match texts.len() {
        0 => fallback(result),
        1 => Value::String(texts.into_iter().next().unwrap_or_default()),
        _ => Value::Array(texts.into_iter().map(Value::String).collect()),
    }
}

/// Text of every textual content block, in order.
pub fn content_texts(result: &Value) -> Vec<String> {
    let Some(blocks) = result.get("content").and_then(Value::as_array) else {
        return Vec::new();
    };
    blocks
        .iter()
        .filter_map(|block| {
            ["text", "value"]
                .iter()
                .find_map(|key| block.get(key).and_then(Value::as_str))
                .map(str::to_string)
        })
        .collect()
}

/// Whether a call result flags itself as a tool-level error.
pub fn is_error_result(result: &Value) -> bool {
    result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn structured_part(result: &Value) -> Option<&Value> {
    match result {
        Value::Object(map) => {
            if let Some(structured) = map.get("structuredContent").filter(|v| !is_empty(v)) {
                return Some(structured);
            }
            let plain = !map.contains_key("content") && !map.contains_key("structuredContent");
            (plain && !map_is_only_metadata(map)).then_some(result)
        }
        other if !is_empty(other) => Some(other),
        _ => None,
    }
}

fn unwrap_result_key(structured: &Value) -> Value {
    match structured {
        Value::Object(map) if map.len() == 1 => {
            match map.get("result").filter(|inner| !inner.is_null()) {
                Some(inner) => inner.clone(),
                None => structured.clone(),
            }
        }
        other => other.clone(),
    }
}

/// Objects carrying only protocol bookkeeping are not a structured answer.
fn map_is_only_metadata(map: &Map<String, Value>) -> bool {
    map.keys().all(|k| matches!(k.as_str(), "isError" | "_meta"))
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn fallback(result: &Value) -> Value {
    json!({ "raw": result.to_string() })
}
