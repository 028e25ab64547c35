//! Best-effort recovery of near-JSON model output.
//!
//! Models emit single-quoted strings, bare keys and trailing commas. Repair
//! tries progressively looser rewrites and, when nothing parses, degrades to
//! `{"text": <input>}` so callers can treat the input as prose.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

static BARE_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([,{]\s*)([A-Za-z0-9_]+)\s*:").expect("valid regex"));

static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").expect("valid regex"));

fn plain_text(text: &str) -> Value {
    let mut map = Map::new();
    map.insert("text".into(), Value::String(text.to_string()));
    Value::Object(map)
}

/// Parse `raw`, repairing common model mistakes. Never fails.
pub fn repair(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return plain_text("");
    }
    if let Ok(value) = serde_json::from_str(trimmed) {
        return value;
    }

    let quoted = trimmed.replace('\'', "\"");
    if let Ok(value) = serde_json::from_str(&quoted) {
        return value;
    }

    let keyed = BARE_KEY.replace_all(&quoted, "$1\"$2\":");
    let cleaned = TRAILING_COMMA.replace_all(&keyed, "$1");
    if let Ok(value) = serde_json::from_str(&cleaned) {
        return value;
    }

    plain_text(trimmed)
}

/// Did [`repair`] give up on `raw`?
///
/// True for `{"text": s}` where `s` is the trimmed input itself. Such a value
/// is prose, never an instruction.
pub fn is_plain_text_fallback(value: &Value, raw: &str) -> bool {
    match value.as_object() {
        Some(map) if map.len() == 1 => {
            map.get("text").and_then(|t| t.as_str()) == Some(raw.trim())
        }
        _ => false,
    }
}

/// Repair `raw` and keep the result only if it is genuinely structured.
pub fn try_parse(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let value = repair(trimmed);
    if is_plain_text_fallback(&value, trimmed) {
        None
    } else {
        Some(value)
    }
}
