//! Recovering JSON objects from free-form model output.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static FENCED_JSON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*\n?(.*?)```").expect("fenced json pattern")
});

/// Parse JSON out of model text. A fenced code block wins over the text as a
/// whole; `None` when neither parses.
pub fn extract_json(text: &str) -> Option<Value> {
    for caps in FENCED_JSON.captures_iter(text) {
        if let Some(body) = caps.get(1) {
            if let Ok(value) = serde_json::from_str::<Value>(body.as_str().trim()) {
                return Some(value);
            }
        }
    }
    serde_json::from_str::<Value>(text.trim()).ok()
}

/// Like [`extract_json`], but falls back to the raw text as a JSON string.
pub fn extract_json_or_text(text: &str) -> Value {
    extract_json(text).unwrap_or_else(|| Value::String(text.to_string()))
}
