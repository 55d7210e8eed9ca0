//! Response repair: pull a JSON value out of whatever the model returned.
//!
//! Models asked for "ONLY the JSON object" still wrap it in fences, prepend a
//! sentence, or return the object as an escaped string. [`extract_json`]
//! tries each shape in turn, cheapest first:
//!
//! 1. the whole reply parses
//! 2. the body of the first ```` ```json ```` fence
//! 3. the body of the first ```` ``` ```` fence
//! 4. the span from the first `{` to the last `}`, if it is an object with
//!    more than two keys
//! 5. the reply is a quoted string whose contents parse
//!
//! Callers deserialize the returned [`Value`] into their own types.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Why a reply could not be turned into JSON.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("could not extract JSON from reply ({len} chars)")]
pub struct JsonExtractError {
    pub len: usize,
}

static RE_JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```json(.*?)(?:```|$)").unwrap());

static RE_ANY_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[a-zA-Z]*\n?(.*?)```").unwrap());

/// Extract a JSON value from a model reply.
pub fn extract_json(response: &str) -> Result<Value, JsonExtractError> {
    let trimmed = response.trim();

    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        // A bare string is handled by the escaped-JSON rule below.
        if !v.is_string() {
            return Ok(v);
        }
    }

    if let Some(caps) = RE_JSON_FENCE.captures(trimmed) {
        if let Ok(v) = serde_json::from_str::<Value>(caps[1].trim()) {
            return Ok(v);
        }
    }

    if let Some(caps) = RE_ANY_FENCE.captures(trimmed) {
        if let Ok(v) = serde_json::from_str::<Value>(caps[1].trim()) {
            return Ok(v);
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                if map.len() > 2 {
                    return Ok(Value::Object(map));
                }
            }
        }
    }

    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        if let Ok(Value::String(inner)) = serde_json::from_str::<Value>(trimmed) {
            if let Ok(v) = serde_json::from_str::<Value>(inner.trim()) {
                return Ok(v);
            }
        }
    }

    Err(JsonExtractError {
        len: response.chars().count(),
    })
}

/// Extract a JSON object. Arrays and scalars are rejected.
pub fn extract_object(response: &str) -> Result<serde_json::Map<String, Value>, JsonExtractError> {
    match extract_json(response)? {
        Value::Object(map) => Ok(map),
        _ => Err(JsonExtractError {
            len: response.chars().count(),
        }),
    }
}

const PLACEHOLDER_OPTIONS: &[&str] = &[
    "option a", "option b", "option c", "option d", "a)", "b)", "c)", "d)", "a.", "b.", "c.",
    "d.", "...", "placeholder",
];

/// Whether a quiz option is template filler rather than a real answer.
pub fn is_placeholder_option(opt: &str) -> bool {
    let clean = opt.trim().to_lowercase();
    if clean.chars().count() <= 3 {
        return true;
    }
    PLACEHOLDER_OPTIONS.iter().any(|p| {
        clean == *p
            || clean
                .strip_prefix(p)
                .is_some_and(|rest| is_filler(rest.trim()))
    })
}

/// What is left after an `A)` style label when the model echoed the template.
fn is_filler(rest: &str) -> bool {
    rest.is_empty() || rest == "..." || rest == "…" || rest == "placeholder"
}

/// Truncate to at most `max` characters without splitting a code point.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// ── Lenient field readers ────────────────────────────────────────────────

/// A string field, or empty.
pub fn str_field(map: &serde_json::Map<String, Value>, key: &str) -> String {
    match map.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// A list of strings; non-string items are skipped.
pub fn str_list(map: &serde_json::Map<String, Value>, key: &str) -> Vec<String> {
    match map.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// An integer from a number or a digit string.
pub fn as_index(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let t = s.trim();
            if !t.is_empty() && t.chars().all(|c| c.is_ascii_digit()) {
                t.parse().ok()
            } else {
                None
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn direct_parse() {
        assert_eq!(extract_json(r#" {"a": 1} "#).unwrap(), json!({"a": 1}));
        assert_eq!(extract_json("[1, 2]").unwrap(), json!([1, 2]));
    }

    #[test]
    fn json_fence() {
        let reply = "Here you go:\n```json\n{\"topics\": [\"x\"]}\n```\nEnjoy.";
        assert_eq!(extract_json(reply).unwrap(), json!({"topics": ["x"]}));
    }

    #[test]
    fn unterminated_json_fence() {
        let reply = "```json\n{\"a\": true}";
        assert_eq!(extract_json(reply).unwrap(), json!({"a": true}));
    }

    #[test]
    fn plain_fence() {
        let reply = "```\n{\"b\": 2}\n```";
        assert_eq!(extract_json(reply).unwrap(), json!({"b": 2}));
    }

    #[test]
    fn embedded_object_needs_more_than_two_keys() {
        let big = "Sure! {\"a\": 1, \"b\": 2, \"c\": 3} hope that helps";
        assert_eq!(extract_json(big).unwrap(), json!({"a": 1, "b": 2, "c": 3}));

        let small = "Sure! {\"a\": 1, \"b\": 2} hope that helps";
        assert!(extract_json(small).is_err());
    }

    #[test]
    fn escaped_json_string() {
        let reply = r#""{\"x\": [1]}""#;
        assert_eq!(extract_json(reply).unwrap(), json!({"x": [1]}));
    }

    #[test]
    fn garbage_is_an_error() {
        let err = extract_json("I cannot help with that.").unwrap_err();
        assert_eq!(err.len, 24);
        assert!(extract_object("[1]").is_err());
    }

    #[test]
    fn placeholder_options() {
        for p in [
            "A)",
            "Option B",
            "option c ",
            "a) ...",
            "B. placeholder",
            "...",
            "placeholder",
            "xyz",
        ] {
            assert!(is_placeholder_option(p), "{p}");
        }
        for real in [
            "A) Ownership moves the value",
            "A) It is dropped",
            "D) Nothing",
            "b. The heap",
            "Borrowing",
            "Option types encode absence",
            "c.f. the appendix",
        ] {
            assert!(!is_placeholder_option(real), "{real}");
        }
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn index_reader_accepts_digit_strings() {
        assert_eq!(as_index(&json!(3)), Some(3));
        assert_eq!(as_index(&json!("12")), Some(12));
        assert_eq!(as_index(&json!("-1")), None);
        assert_eq!(as_index(&json!("two")), None);
        assert_eq!(as_index(&json!(null)), None);
    }
}
