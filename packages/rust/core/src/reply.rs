//! Lenient parsing of model replies.
//!
//! Models wrap JSON in Markdown fences, prepend chatter, or return lists of
//! non-string items. These helpers recover the JSON object and coerce the
//! common shapes without guessing at anything else.

use serde_json::{Map, Value};

/// Parse a reply into a JSON object.
///
/// Accepts a bare object, an object inside ```` ```json ```` fences, or the
/// first `{` through the last `}` of the text. Anything else is an error
/// carrying a short preview of the reply.
pub fn parse_json_object(text: &str) -> Result<Map<String, Value>, String> {
    let stripped = strip_fences(text);

    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(stripped) {
        return Ok(map);
    }

    if let (Some(start), Some(end)) = (stripped.find('{'), stripped.rfind('}')) {
        if start < end {
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&stripped[start..=end]) {
                return Ok(map);
            }
        }
    }

    let preview: String = text.trim().chars().take(120).collect();
    Err(format!("reply is not a JSON object: {preview:?}"))
}

fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (`json`, `JSON`, ...) up to the first newline.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// Read a string field, trimming whitespace. Numbers and booleans are rendered.
pub fn string_field(map: &Map<String, Value>, key: &str) -> String {
    match map.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Read a list of strings. A single string becomes a one-item list; objects
/// and numbers inside the list are rendered as compact JSON.
pub fn string_list(map: &Map<String, Value>, key: &str) -> Vec<String> {
    match map.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

/// Bound a data map to roughly `max_chars` of serialized JSON by keeping
/// top-level entries in order until the budget runs out.
///
/// A map that was cut carries `"_truncated": true` so the model knows it is
/// looking at a partial view.
pub fn bounded_data(data: &Map<String, Value>, max_chars: usize) -> Map<String, Value> {
    let full_len = serde_json::to_string(data).map(|s| s.len()).unwrap_or(0);
    if full_len <= max_chars {
        return data.clone();
    }

    let mut out = Map::new();
    let mut used = 2;
    for (key, value) in data {
        let entry_len = key.len() + 4 + serde_json::to_string(value).map(|s| s.len()).unwrap_or(0);
        if used + entry_len > max_chars {
            continue;
        }
        used += entry_len;
        out.insert(key.clone(), value.clone());
    }
    out.insert("_truncated".into(), Value::Bool(true));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_and_fenced_objects() {
        assert_eq!(parse_json_object(r#"{"a": 1}"#).unwrap()["a"], 1);
        assert_eq!(
            parse_json_object("```json\n{\"a\": 2}\n```").unwrap()["a"],
            2
        );
        assert_eq!(parse_json_object("```\n{\"a\": 3}\n```").unwrap()["a"], 3);
    }

    #[test]
    fn object_embedded_in_chatter() {
        let reply = "Sure! Here is the data:\n{\"title\": \"Widget\", \"tags\": {\"x\": 1}}\nHope it helps.";
        let map = parse_json_object(reply).unwrap();
        assert_eq!(map["title"], "Widget");
        assert_eq!(map["tags"]["x"], 1);
    }

    #[test]
    fn non_objects_are_rejected() {
        assert!(parse_json_object("not json at all").is_err());
        assert!(parse_json_object("[1, 2, 3]").is_err());
        assert!(parse_json_object("{ broken").is_err());
        assert!(parse_json_object("").is_err());
    }

    #[test]
    fn string_helpers_coerce() {
        let map = json!({
            "summary": "  Short  ",
            "score": 7,
            "points": ["one", 2, {"k": "v"}, null, "  "],
            "single": "only"
        });
        let map = map.as_object().unwrap();

        assert_eq!(string_field(map, "summary"), "Short");
        assert_eq!(string_field(map, "score"), "7");
        assert_eq!(string_field(map, "missing"), "");
        assert_eq!(string_list(map, "points"), ["one", "2", r#"{"k":"v"}"#]);
        assert_eq!(string_list(map, "single"), ["only"]);
        assert!(string_list(map, "missing").is_empty());
    }

    #[test]
    fn bounded_data_keeps_small_maps() {
        let map = json!({"a": 1, "b": "two"});
        let map = map.as_object().unwrap();
        assert_eq!(&bounded_data(map, 100), map);
    }

    #[test]
    fn bounded_data_cuts_large_maps() {
        let map = json!({
            "title": "Widget",
            "description": "x".repeat(500),
            "price": "9.99"
        });
        let bounded = bounded_data(map.as_object().unwrap(), 100);
        assert_eq!(bounded["title"], "Widget");
        assert_eq!(bounded["price"], "9.99");
        assert!(!bounded.contains_key("description"));
        assert_eq!(bounded["_truncated"], true);
    }
}
