//! Input sanitization
//!
//! Every string that reaches staging passes through [`sanitize_text`] so that
//! dashboards and notification templates never render injected markup.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static SCRIPT_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)\s*>").expect("static regex")
});
static MARKUP_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)</?[A-Za-z!][^>]*>").expect("static regex"));
static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// Trim, strip embedded markup and control characters, collapse whitespace.
///
/// Returns `None` when nothing meaningful is left.
pub fn sanitize_text(input: &str) -> Option<String> {
    let without_scripts = SCRIPT_BLOCK.replace_all(input, " ");
    let without_tags = MARKUP_TAG.replace_all(&without_scripts, " ");
    let printable: String = without_tags
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .collect();
    let collapsed = WHITESPACE_RUN.replace_all(printable.trim(), " ");

    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed.into_owned())
    }
}

/// Sanitize every string inside an opaque JSON value; drops strings that become empty
pub fn sanitize_json(value: &Value) -> Value {
    match value {
        Value::String(s) => sanitize_text(s).map(Value::String).unwrap_or(Value::Null),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_json).collect()),
        Value::Object(map) => Value::Object(sanitize_map(map)),
        other => other.clone(),
    }
}

pub fn sanitize_map(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .filter_map(|(key, value)| {
            let key = sanitize_text(key)?;
            Some((key, sanitize_json(value)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn static_patterns_compile() {
        Lazy::force(&SCRIPT_BLOCK);
        Lazy::force(&MARKUP_TAG);
        Lazy::force(&WHITESPACE_RUN);
    }

    #[test]
    fn trims_and_collapses_whitespace() {
        assert_eq!(sanitize_text("  Thomas \t  Nguyen \n").as_deref(), Some("Thomas Nguyen"));
    }

    #[test]
    fn strips_script_blocks_with_their_content() {
        let dirty = "Alice<script>alert('x')</script> Wonderland";
        assert_eq!(sanitize_text(dirty).as_deref(), Some("Alice Wonderland"));
    }

    #[test]
    fn strips_tags_but_keeps_text() {
        assert_eq!(sanitize_text("<b>Bob</b> <img src=x onerror=y>").as_deref(), Some("Bob"));
    }

    #[test]
    fn keeps_comparison_operators_that_are_not_tags() {
        assert_eq!(sanitize_text("a < b > c").as_deref(), Some("a < b > c"));
    }

    #[test]
    fn markup_only_input_becomes_none() {
        assert_eq!(sanitize_text("<br/>   "), None);
        assert_eq!(sanitize_text(""), None);
    }

    #[test]
    fn sanitizes_nested_json() {
        let value = json!({ "loyalty_level": " <i>gold</i> ", "tags": ["<b>vip</b>", 3] });
        assert_eq!(sanitize_json(&value), json!({ "loyalty_level": "gold", "tags": ["vip", 3] }));
    }
}
