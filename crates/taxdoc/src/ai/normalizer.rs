//! Turns free-form model replies into a [`FieldMap`].
//!
//! The model is asked for JSON but is not guaranteed to return only JSON, so
//! the first balanced object is located by scanning. Replies with no usable
//! object are kept line-by-line at reduced confidence instead of failing.

use serde_json::{Map, Value};

use crate::document::{FieldMap, FieldValue, DEFAULT_CONFIDENCE, DEGRADED_CONFIDENCE};

/// Result of normalizing one reply.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedReply {
    pub fields: FieldMap,
    /// True when no JSON object could be parsed and fields were synthesized
    /// from the reply's lines.
    pub degraded: bool,
}

/// One top-level entry of a parsed reply, classified once.
#[derive(Debug, Clone, PartialEq)]
enum ReplyValue {
    /// A bare value: `"wages": "50000"`.
    Scalar(Value),
    /// An object carrying `value` and/or `confidence`.
    Structured {
        value: Value,
        confidence: Option<Value>,
    },
}

impl ReplyValue {
    fn classify(raw: Value) -> Self {
        match raw {
            Value::Object(mut obj) if obj.contains_key("value") || obj.contains_key("confidence") => {
                ReplyValue::Structured {
                    value: obj.remove("value").unwrap_or(Value::Null),
                    confidence: obj.remove("confidence"),
                }
            }
            other => ReplyValue::Scalar(other),
        }
    }

    fn into_field(self, name: &str) -> FieldValue {
        match self {
            ReplyValue::Scalar(value) => FieldValue::new(name, stringify(&value), DEFAULT_CONFIDENCE),
            ReplyValue::Structured { value, confidence } => {
                let confidence = confidence
                    .as_ref()
                    .and_then(confidence_number)
                    .unwrap_or(DEFAULT_CONFIDENCE);
                FieldValue::new(name, stringify(&value), confidence)
            }
        }
    }
}

fn confidence_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Returns the first balanced `{...}` in `reply`, honoring string literals
/// and escapes. `None` if there is no opening brace or it never closes.
pub fn locate_json_object(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in reply[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&reply[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Parses the first JSON object in `reply` as a field map.
pub fn parse_fields(reply: &str) -> Option<FieldMap> {
    let candidate = locate_json_object(reply)?;
    let object: Map<String, Value> = serde_json::from_str(candidate).ok()?;

    Some(
        object
            .into_iter()
            .map(|(name, raw)| {
                let field = ReplyValue::classify(raw).into_field(&name);
                (name, field)
            })
            .collect(),
    )
}

/// One field per non-blank line, named `field_<n>` where `n` is the line's
/// position in the reply. Blank lines keep their number.
pub fn degraded_fields(reply: &str) -> FieldMap {
    reply
        .lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let name = format!("field_{}", index);
            let field = FieldValue::new(name.clone(), line, DEGRADED_CONFIDENCE);
            Some((name, field))
        })
        .collect()
}

/// Never fails: falls back to [`degraded_fields`] when no object parses.
pub fn normalize_reply(reply: &str) -> NormalizedReply {
    match parse_fields(reply) {
        Some(fields) => NormalizedReply {
            fields,
            degraded: false,
        },
        None => NormalizedReply {
            fields: degraded_fields(reply),
            degraded: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_gets_default_confidence() {
        let reply = normalize_reply(r#"{"wages": "50000"}"#);
        assert!(!reply.degraded);
        let wages = &reply.fields["wages"];
        assert_eq!(wages.value, "50000");
        assert_eq!(wages.confidence, 0.5);
        assert_eq!(wages.field, "wages");
    }

    #[test]
    fn test_structured_value_and_confidence() {
        let reply = normalize_reply(
            r#"Here you go: {"employer": {"value": "Acme Co", "confidence": 0.95}} Hope this helps."#,
        );
        assert!(!reply.degraded);
        assert_eq!(reply.fields["employer"].value, "Acme Co");
        assert_eq!(reply.fields["employer"].confidence, 0.95);
    }

    #[test]
    fn test_structured_without_confidence_defaults() {
        let reply = normalize_reply(r#"{"ein": {"value": "12-3456789"}}"#);
        assert_eq!(reply.fields["ein"].confidence, 0.5);
    }

    #[test]
    fn test_explicit_zero_confidence_is_kept() {
        let reply = normalize_reply(r#"{"state": {"value": "Not found", "confidence": 0.0}}"#);
        assert_eq!(reply.fields["state"].value, "Not found");
        assert_eq!(reply.fields["state"].confidence, 0.0);
    }

    #[test]
    fn test_confidence_clamped_and_coerced() {
        let reply = normalize_reply(
            r#"{"a": {"value": 1, "confidence": 7}, "b": {"value": 2, "confidence": "0.8"}, "c": {"value": 3, "confidence": "high"}}"#,
        );
        assert_eq!(reply.fields["a"].confidence, 1.0);
        assert_eq!(reply.fields["a"].value, "1");
        assert_eq!(reply.fields["b"].confidence, 0.8);
        assert_eq!(reply.fields["c"].confidence, 0.5);
    }

    #[test]
    fn test_non_string_scalars_are_stringified() {
        let reply = normalize_reply(
            r#"{"wages": 50000.5, "dependents": ["A", "B"], "null_field": null, "flag": true}"#,
        );
        assert_eq!(reply.fields["wages"].value, "50000.5");
        assert_eq!(reply.fields["dependents"].value, r#"["A","B"]"#);
        assert_eq!(reply.fields["null_field"].value, "");
        assert_eq!(reply.fields["flag"].value, "true");
    }

    #[test]
    fn test_nested_object_without_value_key_is_scalar() {
        let reply = normalize_reply(r#"{"address": {"city": "Springfield"}}"#);
        assert_eq!(reply.fields["address"].value, r#"{"city":"Springfield"}"#);
        assert_eq!(reply.fields["address"].confidence, 0.5);
    }

    #[test]
    fn test_degraded_fallback_preserves_lines() {
        let reply = normalize_reply("Wages: 50000\nFederal tax: 5000");
        assert!(reply.degraded);
        assert_eq!(reply.fields.len(), 2);
        assert_eq!(reply.fields["field_0"].value, "Wages: 50000");
        assert_eq!(reply.fields["field_0"].confidence, 0.3);
        assert_eq!(reply.fields["field_1"].value, "Federal tax: 5000");
        assert_eq!(reply.fields["field_1"].confidence, 0.3);
    }

    #[test]
    fn test_degraded_skips_blank_lines() {
        let fields = degraded_fields("one\n\n   \ntwo\n");
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["field_0"].value, "one");
        assert_eq!(fields["field_3"].value, "two");
    }

    #[test]
    fn test_degraded_numbers_follow_line_positions() {
        let fields = degraded_fields("a\n\nb");
        let names: Vec<&str> = fields.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["field_0", "field_2"]);
    }

    #[test]
    fn test_unparseable_object_degrades() {
        let reply = normalize_reply("{not: json}");
        assert!(reply.degraded);
        assert_eq!(reply.fields["field_0"].value, "{not: json}");
    }

    #[test]
    fn test_locate_first_balanced_object() {
        let text = r#"prefix {"a": {"b": "}"}} middle {"c": 1} suffix"#;
        assert_eq!(locate_json_object(text), Some(r#"{"a": {"b": "}"}}"#));
    }

    #[test]
    fn test_locate_handles_escaped_quotes() {
        let text = r#"{"a": "say \"}\" now"} tail"#;
        assert_eq!(locate_json_object(text), Some(r#"{"a": "say \"}\" now"}"#));
    }

    #[test]
    fn test_locate_unbalanced_or_missing() {
        assert_eq!(locate_json_object("no braces here"), None);
        assert_eq!(locate_json_object(r#"{"a": 1"#), None);
    }
}
