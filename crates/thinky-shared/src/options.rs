//! Normalization of loosely-typed question option payloads.
//!
//! Upstream content tools stored multiple-choice options in whatever shape
//! the admin screen produced: a JSON array, a JSON object keyed by slot, a
//! string containing JSON, or a bare scalar. Everything funnels through
//! [`normalize`] into one canonical ordered list of strings so rendering and
//! grading never see the raw shapes.

use serde_json::Value;

/// The payload shapes [`normalize`] accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionPayload {
    /// A string that may itself contain serialized JSON.
    Raw(String),
    /// Already a JSON array.
    List(Vec<Value>),
    /// A JSON object; values are taken in key order.
    Object(serde_json::Map<String, Value>),
    /// Any other scalar (number, bool).
    Scalar(Value),
}

impl From<&Value> for OptionPayload {
    fn from(value: &Value) -> Self {
        match value {
            Value::String(s) => OptionPayload::Raw(s.clone()),
            Value::Array(items) => OptionPayload::List(items.clone()),
            Value::Object(map) => OptionPayload::Object(map.clone()),
            other => OptionPayload::Scalar(other.clone()),
        }
    }
}

/// Reduce an arbitrary options payload to an ordered list of display strings.
///
/// A raw string is first re-parsed as JSON (admin screens often stored
/// stringified arrays); if that fails it becomes a single option. Null yields
/// an empty list.
pub fn normalize(value: &Value) -> Vec<String> {
    if value.is_null() {
        return Vec::new();
    }
    match OptionPayload::from(value) {
        OptionPayload::Raw(s) => match serde_json::from_str::<Value>(&s) {
            Ok(ref inner) if inner.is_array() || inner.is_object() => normalize(inner),
            _ => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    Vec::new()
                } else {
                    vec![trimmed.to_string()]
                }
            }
        },
        OptionPayload::List(items) => items.iter().map(value_to_string).collect(),
        OptionPayload::Object(map) => map.values().map(value_to_string).collect(),
        OptionPayload::Scalar(v) => vec![value_to_string(&v)],
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_array_payload() {
        let v = json!(["Red", "Green", 3]);
        assert_eq!(normalize(&v), vec!["Red", "Green", "3"]);
    }

    #[test]
    fn test_object_payload_values_in_key_order() {
        let v = json!({"a": "First", "b": "Second", "c": "Third"});
        assert_eq!(normalize(&v), vec!["First", "Second", "Third"]);
    }

    #[test]
    fn test_stringified_array() {
        let v = json!("[\"Yes\", \"No\"]");
        assert_eq!(normalize(&v), vec!["Yes", "No"]);
    }

    #[test]
    fn test_plain_string_is_single_option() {
        let v = json!("  True or False  ");
        assert_eq!(normalize(&v), vec!["True or False"]);
    }

    #[test]
    fn test_scalar_and_null() {
        assert_eq!(normalize(&json!(42)), vec!["42"]);
        assert!(normalize(&Value::Null).is_empty());
    }

    #[test]
    fn test_empty_string() {
        assert!(normalize(&json!("")).is_empty());
    }
}
