//! Uniform field access over JSON-shaped records
//!
//! Classifier payloads, filter maps and result rows all arrive as loosely
//! typed JSON. Every lookup goes through `FieldAccess` so an absent key, a
//! `null`, a blank string or a value of the wrong shape all read as `None`.

use serde_json::{Map, Value};

pub trait FieldAccess {
    /// Raw value for `name`, `None` when absent or `null`.
    fn field(&self, name: &str) -> Option<&Value>;

    /// Trimmed, non-empty string value.
    fn text(&self, name: &str) -> Option<&str> {
        self.field(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    fn text_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.text(name).unwrap_or(default)
    }

    fn object(&self, name: &str) -> Option<&Map<String, Value>> {
        self.field(name).and_then(Value::as_object)
    }
}

impl FieldAccess for Map<String, Value> {
    fn field(&self, name: &str) -> Option<&Value> {
        self.get(name).filter(|v| !v.is_null())
    }
}

impl FieldAccess for Value {
    fn field(&self, name: &str) -> Option<&Value> {
        self.as_object().and_then(|map| map.field(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_absent_null_and_blank_read_as_none() {
        let value = json!({"a": null, "b": "   ", "c": "x"});
        assert!(value.field("a").is_none());
        assert!(value.text("b").is_none());
        assert!(value.text("missing").is_none());
        assert_eq!(value.text("c"), Some("x"));
        assert_eq!(value.text_or("b", "fallback"), "fallback");
    }

    #[test]
    fn test_non_object_has_no_fields() {
        let value = json!(["a", "b"]);
        assert!(value.field("a").is_none());
    }
}
