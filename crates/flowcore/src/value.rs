use serde::{Deserialize, Serialize};

/// Dynamic value carried on every port
pub type Value = serde_json::Value;

/// JSON object map used for parameters, constants and metadata
pub type Map = serde_json::Map<String, Value>;

/// Declared type of an input or output port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortType {
    #[default]
    Any,
    String,
    Number,
    Boolean,
    Json,
    List,
    Object,
}

impl PortType {
    /// Whether a connection from a port of this type may feed `target`.
    pub fn can_feed(self, target: PortType) -> bool {
        use PortType::*;
        match (self, target) {
            (a, b) if a == b => true,
            (Any, _) | (_, Any) => true,
            (Json, String) | (String, Json) => true,
            (Json, Object | List | Number | Boolean) => true,
            (Object | List | Number | Boolean, Json) => true,
            (Number | Boolean, String) => true,
            _ => false,
        }
    }

    /// Whether a concrete value inhabits this type.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            PortType::Any | PortType::Json => true,
            PortType::String => value.is_string(),
            PortType::Number => value.is_number(),
            PortType::Boolean => value.is_boolean(),
            PortType::List => value.is_array(),
            PortType::Object => value.is_object(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PortType::Any => "any",
            PortType::String => "string",
            PortType::Number => "number",
            PortType::Boolean => "boolean",
            PortType::Json => "json",
            PortType::List => "list",
            PortType::Object => "object",
        }
    }
}

impl std::fmt::Display for PortType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Adjust a value for delivery to a port of the given type.
///
/// String ports receive the compact JSON text of non-string values; structured
/// ports receiving text that parses as JSON get the parsed document. Anything
/// else passes through untouched.
pub fn coerce_for_port(target: PortType, value: Value) -> Value {
    match (target, value) {
        (PortType::String, Value::String(s)) => Value::String(s),
        (PortType::String, other) => Value::String(other.to_string()),
        (PortType::Json | PortType::Object | PortType::List, Value::String(s)) => {
            match serde_json::from_str::<Value>(&s) {
                Ok(parsed) if target.accepts(&parsed) => parsed,
                _ => Value::String(s),
            }
        }
        (_, other) => other,
    }
}

/// Short type name of a JSON value, for error messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_and_string_feed_each_other() {
        assert!(PortType::Json.can_feed(PortType::String));
        assert!(PortType::String.can_feed(PortType::Json));
    }

    #[test]
    fn list_and_string_are_incompatible() {
        assert!(!PortType::List.can_feed(PortType::String));
        assert!(!PortType::String.can_feed(PortType::List));
        assert!(!PortType::String.can_feed(PortType::Number));
    }

    #[test]
    fn any_feeds_everything() {
        for t in [PortType::String, PortType::List, PortType::Object, PortType::Boolean] {
            assert!(PortType::Any.can_feed(t));
            assert!(t.can_feed(PortType::Any));
        }
    }

    #[test]
    fn string_port_stringifies_documents() {
        let v = coerce_for_port(PortType::String, json!({"a": 1}));
        assert_eq!(v, json!("{\"a\":1}"));
    }

    #[test]
    fn json_port_parses_text() {
        let v = coerce_for_port(PortType::Json, json!("{\"a\": 1}"));
        assert_eq!(v, json!({"a": 1}));

        let v = coerce_for_port(PortType::Object, json!("not json"));
        assert_eq!(v, json!("not json"));
    }
}
