use common::domain::{FabricError, FabricResult};
use serde_json::{Number, Value};
use std::fmt;

/// Declared output type of a template field. Never inferred from the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Number,
    Bool,
    /// Copied through unchanged (objects, arrays, any scalar)
    Json,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Bool => "boolean",
            Self::Json => "json",
        };
        f.write_str(name)
    }
}

impl FieldKind {
    /// Converts `value` to this kind.
    ///
    /// Numeric and boolean text is accepted for `Number`/`Bool` since transport
    /// attributes are always strings; anything else that does not fit fails
    /// with `TypeCoercion`.
    pub fn coerce(self, field: &str, value: Value) -> FabricResult<Value> {
        let mismatch = |value: &Value| FabricError::TypeCoercion {
            field: field.to_string(),
            expected: self.to_string(),
            found: value.to_string(),
        };

        match (self, value) {
            (Self::Json, value) => Ok(value),
            (Self::String, Value::String(s)) => Ok(Value::String(s)),
            (Self::String, Value::Number(n)) => Ok(Value::String(n.to_string())),
            (Self::String, Value::Bool(b)) => Ok(Value::String(b.to_string())),
            (Self::Number, Value::Number(n)) => Ok(Value::Number(n)),
            (Self::Number, Value::String(s)) => {
                parse_number(s.trim()).ok_or_else(|| mismatch(&Value::String(s)))
            }
            (Self::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
            (Self::Bool, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(mismatch(&Value::String(s))),
            },
            (_, other) => Err(mismatch(&other)),
        }
    }
}

fn parse_number(text: &str) -> Option<Value> {
    if let Ok(int) = text.parse::<i64>() {
        return Some(Value::from(int));
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_number_from_text_and_number() {
        assert_eq!(
            FieldKind::Number.coerce("ts", json!("1700000000000")).unwrap(),
            json!(1_700_000_000_000i64)
        );
        assert_eq!(FieldKind::Number.coerce("topicId", json!(7)).unwrap(), json!(7));
        assert_eq!(FieldKind::Number.coerce("lat", json!(" 1.5 ")).unwrap(), json!(1.5));
    }

    #[test]
    fn test_non_numeric_text_fails_for_number() {
        let err = FieldKind::Number.coerce("messageId", json!("abc")).unwrap_err();
        assert_eq!(
            err,
            FabricError::TypeCoercion {
                field: "messageId".to_string(),
                expected: "number".to_string(),
                found: "\"abc\"".to_string(),
            }
        );
        assert!(FieldKind::Number.coerce("messageId", json!("NaN")).is_err());
    }

    #[test]
    fn test_bool_coercion() {
        assert_eq!(FieldKind::Bool.coerce("p", json!(true)).unwrap(), json!(true));
        assert_eq!(FieldKind::Bool.coerce("p", json!("FALSE")).unwrap(), json!(false));
        assert!(FieldKind::Bool.coerce("p", json!(1)).is_err());
    }

    #[test]
    fn test_string_accepts_scalars_only() {
        assert_eq!(FieldKind::String.coerce("s", json!(12)).unwrap(), json!("12"));
        assert!(FieldKind::String.coerce("s", json!({"a": 1})).is_err());
        assert!(FieldKind::String.coerce("s", json!([1])).is_err());
    }

    #[test]
    fn test_json_passes_through() {
        let value = json!({"nested": [1, 2]});
        assert_eq!(FieldKind::Json.coerce("x", value.clone()).unwrap(), value);
    }
}
