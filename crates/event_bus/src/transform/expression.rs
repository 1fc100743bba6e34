use common::domain::{Envelope, FabricError, FabricResult};
use serde_json::Value;
use std::fmt;

/// Where a template field, path segment or ordering key takes its value from.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceExpr {
    /// Dotted path into the envelope body
    Body(String),
    /// A transport attribute by name
    Attribute(String),
    /// A constant injected from configuration (e.g. the MT topic id)
    Literal(Value),
    /// The envelope's route label
    Route,
}

impl SourceExpr {
    pub fn body(path: impl Into<String>) -> Self {
        Self::Body(path.into())
    }

    pub fn attribute(name: impl Into<String>) -> Self {
        Self::Attribute(name.into())
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// Parses `$.body.<path>`, `$.attributes.<name>` or `$.route`.
    pub fn parse(expr: &str) -> FabricResult<Self> {
        if expr == "$.route" {
            return Ok(Self::Route);
        }
        if let Some(path) = expr.strip_prefix("$.body.") {
            if !path.is_empty() && path.split('.').all(|segment| !segment.is_empty()) {
                return Ok(Self::Body(path.to_string()));
            }
        }
        if let Some(name) = expr.strip_prefix("$.attributes.") {
            if !name.is_empty() {
                return Ok(Self::Attribute(name.to_string()));
            }
        }
        Err(FabricError::Configuration(format!(
            "unsupported source expression: {expr}"
        )))
    }

    /// Resolves the expression against an envelope. `None` means absent.
    pub fn evaluate(&self, envelope: &Envelope) -> Option<Value> {
        match self {
            Self::Body(path) => envelope.body_value(path).cloned(),
            Self::Attribute(name) => envelope
                .attribute(name)
                .map(|value| Value::String(value.to_string())),
            Self::Literal(value) => Some(value.clone()),
            Self::Route => Some(Value::String(envelope.route().to_string())),
        }
    }

    /// Resolves to a value that is present and not empty.
    pub fn evaluate_present(&self, envelope: &Envelope) -> Option<Value> {
        self.evaluate(envelope).filter(|value| !is_empty(value))
    }
}

/// Null and the empty string count as absent.
pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Text form of a scalar used in keys and topic segments.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl fmt::Display for SourceExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Body(path) => write!(f, "$.body.{path}"),
            Self::Attribute(name) => write!(f, "$.attributes.{name}"),
            Self::Literal(value) => write!(f, "literal({value})"),
            Self::Route => write!(f, "$.route"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn envelope() -> Envelope {
        let mut attrs = BTreeMap::new();
        attrs.insert("SentTimestamp".to_string(), "1700000000000".to_string());
        Envelope::new(
            "status",
            json!({"cmid": "ABC123", "messageId": "", "nested": {"value": 3}})
                .as_object()
                .cloned()
                .unwrap(),
            attrs,
            Utc::now(),
        )
    }

    #[test]
    fn test_parse_round_trips_display() {
        for text in ["$.body.cmid", "$.body.message.requestReference", "$.attributes.SentTimestamp", "$.route"] {
            assert_eq!(SourceExpr::parse(text).unwrap().to_string(), text);
        }
    }

    #[test]
    fn test_parse_rejects_unknown_roots() {
        for text in ["cmid", "$.body.", "$.body.a..b", "$.attributes.", "$.headers.x"] {
            assert!(matches!(
                SourceExpr::parse(text),
                Err(FabricError::Configuration(_))
            ));
        }
    }

    #[test]
    fn test_evaluate_sources() {
        let env = envelope();
        assert_eq!(SourceExpr::body("cmid").evaluate(&env), Some(json!("ABC123")));
        assert_eq!(SourceExpr::body("nested.value").evaluate(&env), Some(json!(3)));
        assert_eq!(
            SourceExpr::attribute("SentTimestamp").evaluate(&env),
            Some(json!("1700000000000"))
        );
        assert_eq!(SourceExpr::literal(7).evaluate(&env), Some(json!(7)));
        assert_eq!(SourceExpr::Route.evaluate(&env), Some(json!("status")));
        assert_eq!(SourceExpr::attribute("SenderId").evaluate(&env), None);
    }

    #[test]
    fn test_empty_string_is_not_present() {
        let env = envelope();
        assert_eq!(SourceExpr::body("messageId").evaluate(&env), Some(json!("")));
        assert_eq!(SourceExpr::body("messageId").evaluate_present(&env), None);
    }

    #[test]
    fn test_scalar_text() {
        assert_eq!(scalar_text(&json!("rr-1")), Some("rr-1".to_string()));
        assert_eq!(scalar_text(&json!(42)), Some("42".to_string()));
        assert_eq!(scalar_text(&json!("")), None);
        assert_eq!(scalar_text(&json!({"a": 1})), None);
    }
}
