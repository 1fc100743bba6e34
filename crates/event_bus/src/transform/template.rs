use crate::transform::{FieldKind, SourceExpr};
use common::domain::{lookup_path, Envelope, FabricError, FabricResult};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// One output field of a template.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRule {
    /// Dotted output path; intermediate objects are created as needed
    pub output: String,
    pub source: SourceExpr,
    pub kind: FieldKind,
    pub required: bool,
}

/// Declarative mapping from an envelope to a sink payload.
///
/// Interpreted, not generated: each rule is evaluated in order, coerced to its
/// declared kind, and written at its output path. Optional fields whose source
/// is absent or empty are left out of the payload entirely.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformTemplate {
    name: String,
    fields: Vec<FieldRule>,
}

impl TransformTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn required(self, output: &str, source: SourceExpr, kind: FieldKind) -> Self {
        self.field(output, source, kind, true)
    }

    pub fn optional(self, output: &str, source: SourceExpr, kind: FieldKind) -> Self {
        self.field(output, source, kind, false)
    }

    fn field(mut self, output: &str, source: SourceExpr, kind: FieldKind, required: bool) -> Self {
        self.fields.push(FieldRule {
            output: output.to_string(),
            source,
            kind,
            required,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldRule] {
        &self.fields
    }

    /// Rejects empty templates and output paths that collide, such as `a`
    /// together with `a.b`.
    pub fn validate(&self) -> FabricResult<()> {
        if self.fields.is_empty() {
            return Err(FabricError::Configuration(format!(
                "template {} has no fields",
                self.name
            )));
        }

        let mut seen = BTreeSet::new();
        for rule in &self.fields {
            if rule.output.is_empty() || rule.output.split('.').any(str::is_empty) {
                return Err(FabricError::Configuration(format!(
                    "template {} has an invalid output path '{}'",
                    self.name, rule.output
                )));
            }
            if !seen.insert(rule.output.as_str()) {
                return Err(FabricError::Configuration(format!(
                    "template {} maps '{}' twice",
                    self.name, rule.output
                )));
            }
        }

        for a in &seen {
            for b in &seen {
                if b.len() > a.len() && b.starts_with(a) && b.as_bytes()[a.len()] == b'.' {
                    return Err(FabricError::Configuration(format!(
                        "template {} output '{}' is both a value and a parent of '{}'",
                        self.name, a, b
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn apply(&self, envelope: &Envelope) -> FabricResult<OutputPayload> {
        let mut output = Map::new();

        for rule in &self.fields {
            let value = match rule.source.evaluate_present(envelope) {
                Some(value) => value,
                None if rule.required => {
                    return Err(FabricError::MissingField {
                        field: rule.output.clone(),
                        expression: rule.source.to_string(),
                    });
                }
                None => continue,
            };

            let coerced = rule.kind.coerce(&rule.output, value)?;
            insert_at(&mut output, &rule.output, coerced);
        }

        Ok(OutputPayload(output))
    }
}

fn insert_at(root: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            root.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = root
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(map) = child {
                insert_at(map, rest, value);
            }
        }
    }
}

/// A transformed payload ready for a sink.
///
/// Keys serialize in sorted order, so equal payloads are byte-identical.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OutputPayload(Map<String, Value>);

impl OutputPayload {
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.0, path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        Value::Object(self.0.clone()).to_string().into_bytes()
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for OutputPayload {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn status_envelope(body: Value) -> Envelope {
        let mut attrs = BTreeMap::new();
        attrs.insert("SentTimestamp".to_string(), "1700000000000".to_string());
        attrs.insert("ApproximateReceiveCount".to_string(), "1".to_string());
        Envelope::new(
            "status",
            body.as_object().cloned().unwrap(),
            attrs,
            Utc::now(),
        )
    }

    fn status_template() -> TransformTemplate {
        TransformTemplate::new("status_record")
            .required("requestReference", SourceExpr::body("requestReference"), FieldKind::String)
            .required("ts", SourceExpr::attribute("SentTimestamp"), FieldKind::Number)
            .required("cmid", SourceExpr::body("cmid"), FieldKind::String)
            .optional("messageId", SourceExpr::body("messageId"), FieldKind::Number)
            .optional(
                "attributes.ApproximateReceiveCount",
                SourceExpr::attribute("ApproximateReceiveCount"),
                FieldKind::String,
            )
            .optional(
                "attributes.SenderId",
                SourceExpr::attribute("SenderId"),
                FieldKind::String,
            )
    }

    #[test]
    fn test_optional_absent_field_is_omitted() {
        let env = status_envelope(json!({"requestReference": "rr-1", "cmid": "ABC123"}));
        let out = status_template().apply(&env).unwrap();

        assert!(!out.contains("messageId"));
        assert_eq!(out.get("ts"), Some(&json!(1_700_000_000_000i64)));
        assert_eq!(out.get("attributes.ApproximateReceiveCount"), Some(&json!("1")));
        assert!(!out.contains("attributes.SenderId"));
    }

    #[test]
    fn test_optional_empty_string_is_omitted() {
        let env = status_envelope(json!({"requestReference": "rr-1", "cmid": "ABC123", "messageId": ""}));
        let out = status_template().apply(&env).unwrap();
        assert!(!out.fields().contains_key("messageId"));
    }

    #[test]
    fn test_required_missing_field() {
        let env = status_envelope(json!({"cmid": "ABC123"}));
        let err = status_template().apply(&env).unwrap_err();
        assert_eq!(
            err,
            FabricError::MissingField {
                field: "requestReference".to_string(),
                expression: "$.body.requestReference".to_string(),
            }
        );
    }

    #[test]
    fn test_declared_number_rejects_text() {
        let env = status_envelope(json!({"requestReference": "rr-1", "cmid": "ABC123", "messageId": "abc"}));
        let err = status_template().apply(&env).unwrap_err();
        assert_eq!(err.kind(), "TypeCoercionError");
    }

    #[test]
    fn test_apply_is_byte_identical() {
        let env = status_envelope(json!({"requestReference": "rr-1", "cmid": "ABC123", "messageId": 9}));
        let template = status_template();
        let first = template.apply(&env).unwrap().to_bytes();
        let second = template.apply(&env).unwrap().to_bytes();
        assert_eq!(first, second);
    }

    #[test]
    fn test_literal_is_injected() {
        let env = status_envelope(json!({"cmid": "ABC123"}));
        let out = TransformTemplate::new("mt_send")
            .required("topicId", SourceExpr::literal(244), FieldKind::Number)
            .apply(&env)
            .unwrap();
        assert_eq!(out.get("topicId"), Some(&json!(244)));
    }

    #[test]
    fn test_validate_rejects_collisions() {
        let empty = TransformTemplate::new("empty");
        assert!(empty.validate().is_err());

        let duplicate = TransformTemplate::new("dup")
            .required("cmid", SourceExpr::body("cmid"), FieldKind::String)
            .optional("cmid", SourceExpr::body("cmid"), FieldKind::String);
        assert!(duplicate.validate().is_err());

        let parent = TransformTemplate::new("parent")
            .required("attributes", SourceExpr::body("a"), FieldKind::Json)
            .optional("attributes.x", SourceExpr::body("x"), FieldKind::String);
        assert!(parent.validate().is_err());

        let prefix_only = TransformTemplate::new("ok")
            .required("ts", SourceExpr::body("ts"), FieldKind::Number)
            .required("tsExtra", SourceExpr::body("x"), FieldKind::String);
        assert!(prefix_only.validate().is_ok());
        assert!(status_template().validate().is_ok());
    }
}
