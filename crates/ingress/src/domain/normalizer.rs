use chrono::{DateTime, Utc};
use common::domain::{routes, Envelope, FabricError, FabricResult, RawMessage};
use serde_json::{Map, Value};

const STATUS_WRAPPER: &str = "mtMessageStatus";

/// Turns a raw channel message into an envelope for one route.
///
/// The payload must decode to a JSON object carrying every required field
/// with a non-empty value. Transport attributes are copied across untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalizer {
    route: &'static str,
    required: &'static [&'static str],
    unwrap_key: Option<&'static str>,
}

impl Normalizer {
    pub fn mo() -> Self {
        Self {
            route: routes::MO,
            required: &["cmid", "payload", "transmissionEndTime"],
            unwrap_key: None,
        }
    }

    /// Status bodies may arrive wrapped as `{"mtMessageStatus": {...}}`.
    pub fn status() -> Self {
        Self {
            route: routes::STATUS,
            required: &["cmid", "requestReference", "deliveryStatus"],
            unwrap_key: Some(STATUS_WRAPPER),
        }
    }

    pub fn mt_change() -> Self {
        Self {
            route: routes::MT_CHANGE,
            required: &["cmid", "ts"],
            unwrap_key: None,
        }
    }

    pub fn route(&self) -> &'static str {
        self.route
    }

    pub fn normalize(&self, raw: &RawMessage, received_at: DateTime<Utc>) -> FabricResult<Envelope> {
        let body = self.decode_body(&raw.payload)?;

        for field in self.required {
            match body.get(*field) {
                None | Some(Value::Null) => {
                    return Err(FabricError::malformed(
                        self.route,
                        format!("missing required field {}", field),
                    ));
                }
                Some(Value::String(s)) if s.is_empty() => {
                    return Err(FabricError::malformed(
                        self.route,
                        format!("required field {} is empty", field),
                    ));
                }
                Some(_) => {}
            }
        }

        Ok(Envelope::new(
            self.route,
            body,
            raw.attributes.clone(),
            received_at,
        ))
    }

    fn decode_body(&self, payload: &[u8]) -> FabricResult<Map<String, Value>> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| FabricError::malformed(self.route, format!("payload is not JSON: {}", e)))?;

        let Value::Object(mut body) = value else {
            return Err(FabricError::malformed(
                self.route,
                "payload is not a JSON object",
            ));
        };

        if let Some(key) = self.unwrap_key {
            match body.remove(key) {
                Some(Value::Object(inner)) => return Ok(inner),
                Some(_) => {
                    return Err(FabricError::malformed(
                        self.route,
                        format!("{} is not a JSON object", key),
                    ));
                }
                None => {}
            }
        }

        Ok(body)
    }
}
