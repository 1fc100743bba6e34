use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// MT message fields a device publishes on `<prefix>/<cmid>/mt`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MtMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ring_style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

/// One row of the MT table, keyed by `(cmid, ts)`. The same shape travels on
/// the MT change feed as the new image of the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MtChangeRecord {
    pub cmid: String,
    /// Capture time in epoch milliseconds
    pub ts: i64,
    pub message: MtMessage,
}

impl MtChangeRecord {
    pub fn to_item(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mt_change_record_item_shape() {
        let record = MtChangeRecord {
            cmid: "ABC123".to_string(),
            ts: 1_700_000_000_000,
            message: MtMessage {
                topic_id: Some(json!(7)),
                request_reference: Some("rr-1".to_string()),
                ring_style: None,
                payload: Some("SGVsbG8=".to_string()),
            },
        };

        let item = record.to_item();
        assert_eq!(item["cmid"], json!("ABC123"));
        assert_eq!(item["ts"], json!(1_700_000_000_000i64));
        assert_eq!(item["message"]["requestReference"], json!("rr-1"));
        assert!(item["message"].get("ringStyle").is_none());
    }

    #[test]
    fn test_mt_message_ignores_unknown_fields() {
        let message: MtMessage = serde_json::from_value(json!({
            "payload": "SGk=",
            "requestReference": "rr-9",
            "extra": true
        }))
        .unwrap();
        assert_eq!(message.request_reference.as_deref(), Some("rr-9"));
        assert!(message.topic_id.is_none());
    }
}
