use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Route labels stamped by the source adapters.
pub mod routes {
    pub const MO: &str = "mo";
    pub const MT_CHANGE: &str = "mt-change";
    pub const STATUS: &str = "status";
}

/// Transport attribute names carried on every envelope.
pub mod attributes {
    pub const APPROXIMATE_RECEIVE_COUNT: &str = "ApproximateReceiveCount";
    pub const SENT_TIMESTAMP: &str = "SentTimestamp";
    pub const SEQUENCE_NUMBER: &str = "SequenceNumber";
    pub const MESSAGE_GROUP_ID: &str = "MessageGroupId";
    pub const SENDER_ID: &str = "SenderId";
    pub const MESSAGE_DEDUPLICATION_ID: &str = "MessageDeduplicationId";
    pub const APPROXIMATE_FIRST_RECEIVE_TIMESTAMP: &str = "ApproximateFirstReceiveTimestamp";
    pub const ACCOUNT: &str = "account";

    /// The seven queue attributes persisted alongside status records.
    pub const TRANSPORT: [&str; 7] = [
        APPROXIMATE_RECEIVE_COUNT,
        SENT_TIMESTAMP,
        SEQUENCE_NUMBER,
        MESSAGE_GROUP_ID,
        SENDER_ID,
        MESSAGE_DEDUPLICATION_ID,
        APPROXIMATE_FIRST_RECEIVE_TIMESTAMP,
    ];
}

/// The normalized message shape every adapter publishes onto the bus.
///
/// Fields are private: once built, an envelope is only read. Fan-out shares it
/// behind an `Arc`, so targets never observe each other's work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    route: String,
    body: Map<String, Value>,
    attributes: BTreeMap<String, String>,
    received_at: DateTime<Utc>,
}

impl Envelope {
    pub fn new(
        route: impl Into<String>,
        body: Map<String, Value>,
        attributes: BTreeMap<String, String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            route: route.into(),
            body,
            attributes,
            received_at,
        }
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Looks up a dotted path (`message.requestReference`) inside the body.
    pub fn body_value(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.body, path)
    }

    /// Device identity, when the body carries it as a string.
    pub fn cmid(&self) -> Option<&str> {
        self.body.get("cmid").and_then(Value::as_str)
    }
}

/// Walks a dotted path through nested JSON objects.
pub fn lookup_path<'a>(root: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = root.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}
