use bytes::Bytes;
use std::collections::BTreeMap;

/// A message as pulled from an external channel, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    /// Channel subject the message was read from
    pub subject: String,
    pub payload: Bytes,
    /// Transport metadata (receive count, sequence number, ...), all string-typed
    pub attributes: BTreeMap<String, String>,
}

impl RawMessage {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}
