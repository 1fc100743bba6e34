use crate::nats::{MESSAGE_GROUP_ID_HEADER, MESSAGE_ID_HEADER};
use async_nats::HeaderMap;
use bytes::Bytes;

/// One JetStream publish travelling through the publisher middleware.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub subject: String,
    pub payload: Bytes,
    /// Dedup id, group id and trace context all travel as headers
    pub headers: HeaderMap,
}

impl PublishRequest {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
            headers: HeaderMap::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// The `Nats-Msg-Id` the stream deduplicates on, if set.
    pub fn message_id(&self) -> Option<&str> {
        self.header(MESSAGE_ID_HEADER)
    }

    pub fn group_id(&self) -> Option<&str> {
        self.header(MESSAGE_GROUP_ID_HEADER)
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|value| value.as_str())
    }
}

/// Stream acknowledgement of a publish.
#[derive(Debug)]
pub struct PublishResponse {
    pub subject: String,
    /// The stream already held a message with the same `Nats-Msg-Id`
    pub duplicate: bool,
}
