use crate::domain::RawMessage;
use async_nats::HeaderMap;

/// Request type for consuming a single NATS message through Tower.
///
/// Owns the raw message (subject, payload, transport attributes) so it can
/// pass through middleware layers without lifetime concerns.
#[derive(Debug, Clone)]
pub struct ConsumeRequest {
    pub message: RawMessage,
    /// Optional headers (used for trace context propagation)
    pub headers: Option<HeaderMap>,
}

impl ConsumeRequest {
    pub fn new(message: RawMessage, headers: Option<HeaderMap>) -> Self {
        Self { message, headers }
    }

    pub fn subject(&self) -> &str {
        &self.message.subject
    }
}

/// How the consumer should settle a message after the service has run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeResponse {
    /// Processed and published downstream - acknowledge it
    Ack,
    /// Transient failure - ask for immediate redelivery
    Nak(Option<String>),
    /// Leave unacknowledged; the source redelivers once the ack wait lapses
    Retain(Option<String>),
}

impl ConsumeResponse {
    pub fn ack() -> Self {
        Self::Ack
    }

    pub fn nak(reason: impl Into<String>) -> Self {
        Self::Nak(Some(reason.into()))
    }

    pub fn retain(reason: impl Into<String>) -> Self {
        Self::Retain(Some(reason.into()))
    }

    pub fn is_ack(&self) -> bool {
        matches!(self, Self::Ack)
    }

    pub fn is_nak(&self) -> bool {
        matches!(self, Self::Nak(_))
    }

    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Nak(_) => "nak",
            Self::Retain(_) => "retain",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_consume_request_new() {
        let req = ConsumeRequest::new(RawMessage::new("imt.mo", Bytes::from("payload")), None);

        assert_eq!(req.subject(), "imt.mo");
        assert_eq!(req.message.payload, Bytes::from("payload"));
        assert!(req.headers.is_none());
    }

    #[test]
    fn test_consume_response_outcomes() {
        assert!(ConsumeResponse::ack().is_ack());
        assert!(ConsumeResponse::nak("broker down").is_nak());
        assert_eq!(ConsumeResponse::retain("bad json").outcome(), "retain");

        if let ConsumeResponse::Nak(Some(reason)) = ConsumeResponse::nak("test error") {
            assert_eq!(reason, "test error");
        } else {
            panic!("Expected Nak with reason");
        }
    }
}
