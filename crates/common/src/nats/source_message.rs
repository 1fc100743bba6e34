use crate::domain::{attributes, RawMessage};
use anyhow::{anyhow, Result};
use async_nats::jetstream::{self, AckKind};
use async_nats::HeaderMap;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;

/// Header carrying the publisher-assigned message group.
pub const MESSAGE_GROUP_ID_HEADER: &str = "Imt-Message-Group-Id";
/// Header carrying the publishing account or client.
pub const SENDER_ID_HEADER: &str = "Imt-Sender-Id";
/// JetStream's message-id header; the stream deduplicates on it.
pub const MESSAGE_ID_HEADER: &str = "Nats-Msg-Id";

/// A message pulled from a source channel that can be settled exactly once.
#[async_trait]
pub trait SourceMessage: Send + Sync {
    fn raw(&self) -> &RawMessage;

    fn headers(&self) -> Option<&HeaderMap>;

    /// Remove the message from the source.
    async fn ack(&self) -> Result<()>;

    /// Ask the source to redeliver the message now.
    async fn nak(&self) -> Result<()>;
}

/// JetStream delivery metadata used to derive transport attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryInfo {
    pub delivered: i64,
    pub stream_sequence: u64,
    pub published_ms: i64,
}

/// Maps JetStream delivery metadata and headers onto the transport attribute set.
///
/// `ApproximateFirstReceiveTimestamp` is only known on the first delivery;
/// redeliveries omit it.
pub fn transport_attributes(
    info: Option<DeliveryInfo>,
    headers: Option<&HeaderMap>,
    now_ms: i64,
) -> BTreeMap<String, String> {
    let mut attrs = BTreeMap::new();

    if let Some(info) = info {
        attrs.insert(
            attributes::APPROXIMATE_RECEIVE_COUNT.to_string(),
            info.delivered.to_string(),
        );
        attrs.insert(
            attributes::SEQUENCE_NUMBER.to_string(),
            info.stream_sequence.to_string(),
        );
        attrs.insert(
            attributes::SENT_TIMESTAMP.to_string(),
            info.published_ms.to_string(),
        );
        if info.delivered <= 1 {
            attrs.insert(
                attributes::APPROXIMATE_FIRST_RECEIVE_TIMESTAMP.to_string(),
                now_ms.to_string(),
            );
        }
    }

    if let Some(headers) = headers {
        for (header, attribute) in [
            (MESSAGE_GROUP_ID_HEADER, attributes::MESSAGE_GROUP_ID),
            (SENDER_ID_HEADER, attributes::SENDER_ID),
            (MESSAGE_ID_HEADER, attributes::MESSAGE_DEDUPLICATION_ID),
        ] {
            if let Some(value) = headers.get(header) {
                attrs.insert(attribute.to_string(), value.as_str().to_string());
            }
        }
    }

    attrs
}

/// SourceMessage backed by a JetStream pull-consumer message.
pub struct JetStreamSourceMessage {
    message: jetstream::Message,
    raw: RawMessage,
}

impl JetStreamSourceMessage {
    pub fn new(message: jetstream::Message) -> Self {
        let info = message.info().ok().map(|info| DeliveryInfo {
            delivered: info.delivered,
            stream_sequence: info.stream_sequence,
            published_ms: (info.published.unix_timestamp_nanos() / 1_000_000) as i64,
        });

        let raw = RawMessage {
            subject: message.subject.to_string(),
            payload: message.payload.clone(),
            attributes: transport_attributes(
                info,
                message.headers.as_ref(),
                Utc::now().timestamp_millis(),
            ),
        };

        Self { message, raw }
    }
}

#[async_trait]
impl SourceMessage for JetStreamSourceMessage {
    fn raw(&self) -> &RawMessage {
        &self.raw
    }

    fn headers(&self) -> Option<&HeaderMap> {
        self.message.headers.as_ref()
    }

    async fn ack(&self) -> Result<()> {
        self.message
            .ack()
            .await
            .map_err(|e| anyhow!("failed to acknowledge message: {e}"))
    }

    async fn nak(&self) -> Result<()> {
        self.message
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(|e| anyhow!("failed to reject message: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_delivery_attributes() {
        let mut headers = HeaderMap::new();
        headers.insert(MESSAGE_GROUP_ID_HEADER, "ABC123");
        headers.insert(MESSAGE_ID_HEADER, "rr-1");

        let attrs = transport_attributes(
            Some(DeliveryInfo {
                delivered: 1,
                stream_sequence: 42,
                published_ms: 1_700_000_000_000,
            }),
            Some(&headers),
            1_700_000_000_500,
        );

        assert_eq!(attrs[attributes::APPROXIMATE_RECEIVE_COUNT], "1");
        assert_eq!(attrs[attributes::SEQUENCE_NUMBER], "42");
        assert_eq!(attrs[attributes::SENT_TIMESTAMP], "1700000000000");
        assert_eq!(
            attrs[attributes::APPROXIMATE_FIRST_RECEIVE_TIMESTAMP],
            "1700000000500"
        );
        assert_eq!(attrs[attributes::MESSAGE_GROUP_ID], "ABC123");
        assert_eq!(attrs[attributes::MESSAGE_DEDUPLICATION_ID], "rr-1");
        assert!(!attrs.contains_key(attributes::SENDER_ID));
    }

    #[test]
    fn test_redelivery_omits_first_receive_timestamp() {
        let attrs = transport_attributes(
            Some(DeliveryInfo {
                delivered: 3,
                stream_sequence: 7,
                published_ms: 10,
            }),
            None,
            20,
        );

        assert_eq!(attrs[attributes::APPROXIMATE_RECEIVE_COUNT], "3");
        assert!(!attrs.contains_key(attributes::APPROXIMATE_FIRST_RECEIVE_TIMESTAMP));
    }

    #[test]
    fn test_no_metadata_yields_no_attributes() {
        assert!(transport_attributes(None, None, 0).is_empty());
    }
}
