use async_trait::async_trait;
use common::domain::DeliveryError;
use common::nats::{
    JetStreamPublisher, LayeredPublisher, NatsPublisherBuilder, NatsTracingConfig, PublishRequest,
    MESSAGE_GROUP_ID_HEADER, MESSAGE_ID_HEADER,
};
use event_bus::{Ack, Delivery, Sink};
use std::sync::Arc;
use tower::Service;
use tracing::debug;

/// Queue-forward sink for the MT egress stream.
///
/// The dedup key travels as `Nats-Msg-Id`, so the stream drops repeats inside
/// its duplicate window; the group key travels as a header for consumers
/// that read per group in order. Deliveries without ordering keys are
/// rejected.
pub struct QueueForwardSink {
    publisher: LayeredPublisher,
    subject: String,
}

impl QueueForwardSink {
    pub fn new(jetstream: Arc<dyn JetStreamPublisher>, subject: String) -> Self {
        debug!(subject = %subject, "initialized QueueForwardSink");

        let publisher = NatsPublisherBuilder::new(jetstream)
            .with_tracing(NatsTracingConfig::new("queue_forward_sink"))
            .with_logging()
            .build();

        Self { publisher, subject }
    }
}

#[async_trait]
impl Sink for QueueForwardSink {
    async fn deliver(&self, delivery: &Delivery) -> Result<Ack, DeliveryError> {
        let ordering = delivery.ordering.as_ref().ok_or_else(|| {
            DeliveryError::Rejected("queue-forward requires a group key and dedup key".to_string())
        })?;

        let request = PublishRequest::new(self.subject.clone(), delivery.payload.to_bytes())
            .with_header(MESSAGE_ID_HEADER, &ordering.dedup_key)
            .with_header(MESSAGE_GROUP_ID_HEADER, &ordering.group_key);

        let response = self
            .publisher
            .clone()
            .call(request)
            .await
            .map_err(DeliveryError::unavailable)?;

        if response.duplicate {
            debug!(dedup_key = %ordering.dedup_key, "suppressed duplicate MT send");
            Ok(Ack::Duplicate)
        } else {
            Ok(Ack::Delivered)
        }
    }
}
