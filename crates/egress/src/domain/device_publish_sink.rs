use crate::domain::TopicTemplate;
use async_trait::async_trait;
use bytes::Bytes;
use common::domain::DeliveryError;
use event_bus::{Ack, Delivery, PathValues, Sink};
use std::sync::Arc;
use tracing::debug;

/// Publishes a payload to one device-network topic.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DevicePublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), DeliveryError>;
}

/// Device-facing sink: addresses each delivery to a per-device topic built
/// from the delivery's path values. One publish per attempt.
pub struct DevicePublishSink {
    publisher: Arc<dyn DevicePublisher>,
    topic: TopicTemplate,
}

impl DevicePublishSink {
    pub fn new(publisher: Arc<dyn DevicePublisher>, topic: TopicTemplate) -> Self {
        Self { publisher, topic }
    }

    pub fn topic(&self) -> &TopicTemplate {
        &self.topic
    }
}

#[async_trait]
impl Sink for DevicePublishSink {
    async fn deliver(&self, delivery: &Delivery) -> Result<Ack, DeliveryError> {
        let empty = PathValues::new();
        let topic = self.topic.render(delivery.path.as_ref().unwrap_or(&empty))?;

        self.publisher
            .publish(&topic, Bytes::from(delivery.payload.to_bytes()))
            .await?;

        debug!(topic = %topic, "published to device topic");
        Ok(Ack::Delivered)
    }
}
