use common::domain::{
    routes, DeliveryError, FabricError, FabricResult, MtChangePublisher, MtChangeRecord,
};
use common::nats::{
    JetStreamPublisher, LayeredPublisher, NatsPublisherBuilder, NatsTracingConfig, PublishRequest,
    MESSAGE_GROUP_ID_HEADER, MESSAGE_ID_HEADER,
};
use std::sync::Arc;
use tower::Service;
use tracing::debug;

/// Publishes captured MT rows onto the MT change stream.
///
/// The message id is `<cmid>:<ts>`, the row key, so JetStream drops a second
/// publish of the same row inside the stream's duplicate window.
pub struct MtChangeProducer {
    publisher: LayeredPublisher,
    subject: String,
}

impl MtChangeProducer {
    pub fn new(jetstream: Arc<dyn JetStreamPublisher>, subject: String) -> Self {
        debug!(subject = %subject, "initialized MtChangeProducer");

        let publisher = NatsPublisherBuilder::new(jetstream)
            .with_tracing(NatsTracingConfig::new("mt_change_producer"))
            .with_logging()
            .build();

        Self { publisher, subject }
    }
}

#[async_trait::async_trait]
impl MtChangePublisher for MtChangeProducer {
    async fn publish_change(&self, record: &MtChangeRecord) -> FabricResult<()> {
        let payload = serde_json::to_vec(record)
            .map_err(|e| FabricError::malformed(routes::MT_CHANGE, e.to_string()))?;

        let message_id = format!("{}:{}", record.cmid, record.ts);
        let request = PublishRequest::new(self.subject.clone(), payload)
            .with_header(MESSAGE_ID_HEADER, &message_id)
            .with_header(MESSAGE_GROUP_ID_HEADER, &record.cmid);

        let response = self
            .publisher
            .clone()
            .call(request)
            .await
            .map_err(DeliveryError::unavailable)?;

        if response.duplicate {
            debug!(message_id = %message_id, "MT change already on stream");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::MtMessage;
    use common::nats::MockJetStreamPublisher;

    fn record() -> MtChangeRecord {
        MtChangeRecord {
            cmid: "ABC123".to_string(),
            ts: 1_700_000_000_000,
            message: MtMessage {
                request_reference: Some("rr-1".to_string()),
                payload: Some("SGk=".to_string()),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_publish_change_sets_row_key_headers() {
        let mut mock_publisher = MockJetStreamPublisher::new();
        mock_publisher
            .expect_publish_with_headers()
            .withf(|subject, headers, payload| {
                let body: serde_json::Value = serde_json::from_slice(payload).unwrap();
                subject == "imt.mt.changes"
                    && headers.get(MESSAGE_ID_HEADER).map(|v| v.as_str())
                        == Some("ABC123:1700000000000")
                    && headers.get(MESSAGE_GROUP_ID_HEADER).map(|v| v.as_str()) == Some("ABC123")
                    && body["message"]["requestReference"] == "rr-1"
            })
            .times(1)
            .returning(|_, _, _| Ok(false));

        let producer = MtChangeProducer::new(Arc::new(mock_publisher), "imt.mt.changes".to_string());
        assert!(producer.publish_change(&record()).await.is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_publish_is_success() {
        let mut mock_publisher = MockJetStreamPublisher::new();
        mock_publisher
            .expect_publish_with_headers()
            .returning(|_, _, _| Ok(true));

        let producer = MtChangeProducer::new(Arc::new(mock_publisher), "imt.mt.changes".to_string());
        assert!(producer.publish_change(&record()).await.is_ok());
    }

    #[tokio::test]
    async fn test_publish_error_is_unavailable() {
        let mut mock_publisher = MockJetStreamPublisher::new();
        mock_publisher
            .expect_publish_with_headers()
            .times(1)
            .returning(|_, _, _| Err(anyhow::anyhow!("NATS publish failed")));

        let producer = MtChangeProducer::new(Arc::new(mock_publisher), "imt.mt.changes".to_string());
        let result = producer.publish_change(&record()).await;

        assert!(matches!(
            result,
            Err(FabricError::Delivery(DeliveryError::Unavailable(_)))
        ));
    }
}
