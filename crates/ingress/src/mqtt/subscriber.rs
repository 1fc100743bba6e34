use crate::domain::MtCaptureService;
use crate::mqtt::{mt_subscription, parse_mt_topic};
use anyhow::{anyhow, Context, Result};
use common::domain::{routes, FabricError};
use common::mqtt::MqttSettings;
use event_bus::{ErrorReport, ErrorSink};
use rumqttc::{AsyncClient, Event, Packet, QoS};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument, Span};

/// How a device message is settled with the broker once capture has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Settle {
    /// Captured, or unusable no matter how often it is redelivered
    Ack,
    /// Storage or the change stream failed; leave it unacknowledged
    Redeliver,
}

/// Subscribes to `{prefix}/+/mt` on the device network and captures every
/// MT send into the MT table.
///
/// Publishes are acknowledged only after capture, on a persistent session, so
/// a transient failure drops the connection and the broker redelivers the
/// unacknowledged message when the session resumes.
pub struct MtSubscriber {
    settings: MqttSettings,
    prefix: String,
    capture: Arc<MtCaptureService>,
    error_sink: Arc<dyn ErrorSink>,
}

impl MtSubscriber {
    pub fn new(
        settings: MqttSettings,
        prefix: impl Into<String>,
        capture: Arc<MtCaptureService>,
        error_sink: Arc<dyn ErrorSink>,
    ) -> Self {
        Self {
            settings,
            prefix: prefix.into(),
            capture,
            error_sink,
        }
    }

    /// Runs until cancelled, reconnecting after connection errors. Gives up
    /// with an error once `max_retry_attempts` consecutive sessions failed.
    #[instrument(name = "mt_subscriber", skip_all, fields(prefix = %self.prefix))]
    pub async fn run(self, ctx: CancellationToken) -> Result<()> {
        info!(broker_url = %self.settings.broker_url, "starting MT subscriber");

        let mut retry_count = 0;

        loop {
            if ctx.is_cancelled() {
                break;
            }

            match self.run_connection(&ctx, &mut retry_count).await {
                Ok(()) => {
                    debug!("MT subscriber stopped cleanly");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "MQTT connection error");

                    retry_count += 1;
                    if retry_count >= self.settings.max_retry_attempts {
                        return Err(e.context(format!(
                            "MT subscriber gave up after {} attempts",
                            retry_count
                        )));
                    }

                    warn!(
                        attempt = retry_count,
                        max_attempts = self.settings.max_retry_attempts,
                        "retrying MQTT connection"
                    );

                    tokio::select! {
                        _ = ctx.cancelled() => break,
                        _ = tokio::time::sleep(self.settings.retry_delay) => {}
                    }
                }
            }
        }

        info!("MT subscriber stopped");
        Ok(())
    }

    async fn run_connection(&self, ctx: &CancellationToken, retry_count: &mut u32) -> Result<()> {
        let mut options = self.settings.options("mt-capture")?;
        options.set_manual_acks(true);
        options.set_clean_session(false);
        let (client, mut eventloop) = AsyncClient::new(options, 100);

        let subscribe_topic = mt_subscription(&self.prefix);
        client
            .subscribe(&subscribe_topic, QoS::AtLeastOnce)
            .await
            .context("failed to subscribe")?;

        info!(topic = %subscribe_topic, "subscribed to MQTT topic");

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    debug!("shutdown signal received");
                    let _ = client.disconnect().await;
                    return Ok(());
                }
                event = eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            let received_ms = chrono::Utc::now().timestamp_millis();
                            match self
                                .handle_message(&publish.topic, &publish.payload, received_ms)
                                .await
                            {
                                Settle::Ack => client
                                    .ack(&publish)
                                    .await
                                    .context("failed to ack MT message")?,
                                Settle::Redeliver => {
                                    return Err(anyhow!(
                                        "MT capture failed on {}, reconnecting for redelivery",
                                        publish.topic
                                    ));
                                }
                            }
                        }
                        Ok(Event::Incoming(Packet::SubAck(_))) => {
                            debug!("subscription acknowledged");
                        }
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            info!("connected to MQTT broker");
                            *retry_count = 0;
                        }
                        Ok(_) => {}
                        Err(e) => return Err(anyhow!("MQTT event loop error: {}", e)),
                    }
                }
            }
        }
    }

    /// Each message gets its own root span, independent of the subscriber's.
    pub(crate) async fn handle_message(
        &self,
        topic: &str,
        payload: &[u8],
        received_ms: i64,
    ) -> Settle {
        let span = info_span!(
            parent: Span::none(),
            "mqtt_message",
            topic = %topic,
            payload_size = payload.len(),
            cmid = tracing::field::Empty,
        );

        async {
            let cmid = match parse_mt_topic(&self.prefix, topic) {
                Ok(cmid) => cmid,
                Err(e) => {
                    warn!(error = %e, "failed to parse MQTT topic, skipping message");
                    return Settle::Ack;
                }
            };
            Span::current().record("cmid", cmid);

            let Err(e) = self.capture.capture(cmid, payload, received_ms).await else {
                return Settle::Ack;
            };

            error!(error = %e, "failed to capture MT message");
            self.error_sink
                .report(
                    ErrorReport::new(&e, routes::MT_CHANGE)
                        .with_cmid(Some(cmid))
                        .with_subject(topic),
                )
                .await;

            match e {
                FabricError::Delivery(_) => Settle::Redeliver,
                _ => Settle::Ack,
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::{
        DeliveryError, MockItemStore, MockMtChangePublisher, MtChangeRecord, PutOutcome,
    };
    use event_bus::testing::RecordingErrorSink;
    use std::time::Duration;

    fn settings() -> MqttSettings {
        MqttSettings {
            broker_url: "mqtt://localhost:1883".to_string(),
            client_id: "imt".to_string(),
            keep_alive: Duration::from_secs(30),
            max_retry_attempts: 3,
            retry_delay: Duration::from_millis(10),
        }
    }

    fn subscriber(
        store: MockItemStore,
        changes: MockMtChangePublisher,
        errors: Arc<RecordingErrorSink>,
    ) -> MtSubscriber {
        let capture = MtCaptureService::new(Arc::new(store), "imt_mt", Arc::new(changes));
        MtSubscriber::new(settings(), "imt", Arc::new(capture), errors)
    }

    #[tokio::test]
    async fn test_handle_message_captures_row() {
        let mut store = MockItemStore::new();
        store
            .expect_put_item()
            .withf(|_, key, _| key.partition == "ABC123" && key.sort == "42")
            .times(1)
            .returning(|_, _, _| Ok(PutOutcome::Created));
        let mut changes = MockMtChangePublisher::new();
        changes
            .expect_publish_change()
            .withf(|record: &MtChangeRecord| record.cmid == "ABC123")
            .times(1)
            .returning(|_| Ok(()));
        let errors = Arc::new(RecordingErrorSink::new());

        let settle = subscriber(store, changes, errors.clone())
            .handle_message("imt/ABC123/mt", br#"{"requestReference":"rr-1"}"#, 42)
            .await;

        assert_eq!(settle, Settle::Ack);
        assert!(errors.reports().await.is_empty());
    }

    #[tokio::test]
    async fn test_handle_message_skips_foreign_topic() {
        let mut store = MockItemStore::new();
        store.expect_put_item().times(0);
        let errors = Arc::new(RecordingErrorSink::new());

        let settle = subscriber(store, MockMtChangePublisher::new(), errors.clone())
            .handle_message("other/ABC123/mt", b"{}", 42)
            .await;

        assert_eq!(settle, Settle::Ack);
        assert!(errors.reports().await.is_empty());
    }

    #[tokio::test]
    async fn test_handle_message_reports_bad_payload() {
        let mut store = MockItemStore::new();
        store.expect_put_item().times(0);
        let errors = Arc::new(RecordingErrorSink::new());

        let settle = subscriber(store, MockMtChangePublisher::new(), errors.clone())
            .handle_message("imt/ABC123/mt", b"not json", 42)
            .await;

        assert_eq!(settle, Settle::Ack);
        let reports = errors.reports().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].kind, "MalformedMessageError");
        assert_eq!(reports[0].cmid.as_deref(), Some("ABC123"));
        assert_eq!(reports[0].subject.as_deref(), Some("imt/ABC123/mt"));
    }

    #[tokio::test]
    async fn test_failed_change_publish_leaves_message_for_redelivery() {
        let mut store = MockItemStore::new();
        store
            .expect_put_item()
            .times(1)
            .returning(|_, _, _| Ok(PutOutcome::Created));
        let mut changes = MockMtChangePublisher::new();
        changes
            .expect_publish_change()
            .times(1)
            .returning(|_| Err(DeliveryError::unavailable("nats down").into()));
        let errors = Arc::new(RecordingErrorSink::new());

        let settle = subscriber(store, changes, errors.clone())
            .handle_message("imt/ABC123/mt", br#"{"requestReference":"rr-1"}"#, 42)
            .await;

        assert_eq!(settle, Settle::Redeliver);
        assert_eq!(errors.kinds().await, vec!["DeliveryError".to_string()]);
    }

    #[tokio::test]
    async fn test_run_returns_immediately_when_cancelled() {
        let errors = Arc::new(RecordingErrorSink::new());
        let ctx = CancellationToken::new();
        ctx.cancel();

        let result = subscriber(MockItemStore::new(), MockMtChangePublisher::new(), errors)
            .run(ctx)
            .await;
        assert!(result.is_ok());
    }
}
