use crate::domain::DevicePublisher;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use common::domain::DeliveryError;
use common::mqtt::MqttSettings;
use rumqttc::{AsyncClient, Event, EventLoop, Packet, QoS};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const REQUEST_CHANNEL_CAPACITY: usize = 100;

/// Publishes device-facing messages at QoS 1.
///
/// A publish is accepted once queued on the client; the paired
/// `MqttConnection` drives it to the broker.
#[derive(Clone)]
pub struct MqttDevicePublisher {
    client: AsyncClient,
}

impl MqttDevicePublisher {
    pub fn connect(settings: &MqttSettings) -> Result<(Self, MqttConnection)> {
        let options = settings.options("device-publish")?;
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        Ok((
            Self {
                client: client.clone(),
            },
            MqttConnection {
                client,
                eventloop,
                settings: settings.clone(),
            },
        ))
    }
}

#[async_trait]
impl DevicePublisher for MqttDevicePublisher {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), DeliveryError> {
        self.client
            .publish_bytes(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(DeliveryError::unavailable)
    }
}

/// Event loop of the device-publish client, run as its own process.
pub struct MqttConnection {
    client: AsyncClient,
    eventloop: EventLoop,
    settings: MqttSettings,
}

impl MqttConnection {
    /// Polls until cancelled. Connection errors are logged and the next poll
    /// reconnects after `retry_delay`.
    #[instrument(name = "mqtt_device_connection", skip_all, fields(broker_url = %self.settings.broker_url))]
    pub async fn run(mut self, ctx: CancellationToken) -> Result<()> {
        info!("starting device publish connection");

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    debug!("shutdown signal received");
                    let _ = self.client.disconnect().await;
                    break;
                }
                event = self.eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            info!("connected to MQTT broker");
                        }
                        Ok(Event::Incoming(Packet::PubAck(ack))) => {
                            debug!(pkid = ack.pkid, "device publish acknowledged");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(error = %e, "MQTT connection error, reconnecting");
                            tokio::select! {
                                _ = ctx.cancelled() => break,
                                _ = tokio::time::sleep(self.settings.retry_delay) => {}
                            }
                        }
                    }
                }
            }
        }

        info!("device publish connection stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn settings() -> MqttSettings {
        MqttSettings {
            broker_url: "mqtt://localhost:1883".to_string(),
            client_id: "imt-test".to_string(),
            keep_alive: Duration::from_secs(30),
            max_retry_attempts: 3,
            retry_delay: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_publish_is_queued_on_client() {
        let (publisher, _connection) = MqttDevicePublisher::connect(&settings()).unwrap();
        let result = publisher
            .publish("prefix/ABC123/mo", Bytes::from_static(b"{}"))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_publish_without_connection_is_unavailable() {
        let (publisher, connection) = MqttDevicePublisher::connect(&settings()).unwrap();
        drop(connection);

        let result = publisher
            .publish("prefix/ABC123/mo", Bytes::from_static(b"{}"))
            .await;
        assert!(matches!(result, Err(DeliveryError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_connection_stops_on_cancel() {
        let (_publisher, connection) = MqttDevicePublisher::connect(&settings()).unwrap();
        let ctx = CancellationToken::new();
        ctx.cancel();
        assert!(connection.run(ctx).await.is_ok());
    }

    #[test]
    fn test_connect_rejects_bad_broker_url() {
        let mut settings = settings();
        settings.broker_url = "mqtt://host:port".to_string();
        assert!(MqttDevicePublisher::connect(&settings).is_err());
    }
}
