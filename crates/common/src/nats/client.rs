use crate::nats::traits::{JetStreamConsumer, JetStreamPublisher, PullConsumer};
use crate::nats::{JetStreamSourceMessage, SourceMessage};
use anyhow::{Context, Result};
use async_nats::jetstream::context::GetStreamErrorKind;
use async_nats::jetstream::{self, stream::Config as StreamConfig};
use async_nats::HeaderMap;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

/// What a JetStream stream must look like before the service starts.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub name: String,
    pub subjects: Vec<String>,
    pub description: String,
    /// Window in which a repeated `Nats-Msg-Id` is dropped as a duplicate
    pub duplicate_window: Option<Duration>,
}

impl StreamSettings {
    pub fn new(name: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subjects: vec![subject.into()],
            description: String::new(),
            duplicate_window: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_duplicate_window(mut self, window: Duration) -> Self {
        self.duplicate_window = Some(window);
        self
    }

    fn to_config(&self) -> StreamConfig {
        let mut config = StreamConfig {
            name: self.name.clone(),
            subjects: self.subjects.clone(),
            description: (!self.description.is_empty()).then(|| self.description.clone()),
            ..Default::default()
        };
        if let Some(window) = self.duplicate_window {
            config.duplicate_window = window;
        }
        config
    }
}

pub struct NatsClient {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

impl NatsClient {
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        info!(url = %url, timeout_ms = timeout.as_millis(), "Connecting to NATS");

        let client = async_nats::ConnectOptions::new()
            .connection_timeout(timeout)
            .connect(url)
            .await
            .context("Failed to connect to NATS")?;

        let jetstream = jetstream::new(client.clone());

        info!("Successfully connected to NATS");
        Ok(Self { client, jetstream })
    }

    pub async fn ensure_stream(&self, settings: &StreamSettings) -> Result<()> {
        ensure_stream_with(self.jetstream_publisher().as_ref(), settings).await
    }

    pub fn create_consumer_client(&self) -> Arc<dyn JetStreamConsumer> {
        Arc::new(NatsJetStreamConsumer::new(self.jetstream.clone()))
    }

    pub fn create_publisher_client(&self) -> Arc<dyn JetStreamPublisher> {
        self.jetstream_publisher()
    }

    fn jetstream_publisher(&self) -> Arc<dyn JetStreamPublisher> {
        Arc::new(NatsJetStreamPublisher::new(self.jetstream.clone()))
    }

    /// Flush pending publishes before the connection is dropped.
    pub async fn close(self) -> Result<()> {
        info!("Closing NATS connection");
        self.client
            .flush()
            .await
            .context("Failed to flush NATS connection")
    }
}

/// Creates the stream unless one with the same name already exists.
pub async fn ensure_stream_with(
    publisher: &dyn JetStreamPublisher,
    settings: &StreamSettings,
) -> Result<()> {
    info!(stream = %settings.name, subjects = ?settings.subjects, "Ensuring stream exists");

    let exists = publisher
        .stream_exists(&settings.name)
        .await
        .with_context(|| format!("Failed to look up stream {}", settings.name))?;
    if exists {
        debug!(stream = %settings.name, "Stream already exists");
        return Ok(());
    }

    publisher
        .create_stream(settings.to_config())
        .await
        .with_context(|| format!("Failed to create stream {}", settings.name))?;
    info!(
        stream = %settings.name,
        duplicate_window = ?settings.duplicate_window,
        "Created stream"
    );
    Ok(())
}

pub struct NatsJetStreamConsumer {
    context: jetstream::Context,
}

impl NatsJetStreamConsumer {
    pub fn new(context: jetstream::Context) -> Self {
        Self { context }
    }
}

#[async_trait]
impl JetStreamConsumer for NatsJetStreamConsumer {
    async fn bind_durable_consumer(
        &self,
        stream_name: &str,
        config: jetstream::consumer::pull::Config,
    ) -> Result<Box<dyn PullConsumer>> {
        let consumer = self
            .context
            .create_consumer_on_stream(config, stream_name)
            .await
            .with_context(|| format!("Failed to bind consumer on {stream_name}"))?;

        Ok(Box::new(NatsPullConsumer { consumer }))
    }
}

pub struct NatsPullConsumer {
    consumer: jetstream::consumer::PullConsumer,
}

#[async_trait]
impl PullConsumer for NatsPullConsumer {
    async fn fetch_batch(
        &self,
        max_messages: usize,
        expires: Duration,
    ) -> Result<Vec<Box<dyn SourceMessage>>> {
        use futures::StreamExt;

        let mut messages = self
            .consumer
            .fetch()
            .max_messages(max_messages)
            .expires(expires)
            .messages()
            .await
            .context("Failed to fetch messages")?;

        let mut result: Vec<Box<dyn SourceMessage>> = Vec::new();
        while let Some(msg) = messages.next().await {
            match msg {
                Ok(message) => result.push(Box::new(JetStreamSourceMessage::new(message))),
                Err(e) => {
                    error!(error = %e, "Error receiving message");
                }
            }
        }
        Ok(result)
    }
}

pub struct NatsJetStreamPublisher {
    context: jetstream::Context,
}

impl NatsJetStreamPublisher {
    pub fn new(context: jetstream::Context) -> Self {
        Self { context }
    }
}

#[async_trait]
impl JetStreamPublisher for NatsJetStreamPublisher {
    async fn stream_exists(&self, stream_name: &str) -> Result<bool> {
        match self.context.get_stream(stream_name).await {
            Ok(_) => Ok(true),
            Err(e) => match e.kind() {
                GetStreamErrorKind::JetStream(err)
                    if err.error_code() == jetstream::ErrorCode::STREAM_NOT_FOUND =>
                {
                    Ok(false)
                }
                _ => Err(anyhow::Error::new(e).context("Failed to get stream")),
            },
        }
    }

    async fn create_stream(&self, config: jetstream::stream::Config) -> Result<()> {
        self.context
            .create_stream(config)
            .await
            .context("Failed to create stream")?;
        Ok(())
    }

    #[instrument(skip(self, headers, payload), fields(subject = %subject, payload_size = payload.len()))]
    async fn publish_with_headers(
        &self,
        subject: String,
        headers: HeaderMap,
        payload: bytes::Bytes,
    ) -> Result<bool> {
        let ack = self
            .context
            .publish_with_headers(subject, headers, payload)
            .await
            .context("Failed to publish message to JetStream")?
            .await
            .context("Failed to receive JetStream acknowledgment")?;

        Ok(ack.duplicate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nats::MockJetStreamPublisher;

    #[tokio::test]
    async fn test_ensure_stream_skips_existing() {
        let mut mock = MockJetStreamPublisher::new();
        mock.expect_stream_exists()
            .withf(|name| name == "IMT_MO")
            .times(1)
            .returning(|_| Ok(true));
        mock.expect_create_stream().times(0);

        let settings = StreamSettings::new("IMT_MO", "imt.mo");
        assert!(ensure_stream_with(&mock, &settings).await.is_ok());
    }

    #[tokio::test]
    async fn test_ensure_stream_creates_with_duplicate_window() {
        let mut mock = MockJetStreamPublisher::new();
        mock.expect_stream_exists().returning(|_| Ok(false));
        mock.expect_create_stream()
            .withf(|config| {
                config.name == "IMT_MT_SEND"
                    && config.subjects == vec!["imt.mt.send".to_string()]
                    && config.duplicate_window == Duration::from_secs(300)
            })
            .times(1)
            .returning(|_| Ok(()));

        let settings = StreamSettings::new("IMT_MT_SEND", "imt.mt.send")
            .with_duplicate_window(Duration::from_secs(300));
        assert!(ensure_stream_with(&mock, &settings).await.is_ok());
    }

    #[tokio::test]
    async fn test_ensure_stream_reports_create_failure() {
        let mut mock = MockJetStreamPublisher::new();
        mock.expect_stream_exists().returning(|_| Ok(false));
        mock.expect_create_stream()
            .returning(|_| Err(anyhow::anyhow!("insufficient resources")));

        let err = ensure_stream_with(&mock, &StreamSettings::new("IMT_ERRORS", "imt.errors"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("IMT_ERRORS"));
    }

    #[tokio::test]
    async fn test_ensure_stream_lookup_failure_is_not_treated_as_missing() {
        let mut mock = MockJetStreamPublisher::new();
        mock.expect_stream_exists()
            .returning(|_| Err(anyhow::anyhow!("no responders")));
        mock.expect_create_stream().times(0);

        let result = ensure_stream_with(&mock, &StreamSettings::new("IMT_STATUS", "imt.status")).await;
        assert!(result.is_err());
    }
}
