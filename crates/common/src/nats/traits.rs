use crate::nats::SourceMessage;
use anyhow::Result;
use async_nats::jetstream;
use async_nats::HeaderMap;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// Source side of JetStream: binds the durable consumers each source
/// adapter reads from.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait JetStreamConsumer: Send + Sync {
    /// Bind to a durable pull consumer on `stream_name`, creating it if needed.
    async fn bind_durable_consumer(
        &self,
        stream_name: &str,
        config: jetstream::consumer::pull::Config,
    ) -> Result<Box<dyn PullConsumer>>;
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PullConsumer: Send + Sync {
    /// Fetch up to `max_messages`, waiting at most `expires`. The batch is
    /// finite; the next call resumes where this one stopped.
    async fn fetch_batch(
        &self,
        max_messages: usize,
        expires: Duration,
    ) -> Result<Vec<Box<dyn SourceMessage>>>;
}

/// Sink side of JetStream: stream provisioning plus acknowledged publishes.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait JetStreamPublisher: Send + Sync {
    /// `Ok(false)` only when the server reports the stream as missing.
    async fn stream_exists(&self, stream_name: &str) -> Result<bool>;

    async fn create_stream(&self, config: jetstream::stream::Config) -> Result<()>;

    /// Publish and wait for the stream's ack. Returns `true` when the stream
    /// dropped the message as a duplicate of an earlier `Nats-Msg-Id`.
    async fn publish_with_headers(
        &self,
        subject: String,
        headers: HeaderMap,
        payload: Bytes,
    ) -> Result<bool>;
}
