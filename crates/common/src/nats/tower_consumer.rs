use crate::nats::{
    link_span_to_headers, ConsumeRequest, ConsumeResponse, JetStreamConsumer, PullConsumer,
    SourceMessage,
};
use anyhow::{Context, Result};
use async_nats::jetstream;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::Service;
use tracing::{debug, error, info, info_span, Instrument};

/// Durable pull-consumer settings for one source channel.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub stream_name: String,
    pub consumer_name: String,
    pub filter_subject: String,
    pub batch_size: usize,
    pub max_wait: Duration,
    /// Unacknowledged messages are redelivered after this long
    pub ack_wait: Duration,
    /// Delivery attempts before JetStream stops redelivering (-1 = unlimited)
    pub max_deliver: i64,
}

impl ConsumerSettings {
    fn pull_config(&self) -> jetstream::consumer::pull::Config {
        jetstream::consumer::pull::Config {
            name: Some(self.consumer_name.clone()),
            durable_name: Some(self.consumer_name.clone()),
            filter_subject: self.filter_subject.clone(),
            ack_policy: jetstream::consumer::AckPolicy::Explicit,
            ack_wait: self.ack_wait,
            max_deliver: self.max_deliver,
            ..Default::default()
        }
    }
}

/// A NATS consumer that drives each fetched message through a Tower service
/// and settles it according to the returned `ConsumeResponse`.
///
/// Messages are settled one at a time: the ack of one message never waits on
/// another message's processing outcome.
pub struct TowerConsumer<S> {
    consumer: Box<dyn PullConsumer>,
    settings: ConsumerSettings,
    service: S,
}

impl<S> TowerConsumer<S>
where
    S: Service<ConsumeRequest, Response = ConsumeResponse, Error = anyhow::Error>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    pub async fn new(
        jetstream: Arc<dyn JetStreamConsumer>,
        settings: ConsumerSettings,
        service: S,
    ) -> Result<Self> {
        debug!(
            stream = %settings.stream_name,
            consumer = %settings.consumer_name,
            filter_subject = %settings.filter_subject,
            "creating tower nats consumer"
        );

        let consumer = jetstream
            .bind_durable_consumer(&settings.stream_name, settings.pull_config())
            .await
            .context("failed to bind durable consumer")?;

        Ok(Self {
            consumer,
            settings,
            service,
        })
    }

    /// Run the consumer loop until cancellation
    pub async fn run(mut self, ctx: CancellationToken) -> Result<()> {
        info!(
            stream = %self.settings.stream_name,
            consumer = %self.settings.consumer_name,
            "starting tower nats consumer"
        );

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    info!(
                        stream = %self.settings.stream_name,
                        consumer = %self.settings.consumer_name,
                        "received shutdown signal, stopping consumer"
                    );
                    break;
                }
                result = self.fetch_and_process_batch() => {
                    if let Err(e) = result {
                        error!(
                            stream = %self.settings.stream_name,
                            consumer = %self.settings.consumer_name,
                            error = %e,
                            "error processing batch"
                        );
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }

        debug!(consumer = %self.settings.consumer_name, "consumer stopped gracefully");
        Ok(())
    }

    async fn fetch_and_process_batch(&mut self) -> Result<()> {
        let messages = self
            .consumer
            .fetch_batch(self.settings.batch_size, self.settings.max_wait)
            .await?;

        if messages.is_empty() {
            return Ok(());
        }

        debug!(message_count = messages.len(), "received message batch");

        for msg in messages {
            self.process_message(msg.as_ref()).await;
        }

        Ok(())
    }

    async fn process_message(&mut self, msg: &dyn SourceMessage) {
        let raw = msg.raw();
        let span = info_span!(
            "nats_consume",
            otel.name = "nats_consume",
            otel.kind = "consumer",
            messaging.system = "nats",
            messaging.operation = "process",
            messaging.destination.name = %raw.subject,
            messaging.consumer.name = %self.settings.consumer_name,
        );
        link_span_to_headers(&span, msg.headers());

        let request = ConsumeRequest::new(raw.clone(), msg.headers().cloned());
        let response = match self.service.call(request).instrument(span.clone()).await {
            Ok(resp) => resp,
            Err(e) => {
                error!(parent: &span, subject = %raw.subject, error = %e, "service error processing message");
                ConsumeResponse::nak(e.to_string())
            }
        };

        let settled = match response {
            ConsumeResponse::Ack => msg.ack().await,
            ConsumeResponse::Nak(_) => msg.nak().await,
            ConsumeResponse::Retain(_) => Ok(()),
        };

        if let Err(e) = settled {
            error!(parent: &span, subject = %raw.subject, error = %e, "failed to settle message");
        }
    }
}
