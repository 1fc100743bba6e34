use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use super::consume_types::{ConsumeRequest, ConsumeResponse};
use super::publish_types::{PublishRequest, PublishResponse};
use crate::domain::attributes;
use tower::{Layer, Service};
use tracing::{debug, error, info, warn, Instrument, Span};

type BoxedResult<R, E> = Pin<Box<dyn Future<Output = Result<R, E>> + Send>>;

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Logs every JetStream publish with its dedup id and group.
///
/// A publish the stream drops as a duplicate is logged at debug; it is a
/// normal outcome for redelivered MT sends and change records.
#[derive(Clone, Default)]
pub struct NatsPublishLoggingLayer;

impl NatsPublishLoggingLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for NatsPublishLoggingLayer {
    type Service = NatsPublishLoggingService<S>;

    fn layer(&self, service: S) -> Self::Service {
        NatsPublishLoggingService { inner: service }
    }
}

#[derive(Clone)]
pub struct NatsPublishLoggingService<S> {
    inner: S,
}

impl<S> Service<PublishRequest> for NatsPublishLoggingService<S>
where
    S: Service<PublishRequest, Response = PublishResponse> + Clone + Send + 'static,
    S::Error: std::fmt::Display + Send,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxedResult<Self::Response, Self::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: PublishRequest) -> Self::Future {
        let subject = req.subject.clone();
        let msg_id = req.message_id().unwrap_or_default().to_string();
        let group = req.group_id().unwrap_or_default().to_string();
        let payload_bytes = req.payload.len();
        let start = Instant::now();
        let mut inner = self.inner.clone();

        Box::pin(
            async move {
                let result = inner.call(req).await;
                let duration_ms = elapsed_ms(start);

                match &result {
                    Ok(response) if response.duplicate => debug!(
                        subject = %subject,
                        msg_id = %msg_id,
                        group = %group,
                        duration_ms,
                        "stream dropped duplicate publish"
                    ),
                    Ok(_) => info!(
                        subject = %subject,
                        msg_id = %msg_id,
                        group = %group,
                        payload_bytes,
                        duration_ms,
                        "published to {subject}"
                    ),
                    Err(e) => error!(
                        subject = %subject,
                        msg_id = %msg_id,
                        duration_ms,
                        error = %e,
                        "publish to {subject} failed"
                    ),
                }

                result
            }
            .instrument(Span::current()),
        )
    }
}

/// Logs how each consumed source message was settled.
#[derive(Clone, Default)]
pub struct NatsConsumeLoggingLayer;

impl NatsConsumeLoggingLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for NatsConsumeLoggingLayer {
    type Service = NatsConsumeLoggingService<S>;

    fn layer(&self, service: S) -> Self::Service {
        NatsConsumeLoggingService { inner: service }
    }
}

#[derive(Clone)]
pub struct NatsConsumeLoggingService<S> {
    inner: S,
}

impl<S> Service<ConsumeRequest> for NatsConsumeLoggingService<S>
where
    S: Service<ConsumeRequest, Response = ConsumeResponse> + Clone + Send + 'static,
    S::Error: std::fmt::Display + Send,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxedResult<Self::Response, Self::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let subject = req.subject().to_string();
        let receive_count = req
            .message
            .attributes
            .get(attributes::APPROXIMATE_RECEIVE_COUNT)
            .cloned()
            .unwrap_or_else(|| "1".to_string());
        let start = Instant::now();
        let mut inner = self.inner.clone();

        Box::pin(
            async move {
                let result = inner.call(req).await;
                let duration_ms = elapsed_ms(start);

                match &result {
                    Ok(ConsumeResponse::Ack) => debug!(
                        subject = %subject,
                        receive_count = %receive_count,
                        duration_ms,
                        "message dispatched, acking"
                    ),
                    Ok(ConsumeResponse::Nak(reason)) => warn!(
                        subject = %subject,
                        receive_count = %receive_count,
                        reason = reason.as_deref().unwrap_or("unspecified"),
                        "message not dispatched, requesting redelivery"
                    ),
                    Ok(ConsumeResponse::Retain(reason)) => warn!(
                        subject = %subject,
                        receive_count = %receive_count,
                        reason = reason.as_deref().unwrap_or("unspecified"),
                        "message retained until ack wait lapses"
                    ),
                    Err(e) => error!(
                        subject = %subject,
                        receive_count = %receive_count,
                        error = %e,
                        "source adapter failed"
                    ),
                }

                result
            }
            .instrument(Span::current()),
        )
    }
}
