use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use super::publish_types::{PublishRequest, PublishResponse};
use super::{
    NatsPublishLoggingLayer, NatsPublishLoggingService, NatsPublishTracingLayer,
    NatsPublishTracingService, NatsTracingConfig,
};
use crate::nats::JetStreamPublisher;
use anyhow::Result;
use tower::{Service, ServiceBuilder};

/// Inner service that performs the actual NATS publish
#[derive(Clone)]
pub struct NatsPublishService {
    publisher: Arc<dyn JetStreamPublisher>,
}

impl NatsPublishService {
    pub fn new(publisher: Arc<dyn JetStreamPublisher>) -> Self {
        Self { publisher }
    }
}

impl Service<PublishRequest> for NatsPublishService {
    type Response = PublishResponse;
    type Error = anyhow::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: PublishRequest) -> Self::Future {
        let publisher = Arc::clone(&self.publisher);
        let subject = req.subject.clone();

        Box::pin(async move {
            let duplicate = publisher
                .publish_with_headers(subject.clone(), req.headers, req.payload)
                .await?;
            Ok(PublishResponse { subject, duplicate })
        })
    }
}

/// Builder for creating a layered NATS publisher service
pub struct NatsPublisherBuilder {
    publisher: Arc<dyn JetStreamPublisher>,
    tracing_config: Option<NatsTracingConfig>,
    with_logging: bool,
}

impl NatsPublisherBuilder {
    pub fn new(publisher: Arc<dyn JetStreamPublisher>) -> Self {
        Self {
            publisher,
            tracing_config: None,
            with_logging: false,
        }
    }

    pub fn with_tracing(mut self, config: NatsTracingConfig) -> Self {
        self.tracing_config = Some(config);
        self
    }

    pub fn with_logging(mut self) -> Self {
        self.with_logging = true;
        self
    }

    /// Build the layered publisher service
    /// Layer order (outermost first): Tracing -> Logging -> Publish
    pub fn build(self) -> LayeredPublisher {
        let inner = NatsPublishService::new(self.publisher);

        match (self.tracing_config, self.with_logging) {
            (Some(tracing_config), true) => LayeredPublisher::Both(
                ServiceBuilder::new()
                    .layer(NatsPublishTracingLayer::new(tracing_config))
                    .layer(NatsPublishLoggingLayer::new())
                    .service(inner),
            ),
            (Some(tracing_config), false) => LayeredPublisher::TracingOnly(
                ServiceBuilder::new()
                    .layer(NatsPublishTracingLayer::new(tracing_config))
                    .service(inner),
            ),
            (None, true) => LayeredPublisher::LoggingOnly(
                ServiceBuilder::new()
                    .layer(NatsPublishLoggingLayer::new())
                    .service(inner),
            ),
            (None, false) => LayeredPublisher::None(inner),
        }
    }
}

/// The configured layer combination as one concrete `Service` type
#[derive(Clone)]
pub enum LayeredPublisher {
    Both(NatsPublishTracingService<NatsPublishLoggingService<NatsPublishService>>),
    TracingOnly(NatsPublishTracingService<NatsPublishService>),
    LoggingOnly(NatsPublishLoggingService<NatsPublishService>),
    None(NatsPublishService),
}

impl Service<PublishRequest> for LayeredPublisher {
    type Response = PublishResponse;
    type Error = anyhow::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        match self {
            LayeredPublisher::Both(svc) => svc.poll_ready(cx),
            LayeredPublisher::TracingOnly(svc) => svc.poll_ready(cx),
            LayeredPublisher::LoggingOnly(svc) => svc.poll_ready(cx),
            LayeredPublisher::None(svc) => svc.poll_ready(cx),
        }
    }

    fn call(&mut self, req: PublishRequest) -> Self::Future {
        match self {
            LayeredPublisher::Both(svc) => svc.call(req),
            LayeredPublisher::TracingOnly(svc) => svc.call(req),
            LayeredPublisher::LoggingOnly(svc) => svc.call(req),
            LayeredPublisher::None(svc) => svc.call(req),
        }
    }
}
