use async_trait::async_trait;
use common::nats::{
    JetStreamPublisher, LayeredPublisher, NatsPublisherBuilder, NatsTracingConfig, PublishRequest,
};
use event_bus::{ErrorReport, ErrorSink, TracingErrorSink};
use std::sync::Arc;
use tower::Service;
use tracing::warn;

/// Dead-letter sink: publishes each error report as JSON on the errors
/// subject. A report that cannot be published is written to the log instead.
pub struct NatsErrorSink {
    publisher: LayeredPublisher,
    subject: String,
    fallback: TracingErrorSink,
}

impl NatsErrorSink {
    pub fn new(jetstream: Arc<dyn JetStreamPublisher>, subject: String) -> Self {
        let publisher = NatsPublisherBuilder::new(jetstream)
            .with_tracing(NatsTracingConfig::new("error_sink"))
            .build();

        Self {
            publisher,
            subject,
            fallback: TracingErrorSink,
        }
    }

    fn subject_for(&self, report: &ErrorReport) -> String {
        format!("{}.{}", self.subject, report.route)
    }
}

#[async_trait]
impl ErrorSink for NatsErrorSink {
    async fn report(&self, report: ErrorReport) {
        let payload = match serde_json::to_vec(&report) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "failed to encode error report");
                return self.fallback.report(report).await;
            }
        };

        let request = PublishRequest::new(self.subject_for(&report), payload);
        if let Err(e) = self.publisher.clone().call(request).await {
            warn!(error = %e, "failed to publish error report, logging instead");
            self.fallback.report(report).await;
        }
    }
}
