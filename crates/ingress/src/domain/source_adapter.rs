use crate::domain::Normalizer;
use chrono::Utc;
use common::domain::{attributes, Envelope, FabricError, FabricResult, RawMessage};
use event_bus::{DispatchReport, ErrorReport, ErrorSink, EventBus};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// What happened to one raw message.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterOutcome {
    /// Normalized and dispatched; the source may acknowledge it.
    Published(DispatchReport),
    /// Normalization failed; the message must stay at the source.
    Rejected(FabricError),
}

/// Normalizes raw messages for one route and publishes them on the bus.
///
/// Dispatch completes before `handle` returns, so acknowledging on
/// `Published` gives at-least-once delivery into the fabric.
#[derive(Clone)]
pub struct SourceAdapter {
    normalizer: Normalizer,
    account: String,
    bus: EventBus,
    error_sink: Arc<dyn ErrorSink>,
}

impl SourceAdapter {
    pub fn new(
        normalizer: Normalizer,
        account: impl Into<String>,
        bus: EventBus,
        error_sink: Arc<dyn ErrorSink>,
    ) -> Self {
        Self {
            normalizer,
            account: account.into(),
            bus,
            error_sink,
        }
    }

    pub fn route(&self) -> &'static str {
        self.normalizer.route()
    }

    /// Normalizes and stamps the configured account onto the envelope.
    pub fn to_envelope(&self, raw: &RawMessage) -> FabricResult<Envelope> {
        let mut raw = raw.clone();
        raw.attributes
            .insert(attributes::ACCOUNT.to_string(), self.account.clone());
        self.normalizer.normalize(&raw, Utc::now())
    }

    #[instrument(skip_all, fields(route = %self.route(), subject = %raw.subject))]
    pub async fn handle(&self, raw: &RawMessage) -> AdapterOutcome {
        match self.to_envelope(raw) {
            Ok(envelope) => {
                let report = self.bus.publish(envelope).await;
                debug!(
                    matched = report.outcomes.len(),
                    failed = report.failed(),
                    "envelope dispatched"
                );
                AdapterOutcome::Published(report)
            }
            Err(err) => {
                warn!(error = %err, "rejected raw message");
                self.error_sink
                    .report(ErrorReport::new(&err, self.route()).with_subject(&raw.subject))
                    .await;
                AdapterOutcome::Rejected(err)
            }
        }
    }
}
