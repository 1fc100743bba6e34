use crate::domain::{AdapterOutcome, SourceAdapter};
use common::nats::{ConsumeRequest, ConsumeResponse};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;
use tracing::debug;

/// Tower service that feeds consumed JetStream messages through a source adapter.
///
/// Published envelopes are acknowledged once dispatch completes, whatever the
/// per-target results (target failures are already on the error sink).
/// Malformed messages are retained so JetStream redelivers them.
#[derive(Clone)]
pub struct SourceAdapterService {
    adapter: Arc<SourceAdapter>,
}

impl SourceAdapterService {
    pub fn new(adapter: Arc<SourceAdapter>) -> Self {
        Self { adapter }
    }
}

impl Service<ConsumeRequest> for SourceAdapterService {
    type Response = ConsumeResponse;
    type Error = anyhow::Error;
    type Future = BoxFuture<'static, Result<ConsumeResponse, anyhow::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let adapter = Arc::clone(&self.adapter);

        Box::pin(async move {
            match adapter.handle(&req.message).await {
                AdapterOutcome::Published(report) => {
                    debug!(
                        subject = %req.subject(),
                        delivered = report.delivered(),
                        failed = report.failed(),
                        "raw message published"
                    );
                    Ok(ConsumeResponse::ack())
                }
                AdapterOutcome::Rejected(err) => Ok(ConsumeResponse::retain(err.to_string())),
            }
        })
    }
}
