use crate::transform::{scalar_text, SourceExpr};
use common::domain::{Envelope, FabricError, FabricResult};

/// Keys handed to the queue-forward sink.
///
/// The downstream queue delivers FIFO within `group_key` and drops repeats of
/// `dedup_key` inside its deduplication window. Neither guarantee is enforced
/// here; the queue provides them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderingKeys {
    pub group_key: String,
    pub dedup_key: String,
}

/// Derives ordering keys for the MT egress path from the request reference.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderingLayer {
    source: SourceExpr,
}

impl OrderingLayer {
    /// `source` locates the request reference; both keys are its value.
    pub fn new(source: SourceExpr) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &SourceExpr {
        &self.source
    }

    pub fn derive(&self, envelope: &Envelope) -> FabricResult<OrderingKeys> {
        let reference = self
            .source
            .evaluate(envelope)
            .as_ref()
            .and_then(scalar_text)
            .ok_or_else(|| {
                FabricError::MissingGroupKey(format!(
                    "no request reference at {} on route {}",
                    self.source,
                    envelope.route()
                ))
            })?;

        Ok(OrderingKeys {
            group_key: reference.clone(),
            dedup_key: reference,
        })
    }
}
