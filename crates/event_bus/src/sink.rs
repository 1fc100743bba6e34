use crate::{OrderingKeys, OutputPayload};
use async_trait::async_trait;
use common::domain::DeliveryError;
use std::collections::BTreeMap;

/// Destination segments resolved from an envelope, e.g. `cmid` and
/// `requestReference` for per-device topics.
pub type PathValues = BTreeMap<String, String>;

/// Everything a sink needs for one delivery attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub payload: OutputPayload,
    pub path: Option<PathValues>,
    pub ordering: Option<OrderingKeys>,
}

impl Delivery {
    pub fn new(payload: OutputPayload) -> Self {
        Self {
            payload,
            path: None,
            ordering: None,
        }
    }

    pub fn with_path(mut self, path: PathValues) -> Self {
        self.path = Some(path);
        self
    }

    pub fn with_ordering(mut self, ordering: OrderingKeys) -> Self {
        self.ordering = Some(ordering);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Delivered,
    /// The destination already held this item; nothing new was written
    Duplicate,
}

/// A connector to one external destination.
///
/// `deliver` is a single attempt. Timeouts and retries are applied by the bus
/// according to the target's policy.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait Sink: Send + Sync {
    async fn deliver(&self, delivery: &Delivery) -> Result<Ack, DeliveryError>;
}
