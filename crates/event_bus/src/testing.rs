//! Contract-enforcing fakes for the bus collaborators.
//!
//! `InMemoryFifoQueue` behaves like the downstream MT queue: FIFO within a
//! message group and content deduplication on the dedup key inside a bounded
//! window. Tests use it in place of the real broker.

use crate::{Ack, Delivery, ErrorReport, ErrorSink, OutputPayload, Sink};
use async_trait::async_trait;
use common::domain::DeliveryError;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Records every delivery; optionally fails the first `n` attempts.
#[derive(Default)]
pub struct RecordingSink {
    deliveries: Arc<Mutex<Vec<Delivery>>>,
    failures: Arc<Mutex<VecDeque<DeliveryError>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue errors returned by the next attempts, in order.
    pub async fn fail_next(&self, error: DeliveryError) {
        self.failures.lock().await.push_back(error);
    }

    pub async fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().await.clone()
    }

    pub async fn payloads(&self) -> Vec<OutputPayload> {
        self.deliveries
            .lock()
            .await
            .iter()
            .map(|d| d.payload.clone())
            .collect()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    async fn deliver(&self, delivery: &Delivery) -> Result<Ack, DeliveryError> {
        if let Some(error) = self.failures.lock().await.pop_front() {
            return Err(error);
        }
        self.deliveries.lock().await.push(delivery.clone());
        Ok(Ack::Delivered)
    }
}

#[derive(Default)]
struct QueueState {
    groups: BTreeMap<String, VecDeque<OutputPayload>>,
    seen: HashMap<String, Instant>,
}

/// FIFO-per-group queue with a bounded deduplication window.
pub struct InMemoryFifoQueue {
    dedup_window: Duration,
    state: Mutex<QueueState>,
}

impl InMemoryFifoQueue {
    pub fn new(dedup_window: Duration) -> Self {
        Self {
            dedup_window,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Messages waiting in `group`, oldest first.
    pub async fn group(&self, group: &str) -> Vec<OutputPayload> {
        self.state
            .lock()
            .await
            .groups
            .get(group)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Pops the head of `group`.
    pub async fn receive(&self, group: &str) -> Option<OutputPayload> {
        self.state
            .lock()
            .await
            .groups
            .get_mut(group)
            .and_then(VecDeque::pop_front)
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.groups.values().map(VecDeque::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl Sink for InMemoryFifoQueue {
    async fn deliver(&self, delivery: &Delivery) -> Result<Ack, DeliveryError> {
        let ordering = delivery.ordering.as_ref().ok_or_else(|| {
            DeliveryError::Rejected("FIFO queue requires a group key and dedup key".to_string())
        })?;

        let now = Instant::now();
        let mut state = self.state.lock().await;
        let window = self.dedup_window;
        state
            .seen
            .retain(|_, first_seen| now.duration_since(*first_seen) < window);

        if state.seen.contains_key(&ordering.dedup_key) {
            return Ok(Ack::Duplicate);
        }
        state.seen.insert(ordering.dedup_key.clone(), now);
        state
            .groups
            .entry(ordering.group_key.clone())
            .or_default()
            .push_back(delivery.payload.clone());

        Ok(Ack::Delivered)
    }
}

/// Collects error reports for assertions.
#[derive(Default)]
pub struct RecordingErrorSink {
    reports: Mutex<Vec<ErrorReport>>,
}

impl RecordingErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn reports(&self) -> Vec<ErrorReport> {
        self.reports.lock().await.clone()
    }

    pub async fn kinds(&self) -> Vec<String> {
        self.reports
            .lock()
            .await
            .iter()
            .map(|r| r.kind.clone())
            .collect()
    }
}

#[async_trait]
impl ErrorSink for RecordingErrorSink {
    async fn report(&self, report: ErrorReport) {
        self.reports.lock().await.push(report);
    }
}
