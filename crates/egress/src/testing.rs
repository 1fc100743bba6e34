//! In-memory stand-ins for the egress collaborators.

use crate::domain::DevicePublisher;
use async_trait::async_trait;
use bytes::Bytes;
use common::domain::{DeliveryError, ItemKey, ItemStore, PutOutcome, TableSpec};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

type StoredItems = BTreeMap<(String, ItemKey), Map<String, Value>>;

/// Put-item store keeping exactly one record per `(table, key)`; the first
/// write wins.
#[derive(Default)]
pub struct InMemoryItemStore {
    items: Arc<RwLock<StoredItems>>,
}

impl InMemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, table: &str, partition: &str, sort: &str) -> Option<Map<String, Value>> {
        let key = ItemKey {
            partition: partition.to_string(),
            sort: sort.to_string(),
        };
        self.items
            .read()
            .await
            .get(&(table.to_string(), key))
            .cloned()
    }

    /// Records in `table`, ordered by key.
    pub async fn items(&self, table: &str) -> Vec<Map<String, Value>> {
        self.items
            .read()
            .await
            .iter()
            .filter(|((name, _), _)| name == table)
            .map(|(_, item)| item.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ItemStore for InMemoryItemStore {
    async fn put_item(
        &self,
        table: &TableSpec,
        key: &ItemKey,
        item: &Map<String, Value>,
    ) -> Result<PutOutcome, DeliveryError> {
        let mut items = self.items.write().await;
        let slot = (table.name.clone(), key.clone());
        if items.contains_key(&slot) {
            return Ok(PutOutcome::AlreadyExists);
        }
        items.insert(slot, item.clone());
        Ok(PutOutcome::Created)
    }
}

/// Captures `(topic, payload)` pairs handed to the device network.
#[derive(Default)]
pub struct RecordingDevicePublisher {
    published: Arc<RwLock<Vec<(String, Bytes)>>>,
}

impl RecordingDevicePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn published(&self) -> Vec<(String, Bytes)> {
        self.published.read().await.clone()
    }

    pub async fn topics(&self) -> Vec<String> {
        self.published
            .read()
            .await
            .iter()
            .map(|(topic, _)| topic.clone())
            .collect()
    }
}

#[async_trait]
impl DevicePublisher for RecordingDevicePublisher {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), DeliveryError> {
        self.published.write().await.push((topic.to_string(), payload));
        Ok(())
    }
}
