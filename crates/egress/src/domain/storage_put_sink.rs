use async_trait::async_trait;
use common::domain::{DeliveryError, ItemStore, PutOutcome, TableSpec};
use event_bus::{Ack, Delivery, Sink};
use std::sync::Arc;
use tracing::debug;

/// Storage sink: writes each payload as one delivery record keyed by the
/// table's `(partition, sort)` fields.
///
/// Re-delivering the same item is harmless. The store keeps the first record
/// under a key and the sink reports `Ack::Duplicate` for the repeat.
pub struct StoragePutSink {
    store: Arc<dyn ItemStore>,
    table: TableSpec,
}

impl StoragePutSink {
    pub fn new(store: Arc<dyn ItemStore>, table: TableSpec) -> Self {
        Self { store, table }
    }

    pub fn table(&self) -> &TableSpec {
        &self.table
    }
}

#[async_trait]
impl Sink for StoragePutSink {
    async fn deliver(&self, delivery: &Delivery) -> Result<Ack, DeliveryError> {
        let item = delivery.payload.fields();
        let key = self.table.key_of(item).ok_or_else(|| {
            DeliveryError::Rejected(format!(
                "item lacks key ({}, {}) for table {}",
                self.table.partition_key, self.table.sort_key, self.table.name
            ))
        })?;

        match self.store.put_item(&self.table, &key, item).await? {
            PutOutcome::Created => {
                debug!(table = %self.table.name, partition = %key.partition, sort = %key.sort, "stored delivery record");
                Ok(Ack::Delivered)
            }
            PutOutcome::AlreadyExists => {
                debug!(table = %self.table.name, partition = %key.partition, sort = %key.sort, "delivery record already stored");
                Ok(Ack::Duplicate)
            }
        }
    }
}
