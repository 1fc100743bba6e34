use crate::domain::DeliveryError;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// A put-item table: a name plus the payload fields forming its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
    pub partition_key: String,
    pub sort_key: String,
}

impl TableSpec {
    pub fn new(
        name: impl Into<String>,
        partition_key: impl Into<String>,
        sort_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            partition_key: partition_key.into(),
            sort_key: sort_key.into(),
        }
    }

    /// Extracts `(partition, sort)` from an item. Strings are used as-is,
    /// numbers by their decimal text; anything else is not a key.
    pub fn key_of(&self, item: &Map<String, Value>) -> Option<ItemKey> {
        Some(ItemKey {
            partition: key_component(item.get(&self.partition_key)?)?,
            sort: key_component(item.get(&self.sort_key)?)?,
        })
    }
}

fn key_component(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey {
    pub partition: String,
    pub sort: String,
}

/// Result of a put: a new delivery record, or a record already present under the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Created,
    AlreadyExists,
}

/// Put-item contract of the storage collaborator.
///
/// Implementations must keep exactly one record per `(table, key)`: a repeated
/// put for a key that already exists leaves the stored record untouched and
/// reports `AlreadyExists`.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn put_item(
        &self,
        table: &TableSpec,
        key: &ItemKey,
        item: &Map<String, Value>,
    ) -> Result<PutOutcome, DeliveryError>;
}
