use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clickhouse::Row;
use common::clickhouse::ClickHouseClient;
use common::domain::{DeliveryError, ItemKey, ItemStore, PutOutcome, TableSpec};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info};

/// One delivery record. Every logical table (`imt_mo`, `imt_mt`,
/// `imt_status`) shares the physical table, distinguished by `table_name`.
#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct DeliveryRecordRow {
    pub table_name: String,
    pub partition_key: String,
    pub sort_key: String,
    // JSON document stored as String
    pub item: String,
    #[serde(with = "clickhouse::serde::chrono::datetime64::millis")]
    pub written_at: DateTime<Utc>,
    /// Merge version; the earliest write has the highest value and survives merges
    pub version: u64,
}

impl DeliveryRecordRow {
    pub fn new(
        table: &TableSpec,
        key: &ItemKey,
        item: &Map<String, Value>,
        written_at: DateTime<Utc>,
    ) -> Self {
        let millis = u64::try_from(written_at.timestamp_millis()).unwrap_or(0);
        Self {
            table_name: table.name.clone(),
            partition_key: key.partition.clone(),
            sort_key: key.sort.clone(),
            item: serde_json::to_string(item).unwrap_or_else(|_| "{}".to_string()),
            written_at,
            version: u64::MAX - millis,
        }
    }
}

/// ClickHouse implementation of the put-item contract.
///
/// A put first checks for an existing record under the key and only inserts
/// when there is none. Concurrent puts of the same key may both insert; the
/// `ReplacingMergeTree` version keeps the first one and `FINAL` reads see it.
#[derive(Clone)]
pub struct ClickHouseItemStore {
    client: ClickHouseClient,
    table: String,
}

impl ClickHouseItemStore {
    pub fn new(client: ClickHouseClient, table: String) -> Self {
        Self { client, table }
    }

    pub fn create_table_statement(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             table_name LowCardinality(String), \
             partition_key String, \
             sort_key String, \
             item String, \
             written_at DateTime64(3, 'UTC'), \
             version UInt64\
             ) ENGINE = ReplacingMergeTree(version) \
             ORDER BY (table_name, partition_key, sort_key)",
            self.table
        )
    }

    /// Creates the delivery-record table when it does not exist yet.
    pub async fn migrate(&self) -> Result<()> {
        self.client.execute(&self.create_table_statement()).await?;
        info!(table = %self.table, "delivery record table ready");
        Ok(())
    }

    async fn exists(&self, table: &TableSpec, key: &ItemKey) -> Result<bool, DeliveryError> {
        let count = self
            .client
            .get_client()
            .query(&format!(
                "SELECT count() FROM {} FINAL WHERE table_name = ? AND partition_key = ? AND sort_key = ?",
                self.table
            ))
            .bind(&table.name)
            .bind(&key.partition)
            .bind(&key.sort)
            .fetch_one::<u64>()
            .await
            .map_err(|e| {
                error!("failed to look up delivery record: {}", e);
                DeliveryError::unavailable(e)
            })?;
        Ok(count > 0)
    }
}

#[async_trait]
impl ItemStore for ClickHouseItemStore {
    async fn put_item(
        &self,
        table: &TableSpec,
        key: &ItemKey,
        item: &Map<String, Value>,
    ) -> Result<PutOutcome, DeliveryError> {
        if self.exists(table, key).await? {
            debug!(
                table = %table.name,
                partition = %key.partition,
                sort = %key.sort,
                "delivery record already exists"
            );
            return Ok(PutOutcome::AlreadyExists);
        }

        let row = DeliveryRecordRow::new(table, key, item, Utc::now());

        let mut insert = self
            .client
            .get_client()
            .insert::<DeliveryRecordRow>(&self.table)
            .await
            .map_err(|e| {
                error!("failed to create ClickHouse inserter: {}", e);
                DeliveryError::unavailable(e)
            })?;

        insert.write(&row).await.map_err(|e| {
            error!("failed to write row to ClickHouse: {}", e);
            DeliveryError::unavailable(e)
        })?;

        insert.end().await.map_err(|e| {
            error!("failed to finalize ClickHouse insert: {}", e);
            DeliveryError::unavailable(e)
        })?;

        debug!(table = %table.name, partition = %key.partition, sort = %key.sort, "stored delivery record");
        Ok(PutOutcome::Created)
    }
}
