use common::domain::{
    routes, FabricError, FabricResult, ItemStore, MtChangePublisher, MtChangeRecord, MtMessage,
    PutOutcome, TableSpec,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Records MT sends published by devices and feeds them to the MT change stream.
///
/// The change is published after every confirmed put, including one that
/// found the row already stored: a previous attempt may have stored the row
/// and then failed to publish. Repeats carry the same `cmid:ts` message id
/// and collapse on the change stream.
pub struct MtCaptureService {
    store: Arc<dyn ItemStore>,
    table: TableSpec,
    changes: Arc<dyn MtChangePublisher>,
}

impl MtCaptureService {
    pub fn new(
        store: Arc<dyn ItemStore>,
        table_name: impl Into<String>,
        changes: Arc<dyn MtChangePublisher>,
    ) -> Self {
        Self {
            store,
            table: TableSpec::new(table_name, "cmid", "ts"),
            changes,
        }
    }

    pub fn table(&self) -> &TableSpec {
        &self.table
    }

    #[instrument(skip(self, payload), fields(payload_size = payload.len()))]
    pub async fn capture(&self, cmid: &str, payload: &[u8], ts_ms: i64) -> FabricResult<PutOutcome> {
        if cmid.is_empty() {
            return Err(FabricError::malformed(routes::MT_CHANGE, "empty cmid in topic"));
        }

        let value: Value = serde_json::from_slice(payload).map_err(|e| {
            FabricError::malformed(routes::MT_CHANGE, format!("MT payload is not JSON: {}", e))
        })?;
        if !value.is_object() {
            return Err(FabricError::malformed(
                routes::MT_CHANGE,
                "MT payload is not a JSON object",
            ));
        }
        let message: MtMessage = serde_json::from_value(value)
            .map_err(|e| FabricError::malformed(routes::MT_CHANGE, e.to_string()))?;

        let record = MtChangeRecord {
            cmid: cmid.to_string(),
            ts: ts_ms,
            message,
        };
        let item = record.to_item();
        let key = self.table.key_of(&item).ok_or_else(|| {
            FabricError::malformed(routes::MT_CHANGE, "MT record has no (cmid, ts) key")
        })?;

        let outcome = self.store.put_item(&self.table, &key, &item).await?;
        self.changes.publish_change(&record).await?;
        match outcome {
            PutOutcome::Created => info!(table = %self.table.name, "captured MT message"),
            PutOutcome::AlreadyExists => {
                debug!(table = %self.table.name, "MT message already captured, change re-published")
            }
        }

        Ok(outcome)
    }
}
