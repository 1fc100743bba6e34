use crate::domain::{FabricResult, MtChangeRecord};
use async_trait::async_trait;

/// Publishes new MT table rows onto the MT change feed.
///
/// Implementations should:
/// - Serialize the record as JSON
/// - Publish it to the change stream and await the broker acknowledgment
/// - Return `DeliveryError` (wrapped in `FabricError`) if the publish fails
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait MtChangePublisher: Send + Sync {
    async fn publish_change(&self, record: &MtChangeRecord) -> FabricResult<()>;
}
