//! Schedule metadata store trait.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::ScheduleMetadata;

/// Persisted schedule records, keyed by workflow name.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn put(&self, name: &str, metadata: &ScheduleMetadata) -> Result<()>;
    async fn get(&self, name: &str) -> Result<Option<ScheduleMetadata>>;
    /// Returns whether a record was removed.
    async fn delete(&self, name: &str) -> Result<bool>;
    async fn list_all(&self) -> Result<Vec<ScheduleMetadata>>;
}
