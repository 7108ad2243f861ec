// Read/write seams between the pipeline and the CRUD-owned data

pub mod memory;

pub use memory::MemoryStore;

use crate::errors::StorageError;
use crate::models::{CatalogEntry, Channel, CopyEntry, Integration, SchedulerJob};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// All jobs with `is_active = true`
    async fn active_jobs(&self) -> Result<Vec<SchedulerJob>, StorageError>;

    async fn find(&self, id: Uuid) -> Result<Option<SchedulerJob>, StorageError>;

    /// Persist run timestamps; the only mutation the scheduler makes to a job
    async fn record_run(
        &self,
        id: Uuid,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// Insert or replace a job; rejects invalid configuration
    async fn save(&self, job: &SchedulerJob) -> Result<(), StorageError>;

    async fn delete(&self, id: Uuid) -> Result<bool, StorageError>;
}

#[async_trait]
pub trait IntegrationStore: Send + Sync {
    async fn find(&self, id: Uuid) -> Result<Option<Integration>, StorageError>;
}

#[async_trait]
pub trait ChannelStore: Send + Sync {
    /// Active channels among `ids`, in the order of `ids`
    async fn active_channels(&self, ids: &[Uuid]) -> Result<Vec<Channel>, StorageError>;
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Entries among `ids` owned by one of `channel_ids`, in the order of `ids`
    async fn entries_by_ids(
        &self,
        ids: &[Uuid],
        channel_ids: &[Uuid],
    ) -> Result<Vec<CatalogEntry>, StorageError>;

    /// Entries whose name matches one of `names` case-insensitively
    async fn entries_by_names(
        &self,
        names: &[String],
        channel_ids: &[Uuid],
    ) -> Result<Vec<CatalogEntry>, StorageError>;

    /// Active copies linked directly to a catalog entry
    async fn linked_copies(&self, entry_id: Uuid) -> Result<Vec<CopyEntry>, StorageError>;

    /// Active copies scoped to `category`; `subcategory = None` selects the
    /// copies that have no subcategory at all
    async fn scoped_copies(
        &self,
        category: &str,
        subcategory: Option<&str>,
    ) -> Result<Vec<CopyEntry>, StorageError>;

    /// Delete an entry and strip its id from every job configuration
    async fn delete_entry(&self, id: Uuid) -> Result<bool, StorageError>;
}
