// In-memory implementation of every store trait, used by tests and local dry runs

use super::{CatalogStore, ChannelStore, IntegrationStore, JobStore};
use crate::errors::StorageError;
use crate::models::{CatalogEntry, Channel, CopyEntry, Integration, SchedulerJob};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    jobs: Vec<SchedulerJob>,
    integrations: HashMap<Uuid, Integration>,
    channels: HashMap<Uuid, Channel>,
    entries: Vec<CatalogEntry>,
    copies: HashMap<Uuid, CopyEntry>,
    entry_copies: HashMap<Uuid, Vec<Uuid>>,
}

/// All tables in one struct behind a lock
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_integration(&self, integration: Integration) {
        self.tables
            .write()
            .await
            .integrations
            .insert(integration.id, integration);
    }

    pub async fn insert_channel(&self, channel: Channel) {
        self.tables.write().await.channels.insert(channel.id, channel);
    }

    pub async fn insert_entry(&self, entry: CatalogEntry) {
        self.tables.write().await.entries.push(entry);
    }

    pub async fn insert_copy(&self, copy: CopyEntry) {
        self.tables.write().await.copies.insert(copy.id, copy);
    }

    /// Link a copy to a catalog entry (many-to-many)
    pub async fn link_copy(&self, entry_id: Uuid, copy_id: Uuid) {
        let mut tables = self.tables.write().await;
        let links = tables.entry_copies.entry(entry_id).or_default();
        if !links.contains(&copy_id) {
            links.push(copy_id);
        }
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn active_jobs(&self) -> Result<Vec<SchedulerJob>, StorageError> {
        Ok(self
            .tables
            .read()
            .await
            .jobs
            .iter()
            .filter(|job| job.is_active)
            .cloned()
            .collect())
    }

    async fn find(&self, id: Uuid) -> Result<Option<SchedulerJob>, StorageError> {
        Ok(self
            .tables
            .read()
            .await
            .jobs
            .iter()
            .find(|job| job.id == id)
            .cloned())
    }

    async fn record_run(
        &self,
        id: Uuid,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut tables = self.tables.write().await;
        let job = tables
            .jobs
            .iter_mut()
            .find(|job| job.id == id)
            .ok_or_else(|| StorageError::NotFound(format!("job {}", id)))?;
        job.last_run_at = Some(last_run_at);
        job.next_run_at = Some(next_run_at);
        Ok(())
    }

    async fn save(&self, job: &SchedulerJob) -> Result<(), StorageError> {
        job.validate()?;
        let mut tables = self.tables.write().await;
        match tables.jobs.iter_mut().find(|existing| existing.id == job.id) {
            Some(existing) => *existing = job.clone(),
            None => tables.jobs.push(job.clone()),
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StorageError> {
        let mut tables = self.tables.write().await;
        let before = tables.jobs.len();
        tables.jobs.retain(|job| job.id != id);
        Ok(tables.jobs.len() != before)
    }
}

#[async_trait]
impl IntegrationStore for MemoryStore {
    async fn find(&self, id: Uuid) -> Result<Option<Integration>, StorageError> {
        Ok(self.tables.read().await.integrations.get(&id).cloned())
    }
}

#[async_trait]
impl ChannelStore for MemoryStore {
    async fn active_channels(&self, ids: &[Uuid]) -> Result<Vec<Channel>, StorageError> {
        let tables = self.tables.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| tables.channels.get(id))
            .filter(|channel| channel.is_active)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn entries_by_ids(
        &self,
        ids: &[Uuid],
        channel_ids: &[Uuid],
    ) -> Result<Vec<CatalogEntry>, StorageError> {
        let tables = self.tables.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| tables.entries.iter().find(|entry| entry.id == *id))
            .filter(|entry| channel_ids.contains(&entry.channel_id))
            .cloned()
            .collect())
    }

    async fn entries_by_names(
        &self,
        names: &[String],
        channel_ids: &[Uuid],
    ) -> Result<Vec<CatalogEntry>, StorageError> {
        let wanted: HashSet<String> = names.iter().map(|n| n.trim().to_lowercase()).collect();
        let tables = self.tables.read().await;
        Ok(tables
            .entries
            .iter()
            .filter(|entry| wanted.contains(&entry.name.trim().to_lowercase()))
            .filter(|entry| channel_ids.contains(&entry.channel_id))
            .cloned()
            .collect())
    }

    async fn linked_copies(&self, entry_id: Uuid) -> Result<Vec<CopyEntry>, StorageError> {
        let tables = self.tables.read().await;
        Ok(tables
            .entry_copies
            .get(&entry_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| tables.copies.get(id))
                    .filter(|copy| copy.is_active)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn scoped_copies(
        &self,
        category: &str,
        subcategory: Option<&str>,
    ) -> Result<Vec<CopyEntry>, StorageError> {
        let tables = self.tables.read().await;
        let mut copies: Vec<CopyEntry> = tables
            .copies
            .values()
            .filter(|copy| copy.is_active)
            .filter(|copy| copy.category.as_deref() == Some(category))
            .filter(|copy| copy.subcategory.as_deref() == subcategory)
            .cloned()
            .collect();
        // HashMap order is arbitrary; keep results stable for seeded selection
        copies.sort_by_key(|copy| copy.id);
        Ok(copies)
    }

    async fn delete_entry(&self, id: Uuid) -> Result<bool, StorageError> {
        let mut tables = self.tables.write().await;
        let before = tables.entries.len();
        tables.entries.retain(|entry| entry.id != id);
        tables.entry_copies.remove(&id);
        for job in tables.jobs.iter_mut() {
            job.config.catalog_entry_ids.retain(|entry_id| *entry_id != id);
        }
        Ok(tables.entries.len() != before)
    }
}
