// Catalog entries and promotional copy

use crate::db::DbPool;
use crate::errors::{DatabaseError, StorageError};
use crate::models::{CatalogEntry, CopyEntry};
use crate::store::CatalogStore;
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::collections::HashMap;
use tracing::instrument;
use uuid::Uuid;

pub struct CatalogRepository {
    pool: DbPool,
}

impl CatalogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn map_entry(row: &PgRow) -> Result<CatalogEntry, DatabaseError> {
        Ok(CatalogEntry {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            channel_id: row.try_get("channel_id")?,
            category: row.try_get("category")?,
            subcategory: row.try_get("subcategory")?,
        })
    }

    fn map_copy(row: &PgRow) -> Result<CopyEntry, DatabaseError> {
        Ok(CopyEntry {
            id: row.try_get("id")?,
            text: row.try_get("text")?,
            category: row.try_get("category")?,
            subcategory: row.try_get("subcategory")?,
            is_active: row.try_get("is_active")?,
        })
    }
}

#[async_trait]
impl CatalogStore for CatalogRepository {
    #[instrument(skip(self))]
    async fn entries_by_ids(
        &self,
        ids: &[Uuid],
        channel_ids: &[Uuid],
    ) -> Result<Vec<CatalogEntry>, StorageError> {
        if ids.is_empty() || channel_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT id, name, channel_id, category, subcategory
            FROM catalog_entries
            WHERE id = ANY($1) AND channel_id = ANY($2)
            "#,
        )
        .bind(ids)
        .bind(channel_ids)
        .fetch_all(self.pool.pool())
        .await
        .map_err(DatabaseError::from)?;

        let mut by_id: HashMap<Uuid, CatalogEntry> = rows
            .iter()
            .map(|row| Self::map_entry(row).map(|entry| (entry.id, entry)))
            .collect::<Result<_, _>>()?;

        // Keywords are processed in the configured order
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    #[instrument(skip(self))]
    async fn entries_by_names(
        &self,
        names: &[String],
        channel_ids: &[Uuid],
    ) -> Result<Vec<CatalogEntry>, StorageError> {
        if names.is_empty() || channel_ids.is_empty() {
            return Ok(Vec::new());
        }
        let lowered: Vec<String> = names.iter().map(|n| n.trim().to_lowercase()).collect();

        let rows = sqlx::query(
            r#"
            SELECT id, name, channel_id, category, subcategory
            FROM catalog_entries
            WHERE LOWER(TRIM(name)) = ANY($1) AND channel_id = ANY($2)
            ORDER BY name
            "#,
        )
        .bind(&lowered)
        .bind(channel_ids)
        .fetch_all(self.pool.pool())
        .await
        .map_err(DatabaseError::from)?;

        Ok(rows
            .iter()
            .map(Self::map_entry)
            .collect::<Result<Vec<_>, _>>()?)
    }

    #[instrument(skip(self))]
    async fn linked_copies(&self, entry_id: Uuid) -> Result<Vec<CopyEntry>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.text, c.category, c.subcategory, c.is_active
            FROM copy_entries c
            JOIN catalog_entry_copies l ON l.copy_id = c.id
            WHERE l.catalog_entry_id = $1 AND c.is_active = true
            ORDER BY c.id
            "#,
        )
        .bind(entry_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(DatabaseError::from)?;

        Ok(rows
            .iter()
            .map(Self::map_copy)
            .collect::<Result<Vec<_>, _>>()?)
    }

    #[instrument(skip(self))]
    async fn scoped_copies(
        &self,
        category: &str,
        subcategory: Option<&str>,
    ) -> Result<Vec<CopyEntry>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT id, text, category, subcategory, is_active
            FROM copy_entries
            WHERE is_active = true
              AND category = $1
              AND subcategory IS NOT DISTINCT FROM $2
            ORDER BY id
            "#,
        )
        .bind(category)
        .bind(subcategory)
        .fetch_all(self.pool.pool())
        .await
        .map_err(DatabaseError::from)?;

        Ok(rows
            .iter()
            .map(Self::map_copy)
            .collect::<Result<Vec<_>, _>>()?)
    }

    #[instrument(skip(self))]
    async fn delete_entry(&self, id: Uuid) -> Result<bool, StorageError> {
        let mut tx = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(DatabaseError::from)?;

        let deleted = sqlx::query("DELETE FROM catalog_entries WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(DatabaseError::from)?
            .rows_affected();

        let id_text = id.to_string();
        let stripped = sqlx::query(
            r#"
            UPDATE scheduler_jobs
            SET config = jsonb_set(
                    config,
                    '{catalog_entry_ids}',
                    COALESCE(
                        (SELECT jsonb_agg(e)
                         FROM jsonb_array_elements(config->'catalog_entry_ids') e
                         WHERE e <> to_jsonb($1::text)),
                        '[]'::jsonb
                    )
                ),
                updated_at = NOW()
            WHERE config->'catalog_entry_ids' ? $1
            "#,
        )
        .bind(&id_text)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from)?
        .rows_affected();

        tx.commit().await.map_err(DatabaseError::from)?;

        tracing::info!(
            catalog_entry_id = %id,
            jobs_updated = stripped,
            "Catalog entry deleted"
        );
        Ok(deleted > 0)
    }
}
