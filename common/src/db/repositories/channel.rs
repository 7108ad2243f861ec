use crate::db::DbPool;
use crate::errors::{DatabaseError, StorageError};
use crate::models::{Channel, ChannelType};
use crate::store::ChannelStore;
use async_trait::async_trait;
use sqlx::Row;
use std::collections::HashMap;
use tracing::instrument;
use uuid::Uuid;

pub struct ChannelRepository {
    pool: DbPool,
}

impl ChannelRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChannelStore for ChannelRepository {
    #[instrument(skip(self))]
    async fn active_channels(&self, ids: &[Uuid]) -> Result<Vec<Channel>, StorageError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT id, name, channel_type, address, is_active
            FROM channels
            WHERE id = ANY($1) AND is_active = true
            "#,
        )
        .bind(ids)
        .fetch_all(self.pool.pool())
        .await
        .map_err(DatabaseError::from)?;

        let mut by_id = HashMap::with_capacity(rows.len());
        for row in rows {
            let channel_type: String = row.try_get("channel_type").map_err(DatabaseError::from)?;
            let channel = Channel {
                id: row.try_get("id").map_err(DatabaseError::from)?,
                name: row.try_get("name").map_err(DatabaseError::from)?,
                channel_type: channel_type
                    .parse::<ChannelType>()
                    .map_err(DatabaseError::QueryFailed)?,
                address: row.try_get("address").map_err(DatabaseError::from)?,
                is_active: row.try_get("is_active").map_err(DatabaseError::from)?,
            };
            by_id.insert(channel.id, channel);
        }

        // Keep the job's configured channel order
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }
}
