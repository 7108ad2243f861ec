use crate::db::DbPool;
use crate::errors::{DatabaseError, StorageError};
use crate::models::{Integration, IntegrationCredentials};
use crate::store::IntegrationStore;
use async_trait::async_trait;
use sqlx::Row;
use tracing::instrument;
use uuid::Uuid;

/// Marketplace integrations (credentials live in a JSONB column)
pub struct IntegrationRepository {
    pool: DbPool,
}

impl IntegrationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert or replace an integration after validating its credentials
    #[instrument(skip(self, integration), fields(integration_id = %integration.id))]
    pub async fn save(&self, integration: &Integration) -> Result<(), StorageError> {
        integration.credentials.validate()?;
        let credentials = serde_json::to_value(&integration.credentials)?;

        sqlx::query(
            r#"
            INSERT INTO integrations (id, name, marketplace, credentials, is_active)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                marketplace = EXCLUDED.marketplace,
                credentials = EXCLUDED.credentials,
                is_active = EXCLUDED.is_active,
                updated_at = NOW()
            "#,
        )
        .bind(integration.id)
        .bind(&integration.name)
        .bind(integration.credentials.marketplace().to_string())
        .bind(credentials)
        .bind(integration.is_active)
        .execute(self.pool.pool())
        .await
        .map_err(DatabaseError::from)?;

        Ok(())
    }
}

#[async_trait]
impl IntegrationStore for IntegrationRepository {
    #[instrument(skip(self))]
    async fn find(&self, id: Uuid) -> Result<Option<Integration>, StorageError> {
        let row = sqlx::query(
            "SELECT id, name, credentials, is_active FROM integrations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(DatabaseError::from)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let credentials_json: serde_json::Value =
            row.try_get("credentials").map_err(DatabaseError::from)?;
        let credentials: IntegrationCredentials = serde_json::from_value(credentials_json)?;

        Ok(Some(Integration {
            id: row.try_get("id").map_err(DatabaseError::from)?,
            name: row.try_get("name").map_err(DatabaseError::from)?,
            credentials,
            is_active: row.try_get("is_active").map_err(DatabaseError::from)?,
        }))
    }
}
