// Scheduler job repository: due-job queries, run timestamps and write-time validation

use crate::db::DbPool;
use crate::errors::{DatabaseError, StorageError};
use crate::models::{JobConfig, SchedulerJob};
use crate::store::JobStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::instrument;
use uuid::Uuid;

const JOB_COLUMNS: &str = r#"
    id, name, integration_id, interval_minutes, channel_ids, config,
    is_active, last_run_at, next_run_at
"#;

/// Repository for scheduler job database operations
pub struct JobRepository {
    pool: DbPool,
}

impl JobRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> Result<SchedulerJob, DatabaseError> {
        let config_json: serde_json::Value = row.try_get("config")?;
        let config: JobConfig = serde_json::from_value(config_json).map_err(|e| {
            DatabaseError::QueryFailed(format!("Failed to parse job config: {}", e))
        })?;
        let interval_minutes: i32 = row.try_get("interval_minutes")?;

        Ok(SchedulerJob {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            integration_id: row.try_get("integration_id")?,
            interval_minutes: u32::try_from(interval_minutes).map_err(|_| {
                DatabaseError::QueryFailed(format!(
                    "Invalid interval_minutes {}",
                    interval_minutes
                ))
            })?,
            channel_ids: row.try_get("channel_ids")?,
            config,
            is_active: row.try_get("is_active")?,
            last_run_at: row.try_get("last_run_at")?,
            next_run_at: row.try_get("next_run_at")?,
        })
    }
}

#[async_trait]
impl JobStore for JobRepository {
    #[instrument(skip(self))]
    async fn active_jobs(&self) -> Result<Vec<SchedulerJob>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM scheduler_jobs WHERE is_active = true ORDER BY next_run_at NULLS FIRST, name",
            JOB_COLUMNS
        ))
        .fetch_all(self.pool.pool())
        .await
        .map_err(DatabaseError::from)?;

        let jobs = rows
            .iter()
            .map(Self::map_row)
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(count = jobs.len(), "Loaded active jobs");
        Ok(jobs)
    }

    #[instrument(skip(self))]
    async fn find(&self, id: Uuid) -> Result<Option<SchedulerJob>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM scheduler_jobs WHERE id = $1",
            JOB_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(DatabaseError::from)?;

        Ok(row.as_ref().map(Self::map_row).transpose()?)
    }

    #[instrument(skip(self))]
    async fn record_run(
        &self,
        id: Uuid,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE scheduler_jobs
            SET last_run_at = $2, next_run_at = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(last_run_at)
        .bind(next_run_at)
        .execute(self.pool.pool())
        .await
        .map_err(DatabaseError::from)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("job {}", id)));
        }
        Ok(())
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, job_name = %job.name))]
    async fn save(&self, job: &SchedulerJob) -> Result<(), StorageError> {
        job.validate()?;
        let config_json = serde_json::to_value(&job.config)?;
        let interval = i32::try_from(job.interval_minutes).map_err(|_| {
            crate::errors::ValidationError::InvalidFieldValue {
                field: "interval_minutes".to_string(),
                reason: "too large".to_string(),
            }
        })?;

        sqlx::query(
            r#"
            INSERT INTO scheduler_jobs (
                id, name, integration_id, interval_minutes, channel_ids, config,
                is_active, last_run_at, next_run_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                integration_id = EXCLUDED.integration_id,
                interval_minutes = EXCLUDED.interval_minutes,
                channel_ids = EXCLUDED.channel_ids,
                config = EXCLUDED.config,
                is_active = EXCLUDED.is_active,
                updated_at = NOW()
            "#,
        )
        .bind(job.id)
        .bind(&job.name)
        .bind(job.integration_id)
        .bind(interval)
        .bind(&job.channel_ids)
        .bind(config_json)
        .bind(job.is_active)
        .bind(job.last_run_at)
        .bind(job.next_run_at)
        .execute(self.pool.pool())
        .await
        .map_err(DatabaseError::from)?;

        tracing::info!("Job saved");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: Uuid) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM scheduler_jobs WHERE id = $1")
            .bind(id)
            .execute(self.pool.pool())
            .await
            .map_err(DatabaseError::from)?;

        Ok(result.rows_affected() > 0)
    }
}
