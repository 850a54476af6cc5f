use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use deedscout_common::Job;

use crate::traits::JobStore;

/// Mirrors jobs into a `research_jobs` table: one row per job, the full snapshot as JSONB.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .context("Failed to connect to Postgres")?;
        Ok(Self::new(pool))
    }

    /// Create the table if it does not exist.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS research_jobs (
                job_id      UUID         PRIMARY KEY,
                status      TEXT         NOT NULL,
                payload     JSONB        NOT NULL,
                created_at  TIMESTAMPTZ  NOT NULL,
                updated_at  TIMESTAMPTZ  NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create research_jobs table")?;

        info!("research_jobs table ready");
        Ok(())
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn save(&self, job: &Job) -> Result<()> {
        let payload = serde_json::to_value(job)?;

        // Only newer snapshots overwrite, so concurrent mirror writes settle on the latest.
        sqlx::query(
            r#"
            INSERT INTO research_jobs (job_id, status, payload, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (job_id) DO UPDATE
            SET status = EXCLUDED.status,
                payload = EXCLUDED.payload,
                updated_at = EXCLUDED.updated_at
            WHERE research_jobs.updated_at <= EXCLUDED.updated_at
            "#,
        )
        .bind(job.id)
        .bind(job.status.to_string())
        .bind(payload)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to save job {}", job.id))?;

        Ok(())
    }

    async fn load(&self, job_id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, (serde_json::Value,)>(
            r#"
            SELECT payload
            FROM research_jobs
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to load job {job_id}"))?;

        row.map(|(payload,)| {
            serde_json::from_value(payload).with_context(|| format!("Corrupt payload for job {job_id}"))
        })
        .transpose()
    }

    async fn is_connected(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}
