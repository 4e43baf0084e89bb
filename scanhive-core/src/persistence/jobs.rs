//! Postgres-backed `JobStore` for the `scan_jobs` table. Query shapes follow the same
//! bind-order and `ON CONFLICT`/`WHERE`-guarded-update idioms as
//! `ferrex-core/src/database/postgres_simple.rs`, adapted here to single-row reads/writes
//! rather than batch upserts (the scan-job row is small and updated far less often than a
//! batch of file records).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use crate::storage::JobStore;
use crate::types::{ScanJob, ScanStatus};

pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn insert_job(&self, job: &ScanJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scan_jobs (
                id, library_id, status, files_found, files_processed, files_skipped,
                bytes_processed, progress_pct, status_message, error_message,
                explicit_pause, started_at, updated_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(job.id)
        .bind(job.library_id)
        .bind(job.status)
        .bind(job.files_found)
        .bind(job.files_processed)
        .bind(job.files_skipped)
        .bind(job.bytes_processed)
        .bind(job.progress_pct)
        .bind(&job.status_message)
        .bind(&job.error_message)
        .bind(job.explicit_pause)
        .bind(job.started_at)
        .bind(job.updated_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<ScanJob>> {
        let job = sqlx::query_as::<_, ScanJob>("SELECT * FROM scan_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    async fn get_jobs_for_library(&self, library_id: Uuid) -> Result<Vec<ScanJob>> {
        let jobs = sqlx::query_as::<_, ScanJob>("SELECT * FROM scan_jobs WHERE library_id = $1 ORDER BY started_at DESC")
            .bind(library_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(jobs)
    }

    async fn list_jobs_by_status(&self, status: ScanStatus) -> Result<Vec<ScanJob>> {
        let jobs = sqlx::query_as::<_, ScanJob>("SELECT * FROM scan_jobs WHERE status = $1")
            .bind(status)
            .fetch_all(&self.pool)
            .await?;
        Ok(jobs)
    }

    async fn update_status(
        &self,
        job_id: Uuid,
        status: ScanStatus,
        explicit_pause: bool,
        status_message: Option<String>,
        error_message: Option<String>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scan_jobs
            SET status = $1, explicit_pause = $2, status_message = $3, error_message = $4, updated_at = $5
            WHERE id = $6
            "#,
        )
        .bind(status)
        .bind(explicit_pause)
        .bind(status_message)
        .bind(error_message)
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_progress_if_running(
        &self,
        job_id: Uuid,
        files_found: i64,
        files_processed: i64,
        files_skipped: i64,
        bytes_processed: i64,
        progress_pct: f32,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scan_jobs
            SET files_found = $1, files_processed = $2, files_skipped = $3,
                bytes_processed = $4, progress_pct = $5, updated_at = $6
            WHERE id = $7 AND status = $8
            "#,
        )
        .bind(files_found)
        .bind(files_processed)
        .bind(files_skipped)
        .bind(bytes_processed)
        .bind(progress_pct)
        .bind(Utc::now())
        .bind(job_id)
        .bind(ScanStatus::Running)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn finalize(&self, job_id: Uuid, status: ScanStatus, completed_at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE scan_jobs SET status = $1, completed_at = $2, updated_at = $2 WHERE id = $3")
            .bind(status)
            .bind(completed_at)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_job(&self, job_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM scan_jobs WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
