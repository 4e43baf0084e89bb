//! Batch persister (C4): buffers incoming file records in memory and flushes them to
//! Postgres in a single transaction per batch, either once a count/byte threshold is
//! crossed or on a timer. The buffer-then-transaction-per-call shape follows
//! `thicclatka-nefaxer/src/engine/db_ops/indexer.rs::flush_batch`; the upsert SQL follows
//! `ferrex-core/src/database/postgres_simple.rs::store_media`'s
//! `INSERT ... ON CONFLICT ... DO UPDATE SET ... = EXCLUDED....` idiom, adapted to the
//! `(library_id, path)` uniqueness this crate's records carry instead of a bare file path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::storage::{FileRecordStore, LibraryStore};
use crate::types::{Library, MediaFileRecord};

pub mod jobs;
pub use jobs::PostgresJobStore;

/// Read-only accessor over the `libraries` table a host application owns; the scan core
/// only ever selects from it.
pub struct PostgresLibraryStore {
    pool: PgPool,
}

impl PostgresLibraryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LibraryStore for PostgresLibraryStore {
    async fn get_library(&self, library_id: Uuid) -> Result<Option<Library>> {
        let library = sqlx::query_as::<_, Library>("SELECT id, root_path, library_type FROM libraries WHERE id = $1")
            .bind(library_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(library)
    }
}

/// Rough estimate of one buffered record's heap footprint, used against
/// `persist_memory_budget_bytes` so a handful of huge `path`/`codec` strings can't blow
/// past an item-count threshold unnoticed.
fn estimate_record_bytes(record: &MediaFileRecord) -> u64 {
    let strings = record.path.len()
        + record.content_hash.len()
        + record.container_format.len()
        + record.linked_entity_type.as_deref().map_or(0, str::len)
        + record.codec.as_deref().map_or(0, str::len)
        + record.resolution.as_deref().map_or(0, str::len);
    (strings + 256) as u64
}

struct Buffer {
    records: Vec<MediaFileRecord>,
    bytes: u64,
}

impl Buffer {
    fn new() -> Self {
        Self { records: Vec::new(), bytes: 0 }
    }

    fn push(&mut self, record: MediaFileRecord) {
        self.bytes += estimate_record_bytes(&record);
        self.records.push(record);
    }

    fn take(&mut self) -> Vec<MediaFileRecord> {
        self.bytes = 0;
        std::mem::take(&mut self.records)
    }
}

/// Buffers `MediaFileRecord` writes and flushes them in batches. One instance is shared
/// (behind an `Arc`) across every file worker feeding results for a scan job.
pub struct BatchPersister {
    pool: PgPool,
    buffer: Mutex<Buffer>,
    batch_size: usize,
    memory_budget_bytes: u64,
    flushed_count: AtomicU64,
    flush_failures: AtomicU64,
}

impl BatchPersister {
    pub fn new(pool: PgPool, batch_size: usize, memory_budget_bytes: u64) -> Self {
        Self {
            pool,
            buffer: Mutex::new(Buffer::new()),
            batch_size: batch_size.max(1),
            memory_budget_bytes,
            flushed_count: AtomicU64::new(0),
            flush_failures: AtomicU64::new(0),
        }
    }

    /// Buffers one record, flushing immediately if the count or byte threshold is now
    /// exceeded. Current `batch_size` is passed in fresh each call so the throttler's
    /// live adjustments take effect without this persister holding a stale copy.
    pub async fn enqueue(&self, record: MediaFileRecord, batch_size: usize) -> Result<()> {
        let should_flush = {
            let mut buffer = self.buffer.lock().await;
            buffer.push(record);
            buffer.records.len() >= batch_size.max(1) || buffer.bytes >= self.memory_budget_bytes
        };
        if should_flush {
            self.flush().await?;
        }
        Ok(())
    }

    /// Drains the buffer and upserts it in a single transaction. A no-op on an empty
    /// buffer so the periodic flush timer can call this unconditionally.
    pub async fn flush(&self) -> Result<usize> {
        let batch = {
            let mut buffer = self.buffer.lock().await;
            buffer.take()
        };
        if batch.is_empty() {
            return Ok(0);
        }

        let n = batch.len();
        match self.flush_batch(&batch).await {
            Ok(()) => {
                self.flushed_count.fetch_add(n as u64, Ordering::Relaxed);
                debug!(count = n, "flushed media file batch");
                Ok(n)
            }
            Err(e) => {
                self.flush_failures.fetch_add(1, Ordering::Relaxed);
                warn!(count = n, error = %e, "batch flush failed, records returned to buffer");
                let mut buffer = self.buffer.lock().await;
                for record in batch {
                    buffer.push(record);
                }
                Err(e)
            }
        }
    }

    async fn flush_batch(&self, batch: &[MediaFileRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for record in batch {
            sqlx::query(
                r#"
                INSERT INTO media_files (
                    id, library_id, path, size_bytes, content_hash, container_format,
                    media_type, linked_entity_id, linked_entity_type, duration_secs,
                    bitrate_kbps, codec, resolution, scan_job_id, last_seen_at,
                    created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
                ON CONFLICT (library_id, path) DO UPDATE
                SET size_bytes = EXCLUDED.size_bytes,
                    content_hash = EXCLUDED.content_hash,
                    container_format = EXCLUDED.container_format,
                    media_type = EXCLUDED.media_type,
                    duration_secs = EXCLUDED.duration_secs,
                    bitrate_kbps = EXCLUDED.bitrate_kbps,
                    codec = EXCLUDED.codec,
                    resolution = EXCLUDED.resolution,
                    scan_job_id = EXCLUDED.scan_job_id,
                    last_seen_at = EXCLUDED.last_seen_at,
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(record.id)
            .bind(record.library_id)
            .bind(&record.path)
            .bind(record.size_bytes)
            .bind(&record.content_hash)
            .bind(&record.container_format)
            .bind(record.media_type)
            .bind(record.linked_entity_id)
            .bind(&record.linked_entity_type)
            .bind(record.duration_secs)
            .bind(record.bitrate_kbps)
            .bind(&record.codec)
            .bind(&record.resolution)
            .bind(record.scan_job_id)
            .bind(record.last_seen_at)
            .bind(record.created_at)
            .bind(record.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Deletes every record for `library_id` whose `last_seen_at` predates `scan_started_at`,
    /// i.e. files that existed before this scan but weren't touched by it (removed from disk).
    pub async fn prune_stale(&self, library_id: Uuid, scan_started_at: chrono::DateTime<chrono::Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM media_files WHERE library_id = $1 AND last_seen_at < $2")
            .bind(library_id)
            .bind(scan_started_at)
            .execute(&self.pool)
            .await?;
        let deleted = result.rows_affected();
        if deleted > 0 {
            info!(library_id = %library_id, deleted, "pruned stale media files");
        }
        Ok(deleted)
    }

    async fn touch_last_seen_impl(&self, media_file_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE media_files SET last_seen_at = $1, updated_at = $1 WHERE id = $2")
            .bind(at)
            .bind(media_file_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn reload_impl(&self, media_file_id: Uuid) -> Result<Option<MediaFileRecord>> {
        let record = sqlx::query_as::<_, MediaFileRecord>("SELECT * FROM media_files WHERE id = $1")
            .bind(media_file_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn find_by_path_impl(&self, library_id: Uuid, path: &str) -> Result<Option<MediaFileRecord>> {
        let record = sqlx::query_as::<_, MediaFileRecord>(
            "SELECT * FROM media_files WHERE library_id = $1 AND path = $2",
        )
        .bind(library_id)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    pub fn flushed_count(&self) -> u64 {
        self.flushed_count.load(Ordering::Relaxed)
    }

    pub fn flush_failures(&self) -> u64 {
        self.flush_failures.load(Ordering::Relaxed)
    }

    /// Runs until `cancel` fires, calling `flush()` on the given interval so records don't
    /// sit buffered indefinitely between batch-size-triggered flushes.
    pub async fn run_periodic_flush(&self, interval: Duration, cancel: crate::cancel::CancelToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if let Err(e) = self.flush().await {
                        warn!(error = %e, "final flush on shutdown failed");
                    }
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.flush().await {
                        warn!(error = %e, "periodic flush failed");
                    }
                }
            }
        }
    }
}

#[async_trait]
impl FileRecordStore for BatchPersister {
    async fn enqueue(&self, record: MediaFileRecord, batch_size: usize) -> Result<()> {
        BatchPersister::enqueue(self, record, batch_size).await
    }

    async fn touch_last_seen(&self, media_file_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.touch_last_seen_impl(media_file_id, at).await
    }

    async fn flush(&self) -> Result<usize> {
        BatchPersister::flush(self).await
    }

    async fn reload(&self, media_file_id: Uuid) -> Result<Option<MediaFileRecord>> {
        self.reload_impl(media_file_id).await
    }

    async fn find_by_path(&self, library_id: Uuid, path: &str) -> Result<Option<MediaFileRecord>> {
        self.find_by_path_impl(library_id, path).await
    }

    async fn list_for_library(&self, library_id: Uuid) -> Result<Vec<MediaFileRecord>> {
        let records = sqlx::query_as::<_, MediaFileRecord>("SELECT * FROM media_files WHERE library_id = $1")
            .bind(library_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    async fn prune_stale(&self, library_id: Uuid, scan_started_at: DateTime<Utc>) -> Result<u64> {
        BatchPersister::prune_stale(self, library_id, scan_started_at).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::types::MediaType;

    fn sample_record(path: &str) -> MediaFileRecord {
        MediaFileRecord {
            id: Uuid::new_v4(),
            library_id: Uuid::new_v4(),
            path: path.to_string(),
            size_bytes: 4096,
            content_hash: "deadbeef".to_string(),
            container_format: "mp3".to_string(),
            media_type: MediaType::Track,
            linked_entity_id: None,
            linked_entity_type: None,
            duration_secs: None,
            bitrate_kbps: None,
            codec: None,
            resolution: None,
            scan_job_id: Uuid::new_v4(),
            last_seen_at: Utc::now(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn estimate_grows_with_string_fields() {
        let small = sample_record("a.mp3");
        let mut large = sample_record("a.mp3");
        large.path = "x".repeat(10_000);
        assert!(estimate_record_bytes(&large) > estimate_record_bytes(&small));
    }

    #[tokio::test]
    async fn buffer_take_resets_byte_count() {
        let mut buffer = Buffer::new();
        buffer.push(sample_record("a.mp3"));
        buffer.push(sample_record("b.mp3"));
        assert_eq!(buffer.records.len(), 2);
        assert!(buffer.bytes > 0);

        let drained = buffer.take();
        assert_eq!(drained.len(), 2);
        assert_eq!(buffer.bytes, 0);
        assert!(buffer.records.is_empty());
    }
}
