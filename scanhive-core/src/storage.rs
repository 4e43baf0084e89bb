//! Storage seam the worker pools depend on, independent of any concrete database backend.
//! Mirrors the gap the teacher leaves between scan logic and `MediaDatabaseTrait`: the
//! pools only need "buffer this record" and "touch this timestamp", not a `sqlx` type.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::types::{Library, MediaFileRecord, ScanJob, ScanStatus};

#[async_trait]
pub trait FileRecordStore: Send + Sync {
    /// Buffers a freshly-scanned record for the next batch flush.
    async fn enqueue(&self, record: MediaFileRecord, batch_size: usize) -> Result<()>;

    /// Bumps `last_seen_at`/`updated_at` for an unchanged file without touching any other
    /// column, so a cache-hit "touch" can't clobber metadata a plugin previously wrote.
    async fn touch_last_seen(&self, media_file_id: Uuid, at: DateTime<Utc>) -> Result<()>;

    async fn flush(&self) -> Result<usize>;

    /// Reloads a record after plugins have had a chance to mutate it out-of-band.
    async fn reload(&self, media_file_id: Uuid) -> Result<Option<MediaFileRecord>>;

    /// Resolves the current row id for `(library_id, path)`. On a rescan the upsert keeps
    /// the existing row's id rather than the freshly-generated one the worker proposed, so
    /// callers that need the real post-upsert id (to reload what plugins wrote) must look
    /// it up by the unique key instead of assuming the id they enqueued with stuck.
    async fn find_by_path(&self, library_id: Uuid, path: &str) -> Result<Option<MediaFileRecord>>;

    /// Every record currently on file for a library, used once at scan start to preload
    /// the bloom+LRU cache so the first pass over an unchanged tree hits the fast path.
    async fn list_for_library(&self, library_id: Uuid) -> Result<Vec<MediaFileRecord>>;

    /// Deletes every row for `library_id` whose `last_seen_at` predates `scan_started_at` —
    /// files that existed before this scan but weren't touched by it.
    async fn prune_stale(&self, library_id: Uuid, scan_started_at: DateTime<Utc>) -> Result<u64>;
}

/// Storage seam for the scan-job lifecycle row, depended on by the progress publisher
/// (C9), the library scanner (C10), and the scan manager (C11).
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_job(&self, job: &ScanJob) -> Result<()>;

    async fn get_job(&self, job_id: Uuid) -> Result<Option<ScanJob>>;

    async fn get_jobs_for_library(&self, library_id: Uuid) -> Result<Vec<ScanJob>>;

    /// All jobs in a given status across every library, used by crash recovery and the
    /// state synchronizer which otherwise have no way to enumerate jobs without first
    /// knowing which libraries exist.
    async fn list_jobs_by_status(&self, status: ScanStatus) -> Result<Vec<ScanJob>>;

    /// Sets `status` (and, for a pause, the explicit-pause flag) unconditionally. Used for
    /// lifecycle transitions the caller has already validated are legal.
    async fn update_status(
        &self,
        job_id: Uuid,
        status: ScanStatus,
        explicit_pause: bool,
        status_message: Option<String>,
        error_message: Option<String>,
    ) -> Result<()>;

    /// CAS-like progress update: only applies while the row is still `running`, so a
    /// publisher tick racing a pause/terminate can't resurrect a row's counters after the
    /// status has already moved on. Returns whether the row was actually updated.
    async fn update_progress_if_running(
        &self,
        job_id: Uuid,
        files_found: i64,
        files_processed: i64,
        files_skipped: i64,
        bytes_processed: i64,
        progress_pct: f32,
    ) -> Result<bool>;

    async fn finalize(&self, job_id: Uuid, status: ScanStatus, completed_at: DateTime<Utc>) -> Result<()>;

    async fn delete_job(&self, job_id: Uuid) -> Result<()>;
}

/// Read-only lookup of library rows, consulted by the scan manager when starting a scan
/// and when validating orphaned jobs during crash recovery. The core never writes to this
/// table; library lifecycle belongs to an external library-management surface.
#[async_trait]
pub trait LibraryStore: Send + Sync {
    async fn get_library(&self, library_id: Uuid) -> Result<Option<Library>>;
}
