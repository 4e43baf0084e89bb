//! Library scanner (C10): owns the pipeline for a single scan job end to end, from
//! directory discovery through persistence and plugin fan-out, and the state machine
//! governing pending/running/paused/completed/failed transitions. Orchestration shape
//! mirrors `ferrex-core/src/streaming_scanner.rs`'s top-level `scan()` function, which
//! wires its probe/worker-pool/progress pieces together the same way this does.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use scanhive_contracts::{EventBus, FileHandlerPlugin, ScanEvent, ScanEventKind, ScanStats, ScannerHook};
use serde_json::json;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{CachedFileRecord, FileCache};
use crate::cancel::CancelToken;
use crate::config::ScannerSettings;
use crate::progress::ProgressEstimator;
use crate::storage::{FileRecordStore, JobStore};
use crate::throttle::Throttler;
use crate::types::{Library, ScanJob, ScanStatus};
use crate::workers::{close_when_drained, DirectoryPool, FilePool, ResultProcessor};

/// A directory→file queue sized as a multiple of worker count absorbs bursts from a wide
/// directory tree without the directory pool stalling on send.
const FILE_QUEUE_WORKER_MULTIPLIER: usize = 2000;
const RESULT_QUEUE_WORKER_MULTIPLIER: usize = 100;
const QUEUE_TICK_INTERVAL: Duration = Duration::from_millis(500);

pub struct LibraryScanner {
    job_id: Uuid,
    library: Library,
    settings: ScannerSettings,
    job_store: Arc<dyn JobStore>,
    file_store: Arc<dyn FileRecordStore>,
    cache: Arc<FileCache>,
    progress: Arc<ProgressEstimator>,
    throttler: Arc<Throttler>,
    event_bus: Arc<dyn EventBus>,
    hooks: Vec<Arc<dyn ScannerHook>>,
    plugins: Vec<Arc<dyn FileHandlerPlugin>>,
    cancel: CancelToken,
    explicit_pause: AtomicBool,
    status: RwLock<ScanStatus>,
    started_at: DateTime<Utc>,
    is_resume: bool,
}

impl LibraryScanner {
    #[allow(clippy::too_many_arguments)]
    fn build(
        library: Library,
        job_id: Uuid,
        started_at: DateTime<Utc>,
        is_resume: bool,
        job_store: Arc<dyn JobStore>,
        file_store: Arc<dyn FileRecordStore>,
        event_bus: Arc<dyn EventBus>,
        hooks: Vec<Arc<dyn ScannerHook>>,
        plugins: Vec<Arc<dyn FileHandlerPlugin>>,
        settings: ScannerSettings,
    ) -> Arc<Self> {
        let cache = Arc::new(FileCache::new(
            settings.bloom_expected_items,
            settings.bloom_false_positive_rate,
            settings.bloom_expected_items,
        ));
        let throttler = Throttler::new(settings.clone());
        Arc::new(Self {
            job_id,
            library,
            cache,
            progress: Arc::new(ProgressEstimator::new()),
            throttler,
            cancel: CancelToken::new(),
            explicit_pause: AtomicBool::new(false),
            status: RwLock::new(ScanStatus::Pending),
            started_at,
            is_resume,
            job_store,
            file_store,
            event_bus,
            hooks,
            plugins,
            settings,
        })
    }

    /// Fresh job: the caller has already inserted the `Pending` row.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        library: Library,
        job: &ScanJob,
        job_store: Arc<dyn JobStore>,
        file_store: Arc<dyn FileRecordStore>,
        event_bus: Arc<dyn EventBus>,
        hooks: Vec<Arc<dyn ScannerHook>>,
        plugins: Vec<Arc<dyn FileHandlerPlugin>>,
        settings: ScannerSettings,
    ) -> Arc<Self> {
        Self::build(library, job.id, job.started_at, false, job_store, file_store, event_bus, hooks, plugins, settings)
    }

    /// Resume: `job` is the persisted (paused) row; processed/skipped/found counters and
    /// `started_at` carry forward rather than resetting.
    #[allow(clippy::too_many_arguments)]
    pub fn resume(
        library: Library,
        job: &ScanJob,
        job_store: Arc<dyn JobStore>,
        file_store: Arc<dyn FileRecordStore>,
        event_bus: Arc<dyn EventBus>,
        hooks: Vec<Arc<dyn ScannerHook>>,
        plugins: Vec<Arc<dyn FileHandlerPlugin>>,
        settings: ScannerSettings,
    ) -> Arc<Self> {
        let scanner = Self::build(library, job.id, job.started_at, true, job_store, file_store, event_bus, hooks, plugins, settings);
        scanner.progress.seed(
            job.files_found.max(0) as u64,
            0,
            job.files_processed.max(0) as u64,
            job.bytes_processed.max(0) as u64,
            job.files_skipped.max(0) as u64,
        );
        scanner.progress.mark_discovery_complete();
        scanner
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn library_id(&self) -> Uuid {
        self.library.id
    }

    pub async fn status(&self) -> ScanStatus {
        *self.status.read().await
    }

    pub fn stats(&self) -> ScanStats {
        ScanStats {
            files_found: self.progress.total_files(),
            files_processed: self.progress.processed_files(),
            files_skipped: self.progress.skipped_files(),
            bytes_processed: self.progress.processed_bytes(),
            errors: self.progress.errors(),
        }
    }

    /// Sets the explicit-pause flag, cancels the shared context, and persists `paused`
    /// with current counters. Safe to call from outside the task running `run()`.
    pub async fn pause(&self) {
        self.explicit_pause.store(true, Ordering::SeqCst);
        self.cancel.cancel();

        let message = Some("paused by request".to_string());
        if let Err(e) = self.job_store.update_status(self.job_id, ScanStatus::Paused, true, message, None).await {
            warn!(job_id = %self.job_id, error = %e, "failed to persist paused status");
        }
        *self.status.write().await = ScanStatus::Paused;

        self.event_bus
            .publish(ScanEvent::new(
                ScanEventKind::ScanPaused,
                self.job_id,
                self.library.id,
                json!({ "processed_files": self.progress.processed_files() }),
            ))
            .await;
    }

    /// Runs the whole pipeline to completion (or until paused). Intended to be spawned as
    /// a background task immediately after construction.
    pub async fn run(self: Arc<Self>) {
        if let Err(e) = std::fs::metadata(&self.library.root_path) {
            self.fail(format!("library root path not accessible: {e}")).await;
            return;
        }

        self.set_running().await;
        let start_kind = if self.is_resume { ScanEventKind::ScanResumed } else { ScanEventKind::ScanStarted };
        self.event_bus
            .publish(ScanEvent::new(
                start_kind,
                self.job_id,
                self.library.id,
                json!({ "root_path": self.library.root_path }),
            ))
            .await;
        if !self.is_resume {
            for hook in &self.hooks {
                let call = hook.on_scan_started(self.job_id, self.library.id, &self.library.root_path);
                if let Err(e) = tokio::time::timeout(self.settings.plugin_timeout(), call).await {
                    warn!(job_id = %self.job_id, error = %e, "on_scan_started hook timed out");
                }
            }
        }

        self.preload_cache().await;

        let (file_tx, file_rx) = mpsc::channel(self.settings.max_workers.max(1) * FILE_QUEUE_WORKER_MULTIPLIER);
        let (result_tx, result_rx) = mpsc::channel(self.settings.max_workers.max(1) * RESULT_QUEUE_WORKER_MULTIPLIER);

        let dir_pool = Arc::new(DirectoryPool::new(
            self.library.clone(),
            file_tx,
            self.settings.max_workers.max(1) * FILE_QUEUE_WORKER_MULTIPLIER,
            self.settings.clone(),
        ));
        let file_pool = Arc::new(FilePool::new(
            file_rx,
            result_tx,
            self.library.clone(),
            self.job_id,
            self.settings.clone(),
            self.plugins.clone(),
            self.event_bus.clone(),
        ));
        let result_processor = Arc::new(ResultProcessor::new(result_rx, self.hooks.clone(), self.library.id, self.settings.clone()));

        let worker_count = self.throttler.current_limits().await.worker_count;

        let throttler_handle = tokio::spawn({
            let throttler = self.throttler.clone();
            let cancel = self.cancel.clone();
            async move { throttler.run(cancel).await }
        });
        let throttle_events_handle = tokio::spawn({
            let throttler = self.throttler.clone();
            let event_bus = self.event_bus.clone();
            let job_id = self.job_id;
            let library_id = self.library.id;
            let cancel = self.cancel.clone();
            async move { forward_throttle_events(throttler, event_bus, job_id, library_id, cancel).await }
        });
        let publisher_handle = tokio::spawn({
            let publisher = crate::publisher::ProgressPublisher::new(self.job_id, self.library.id, self.settings.clone());
            let progress = self.progress.clone();
            let throttler = self.throttler.clone();
            let job_store = self.job_store.clone();
            let event_bus = self.event_bus.clone();
            let cancel = self.cancel.clone();
            async move { publisher.run(progress, throttler, job_store, event_bus, cancel).await }
        });
        let flush_handle = tokio::spawn({
            let store = self.file_store.clone();
            let cancel = self.cancel.clone();
            let interval = self.settings.persist_flush_interval();
            async move { run_periodic_flush(store, interval, cancel).await }
        });

        // The directory pool re-enqueues its own sub-directories, so its send side can
        // only close once a dedicated teardown signal tells its workers to stop pulling.
        let dir_stage_cancel = CancelToken::new();
        let dir_handles = dir_pool.spawn(
            worker_count,
            self.cache.clone(),
            self.file_store.clone(),
            self.progress.clone(),
            self.throttler.clone(),
            dir_stage_cancel.clone(),
        );

        if !dir_pool.seed_root(PathBuf::from(&self.library.root_path)).await {
            warn!(job_id = %self.job_id, "failed to seed scan root onto the directory queue");
        }

        let queue_manager_handle = {
            let pool = dir_pool.clone();
            let job_cancel = self.cancel.clone();
            let stage_cancel = dir_stage_cancel.clone();
            let grace = self.settings.queue_close_grace();
            let ticks = self.settings.queue_close_confirm_ticks;
            tokio::spawn(async move {
                close_when_drained(move || pool.is_drained(), grace, ticks, QUEUE_TICK_INTERVAL, &job_cancel).await;
                stage_cancel.cancel();
            })
        };

        let file_handles = file_pool.spawn(
            worker_count,
            self.cache.clone(),
            self.file_store.clone(),
            self.progress.clone(),
            self.throttler.clone(),
            self.cancel.clone(),
        );

        for h in dir_handles {
            let _ = h.await;
        }
        let _ = queue_manager_handle.await;

        self.progress.mark_discovery_complete();
        self.event_bus
            .publish(ScanEvent::new(ScanEventKind::ScanDiscoveryComplete, self.job_id, self.library.id, json!({})))
            .await;

        // Dropping the directory pool drops its file-queue sender; the file pool's
        // receivers then observe a closed channel once its own workers finish draining.
        drop(dir_pool);

        for h in file_handles {
            let _ = h.await;
        }
        drop(file_pool);

        let drained = result_processor.run(self.cache.clone(), self.cancel.clone()).await;
        debug!(job_id = %self.job_id, drained, "result queue drained");

        self.cancel.cancel();
        let _ = throttler_handle.await;
        let _ = throttle_events_handle.await;
        let _ = publisher_handle.await;
        let _ = flush_handle.await;

        if let Err(e) = self.file_store.prune_stale(self.library.id, self.started_at).await {
            warn!(job_id = %self.job_id, error = %e, "failed to prune stale media files");
        }

        self.finalize().await;
    }

    async fn set_running(&self) {
        let message = Some(if self.is_resume { "resuming scan".to_string() } else { "scanning".to_string() });
        if let Err(e) = self.job_store.update_status(self.job_id, ScanStatus::Running, false, message, None).await {
            warn!(job_id = %self.job_id, error = %e, "failed to persist running status");
        }
        *self.status.write().await = ScanStatus::Running;
    }

    async fn preload_cache(&self) {
        let records = match self.file_store.list_for_library(self.library.id).await {
            Ok(records) => records,
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "failed to preload file cache");
                return;
            }
        };

        if self.is_resume {
            self.cache.preload(records.into_iter().map(to_cached));
            return;
        }

        let total_bytes: u64 = records.iter().map(|r| r.size_bytes.max(0) as u64).sum();
        let total_files = records.len() as u64;
        self.cache.preload(records.into_iter().map(to_cached));

        // Approximates the upfront total from the previous scan's record count rather than
        // a second full filesystem walk; superseded as the live directory walk adds real
        // totals, and frozen once discovery completes.
        self.progress.add_total(total_files, total_bytes);
    }

    async fn fail(&self, message: String) {
        warn!(job_id = %self.job_id, %message, "scan failed");
        if let Err(e) = self.job_store.update_status(self.job_id, ScanStatus::Failed, false, None, Some(message.clone())).await {
            warn!(job_id = %self.job_id, error = %e, "failed to persist failed status");
        }
        let _ = self.job_store.finalize(self.job_id, ScanStatus::Failed, Utc::now()).await;
        *self.status.write().await = ScanStatus::Failed;
        self.event_bus
            .publish(ScanEvent::new(ScanEventKind::ScanFailed, self.job_id, self.library.id, json!({ "error": message })))
            .await;
    }

    async fn finalize(&self) {
        if self.explicit_pause.load(Ordering::SeqCst) {
            return;
        }

        let stats = self.stats();
        if let Err(e) = self.job_store.finalize(self.job_id, ScanStatus::Completed, Utc::now()).await {
            warn!(job_id = %self.job_id, error = %e, "failed to finalize job row");
        }
        *self.status.write().await = ScanStatus::Completed;

        self.event_bus
            .publish(ScanEvent::new(
                ScanEventKind::ScanCompleted,
                self.job_id,
                self.library.id,
                json!({
                    "files_found": stats.files_found,
                    "files_processed": stats.files_processed,
                    "files_skipped": stats.files_skipped,
                    "bytes_processed": stats.bytes_processed,
                    "errors": stats.errors,
                }),
            ))
            .await;

        for hook in &self.hooks {
            let call = hook.on_scan_completed(self.job_id, self.library.id, stats.clone());
            if let Err(e) = tokio::time::timeout(self.settings.plugin_timeout(), call).await {
                warn!(job_id = %self.job_id, error = %e, "on_scan_completed hook timed out");
            }
        }

        info!(job_id = %self.job_id, files_processed = stats.files_processed, "scan completed");
    }
}

fn to_cached(record: crate::types::MediaFileRecord) -> (PathBuf, CachedFileRecord) {
    (
        PathBuf::from(record.path),
        CachedFileRecord {
            media_file_id: record.id,
            size: record.size_bytes.max(0) as u64,
            mtime: record.updated_at,
            content_hash: record.content_hash,
        },
    )
}

/// Bridges the throttler's internal broadcast channel onto the scan's event bus (spec §6:
/// `scan.throttle_adjusted`, `scan.emergency_brake`, `scan.emergency_brake_released`).
async fn forward_throttle_events(
    throttler: Arc<Throttler>,
    event_bus: Arc<dyn EventBus>,
    job_id: Uuid,
    library_id: Uuid,
    cancel: CancelToken,
) {
    let mut rx = throttler.subscribe();
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = rx.recv() => event,
        };
        let Ok(event) = event else { break };

        let (kind, payload) = map_throttle_event(event);
        event_bus.publish(ScanEvent::new(kind, job_id, library_id, payload)).await;
    }
}

/// Pure mapping from an internal throttle event to the `(kind, payload)` pair published on
/// the scan's event bus, factored out so the mapping itself is unit-testable without
/// driving the throttler's live control loop.
fn map_throttle_event(event: crate::throttle::ThrottleEvent) -> (ScanEventKind, serde_json::Value) {
    match event {
        crate::throttle::ThrottleEvent::Adjusted(limits) => (
            ScanEventKind::ThrottleAdjusted,
            json!({
                "worker_count": limits.worker_count,
                "batch_size": limits.batch_size,
                "delay_ms": limits.delay.as_millis() as u64,
                "network_bandwidth_cap_mbps": limits.network_bandwidth_cap_mbps,
                "io_throttle_ratio": limits.io_throttle_ratio,
            }),
        ),
        crate::throttle::ThrottleEvent::EmergencyBrake => (ScanEventKind::EmergencyBrake, json!({})),
        crate::throttle::ThrottleEvent::EmergencyBrakeReleased => (ScanEventKind::EmergencyBrakeReleased, json!({})),
    }
}

async fn run_periodic_flush(store: Arc<dyn FileRecordStore>, interval: Duration, cancel: CancelToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = store.flush().await {
                    warn!(error = %e, "final flush on shutdown failed");
                }
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = store.flush().await {
                    warn!(error = %e, "periodic flush failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LibraryType, MediaFileRecord, MediaType};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU64;
    use std::sync::Mutex;
    use tokio::sync::Mutex as AsyncMutex;

    struct InMemoryFileStore {
        records: AsyncMutex<Vec<MediaFileRecord>>,
    }

    #[async_trait]
    impl FileRecordStore for InMemoryFileStore {
        async fn enqueue(&self, record: MediaFileRecord, _batch_size: usize) -> crate::error::Result<()> {
            self.records.lock().await.push(record);
            Ok(())
        }
        async fn touch_last_seen(&self, _id: Uuid, _at: DateTime<Utc>) -> crate::error::Result<()> {
            Ok(())
        }
        async fn flush(&self) -> crate::error::Result<usize> {
            Ok(0)
        }
        async fn reload(&self, id: Uuid) -> crate::error::Result<Option<MediaFileRecord>> {
            Ok(self.records.lock().await.iter().find(|r| r.id == id).cloned())
        }
        async fn find_by_path(&self, library_id: Uuid, path: &str) -> crate::error::Result<Option<MediaFileRecord>> {
            Ok(self
                .records
                .lock()
                .await
                .iter()
                .find(|r| r.library_id == library_id && r.path == path)
                .cloned())
        }
        async fn list_for_library(&self, library_id: Uuid) -> crate::error::Result<Vec<MediaFileRecord>> {
            Ok(self.records.lock().await.iter().filter(|r| r.library_id == library_id).cloned().collect())
        }
        async fn prune_stale(&self, _library_id: Uuid, _scan_started_at: DateTime<Utc>) -> crate::error::Result<u64> {
            Ok(0)
        }
    }

    struct InMemoryJobStore {
        statuses: Mutex<Vec<(Uuid, ScanStatus)>>,
    }

    #[async_trait]
    impl JobStore for InMemoryJobStore {
        async fn insert_job(&self, _job: &ScanJob) -> crate::error::Result<()> {
            Ok(())
        }
        async fn get_job(&self, _job_id: Uuid) -> crate::error::Result<Option<ScanJob>> {
            Ok(None)
        }
        async fn get_jobs_for_library(&self, _library_id: Uuid) -> crate::error::Result<Vec<ScanJob>> {
            Ok(Vec::new())
        }
        async fn list_jobs_by_status(&self, _status: ScanStatus) -> crate::error::Result<Vec<ScanJob>> {
            Ok(Vec::new())
        }
        async fn update_status(
            &self,
            job_id: Uuid,
            status: ScanStatus,
            _explicit_pause: bool,
            _status_message: Option<String>,
            _error_message: Option<String>,
        ) -> crate::error::Result<()> {
            self.statuses.lock().unwrap().push((job_id, status));
            Ok(())
        }
        async fn update_progress_if_running(
            &self,
            _job_id: Uuid,
            _files_found: i64,
            _files_processed: i64,
            _files_skipped: i64,
            _bytes_processed: i64,
            _progress_pct: f32,
        ) -> crate::error::Result<bool> {
            Ok(true)
        }
        async fn finalize(&self, job_id: Uuid, status: ScanStatus, _completed_at: DateTime<Utc>) -> crate::error::Result<()> {
            self.statuses.lock().unwrap().push((job_id, status));
            Ok(())
        }
        async fn delete_job(&self, _job_id: Uuid) -> crate::error::Result<()> {
            Ok(())
        }
    }

    struct NullEventBus {
        count: AtomicU64,
    }

    #[async_trait]
    impl EventBus for NullEventBus {
        async fn publish(&self, _event: ScanEvent) {
            self.count.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn test_library(root: &std::path::Path) -> Library {
        Library {
            id: Uuid::new_v4(),
            root_path: root.to_string_lossy().to_string(),
            library_type: LibraryType::Music,
        }
    }

    #[tokio::test]
    async fn scan_of_a_small_tree_completes_and_persists_records() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp3"), vec![0u8; 4096]).unwrap();
        std::fs::write(dir.path().join("b.flac"), vec![0u8; 4096]).unwrap();

        let library = test_library(dir.path());
        let mut settings = ScannerSettings::default();
        settings.queue_close_grace_secs = 0;
        settings.queue_close_confirm_ticks = 1;
        settings.min_workers = 1;
        settings.max_workers = 2;

        let job = ScanJob::new(library.id);
        let job_store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore { statuses: Mutex::new(Vec::new()) });
        let file_store: Arc<dyn FileRecordStore> = Arc::new(InMemoryFileStore { records: AsyncMutex::new(Vec::new()) });
        let event_bus: Arc<dyn EventBus> = Arc::new(NullEventBus { count: AtomicU64::new(0) });

        job_store.insert_job(&job).await.unwrap();
        let scanner = LibraryScanner::start(library, &job, job_store, file_store.clone(), event_bus, Vec::new(), Vec::new(), settings);

        tokio::time::timeout(Duration::from_secs(10), scanner.clone().run()).await.unwrap();

        assert_eq!(scanner.status().await, ScanStatus::Completed);
        let records = file_store.list_for_library(scanner.library_id()).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().any(|r| r.media_type == MediaType::Track));
    }

    #[test]
    fn maps_each_throttle_event_to_its_own_scan_event_kind() {
        use crate::throttle::ThrottleEvent;
        use crate::types::Limits;

        let (kind, _) = super::map_throttle_event(ThrottleEvent::EmergencyBrake);
        assert_eq!(kind, ScanEventKind::EmergencyBrake);

        let (kind, _) = super::map_throttle_event(ThrottleEvent::EmergencyBrakeReleased);
        assert_eq!(kind, ScanEventKind::EmergencyBrakeReleased);

        let (kind, payload) = super::map_throttle_event(ThrottleEvent::Adjusted(Limits {
            worker_count: 4,
            batch_size: 100,
            delay: Duration::from_millis(50),
            network_bandwidth_cap_mbps: 80.0,
            io_throttle_ratio: 1.0,
            enabled: true,
        }));
        assert_eq!(kind, ScanEventKind::ThrottleAdjusted);
        assert_eq!(payload["worker_count"], 4);
    }

    #[tokio::test]
    async fn forward_throttle_events_exits_cleanly_on_cancellation() {
        let throttler = Throttler::new(ScannerSettings::default());
        let event_bus: Arc<dyn EventBus> = Arc::new(NullEventBus { count: AtomicU64::new(0) });
        let cancel = CancelToken::new();
        cancel.cancel();

        tokio::time::timeout(
            Duration::from_secs(1),
            super::forward_throttle_events(throttler, event_bus, Uuid::new_v4(), Uuid::new_v4(), cancel),
        )
        .await
        .unwrap();
    }
}
