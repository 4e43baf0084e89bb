//! Scan manager (C11): registry of active scanners keyed by job id, enforcing at most one
//! running scan per library and reconciling in-memory state against the persisted
//! `scan_jobs` table. Grounded on `ferrex-core/src/streaming_scanner.rs`'s handle-registry
//! role and `ferrex-core/src/database/traits.rs`'s `ScanState`/`ScanStatus` shapes, adapted
//! from a single global handle to a full job-keyed registry plus crash recovery (spec
//! §4.11) since the teacher has no equivalent orphan-reconciliation pass.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use scanhive_contracts::{EventBus, FileHandlerPlugin, ScannerHook};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::config::ScannerSettings;
use crate::error::{Result, ScanError};
use crate::scanner::LibraryScanner;
use crate::storage::{FileRecordStore, JobStore, LibraryStore};
use crate::types::{ScanJob, ScanStatus};

type ScannerRegistry = Arc<RwLock<HashMap<Uuid, Arc<LibraryScanner>>>>;

/// Builds a fresh `FileRecordStore` for each scan job. A scan manager is long-lived and
/// hosts many concurrent scans; each gets its own batch-persister buffer rather than
/// sharing one across unrelated libraries, so a slow flush on one job can't stall another.
pub type FileStoreFactory = dyn Fn() -> Arc<dyn FileRecordStore> + Send + Sync;

pub struct ScanManager {
    job_store: Arc<dyn JobStore>,
    library_store: Arc<dyn LibraryStore>,
    file_store_factory: Arc<FileStoreFactory>,
    event_bus: Arc<dyn EventBus>,
    hooks: Vec<Arc<dyn ScannerHook>>,
    plugins: Vec<Arc<dyn FileHandlerPlugin>>,
    settings: ScannerSettings,
    scanners: ScannerRegistry,
    shutdown: CancelToken,
}

impl ScanManager {
    /// Constructs the manager and immediately runs crash recovery (spec §4.11
    /// "Crash recovery"): orphaned `running` rows are demoted, duplicate active rows per
    /// library are deduplicated, and sufficiently-progressed paused rows are auto-resumed.
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        job_store: Arc<dyn JobStore>,
        library_store: Arc<dyn LibraryStore>,
        file_store_factory: Arc<FileStoreFactory>,
        event_bus: Arc<dyn EventBus>,
        hooks: Vec<Arc<dyn ScannerHook>>,
        plugins: Vec<Arc<dyn FileHandlerPlugin>>,
        settings: ScannerSettings,
    ) -> Result<Arc<Self>> {
        let manager = Arc::new(Self {
            job_store,
            library_store,
            file_store_factory,
            event_bus,
            hooks,
            plugins,
            settings,
            scanners: Arc::new(RwLock::new(HashMap::new())),
            shutdown: CancelToken::new(),
        });
        manager.recover_orphaned_jobs().await?;
        Ok(manager)
    }

    /// Spawns the ~30s background reconciler (spec §4.10 "State synchronizer"). Returned
    /// handle is for the caller's own shutdown bookkeeping; the task itself stops when
    /// `shutdown()` is called.
    pub fn spawn_state_synchronizer(&self) -> tokio::task::JoinHandle<()> {
        let job_store = self.job_store.clone();
        let scanners = self.scanners.clone();
        let interval = self.settings.state_sync_interval();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = reconcile_state(&job_store, &scanners).await {
                            warn!(error = %e, "state reconciliation failed");
                        }
                    }
                }
            }
        })
    }

    /// Validates no other scan is active for the library, creates the job row, launches
    /// the scanner in the background, and returns the freshly-inserted (still `Pending`)
    /// row — the scanner flips it to `Running` itself once its task starts.
    pub async fn start_scan(&self, library_id: Uuid) -> Result<ScanJob> {
        if self.has_running_job(library_id).await? {
            return Err(ScanError::Fatal(format!(
                "a scan is already running for library {library_id}"
            )));
        }
        let library = self
            .library_store
            .get_library(library_id)
            .await?
            .ok_or_else(|| ScanError::Fatal(format!("library {library_id} not found")))?;

        let job = ScanJob::new(library_id);
        self.job_store.insert_job(&job).await?;

        let scanner = LibraryScanner::start(
            library,
            &job,
            self.job_store.clone(),
            (self.file_store_factory)(),
            self.event_bus.clone(),
            self.hooks.clone(),
            self.plugins.clone(),
            self.settings.clone(),
        );
        self.track(scanner).await;
        Ok(job)
    }

    /// If a scanner is registered for `job_id`, pauses it (which itself persists `paused`
    /// and cancels the pipeline). Otherwise performs the no-op transition of a
    /// running-but-unregistered row to `paused` directly.
    pub async fn stop_scan(&self, job_id: Uuid) -> Result<()> {
        let scanner = self.scanners.read().await.get(&job_id).cloned();
        match scanner {
            Some(scanner) => {
                scanner.pause().await;
                Ok(())
            }
            None => {
                if let Some(job) = self.job_store.get_job(job_id).await? {
                    if job.status == ScanStatus::Running {
                        self.job_store
                            .update_status(
                                job_id,
                                ScanStatus::Paused,
                                true,
                                Some("paused (no active in-memory scanner)".to_string()),
                                None,
                            )
                            .await?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Refuses if `job_id` is already registered; otherwise reconstructs the scanner from
    /// the persisted (paused) row and launches it.
    pub async fn resume_scan(&self, job_id: Uuid) -> Result<()> {
        if self.scanners.read().await.contains_key(&job_id) {
            return Err(ScanError::Fatal(format!(
                "job {job_id} already has an active scanner"
            )));
        }
        let job = self
            .job_store
            .get_job(job_id)
            .await?
            .ok_or_else(|| ScanError::Fatal(format!("job {job_id} not found")))?;
        if job.status != ScanStatus::Paused {
            return Err(ScanError::Fatal(format!(
                "job {job_id} is not paused (status: {:?})",
                job.status
            )));
        }
        let library = self
            .library_store
            .get_library(job.library_id)
            .await?
            .ok_or_else(|| ScanError::Fatal(format!("library {} not found", job.library_id)))?;

        let scanner = LibraryScanner::resume(
            library,
            &job,
            self.job_store.clone(),
            (self.file_store_factory)(),
            self.event_bus.clone(),
            self.hooks.clone(),
            self.plugins.clone(),
            self.settings.clone(),
        );
        self.track(scanner).await;
        Ok(())
    }

    /// Like `stop_scan`, but also removes the in-memory entry (rather than letting the
    /// scanner's own task clean up on drain) and marks the job terminally failed.
    pub async fn terminate_scan(&self, job_id: Uuid) -> Result<()> {
        let scanner = self.scanners.write().await.remove(&job_id);
        if let Some(scanner) = scanner {
            scanner.pause().await;
        }
        self.job_store
            .update_status(job_id, ScanStatus::Failed, true, Some("terminated".to_string()), None)
            .await?;
        self.job_store.finalize(job_id, ScanStatus::Failed, Utc::now()).await?;
        Ok(())
    }

    /// Pauses every registered scanner; used on process shutdown.
    pub async fn cancel_all_scans(&self) {
        let scanners: Vec<Arc<LibraryScanner>> = self.scanners.read().await.values().cloned().collect();
        for scanner in scanners {
            scanner.pause().await;
        }
    }

    /// Stops the state synchronizer and pauses every active scan. Intended for the host
    /// process's own shutdown sequence.
    pub async fn shutdown(&self) {
        self.cancel_all_scans().await;
        self.shutdown.cancel();
    }

    /// Pause-then-delete every scan row for a library being removed.
    pub async fn cleanup_jobs_by_library(&self, library_id: Uuid) -> Result<u64> {
        let jobs = self.job_store.get_jobs_for_library(library_id).await?;
        for job in &jobs {
            self.cleanup_single_job(job.id).await?;
        }
        Ok(jobs.len() as u64)
    }

    /// Pause-then-delete every job row whose library no longer exists.
    pub async fn cleanup_orphaned_jobs(&self) -> Result<u64> {
        let mut removed = 0u64;
        for status in ALL_STATUSES {
            for job in self.job_store.list_jobs_by_status(*status).await? {
                if self.library_store.get_library(job.library_id).await?.is_none() {
                    self.cleanup_single_job(job.id).await?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn cleanup_single_job(&self, job_id: Uuid) -> Result<()> {
        if let Some(scanner) = self.scanners.write().await.remove(&job_id) {
            scanner.pause().await;
        }
        self.job_store.delete_job(job_id).await
    }

    /// Resolves the current or most-recent job for `library_id` and pauses it if active.
    /// Callers never need to know the job id.
    pub async fn pause_scan_by_library(&self, library_id: Uuid) -> Result<()> {
        match self.current_job(library_id).await? {
            Some(job) if job.status == ScanStatus::Running => self.stop_scan(job.id).await,
            _ => Ok(()),
        }
    }

    /// Resumes the most recent paused job for `library_id`, or auto-starts a fresh scan if
    /// no pausable job exists.
    pub async fn resume_scan_by_library(&self, library_id: Uuid) -> Result<ScanJob> {
        let jobs = self.job_store.get_jobs_for_library(library_id).await?;
        if let Some(job) = jobs.into_iter().find(|j| j.status == ScanStatus::Paused) {
            self.resume_scan(job.id).await?;
            return self
                .job_store
                .get_job(job.id)
                .await?
                .ok_or_else(|| ScanError::Fatal(format!("job {} vanished after resume", job.id)));
        }
        self.start_scan(library_id).await
    }

    pub async fn get_library_scan_status(&self, library_id: Uuid) -> Result<Option<ScanJob>> {
        self.current_job(library_id).await
    }

    async fn current_job(&self, library_id: Uuid) -> Result<Option<ScanJob>> {
        let jobs = self.job_store.get_jobs_for_library(library_id).await?;
        Ok(jobs.into_iter().next())
    }

    async fn has_running_job(&self, library_id: Uuid) -> Result<bool> {
        let jobs = self.job_store.get_jobs_for_library(library_id).await?;
        Ok(jobs.iter().any(|j| j.status == ScanStatus::Running))
    }

    /// Registers the scanner, spawns its run loop, and removes the registry entry once
    /// that loop returns (completed, failed, or drained after a pause).
    async fn track(&self, scanner: Arc<LibraryScanner>) {
        let job_id = scanner.job_id();
        self.scanners.write().await.insert(job_id, scanner.clone());

        let registry = self.scanners.clone();
        tokio::spawn(async move {
            scanner.run().await;
            registry.write().await.remove(&job_id);
        });
    }

    async fn recover_orphaned_jobs(&self) -> Result<()> {
        self.demote_orphaned_running_jobs().await?;
        self.dedupe_active_jobs_per_library().await?;
        self.auto_resume_progressed_jobs().await?;
        Ok(())
    }

    /// Rows left `running` by a prior process (the registry is empty right after
    /// construction, so every running row at this point is, by definition, orphaned).
    /// Surviving libraries are demoted to `paused`; rows whose library vanished are
    /// marked `failed`.
    async fn demote_orphaned_running_jobs(&self) -> Result<()> {
        let running = self.job_store.list_jobs_by_status(ScanStatus::Running).await?;
        for job in running {
            match self.library_store.get_library(job.library_id).await? {
                None => {
                    self.job_store
                        .update_status(
                            job.id,
                            ScanStatus::Failed,
                            false,
                            None,
                            Some("library no longer exists".to_string()),
                        )
                        .await?;
                    self.job_store.finalize(job.id, ScanStatus::Failed, Utc::now()).await?;
                }
                Some(_) => {
                    self.job_store
                        .update_status(
                            job.id,
                            ScanStatus::Paused,
                            true,
                            Some("recovered after unclean shutdown".to_string()),
                            None,
                        )
                        .await?;
                    info!(job_id = %job.id, library_id = %job.library_id, "demoted orphaned running job to paused");
                }
            }
        }
        Ok(())
    }

    /// Keeps the best candidate among multiple non-terminal rows for the same library: a
    /// running row wins, else the most-progressed paused row, else the newest.
    async fn dedupe_active_jobs_per_library(&self) -> Result<()> {
        let mut by_library: HashMap<Uuid, Vec<ScanJob>> = HashMap::new();
        for status in [ScanStatus::Running, ScanStatus::Paused] {
            for job in self.job_store.list_jobs_by_status(status).await? {
                by_library.entry(job.library_id).or_default().push(job);
            }
        }

        for (library_id, mut jobs) in by_library {
            if jobs.len() <= 1 {
                continue;
            }
            jobs.sort_by(|a, b| candidate_rank(b).cmp(&candidate_rank(a)));
            let keep = jobs.remove(0);
            info!(
                library_id = %library_id,
                kept_job = %keep.id,
                removed = jobs.len(),
                "deduplicated duplicate active scan jobs for library"
            );
            for job in jobs {
                self.job_store.delete_job(job.id).await?;
            }
        }
        Ok(())
    }

    /// Paused rows whose processed-files count clears the auto-resume threshold (spec §9
    /// open question: ≥10 files or ≥1% of found, both configurable) are resumed without
    /// waiting for an operator.
    async fn auto_resume_progressed_jobs(&self) -> Result<()> {
        let paused = self.job_store.list_jobs_by_status(ScanStatus::Paused).await?;
        for job in paused {
            if meets_auto_resume_threshold(&job, &self.settings) {
                if let Err(e) = self.resume_scan(job.id).await {
                    warn!(job_id = %job.id, error = %e, "auto-resume of recovered job failed");
                }
            }
        }
        Ok(())
    }
}

const ALL_STATUSES: &[ScanStatus] = &[
    ScanStatus::Pending,
    ScanStatus::Running,
    ScanStatus::Paused,
    ScanStatus::Completed,
    ScanStatus::Failed,
];

fn candidate_rank(job: &ScanJob) -> (u8, i64, chrono::DateTime<Utc>) {
    let running_rank = if job.status == ScanStatus::Running { 1 } else { 0 };
    (running_rank, job.files_processed, job.started_at)
}

fn meets_auto_resume_threshold(job: &ScanJob, settings: &ScannerSettings) -> bool {
    if job.files_processed as u64 >= settings.auto_resume_min_files {
        return true;
    }
    if job.files_found > 0 {
        let fraction = job.files_processed as f64 / job.files_found as f64;
        if fraction >= settings.auto_resume_min_fraction {
            return true;
        }
    }
    false
}

/// Free function (rather than a method) so `spawn_state_synchronizer` can clone just the
/// two `Arc` fields it needs into a `'static` task instead of requiring `Arc<ScanManager>`.
async fn reconcile_state(job_store: &Arc<dyn JobStore>, scanners: &ScannerRegistry) -> Result<()> {
    let running_rows = job_store.list_jobs_by_status(ScanStatus::Running).await?;
    let registered: std::collections::HashSet<Uuid> = scanners.read().await.keys().copied().collect();

    for job in &running_rows {
        if !registered.contains(&job.id) {
            warn!(job_id = %job.id, "demoting running job row with no in-memory scanner");
            job_store
                .update_status(
                    job.id,
                    ScanStatus::Paused,
                    true,
                    Some("demoted: scanner missing during reconciliation".to_string()),
                    None,
                )
                .await?;
        }
    }

    let running_ids: std::collections::HashSet<Uuid> = running_rows.iter().map(|j| j.id).collect();
    let registered_ids: Vec<Uuid> = scanners.read().await.keys().copied().collect();
    let mut to_evict = Vec::new();
    for job_id in registered_ids {
        if running_ids.contains(&job_id) {
            continue;
        }
        match job_store.get_job(job_id).await? {
            Some(job) if job.status == ScanStatus::Running => {}
            _ => to_evict.push(job_id),
        }
    }
    if !to_evict.is_empty() {
        let mut scanners = scanners.write().await;
        for job_id in to_evict {
            warn!(job_id = %job_id, "evicting in-memory scanner whose row is missing or not running");
            scanners.remove(&job_id);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Library, LibraryType, MediaFileRecord};
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Mutex as AsyncMutex;

    #[derive(Default)]
    struct InMemoryJobStore {
        jobs: StdMutex<HashMap<Uuid, ScanJob>>,
    }

    #[async_trait]
    impl JobStore for InMemoryJobStore {
        async fn insert_job(&self, job: &ScanJob) -> Result<()> {
            self.jobs.lock().unwrap().insert(job.id, job.clone());
            Ok(())
        }
        async fn get_job(&self, job_id: Uuid) -> Result<Option<ScanJob>> {
            Ok(self.jobs.lock().unwrap().get(&job_id).cloned())
        }
        async fn get_jobs_for_library(&self, library_id: Uuid) -> Result<Vec<ScanJob>> {
            let mut jobs: Vec<ScanJob> = self
                .jobs
                .lock()
                .unwrap()
                .values()
                .filter(|j| j.library_id == library_id)
                .cloned()
                .collect();
            jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            Ok(jobs)
        }
        async fn list_jobs_by_status(&self, status: ScanStatus) -> Result<Vec<ScanJob>> {
            Ok(self.jobs.lock().unwrap().values().filter(|j| j.status == status).cloned().collect())
        }
        async fn update_status(
            &self,
            job_id: Uuid,
            status: ScanStatus,
            explicit_pause: bool,
            status_message: Option<String>,
            error_message: Option<String>,
        ) -> Result<()> {
            if let Some(job) = self.jobs.lock().unwrap().get_mut(&job_id) {
                job.status = status;
                job.explicit_pause = explicit_pause;
                job.status_message = status_message;
                job.error_message = error_message;
                job.updated_at = Utc::now();
            }
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
        ) -> Result<bool> {
            Ok(true)
        }
        async fn finalize(&self, job_id: Uuid, status: ScanStatus, completed_at: DateTime<Utc>) -> Result<()> {
            if let Some(job) = self.jobs.lock().unwrap().get_mut(&job_id) {
                job.status = status;
                job.completed_at = Some(completed_at);
            }
            Ok(())
        }
        async fn delete_job(&self, job_id: Uuid) -> Result<()> {
            self.jobs.lock().unwrap().remove(&job_id);
            Ok(())
        }
    }

    #[derive(Default)]
    struct InMemoryLibraryStore {
        libraries: StdMutex<HashMap<Uuid, Library>>,
    }

    #[async_trait]
    impl LibraryStore for InMemoryLibraryStore {
        async fn get_library(&self, library_id: Uuid) -> Result<Option<Library>> {
            Ok(self.libraries.lock().unwrap().get(&library_id).cloned())
        }
    }

    #[derive(Default)]
    struct NullFileStore {
        records: AsyncMutex<Vec<MediaFileRecord>>,
    }

    #[async_trait]
    impl FileRecordStore for NullFileStore {
        async fn enqueue(&self, record: MediaFileRecord, _batch_size: usize) -> Result<()> {
            self.records.lock().await.push(record);
            Ok(())
        }
        async fn touch_last_seen(&self, _media_file_id: Uuid, _at: DateTime<Utc>) -> Result<()> {
            Ok(())
        }
        async fn flush(&self) -> Result<usize> {
            Ok(0)
        }
        async fn reload(&self, _media_file_id: Uuid) -> Result<Option<MediaFileRecord>> {
            Ok(None)
        }
        async fn find_by_path(&self, _library_id: Uuid, _path: &str) -> Result<Option<MediaFileRecord>> {
            Ok(None)
        }
        async fn list_for_library(&self, _library_id: Uuid) -> Result<Vec<MediaFileRecord>> {
            Ok(Vec::new())
        }
        async fn prune_stale(&self, _library_id: Uuid, _scan_started_at: DateTime<Utc>) -> Result<u64> {
            Ok(0)
        }
    }

    struct NullEventBus;

    #[async_trait]
    impl EventBus for NullEventBus {
        async fn publish(&self, _event: scanhive_contracts::ScanEvent) {}
    }

    fn settings_for_tests() -> ScannerSettings {
        let mut settings = ScannerSettings::default();
        settings.queue_close_grace_secs = 0;
        settings.queue_close_confirm_ticks = 1;
        settings.min_workers = 1;
        settings.max_workers = 1;
        settings
    }

    async fn build_manager(
        jobs: Arc<InMemoryJobStore>,
        libraries: Arc<InMemoryLibraryStore>,
    ) -> Arc<ScanManager> {
        ScanManager::new(
            jobs,
            libraries,
            Arc::new(|| Arc::new(NullFileStore::default()) as Arc<dyn FileRecordStore>),
            Arc::new(NullEventBus),
            Vec::new(),
            Vec::new(),
            settings_for_tests(),
        )
        .await
        .unwrap()
    }

    fn test_library(root: &std::path::Path) -> Library {
        Library {
            id: Uuid::new_v4(),
            root_path: root.to_string_lossy().to_string(),
            library_type: LibraryType::Music,
        }
    }

    #[tokio::test]
    async fn start_scan_rejects_a_second_run_for_the_same_library() {
        let dir = tempfile::tempdir().unwrap();
        let library = test_library(dir.path());
        let jobs = Arc::new(InMemoryJobStore::default());
        let libraries = Arc::new(InMemoryLibraryStore::default());
        libraries.libraries.lock().unwrap().insert(library.id, library.clone());

        let mut running = ScanJob::new(library.id);
        running.status = ScanStatus::Running;
        jobs.jobs.lock().unwrap().insert(running.id, running);

        let manager = build_manager(jobs, libraries).await;
        let result = manager.start_scan(library.id).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn recover_orphaned_jobs_demotes_running_rows_with_no_scanner() {
        let dir = tempfile::tempdir().unwrap();
        let library = test_library(dir.path());
        let jobs = Arc::new(InMemoryJobStore::default());
        let libraries = Arc::new(InMemoryLibraryStore::default());
        libraries.libraries.lock().unwrap().insert(library.id, library.clone());

        let mut orphan = ScanJob::new(library.id);
        orphan.status = ScanStatus::Running;
        orphan.files_processed = 0;
        let orphan_id = orphan.id;
        jobs.jobs.lock().unwrap().insert(orphan.id, orphan);

        let manager = build_manager(jobs.clone(), libraries).await;
        let row = manager.job_store_get_job_for_test(orphan_id).await;
        assert_eq!(row.status, ScanStatus::Paused);
        assert!(row.explicit_pause);

        // Low processed-files count: not auto-resumed, registry stays empty.
        drop(manager);
    }

    #[tokio::test]
    async fn recover_orphaned_jobs_fails_rows_whose_library_is_gone() {
        let jobs = Arc::new(InMemoryJobStore::default());
        let libraries = Arc::new(InMemoryLibraryStore::default());

        let mut orphan = ScanJob::new(Uuid::new_v4());
        orphan.status = ScanStatus::Running;
        let orphan_id = orphan.id;
        jobs.jobs.lock().unwrap().insert(orphan.id, orphan);

        let manager = build_manager(jobs.clone(), libraries).await;
        let row = manager.job_store_get_job_for_test(orphan_id).await;
        assert_eq!(row.status, ScanStatus::Failed);
    }

    #[tokio::test]
    async fn dedupe_keeps_most_progressed_paused_row() {
        let dir = tempfile::tempdir().unwrap();
        let library = test_library(dir.path());
        let jobs = Arc::new(InMemoryJobStore::default());
        let libraries = Arc::new(InMemoryLibraryStore::default());
        libraries.libraries.lock().unwrap().insert(library.id, library.clone());

        let mut ahead = ScanJob::new(library.id);
        ahead.status = ScanStatus::Paused;
        ahead.files_processed = 500;
        ahead.files_found = 1000;
        let ahead_id = ahead.id;

        let mut behind = ScanJob::new(library.id);
        behind.status = ScanStatus::Paused;
        behind.files_processed = 3;
        behind.files_found = 1000;
        let behind_id = behind.id;

        jobs.jobs.lock().unwrap().insert(ahead.id, ahead);
        jobs.jobs.lock().unwrap().insert(behind.id, behind);

        let manager = build_manager(jobs.clone(), libraries).await;
        assert!(jobs.jobs.lock().unwrap().contains_key(&ahead_id));
        assert!(!jobs.jobs.lock().unwrap().contains_key(&behind_id));
        drop(manager);
    }

    #[tokio::test]
    async fn resume_scan_by_library_auto_starts_when_nothing_pausable_exists() {
        let dir = tempfile::tempdir().unwrap();
        let library = test_library(dir.path());
        let jobs = Arc::new(InMemoryJobStore::default());
        let libraries = Arc::new(InMemoryLibraryStore::default());
        libraries.libraries.lock().unwrap().insert(library.id, library.clone());

        let manager = build_manager(jobs, libraries).await;
        let job = manager.resume_scan_by_library(library.id).await.unwrap();
        assert_eq!(job.status, ScanStatus::Pending);
        assert_eq!(job.library_id, library.id);
    }

    #[tokio::test]
    async fn terminate_scan_marks_the_job_failed() {
        let jobs = Arc::new(InMemoryJobStore::default());
        let libraries = Arc::new(InMemoryLibraryStore::default());
        let manager = build_manager(jobs.clone(), libraries).await;

        let job = ScanJob::new(Uuid::new_v4());
        jobs.insert_job(&job).await.unwrap();

        manager.terminate_scan(job.id).await.unwrap();
        let row = jobs.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(row.status, ScanStatus::Failed);
        assert!(row.completed_at.is_some());
    }

    impl ScanManager {
        /// Test helper: fetches a job row through the manager's own job store handle.
        async fn job_store_get_job_for_test(&self, job_id: Uuid) -> ScanJob {
            self.job_store.get_job(job_id).await.unwrap().unwrap()
        }
    }
}
