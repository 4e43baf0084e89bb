//! Directory worker pool (C6): walks a library tree, filtering and cache-screening each
//! entry, feeding surviving files to the file pool and sub-directories back to its own
//! queue. Worker-loop shape follows `ferrex-core/src/streaming_scanner.rs`'s
//! `folder_scan_worker` (N tasks sharing one `Arc<Mutex<Receiver>>>`); the bounded
//! re-enqueue-into-self-queue idiom for recursive traversal is this crate's own, since the
//! teacher's folder discovery is a single non-recursive walk rather than a worker-fed queue.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::cache::FileCache;
use crate::cancel::CancelToken;
use crate::config::ScannerSettings;
use crate::filters;
use crate::progress::ProgressEstimator;
use crate::storage::FileRecordStore;
use crate::throttle::Throttler;
use crate::types::{DirectoryWorkItem, EntryMeta, FileWorkItem, Library};

pub struct DirectoryPool {
    dir_tx: mpsc::Sender<DirectoryWorkItem>,
    dir_rx: Mutex<Option<mpsc::Receiver<DirectoryWorkItem>>>,
    file_tx: mpsc::Sender<FileWorkItem>,
    active_workers: Arc<AtomicUsize>,
    settings: ScannerSettings,
    library: Library,
}

impl DirectoryPool {
    pub fn new(
        library: Library,
        file_tx: mpsc::Sender<FileWorkItem>,
        queue_capacity: usize,
        settings: ScannerSettings,
    ) -> Self {
        let (dir_tx, dir_rx) = mpsc::channel(queue_capacity.max(1));
        Self {
            dir_tx,
            dir_rx: Mutex::new(Some(dir_rx)),
            file_tx,
            active_workers: Arc::new(AtomicUsize::new(0)),
            settings,
            library,
        }
    }

    /// Seeds the scan root. Called once by the scanner before spawning workers.
    pub async fn seed_root(&self, root_path: impl Into<std::path::PathBuf>) -> bool {
        self.dir_tx
            .send(DirectoryWorkItem {
                path: root_path.into(),
                library_id: self.library.id,
                depth: 0,
            })
            .await
            .is_ok()
    }

    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::Acquire)
    }

    pub fn queue_len(&self) -> usize {
        self.dir_tx.max_capacity() - self.dir_tx.capacity()
    }

    pub fn is_drained(&self) -> bool {
        self.queue_len() == 0 && self.active_workers() == 0
    }

    /// Spawns `count` worker loops. Each pulls from the shared receiver until the channel
    /// closes (every sender, including every worker's clone, dropped).
    pub fn spawn(
        self: &Arc<Self>,
        count: usize,
        cache: Arc<FileCache>,
        store: Arc<dyn FileRecordStore>,
        progress: Arc<ProgressEstimator>,
        throttler: Arc<Throttler>,
        cancel: CancelToken,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        let rx = {
            let mut guard = self.dir_rx.try_lock().expect("directory receiver taken twice");
            guard.take().expect("directory pool spawned twice")
        };
        let rx = Arc::new(Mutex::new(rx));

        (0..count.max(1))
            .map(|worker_id| {
                let pool = self.clone();
                let rx = rx.clone();
                let cache = cache.clone();
                let store = store.clone();
                let progress = progress.clone();
                let throttler = throttler.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    pool.worker_loop(worker_id, rx, cache, store, progress, throttler, cancel).await;
                })
            })
            .collect()
    }

    async fn worker_loop(
        self: Arc<Self>,
        worker_id: usize,
        rx: Arc<Mutex<mpsc::Receiver<DirectoryWorkItem>>>,
        cache: Arc<FileCache>,
        store: Arc<dyn FileRecordStore>,
        progress: Arc<ProgressEstimator>,
        throttler: Arc<Throttler>,
        cancel: CancelToken,
    ) {
        debug!(worker_id, "directory worker started");
        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => break,
                item = async {
                    let mut guard = rx.lock().await;
                    guard.recv().await
                } => item,
            };

            let Some(item) = item else { break };
            self.active_workers.fetch_add(1, Ordering::AcqRel);
            self.process_directory(item, &cache, &store, &progress, &throttler, &cancel).await;
            self.active_workers.fetch_sub(1, Ordering::AcqRel);
        }
        debug!(worker_id, "directory worker stopped");
    }

    async fn process_directory(
        &self,
        item: DirectoryWorkItem,
        cache: &Arc<FileCache>,
        store: &Arc<dyn FileRecordStore>,
        progress: &Arc<ProgressEstimator>,
        throttler: &Arc<Throttler>,
        cancel: &CancelToken,
    ) {
        if item.depth > self.settings.directory_depth_limit {
            warn!(path = %item.path.display(), "directory depth limit exceeded, skipping");
            return;
        }

        let entries = match read_dir_with_retry(&item.path).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %item.path.display(), error = %e, "failed to read directory after retry");
                progress.record_error();
                return;
            }
        };

        for entry in entries {
            if cancel.is_cancelled() {
                return;
            }

            let path = entry.path();
            let Ok(file_type) = entry.file_type() else { continue };

            if file_type.is_dir() {
                self.handle_subdirectory(&path, item.library_id, item.depth).await;
            } else if file_type.is_file() {
                self.handle_file(&entry, &path, cache, store, progress, throttler, cancel).await;
            }
        }
    }

    async fn handle_subdirectory(&self, path: &std::path::Path, library_id: uuid::Uuid, depth: usize) {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else { return };
        if filters::is_blocked_directory(name) {
            return;
        }

        let sub = DirectoryWorkItem {
            path: path.to_path_buf(),
            library_id,
            depth: depth + 1,
        };
        // A closed channel means teardown is underway; nothing more to do.
        let _ = self.dir_tx.send(sub).await;
    }

    async fn handle_file(
        &self,
        entry: &std::fs::DirEntry,
        path: &std::path::Path,
        cache: &Arc<FileCache>,
        store: &Arc<dyn FileRecordStore>,
        progress: &Arc<ProgressEstimator>,
        throttler: &Arc<Throttler>,
        cancel: &CancelToken,
    ) {
        let Ok(meta) = entry.metadata() else { return };
        let size = meta.len();

        if !filters::should_enqueue_file(path, size, self.settings.min_file_size_bytes) {
            return;
        }

        let mtime: chrono::DateTime<chrono::Utc> = meta
            .modified()
            .map(chrono::DateTime::<chrono::Utc>::from)
            .unwrap_or_else(|_| chrono::Utc::now());

        progress.add_total(1, size);

        if let Some(cached) = cache.lookup_unchanged(path, size, mtime) {
            // Cache hit fast path: skip hashing and re-processing, just bump last_seen.
            if let Err(e) = store.touch_last_seen(cached.media_file_id, chrono::Utc::now()).await {
                warn!(path = %path.display(), error = %e, "failed to touch last_seen on cache hit");
            }
            progress.record_processed(1, size);
            return;
        }

        let work_item = FileWorkItem {
            path: path.to_path_buf(),
            meta: EntryMeta {
                size,
                mtime: meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH),
                #[cfg(unix)]
                mode: {
                    use std::os::unix::fs::PermissionsExt;
                    meta.permissions().mode()
                },
            },
            library_id: self.library.id,
        };

        let timeout = self.settings.file_enqueue_timeout();
        throttler.apply_delay().await;

        tokio::select! {
            _ = cancel.cancelled() => {}
            result = tokio::time::timeout(timeout, self.file_tx.send(work_item)) => {
                match result {
                    Ok(Ok(())) => {}
                    _ => {
                        // Either the send timed out (queue saturated past the enqueue
                        // budget) or the channel closed; both count as skipped.
                        progress.record_skipped(1);
                    }
                }
            }
        }
    }
}

/// One retry on a short delay to absorb transient network-filesystem hiccups (spec §5,
/// §4.6 "Directory reads retry once on error").
async fn read_dir_with_retry(path: &std::path::Path) -> std::io::Result<Vec<std::fs::DirEntry>> {
    match std::fs::read_dir(path) {
        Ok(entries) => Ok(entries.filter_map(Result::ok).collect()),
        Err(_) => {
            tokio::time::sleep(Duration::from_millis(200)).await;
            std::fs::read_dir(path).map(|entries| entries.filter_map(Result::ok).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LibraryType;
    use std::sync::atomic::AtomicU64;

    fn test_library() -> Library {
        Library {
            id: uuid::Uuid::new_v4(),
            root_path: "/tmp".to_string(),
            library_type: LibraryType::Music,
        }
    }

    #[tokio::test]
    async fn seed_root_enqueues_depth_zero() {
        let (file_tx, _file_rx) = mpsc::channel(16);
        let pool = DirectoryPool::new(test_library(), file_tx, 16, ScannerSettings::default());
        assert!(pool.seed_root("/some/root").await);
        assert_eq!(pool.queue_len(), 1);
    }

    #[test]
    fn is_drained_true_when_empty_and_idle() {
        let (file_tx, _file_rx) = mpsc::channel(16);
        let pool = DirectoryPool::new(test_library(), file_tx, 16, ScannerSettings::default());
        assert!(pool.is_drained());
    }

    struct NoopStore {
        touched: AtomicU64,
    }

    #[async_trait::async_trait]
    impl FileRecordStore for NoopStore {
        async fn enqueue(&self, _record: crate::types::MediaFileRecord, _batch_size: usize) -> crate::error::Result<()> {
            Ok(())
        }
        async fn touch_last_seen(&self, _id: uuid::Uuid, _at: chrono::DateTime<chrono::Utc>) -> crate::error::Result<()> {
            self.touched.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        async fn flush(&self) -> crate::error::Result<usize> {
            Ok(0)
        }
        async fn reload(&self, _id: uuid::Uuid) -> crate::error::Result<Option<crate::types::MediaFileRecord>> {
            Ok(None)
        }
        async fn find_by_path(&self, _library_id: uuid::Uuid, _path: &str) -> crate::error::Result<Option<crate::types::MediaFileRecord>> {
            Ok(None)
        }
        async fn list_for_library(&self, _library_id: uuid::Uuid) -> crate::error::Result<Vec<crate::types::MediaFileRecord>> {
            Ok(Vec::new())
        }
        async fn prune_stale(&self, _library_id: uuid::Uuid, _scan_started_at: chrono::DateTime<chrono::Utc>) -> crate::error::Result<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn end_to_end_walk_discovers_and_enqueues_media_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp3"), vec![0u8; 2048]).unwrap();
        std::fs::write(dir.path().join("cover.jpg"), vec![0u8; 2048]).unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("b.flac"), vec![0u8; 4096]).unwrap();

        let (file_tx, mut file_rx) = mpsc::channel(16);
        let settings = ScannerSettings::default();
        let pool = Arc::new(DirectoryPool::new(test_library(), file_tx, 16, settings.clone()));
        pool.seed_root(dir.path()).await;

        let cache = Arc::new(FileCache::new(100, 0.01, 100));
        let store: Arc<dyn FileRecordStore> = Arc::new(NoopStore { touched: AtomicU64::new(0) });
        let progress = Arc::new(ProgressEstimator::new());
        let throttler = Throttler::new(settings);
        let cancel = CancelToken::new();

        let handles = pool.spawn(2, cache, store, progress.clone(), throttler, cancel.clone());

        let mut found = Vec::new();
        let drain = async {
            while let Some(item) = file_rx.recv().await {
                found.push(item.path);
                if found.len() == 2 {
                    break;
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), drain).await.unwrap();

        cancel.cancel();
        for h in handles {
            let _ = h.await;
        }

        assert_eq!(found.len(), 2);
        assert!(found.iter().any(|p| p.ends_with("a.mp3")));
        assert!(found.iter().any(|p| p.ends_with("b.flac")));
    }
}
