//! File worker pool (C7): hashes, classifies, persists, and runs extraction plugins
//! against each discovered file. Worker-loop shape mirrors the directory pool and
//! `ferrex-core/src/streaming_scanner.rs`'s `file_process_worker`/`process_single_file`
//! pair, adapted to this crate's content-hash-then-upsert-then-plugin-fanout sequence.

use std::sync::Arc;

use chrono::Utc;
use scanhive_contracts::{EventBus, FileHandlerPlugin, FileInfo, PluginContext};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::{CachedFileRecord, FileCache};
use crate::cancel::CancelToken;
use crate::config::ScannerSettings;
use crate::filters;
use crate::hashing;
use crate::progress::ProgressEstimator;
use crate::storage::FileRecordStore;
use crate::throttle::Throttler;
use crate::types::{FileWorkItem, Library, MediaFileRecord, ResultItem};

pub struct FilePool {
    file_rx: Mutex<Option<mpsc::Receiver<FileWorkItem>>>,
    result_tx: mpsc::Sender<ResultItem>,
    library: Library,
    job_id: Uuid,
    settings: ScannerSettings,
    plugins: Vec<Arc<dyn FileHandlerPlugin>>,
    event_bus: Arc<dyn EventBus>,
}

impl FilePool {
    pub fn new(
        file_rx: mpsc::Receiver<FileWorkItem>,
        result_tx: mpsc::Sender<ResultItem>,
        library: Library,
        job_id: Uuid,
        settings: ScannerSettings,
        plugins: Vec<Arc<dyn FileHandlerPlugin>>,
        event_bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            file_rx: Mutex::new(Some(file_rx)),
            result_tx,
            library,
            job_id,
            settings,
            plugins,
            event_bus,
        }
    }

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
            let mut guard = self.file_rx.try_lock().expect("file receiver taken twice");
            guard.take().expect("file pool spawned twice")
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
        rx: Arc<Mutex<mpsc::Receiver<FileWorkItem>>>,
        cache: Arc<FileCache>,
        store: Arc<dyn FileRecordStore>,
        progress: Arc<ProgressEstimator>,
        throttler: Arc<Throttler>,
        cancel: CancelToken,
    ) {
        debug!(worker_id, "file worker started");
        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => break,
                item = async {
                    let mut guard = rx.lock().await;
                    guard.recv().await
                } => item,
            };

            let Some(item) = item else { break };
            throttler.apply_delay().await;

            if let Err(e) = self.process_file(&item, &cache, &store, &progress, &cancel).await {
                warn!(path = %item.path.display(), error = %e, "file processing failed");
                progress.record_error();
                let _ = self.result_tx.send(ResultItem::failed(item.path.clone(), e.to_string())).await;
            }
        }
        debug!(worker_id, "file worker stopped");
    }

    async fn process_file(
        &self,
        item: &FileWorkItem,
        cache: &Arc<FileCache>,
        store: &Arc<dyn FileRecordStore>,
        progress: &Arc<ProgressEstimator>,
        cancel: &CancelToken,
    ) -> crate::error::Result<()> {
        let size = item.meta.size;
        let content_hash = hashing::content_hash(&item.path, size)?;

        let now = Utc::now();
        let record = MediaFileRecord {
            id: Uuid::new_v4(),
            library_id: item.library_id,
            path: item.path.to_string_lossy().to_string(),
            size_bytes: size as i64,
            content_hash: content_hash.clone(),
            container_format: filters::container_format_label(&item.path),
            media_type: filters::classify_media_type(self.library.library_type, &item.path),
            linked_entity_id: None,
            linked_entity_type: None,
            duration_secs: None,
            bitrate_kbps: None,
            codec: None,
            resolution: None,
            scan_job_id: self.job_id,
            last_seen_at: now,
            created_at: now,
            updated_at: now,
        };

        // Forced batch_size=1: the record must actually land before plugins that write
        // foreign keys against it run.
        store.enqueue(record.clone(), 1).await?;
        progress.record_processed(1, size);

        cache.remember(
            item.path.clone(),
            CachedFileRecord {
                media_file_id: record.id,
                size,
                mtime: mtime_to_utc(item.meta.mtime),
                content_hash,
            },
        );

        self.run_plugins(&record, item, cancel).await;

        // On a rescan the upsert keeps the existing row's id rather than the id this
        // worker generated, so the post-plugin reload must resolve by the unique
        // (library_id, path) key, not by `record.id`, or it silently misses the row
        // plugins actually wrote to.
        let final_record = store
            .find_by_path(record.library_id, &record.path)
            .await?
            .unwrap_or(record);
        let _ = self.result_tx.send(ResultItem::scanned(final_record, item.path.clone())).await;

        Ok(())
    }

    async fn run_plugins(&self, record: &MediaFileRecord, item: &FileWorkItem, cancel: &CancelToken) {
        let info = FileInfo {
            size: item.meta.size,
            modified: mtime_to_utc(item.meta.mtime),
            extension: item.path.extension().and_then(|e| e.to_str()).map(str::to_string),
        };

        let media_file_json = match serde_json::to_value(record) {
            Ok(v) => v,
            Err(e) => {
                warn!(path = %item.path.display(), error = %e, "failed to serialize record for plugin context");
                return;
            }
        };

        for plugin in &self.plugins {
            if !plugin.matches(&item.path, &info) {
                continue;
            }
            if cancel.is_cancelled() {
                return;
            }

            let ctx = PluginContext {
                job_id: self.job_id,
                library_id: item.library_id,
                media_file_id: record.id,
                media_file: media_file_json.clone(),
                event_bus: self.event_bus.clone(),
                plugin_id: plugin.name().to_string(),
            };

            let call = plugin.handle(&item.path, &ctx);
            let timeout = self.settings.plugin_timeout();

            tokio::select! {
                _ = cancel.cancelled() => return,
                result = tokio::time::timeout(timeout, call) => {
                    match result {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            warn!(plugin = plugin.name(), path = %item.path.display(), error = %e, "plugin failed");
                        }
                        Err(_) => {
                            warn!(plugin = plugin.name(), path = %item.path.display(), timeout_ms = timeout.as_millis() as u64, "plugin timed out");
                        }
                    }
                }
            }
        }
    }
}

fn mtime_to_utc(mtime: std::time::SystemTime) -> chrono::DateTime<Utc> {
    chrono::DateTime::<Utc>::from(mtime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntryMeta, LibraryType};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    struct RecordingStore {
        enqueued: Mutex<Vec<MediaFileRecord>>,
        next_id: AtomicU64,
    }

    impl RecordingStore {
        fn new() -> Self {
            Self { enqueued: Mutex::new(Vec::new()), next_id: AtomicU64::new(0) }
        }
    }

    #[async_trait::async_trait]
    impl FileRecordStore for RecordingStore {
        async fn enqueue(&self, record: MediaFileRecord, _batch_size: usize) -> crate::error::Result<()> {
            self.next_id.fetch_add(1, Ordering::Relaxed);
            self.enqueued.lock().await.push(record);
            Ok(())
        }
        async fn touch_last_seen(&self, _id: Uuid, _at: chrono::DateTime<Utc>) -> crate::error::Result<()> {
            Ok(())
        }
        async fn flush(&self) -> crate::error::Result<usize> {
            Ok(0)
        }
        async fn reload(&self, media_file_id: Uuid) -> crate::error::Result<Option<MediaFileRecord>> {
            Ok(self.enqueued.lock().await.iter().find(|r| r.id == media_file_id).cloned())
        }
        async fn find_by_path(&self, library_id: Uuid, path: &str) -> crate::error::Result<Option<MediaFileRecord>> {
            Ok(self
                .enqueued
                .lock()
                .await
                .iter()
                .find(|r| r.library_id == library_id && r.path == path)
                .cloned())
        }
        async fn list_for_library(&self, library_id: Uuid) -> crate::error::Result<Vec<MediaFileRecord>> {
            Ok(self.enqueued.lock().await.iter().filter(|r| r.library_id == library_id).cloned().collect())
        }
        async fn prune_stale(&self, _library_id: Uuid, _scan_started_at: chrono::DateTime<Utc>) -> crate::error::Result<u64> {
            Ok(0)
        }
    }

    fn test_library() -> Library {
        Library {
            id: Uuid::new_v4(),
            root_path: "/tmp".to_string(),
            library_type: LibraryType::Music,
        }
    }

    #[tokio::test]
    async fn processes_a_single_file_and_emits_a_scanned_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.mp3");
        std::fs::write(&path, vec![1u8; 4096]).unwrap();

        let (file_tx, file_rx) = mpsc::channel(4);
        let (result_tx, mut result_rx) = mpsc::channel(4);
        let library = test_library();
        let job_id = Uuid::new_v4();

        let pool = Arc::new(FilePool::new(
            file_rx,
            result_tx,
            library.clone(),
            job_id,
            ScannerSettings::default(),
            Vec::new(),
            Arc::new(crate::event_bus::BroadcastEventBus::new()),
        ));

        let cache = Arc::new(FileCache::new(10, 0.01, 10));
        let store: Arc<dyn FileRecordStore> = Arc::new(RecordingStore::new());
        let progress = Arc::new(ProgressEstimator::new());
        let throttler = Throttler::new(ScannerSettings::default());
        let cancel = CancelToken::new();

        let handles = pool.spawn(1, cache, store, progress.clone(), throttler, cancel.clone());

        file_tx
            .send(FileWorkItem {
                path: path.clone(),
                meta: EntryMeta {
                    size: 4096,
                    mtime: std::time::SystemTime::now(),
                    #[cfg(unix)]
                    mode: 0o644,
                },
                library_id: library.id,
            })
            .await
            .unwrap();
        drop(file_tx);

        let result = tokio::time::timeout(Duration::from_secs(5), result_rx.recv()).await.unwrap().unwrap();
        assert!(result.record.is_some());
        assert_eq!(result.record.unwrap().media_type, crate::types::MediaType::Track);
        assert_eq!(progress.processed_files(), 1);

        for h in handles {
            let _ = h.await;
        }
    }
}
