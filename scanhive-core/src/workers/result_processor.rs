//! Result processor (C8): drains the result queue, keeps the file cache current, and fans
//! each scanned file out to every registered scanner hook under a per-call timeout tied to
//! the job's cancellation (spec §5 "Cancellation and timeout semantics"). Queue-draining
//! shape follows the same single-consumer loop the teacher uses to drain its
//! `progress_rx` channel in `ferrex-core/src/streaming_scanner.rs`.

use std::collections::HashMap;
use std::sync::Arc;

use scanhive_contracts::ScannerHook;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;
use uuid::Uuid;

use crate::cache::{CachedFileRecord, FileCache};
use crate::cancel::CancelToken;
use crate::config::ScannerSettings;
use crate::types::{MediaFileRecord, ResultItem};

pub struct ResultProcessor {
    result_rx: Mutex<Option<mpsc::Receiver<ResultItem>>>,
    hooks: Vec<Arc<dyn ScannerHook>>,
    library_id: Uuid,
    settings: ScannerSettings,
}

impl ResultProcessor {
    pub fn new(
        result_rx: mpsc::Receiver<ResultItem>,
        hooks: Vec<Arc<dyn ScannerHook>>,
        library_id: Uuid,
        settings: ScannerSettings,
    ) -> Self {
        Self {
            result_rx: Mutex::new(Some(result_rx)),
            hooks,
            library_id,
            settings,
        }
    }

    /// Runs until the channel closes or `cancel` fires, returning the number of items
    /// drained so the scanner can sanity-check it against the processed counter.
    pub async fn run(&self, cache: Arc<FileCache>, cancel: CancelToken) -> u64 {
        let mut rx = self
            .result_rx
            .try_lock()
            .expect("result processor locked elsewhere")
            .take()
            .expect("result processor run twice");

        let mut drained = 0u64;
        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => None,
                item = rx.recv() => item,
            };

            let Some(item) = item else { break };
            drained += 1;
            self.handle_item(item, &cache, &cancel).await;
        }
        drained
    }

    async fn handle_item(&self, item: ResultItem, cache: &Arc<FileCache>, cancel: &CancelToken) {
        if let Some(error) = &item.error {
            warn!(path = %item.origin_path.display(), error, "result item carried an error");
        }

        let Some(record) = item.record else { return };

        cache.remember(
            item.origin_path.clone(),
            CachedFileRecord {
                media_file_id: record.id,
                size: record.size_bytes.max(0) as u64,
                mtime: record.updated_at,
                content_hash: record.content_hash.clone(),
            },
        );

        if !item.request_post_hook || self.hooks.is_empty() {
            return;
        }

        let metadata = flatten_metadata(&record);
        let timeout = self.settings.plugin_timeout();

        for hook in &self.hooks {
            tokio::select! {
                _ = cancel.cancelled() => return,
                result = tokio::time::timeout(timeout, hook.on_media_file_scanned(record.id, metadata.clone())) => {
                    match result {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => warn!(media_file_id = %record.id, error = %e, "scanner hook failed"),
                        Err(_) => warn!(media_file_id = %record.id, "scanner hook timed out"),
                    }
                }
            }
        }
    }

    pub fn library_id(&self) -> Uuid {
        self.library_id
    }
}

/// Flat string projection of a record's fields, tolerant of unknown keys downstream
/// (spec §6 "metadata_map is a flat string→string projection").
fn flatten_metadata(record: &MediaFileRecord) -> HashMap<String, String> {
    let mut map = HashMap::new();
    map.insert("path".to_string(), record.path.clone());
    map.insert("container_format".to_string(), record.container_format.clone());
    map.insert("media_type".to_string(), format!("{:?}", record.media_type).to_lowercase());
    map.insert("content_hash".to_string(), record.content_hash.clone());
    map.insert("size_bytes".to_string(), record.size_bytes.to_string());
    if let Some(d) = record.duration_secs {
        map.insert("duration_secs".to_string(), d.to_string());
    }
    if let Some(b) = record.bitrate_kbps {
        map.insert("bitrate_kbps".to_string(), b.to_string());
    }
    if let Some(codec) = &record.codec {
        map.insert("codec".to_string(), codec.clone());
    }
    if let Some(res) = &record.resolution {
        map.insert("resolution".to_string(), res.clone());
    }
    map
}
