use std::time::SystemTime;

use serde_json::Value;
use uuid::Uuid;

use super::media_file::MediaFileRecord;

/// Cheap, already-stat'd facts about a directory entry carried alongside a work item so
/// downstream stages don't re-stat the file (spec §3 "Scan Work Item").
#[derive(Debug, Clone)]
pub struct EntryMeta {
    pub size: u64,
    pub mtime: SystemTime,
    #[cfg(unix)]
    pub mode: u32,
}

/// A file discovered by the directory pool and handed to the file pool (spec §3).
#[derive(Debug, Clone)]
pub struct FileWorkItem {
    pub path: std::path::PathBuf,
    pub meta: EntryMeta,
    pub library_id: Uuid,
}

/// A directory discovered by the directory pool and handed back to itself (spec §3).
#[derive(Debug, Clone)]
pub struct DirectoryWorkItem {
    pub path: std::path::PathBuf,
    pub library_id: Uuid,
    pub depth: usize,
}

/// Produced by the file pool and drained by the result processor (spec §3). `record` is
/// `None` on a skip (e.g. cache hit with nothing new to report).
#[derive(Debug, Clone)]
pub struct ResultItem {
    pub record: Option<MediaFileRecord>,
    pub metadata_blob: Option<Value>,
    pub metadata_kind: Option<String>,
    pub origin_path: std::path::PathBuf,
    pub error: Option<String>,
    pub request_post_hook: bool,
}

impl ResultItem {
    pub fn skipped(origin_path: std::path::PathBuf) -> Self {
        Self {
            record: None,
            metadata_blob: None,
            metadata_kind: None,
            origin_path,
            error: None,
            request_post_hook: false,
        }
    }

    pub fn failed(origin_path: std::path::PathBuf, error: String) -> Self {
        Self {
            record: None,
            metadata_blob: None,
            metadata_kind: None,
            origin_path,
            error: Some(error),
            request_post_hook: false,
        }
    }

    pub fn scanned(record: MediaFileRecord, origin_path: std::path::PathBuf) -> Self {
        Self {
            record: Some(record),
            metadata_blob: None,
            metadata_kind: None,
            origin_path,
            error: None,
            request_post_hook: true,
        }
    }
}
