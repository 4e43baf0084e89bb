//! Tier 2 of the file cache (C3, spec §4.3): a bounded LRU map from path to cached
//! record. Grounded on `other_examples/30e66f37_vkalintiris-netdata__...index_cache.rs`'s
//! use of the `lru` crate behind a lock guarding shared cache state.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use lru::LruCache;
use rand::Rng;
use uuid::Uuid;

/// What the cache remembers about a previously-scanned file: enough to decide "unchanged"
/// without re-hashing (spec §4.3, §4.6 "cache pre-screen").
#[derive(Debug, Clone)]
pub struct CachedFileRecord {
    pub media_file_id: Uuid,
    pub size: u64,
    pub mtime: DateTime<Utc>,
    pub content_hash: String,
}

/// Access-time updates are sampled at this rate to reduce write-lock contention on reads
/// that otherwise wouldn't need to mutate anything (spec §4.3).
const ACCESS_PROMOTE_SAMPLE_RATE: f64 = 0.10;

pub struct FileLruCache {
    inner: RwLock<LruCache<PathBuf, CachedFileRecord>>,
}

impl FileLruCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).expect("capacity is nonzero");
        Self {
            inner: RwLock::new(LruCache::new(cap)),
        }
    }

    /// Looks up `path` without promoting recency on most calls (`peek`); a sampled
    /// fraction of hits additionally promote via `get` so the LRU ordering still tracks
    /// real access patterns over time.
    pub fn get(&self, path: &Path) -> Option<CachedFileRecord> {
        {
            let guard = self.inner.read().expect("lru cache lock poisoned");
            let hit = guard.peek(path).cloned();
            if hit.is_none() {
                return None;
            }
            if !should_promote() {
                return hit;
            }
        }

        let mut guard = self.inner.write().expect("lru cache lock poisoned");
        guard.get(path).cloned()
    }

    pub fn insert(&self, path: PathBuf, record: CachedFileRecord) {
        let mut guard = self.inner.write().expect("lru cache lock poisoned");
        guard.put(path, record);
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("lru cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn should_promote() -> bool {
    rand::thread_rng().gen_bool(ACCESS_PROMOTE_SAMPLE_RATE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(hash: &str) -> CachedFileRecord {
        CachedFileRecord {
            media_file_id: Uuid::new_v4(),
            size: 1024,
            mtime: Utc::now(),
            content_hash: hash.to_string(),
        }
    }

    #[test]
    fn evicts_least_recently_used_when_full() {
        let cache = FileLruCache::new(2);
        cache.insert(PathBuf::from("/a"), record("a"));
        cache.insert(PathBuf::from("/b"), record("b"));
        // touch /a via direct promotion so it's not the LRU victim
        let mut guard = cache.inner.write().unwrap();
        guard.get(&PathBuf::from("/a"));
        drop(guard);
        cache.insert(PathBuf::from("/c"), record("c"));

        assert!(cache.get(&PathBuf::from("/a")).is_some());
        assert!(cache.get(&PathBuf::from("/b")).is_none());
        assert!(cache.get(&PathBuf::from("/c")).is_some());
    }

    #[test]
    fn missing_key_returns_none() {
        let cache = FileLruCache::new(4);
        assert!(cache.get(&PathBuf::from("/nope")).is_none());
    }
}
