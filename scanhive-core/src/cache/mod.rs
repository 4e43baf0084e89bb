//! C3: the two-tier bloom+LRU file cache (spec §4.3).

mod bloom;
mod lru_cache;

pub use bloom::BloomFilter;
pub use lru_cache::{CachedFileRecord, FileLruCache};

use std::path::Path;

use chrono::{DateTime, Utc};

/// Facade combining the bloom pre-screen with the bounded LRU record cache. `contains`
/// returning `false` is authoritative; `true` triggers the tier-2 lookup the caller does
/// via `lookup`.
pub struct FileCache {
    bloom: BloomFilter,
    lru: FileLruCache,
}

impl FileCache {
    pub fn new(expected_items: usize, false_positive_rate: f64, lru_capacity: usize) -> Self {
        Self {
            bloom: BloomFilter::new(expected_items, false_positive_rate),
            lru: FileLruCache::new(lru_capacity),
        }
    }

    /// Preloads both tiers from the persistent store's records for the scanned library
    /// (spec §4.3 "At scan start the cache is preloaded...").
    pub fn preload(&self, records: impl IntoIterator<Item = (std::path::PathBuf, CachedFileRecord)>) {
        for (path, record) in records {
            self.bloom.add(&path);
            self.lru.insert(path, record);
        }
    }

    /// Returns `Some(record)` only when the file is unchanged (size and mtime both
    /// match), i.e. the "single O(1) bloom check plus an mtime/size comparison" fast
    /// path from spec §4.3.
    pub fn lookup_unchanged(&self, path: &Path, size: u64, mtime: DateTime<Utc>) -> Option<CachedFileRecord> {
        if !self.bloom.contains(path) {
            return None;
        }
        let cached = self.lru.get(path)?;
        if cached.size == size && mtimes_match(cached.mtime, mtime) {
            Some(cached)
        } else {
            None
        }
    }

    pub fn remember(&self, path: std::path::PathBuf, record: CachedFileRecord) {
        self.bloom.add(&path);
        self.lru.insert(path, record);
    }

    pub fn len(&self) -> usize {
        self.lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lru.is_empty()
    }
}

/// Filesystem mtimes commonly carry sub-second jitter across platforms/filesystems; treat
/// anything within a second as unchanged.
fn mtimes_match(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    (a - b).num_seconds().abs() <= 1
}
