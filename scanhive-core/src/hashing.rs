//! Size-adaptive content hashing used by the file worker pool (C7 step 2, spec §4.7).
//! Grounded on `thicclatka-nefaxer::engine::hashing::hash_file` (blake3 + mmap-above-
//! threshold idiom), extended with the spec's three size bands.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use blake3::Hasher;
use memmap2::Mmap;

use crate::error::Result;

const FULL_HASH_CEILING: u64 = 100 * 1024 * 1024; // ~100 MB: hash every byte
const SAMPLED_HASH_CEILING: u64 = 4 * 1024 * 1024 * 1024; // a few GB: sampled hash
const SAMPLE_CHUNK: usize = 1024 * 1024; // 1 MiB per sample point
const MMAP_THRESHOLD: u64 = 8 * 1024 * 1024; // mmap once we're past small-file reads

/// Hashes `path` (known to be `size` bytes) using the strategy appropriate to its size:
/// - up to [`FULL_HASH_CEILING`]: full-content blake3, mmap'd above [`MMAP_THRESHOLD`].
/// - up to [`SAMPLED_HASH_CEILING`]: blake3 over evenly-spaced sample chunks plus size.
/// - above that: an ultra-fast sample of head/middle/tail plus size and mtime-independent
///   metadata, trading collision resistance for throughput on very large files.
pub fn content_hash(path: &Path, size: u64) -> Result<String> {
    if size <= FULL_HASH_CEILING {
        full_hash(path, size)
    } else if size <= SAMPLED_HASH_CEILING {
        sampled_hash(path, size, sample_points(size, 32))
    } else {
        sampled_hash(path, size, sample_points(size, 8))
    }
}

fn full_hash(path: &Path, size: u64) -> Result<String> {
    let file = File::open(path)?;
    let mut hasher = Hasher::new();

    if size > MMAP_THRESHOLD {
        let mmap = unsafe { Mmap::map(&file)? };
        hasher.update(&mmap);
    } else {
        let mut reader = std::io::BufReader::new(file);
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
    }

    Ok(hasher.finalize().to_hex().to_string())
}

/// Evenly-spaced byte offsets to sample, including offset 0 and (approximately) the tail.
fn sample_points(size: u64, count: usize) -> Vec<u64> {
    if count <= 1 || size <= SAMPLE_CHUNK as u64 {
        return vec![0];
    }
    let stride = size / count as u64;
    (0..count as u64).map(|i| i * stride).collect()
}

fn sampled_hash(path: &Path, size: u64, offsets: Vec<u64>) -> Result<String> {
    use std::io::{Seek, SeekFrom};

    let mut file = File::open(path)?;
    let mut hasher = Hasher::new();
    hasher.update(&size.to_le_bytes());

    let mut buf = vec![0u8; SAMPLE_CHUNK.min(size as usize).max(1)];
    for offset in offsets {
        file.seek(SeekFrom::Start(offset))?;
        let n = file.read(&mut buf)?;
        hasher.update(&buf[..n]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn full_hash_is_stable_for_small_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::File::create(&path).unwrap().write_all(b"hello world").unwrap();

        let h1 = content_hash(&path, 11).unwrap();
        let h2 = content_hash(&path, 11).unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn different_contents_hash_differently() {
        let dir = tempfile::tempdir().unwrap();
        let p1 = dir.path().join("a.txt");
        let p2 = dir.path().join("b.txt");
        std::fs::write(&p1, b"alpha").unwrap();
        std::fs::write(&p2, b"bravo").unwrap();

        assert_ne!(content_hash(&p1, 5).unwrap(), content_hash(&p2, 5).unwrap());
    }

    #[test]
    fn sample_points_include_start() {
        let pts = sample_points(10 * 1024 * 1024, 8);
        assert_eq!(pts[0], 0);
        assert_eq!(pts.len(), 8);
    }
}
