//! Cgroup v2 detection and parsing. Shapes grounded on
//! `other_examples/24435a46_vadv-rpglot__src-storage-model-cgroup.rs` (`CgroupCpuInfo`,
//! `CgroupMemoryInfo`); I/O-throttle cap reading grounded on spec §4.1/§4.2's
//! "block-I/O throttle caps are exposed" / "subtracted from computed disk throughput".

use std::path::{Path, PathBuf};

use crate::types::ContainerLimits;

const CGROUP_ROOT: &str = "/sys/fs/cgroup";
const CONTAINER_MARKERS: &[&str] = &["/.dockerenv", "/run/.containerenv"];

/// Best-effort containerization check: marker files first (cheap), cgroup hierarchy
/// presence second. Never errors — absence of evidence means "not containerized".
pub fn detect_container_root() -> Option<PathBuf> {
    if CONTAINER_MARKERS.iter().any(|m| Path::new(m).exists()) {
        return Some(PathBuf::from(CGROUP_ROOT));
    }

    if let Ok(contents) = std::fs::read_to_string("/proc/1/cgroup")
        && contents.lines().any(|l| l.contains("docker") || l.contains("kubepods") || l.contains("containerd"))
    {
        return Some(PathBuf::from(CGROUP_ROOT));
    }

    if Path::new(CGROUP_ROOT).join("memory.max").exists() {
        return Some(PathBuf::from(CGROUP_ROOT));
    }

    None
}

/// Reads cgroup v2 `memory.max`/`memory.current`, `cpu.max`, and an io-throttle cap if one
/// of the blkio/io controllers publishes a `bps` limit. Each field degrades to `None`
/// independently on read failure (spec §4.1 "falls back gracefully").
pub fn read_cgroup_limits(root: &Path) -> ContainerLimits {
    let memory_limit_bytes = read_u64_or_max(&root.join("memory.max"));
    let memory_usage_bytes = read_u64(&root.join("memory.current")).unwrap_or(0);
    let cpu_quota_cores = read_cpu_quota(&root.join("cpu.max"));
    let io_throttle_mbps = read_io_throttle(&root.join("io.max"));

    ContainerLimits {
        memory_limit_bytes,
        memory_usage_bytes,
        cpu_quota_cores,
        io_throttle_mbps,
    }
}

fn read_u64(path: &Path) -> Option<u64> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// cgroup v2 convention: the literal string "max" means unlimited.
fn read_u64_or_max(path: &Path) -> Option<u64> {
    let raw = std::fs::read_to_string(path).ok()?;
    let trimmed = raw.trim();
    if trimmed == "max" {
        None
    } else {
        trimmed.parse().ok()
    }
}

/// `cpu.max` is `"<quota> <period>"` in microseconds, or `"max <period>"` when unlimited.
fn read_cpu_quota(path: &Path) -> Option<f32> {
    let raw = std::fs::read_to_string(path).ok()?;
    let mut parts = raw.trim().split_whitespace();
    let quota = parts.next()?;
    let period: f32 = parts.next()?.parse().ok()?;
    if quota == "max" {
        return None;
    }
    let quota: f32 = quota.parse().ok()?;
    if period <= 0.0 {
        return None;
    }
    Some(quota / period)
}

/// `io.max` lists per-device limits; we take the first `bps=` token found across all
/// device lines as a coarse overall read+write cap, matching the spec's "exposes"
/// language rather than per-device accounting (out of scope for the core).
fn read_io_throttle(path: &Path) -> Option<f32> {
    let raw = std::fs::read_to_string(path).ok()?;
    for line in raw.lines() {
        for token in line.split_whitespace() {
            if let Some(v) = token.strip_prefix("rbps=").or_else(|| token.strip_prefix("wbps="))
                && v != "max"
                && let Ok(bytes_per_sec) = v.parse::<f64>()
            {
                return Some((bytes_per_sec / (1024.0 * 1024.0)) as f32);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cpu_max_quota_ratio() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cpu.max"), "200000 100000\n").unwrap();
        assert_eq!(read_cpu_quota(&dir.path().join("cpu.max")), Some(2.0));
    }

    #[test]
    fn cpu_max_unlimited_is_none() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cpu.max"), "max 100000\n").unwrap();
        assert_eq!(read_cpu_quota(&dir.path().join("cpu.max")), None);
    }

    #[test]
    fn memory_max_literal_is_unlimited() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("memory.max"), "max\n").unwrap();
        assert_eq!(read_u64_or_max(&dir.path().join("memory.max")), None);
    }
}
