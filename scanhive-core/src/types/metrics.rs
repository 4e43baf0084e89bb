use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single sample from the system probe (C1, spec §3 "System Metrics Snapshot").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Metrics {
    pub cpu_pct: f32,
    pub memory_pct: f32,
    pub memory_used_mb: f64,
    pub load_avg_1m: f32,
    pub io_wait_pct: f32,
    pub network_mbps: f32,
    pub disk_read_mbps: f32,
    pub disk_write_mbps: f32,
    pub sampled_at: DateTime<Utc>,

    /// Populated only when `container` indicates a cgroup hierarchy was found.
    pub container: Option<ContainerLimits>,
}

impl Metrics {
    pub fn is_containerized(&self) -> bool {
        self.container.is_some()
    }
}

/// Cgroup-derived ceilings and current usage, reported alongside host-level metrics when
/// the probe detects it is running inside a container (spec §4.1).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainerLimits {
    /// `None` when the cgroup reports "max" (unlimited).
    pub memory_limit_bytes: Option<u64>,
    pub memory_usage_bytes: u64,
    /// `cpu.max` quota/period ratio expressed as a CPU-core count; `None` when unlimited.
    pub cpu_quota_cores: Option<f32>,
    /// Block I/O throughput cap from cgroup blkio/io controllers, in MB/s, if configured.
    pub io_throttle_mbps: Option<f32>,
}

/// The throttler's current operating point (spec §3 "Throttle Limits").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Limits {
    pub worker_count: usize,
    pub batch_size: usize,
    pub delay: std::time::Duration,
    pub network_bandwidth_cap_mbps: f32,
    /// Fraction of full I/O rate permitted, in `(0.0, 1.0]`.
    pub io_throttle_ratio: f32,
    pub enabled: bool,
}

/// Network throughput and health snapshot, distinct from `Metrics` because it is also
/// exposed standalone via `Throttler::network_stats()` (spec §4.2).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetStats {
    pub network_mbps: f32,
    pub connect_latency_ms: Option<f32>,
    pub dns_latency_ms: Option<f32>,
    pub healthy: bool,
}
