//! System Probe (C1, spec §4.1). Samples CPU/memory/load/I/O-wait/network/disk throughput
//! and detects containerization. Grounded on
//! `other_examples/546cb5ee_SakurasDuck-audio_sorter__src-scan_manager.rs` for the
//! `sysinfo`-polling idiom (refresh-then-read on a background-owned `System`) and
//! `other_examples/24435a46_vadv-rpglot__...cgroup.rs` for the cgroup shapes this module
//! feeds into (`cgroup` submodule).

mod cgroup;

use std::path::PathBuf;
use std::time::Instant;

use sysinfo::{Disks, Networks, System};
use tracing::debug;

use crate::types::{ContainerLimits, Metrics};

/// Cumulative counters read from `/proc/stat`'s aggregate `cpu` line, used to derive the
/// I/O-wait fraction as a delta between successive samples (spec §4.1).
#[derive(Debug, Clone, Copy, Default)]
struct CpuTimes {
    iowait: u64,
    total: u64,
}

struct PriorSample {
    at: Instant,
    cpu_times: CpuTimes,
    net_rx_bytes: u64,
    net_tx_bytes: u64,
    disk_read_bytes: u64,
    disk_write_bytes: u64,
}

/// Samples host (or container) resource usage. Holds a `sysinfo::System` so repeated
/// `sample()` calls amortize refresh cost and can compute deltas, matching the pattern of
/// keeping one `System` alive across a polling loop rather than constructing fresh each tick.
pub struct SystemProbe {
    sys: System,
    container_root: Option<PathBuf>,
    prior: Option<PriorSample>,
}

impl SystemProbe {
    pub fn new() -> Self {
        let container_root = cgroup::detect_container_root();
        if let Some(root) = &container_root {
            debug!(cgroup_root = %root.display(), "detected container cgroup hierarchy");
        }

        let mut sys = System::new_all();
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        Self {
            sys,
            container_root,
            prior: None,
        }
    }

    pub fn is_containerized(&self) -> bool {
        self.container_root.is_some()
    }

    /// Samples current metrics. Never errors: any sub-probe that fails degrades to a
    /// zero/neutral fallback rather than aborting the pipeline (spec §4.1, §4.2 failure
    /// semantics).
    pub fn sample(&mut self) -> Metrics {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();

        let now = Instant::now();
        let cpu_times = read_cpu_times();
        let (net_rx, net_tx) = read_network_totals();
        let (disk_r, disk_w) = read_disk_totals();

        let mut io_wait_pct = 0.0f32;
        let mut network_mbps = 0.0f32;
        let mut disk_read_mbps = 0.0f32;
        let mut disk_write_mbps = 0.0f32;

        if let Some(prior) = &self.prior {
            let elapsed = now.duration_since(prior.at).as_secs_f64().max(0.001);

            let total_delta = cpu_times.total.saturating_sub(prior.cpu_times.total) as f64;
            let iowait_delta = cpu_times.iowait.saturating_sub(prior.cpu_times.iowait) as f64;
            if total_delta > 0.0 {
                io_wait_pct = ((iowait_delta / total_delta) * 100.0) as f32;
            }

            network_mbps = throughput_mbps(
                net_rx.saturating_sub(prior.net_rx_bytes) + net_tx.saturating_sub(prior.net_tx_bytes),
                elapsed,
            );
            disk_read_mbps = throughput_mbps(disk_r.saturating_sub(prior.disk_read_bytes), elapsed);
            disk_write_mbps = throughput_mbps(disk_w.saturating_sub(prior.disk_write_bytes), elapsed);
        }

        self.prior = Some(PriorSample {
            at: now,
            cpu_times,
            net_rx_bytes: net_rx,
            net_tx_bytes: net_tx,
            disk_read_bytes: disk_r,
            disk_write_bytes: disk_w,
        });

        let container = self.container_root.as_deref().map(cgroup::read_cgroup_limits);

        let cpu_pct = match &container {
            Some(ContainerLimits {
                cpu_quota_cores: Some(cores),
                ..
            }) => {
                let host_cores = self.sys.cpus().len().max(1) as f32;
                (self.sys.global_cpu_usage() * host_cores / cores.max(0.001)).min(100.0)
            }
            _ => self.sys.global_cpu_usage(),
        };

        let (memory_pct, memory_used_mb) = match &container {
            Some(ContainerLimits {
                memory_limit_bytes: Some(limit),
                memory_usage_bytes,
                ..
            }) if *limit > 0 => (
                (*memory_usage_bytes as f32 / *limit as f32) * 100.0,
                *memory_usage_bytes as f64 / (1024.0 * 1024.0),
            ),
            _ => {
                let total = self.sys.total_memory().max(1);
                let used = self.sys.used_memory();
                (
                    (used as f32 / total as f32) * 100.0,
                    used as f64 / (1024.0 * 1024.0),
                )
            }
        };

        let load_avg = System::load_average();

        Metrics {
            cpu_pct,
            memory_pct,
            memory_used_mb,
            load_avg_1m: load_avg.one as f32,
            io_wait_pct,
            network_mbps,
            disk_read_mbps,
            disk_write_mbps,
            sampled_at: chrono::Utc::now(),
            container,
        }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

fn throughput_mbps(delta_bytes: u64, elapsed_secs: f64) -> f32 {
    ((delta_bytes as f64 / (1024.0 * 1024.0)) / elapsed_secs) as f32
}

fn read_network_totals() -> (u64, u64) {
    let networks = Networks::new_with_refreshed_list();
    networks.iter().fold((0u64, 0u64), |(rx, tx), (_, data)| {
        (rx + data.total_received(), tx + data.total_transmitted())
    })
}

fn read_disk_totals() -> (u64, u64) {
    let disks = Disks::new_with_refreshed_list();
    disks.iter().fold((0u64, 0u64), |(r, w), disk| {
        let usage = disk.usage();
        (r + usage.total_read_bytes, w + usage.total_written_bytes)
    })
}

/// Parses the aggregate `cpu` line of `/proc/stat`. Falls back to zeroed counters (which
/// yields a zero I/O-wait delta rather than a spurious spike) on non-Linux hosts or
/// permission failures.
fn read_cpu_times() -> CpuTimes {
    let Ok(contents) = std::fs::read_to_string("/proc/stat") else {
        return CpuTimes::default();
    };

    let Some(line) = contents.lines().next() else {
        return CpuTimes::default();
    };

    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|f| f.parse().ok())
        .collect();

    if fields.len() < 5 {
        return CpuTimes::default();
    }

    let iowait = fields.get(4).copied().unwrap_or(0);
    let total: u64 = fields.iter().sum();

    CpuTimes { iowait, total }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_has_zero_deltas() {
        let mut probe = SystemProbe::new();
        let m = probe.sample();
        assert_eq!(m.io_wait_pct, 0.0);
        assert_eq!(m.network_mbps, 0.0);
    }

    #[test]
    fn second_sample_can_compute_deltas_without_panicking() {
        let mut probe = SystemProbe::new();
        let _ = probe.sample();
        std::thread::sleep(std::time::Duration::from_millis(50));
        let m = probe.sample();
        assert!(m.cpu_pct >= 0.0);
        assert!(m.memory_pct >= 0.0);
    }
}
