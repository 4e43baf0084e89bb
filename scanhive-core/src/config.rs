//! Layered configuration: compiled-in defaults, optional TOML file, `SCANHIVE_*`
//! environment overrides. Mirrors the layering the teacher's config crate uses, adapted to
//! the scan core's own tunables (spec §10.3).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScannerSettings {
    pub min_workers: usize,
    pub max_workers: usize,

    pub min_batch_size: usize,
    pub max_batch_size: usize,
    pub default_batch_size: usize,

    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub default_delay_ms: u64,

    /// How often the throttle control loop re-evaluates limits.
    pub adjustment_interval_secs: u64,

    pub cpu_target_pct: f32,
    pub memory_target_pct: f32,
    pub io_wait_target_pct: f32,
    pub network_target_mbps: f32,

    pub cpu_hard_cap_pct: f32,
    pub memory_hard_cap_pct: f32,
    pub io_wait_hard_cap_pct: f32,
    pub network_hard_cap_ratio: f32,

    pub emergency_brake_threshold_pct: f32,
    pub emergency_brake_duration_ms: u64,

    pub network_health_endpoint: String,

    pub bloom_expected_items: usize,
    pub bloom_false_positive_rate: f64,

    /// Deferred-work memory footprint budget in bytes before the batch persister is
    /// forced to flush regardless of item count (spec §4.4).
    pub persist_memory_budget_bytes: u64,
    pub persist_flush_interval_ms: u64,

    /// Cadence of the periodic job-row progress update and telemetry event.
    pub progress_publish_interval_secs: u64,

    pub min_file_size_bytes: u64,
    pub directory_depth_limit: usize,
    pub file_enqueue_timeout_ms: u64,

    /// Per-call budget for a file-handler plugin or scanner hook invocation, tied to the
    /// job's cancellation context so a hung plugin can't wedge a file worker forever.
    pub plugin_timeout_ms: u64,

    /// Open-question defaults (see DESIGN.md): auto-resume thresholds for orphaned paused
    /// jobs recovered at manager startup.
    pub auto_resume_min_files: u64,
    pub auto_resume_min_fraction: f64,

    /// Open-question defaults: how long the directory/file queue closers wait for
    /// sustained emptiness before declaring a stage drained.
    pub queue_close_grace_secs: u64,
    pub queue_close_confirm_ticks: u32,

    /// Cadence of the scan manager's background state synchronizer (spec §4.10).
    pub state_sync_interval_secs: u64,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: num_cpus::get().max(1),

            min_batch_size: 1,
            max_batch_size: 500,
            default_batch_size: 100,

            min_delay_ms: 0,
            max_delay_ms: 2_000,
            default_delay_ms: 10,

            adjustment_interval_secs: 8,

            cpu_target_pct: 75.0,
            memory_target_pct: 70.0,
            io_wait_target_pct: 40.0,
            network_target_mbps: 80.0,

            cpu_hard_cap_pct: 90.0,
            memory_hard_cap_pct: 85.0,
            io_wait_hard_cap_pct: 60.0,
            network_hard_cap_ratio: 1.3,

            emergency_brake_threshold_pct: 98.0,
            emergency_brake_duration_ms: 5_000,

            network_health_endpoint: "8.8.8.8:53".to_string(),

            bloom_expected_items: 100_000,
            bloom_false_positive_rate: 0.01,

            persist_memory_budget_bytes: 5 * 1024 * 1024 * 1024,
            persist_flush_interval_ms: 2_000,
            progress_publish_interval_secs: 3,

            min_file_size_bytes: 1024,
            directory_depth_limit: 50,
            file_enqueue_timeout_ms: 5_000,
            plugin_timeout_ms: 30_000,

            auto_resume_min_files: 10,
            auto_resume_min_fraction: 0.01,

            queue_close_grace_secs: 5,
            queue_close_confirm_ticks: 5,

            state_sync_interval_secs: 30,
        }
    }
}

impl ScannerSettings {
    /// Load defaults, then an optional TOML file, then `SCANHIVE_*` environment overrides.
    pub fn load(toml_path: Option<&Path>) -> Result<Self> {
        let mut settings = Self::default();

        if let Some(path) = toml_path {
            if path.exists() {
                let raw = std::fs::read_to_string(path)?;
                settings = toml::from_str(&raw)
                    .map_err(|e| ScanError::Config(format!("invalid config at {path:?}: {e}")))?;
            }
        }

        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) {
        macro_rules! override_num {
            ($field:ident, $env:literal) => {
                if let Ok(v) = std::env::var($env) {
                    if let Ok(parsed) = v.parse() {
                        self.$field = parsed;
                    }
                }
            };
        }

        override_num!(min_workers, "SCANHIVE_MIN_WORKERS");
        override_num!(max_workers, "SCANHIVE_MAX_WORKERS");
        override_num!(default_batch_size, "SCANHIVE_DEFAULT_BATCH_SIZE");
        override_num!(adjustment_interval_secs, "SCANHIVE_ADJUSTMENT_INTERVAL_SECS");
        override_num!(cpu_target_pct, "SCANHIVE_CPU_TARGET_PCT");
        override_num!(memory_target_pct, "SCANHIVE_MEMORY_TARGET_PCT");

        if let Ok(v) = std::env::var("SCANHIVE_NETWORK_HEALTH_ENDPOINT") {
            self.network_health_endpoint = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_workers == 0 || self.min_workers > self.max_workers {
            return Err(ScanError::Config(format!(
                "min_workers ({}) must be >= 1 and <= max_workers ({})",
                self.min_workers, self.max_workers
            )));
        }
        if !(self.min_batch_size <= self.default_batch_size
            && self.default_batch_size <= self.max_batch_size)
        {
            return Err(ScanError::Config(
                "batch size bounds must satisfy min <= default <= max".to_string(),
            ));
        }
        if !(self.min_delay_ms <= self.default_delay_ms && self.default_delay_ms <= self.max_delay_ms)
        {
            return Err(ScanError::Config(
                "delay bounds must satisfy min <= default <= max".to_string(),
            ));
        }
        if self.bloom_false_positive_rate <= 0.0 || self.bloom_false_positive_rate >= 1.0 {
            return Err(ScanError::Config(
                "bloom_false_positive_rate must be in (0, 1)".to_string(),
            ));
        }
        Ok(())
    }

    pub fn adjustment_interval(&self) -> Duration {
        Duration::from_secs(self.adjustment_interval_secs)
    }

    pub fn default_delay(&self) -> Duration {
        Duration::from_millis(self.default_delay_ms)
    }

    pub fn queue_close_grace(&self) -> Duration {
        Duration::from_secs(self.queue_close_grace_secs)
    }

    pub fn emergency_brake_duration(&self) -> Duration {
        Duration::from_millis(self.emergency_brake_duration_ms)
    }

    pub fn file_enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.file_enqueue_timeout_ms)
    }

    pub fn persist_flush_interval(&self) -> Duration {
        Duration::from_millis(self.persist_flush_interval_ms)
    }

    pub fn plugin_timeout(&self) -> Duration {
        Duration::from_millis(self.plugin_timeout_ms)
    }

    pub fn progress_publish_interval(&self) -> Duration {
        Duration::from_secs(self.progress_publish_interval_secs)
    }

    pub fn state_sync_interval(&self) -> Duration {
        Duration::from_secs(self.state_sync_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        ScannerSettings::default().validate().unwrap();
    }

    #[test]
    fn rejects_inverted_worker_bounds() {
        let mut s = ScannerSettings::default();
        s.min_workers = 10;
        s.max_workers = 2;
        assert!(s.validate().is_err());
    }

    #[test]
    fn load_with_missing_file_falls_back_to_defaults() {
        let settings = ScannerSettings::load(Some(Path::new("/nonexistent/scanhive.toml"))).unwrap();
        assert_eq!(settings, ScannerSettings::default());
    }
}
