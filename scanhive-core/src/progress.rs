//! Progress estimator (C5): atomic counters for discovered/processed work plus a smoothed
//! rate estimate and ETA. Counters are plain atomics per the "readers never lock" rule the
//! rest of this crate follows for hot-path state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Exponential weighting applied to each new instantaneous rate sample against the
/// previous smoothed estimate, so a single slow or fast tick doesn't whipsaw the ETA.
const RATE_SMOOTHING: f64 = 0.3;

struct RateState {
    last_sample_at: Instant,
    last_processed_files: u64,
    smoothed_files_per_sec: f64,
}

pub struct ProgressEstimator {
    total_files: AtomicU64,
    total_bytes: AtomicU64,
    processed_files: AtomicU64,
    processed_bytes: AtomicU64,
    skipped_files: AtomicU64,
    errors: AtomicU64,
    discovery_complete: AtomicBool,
    rate: Mutex<RateState>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub percent: f32,
    pub eta_secs: Option<f64>,
    pub files_per_sec: f64,
}

impl ProgressEstimator {
    pub fn new() -> Self {
        Self {
            total_files: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            processed_files: AtomicU64::new(0),
            processed_bytes: AtomicU64::new(0),
            skipped_files: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            discovery_complete: AtomicBool::new(false),
            rate: Mutex::new(RateState {
                last_sample_at: Instant::now(),
                last_processed_files: 0,
                smoothed_files_per_sec: 0.0,
            }),
        }
    }

    /// Seeds counters from a resumed job's persisted state; does not touch the rate model.
    pub fn seed(&self, total_files: u64, total_bytes: u64, processed_files: u64, processed_bytes: u64, skipped_files: u64) {
        self.total_files.store(total_files, Ordering::Relaxed);
        self.total_bytes.store(total_bytes, Ordering::Relaxed);
        self.processed_files.store(processed_files, Ordering::Relaxed);
        self.processed_bytes.store(processed_bytes, Ordering::Relaxed);
        self.skipped_files.store(skipped_files, Ordering::Relaxed);
        let mut rate = self.rate.lock().expect("rate lock poisoned");
        rate.last_processed_files = processed_files;
    }

    /// Adds to the discovery totals; callers add as directory workers find new files,
    /// until `mark_discovery_complete()` is called.
    pub fn add_total(&self, files: u64, bytes: u64) {
        if self.discovery_complete.load(Ordering::Acquire) {
            return;
        }
        self.total_files.fetch_add(files, Ordering::Relaxed);
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Freezes the denominator once the directory pipeline drains, so ETA stops moving
    /// target as processing continues past discovery.
    pub fn mark_discovery_complete(&self) {
        self.discovery_complete.store(true, Ordering::Release);
    }

    pub fn is_discovery_complete(&self) -> bool {
        self.discovery_complete.load(Ordering::Acquire)
    }

    pub fn record_processed(&self, files: u64, bytes: u64) {
        self.processed_files.fetch_add(files, Ordering::Relaxed);
        self.processed_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_skipped(&self, files: u64) {
        self.skipped_files.fetch_add(files, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_files(&self) -> u64 {
        self.total_files.load(Ordering::Relaxed)
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    pub fn processed_files(&self) -> u64 {
        self.processed_files.load(Ordering::Relaxed)
    }

    pub fn processed_bytes(&self) -> u64 {
        self.processed_bytes.load(Ordering::Relaxed)
    }

    pub fn skipped_files(&self) -> u64 {
        self.skipped_files.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Computes percentage (capped at 100), a smoothed files/sec rate, and ETA from
    /// remaining work divided by rate.
    pub fn estimate(&self) -> Estimate {
        let total = self.total_files.load(Ordering::Relaxed);
        let done = self.processed_files.load(Ordering::Relaxed) + self.skipped_files.load(Ordering::Relaxed);

        let percent = if total == 0 {
            if self.discovery_complete.load(Ordering::Acquire) { 100.0 } else { 0.0 }
        } else {
            ((done as f64 / total as f64) * 100.0).min(100.0) as f32
        };

        let files_per_sec = self.sample_rate(self.processed_files.load(Ordering::Relaxed));

        let eta_secs = if files_per_sec > 0.01 && total > done {
            Some((total - done) as f64 / files_per_sec)
        } else {
            None
        };

        Estimate {
            percent,
            eta_secs,
            files_per_sec,
        }
    }

    fn sample_rate(&self, processed_files_now: u64) -> f64 {
        let mut rate = self.rate.lock().expect("rate lock poisoned");
        let elapsed = rate.last_sample_at.elapsed().as_secs_f64();
        if elapsed < 0.001 {
            return rate.smoothed_files_per_sec;
        }

        let delta = processed_files_now.saturating_sub(rate.last_processed_files) as f64;
        let instantaneous = delta / elapsed;

        rate.smoothed_files_per_sec = if rate.smoothed_files_per_sec == 0.0 {
            instantaneous
        } else {
            RATE_SMOOTHING * instantaneous + (1.0 - RATE_SMOOTHING) * rate.smoothed_files_per_sec
        };
        rate.last_sample_at = Instant::now();
        rate.last_processed_files = processed_files_now;

        rate.smoothed_files_per_sec
    }
}

impl Default for ProgressEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_total_with_discovery_complete_is_100_percent() {
        let est = ProgressEstimator::new();
        est.mark_discovery_complete();
        assert_eq!(est.estimate().percent, 100.0);
    }

    #[test]
    fn percent_tracks_processed_plus_skipped_over_total() {
        let est = ProgressEstimator::new();
        est.add_total(10, 1000);
        est.record_processed(3, 300);
        est.record_skipped(2);
        assert_eq!(est.estimate().percent, 50.0);
    }

    #[test]
    fn percent_never_exceeds_100() {
        let est = ProgressEstimator::new();
        est.add_total(2, 200);
        est.record_processed(5, 500);
        assert!(est.estimate().percent <= 100.0);
    }

    #[test]
    fn discovery_complete_freezes_total() {
        let est = ProgressEstimator::new();
        est.add_total(5, 500);
        est.mark_discovery_complete();
        est.add_total(5, 500);
        assert_eq!(est.total_files(), 5);
    }

    #[test]
    fn seed_restores_counters_for_resume() {
        let est = ProgressEstimator::new();
        est.seed(100, 10_000, 40, 4_000, 2);
        assert_eq!(est.processed_files(), 40);
        assert_eq!(est.skipped_files(), 2);
        assert_eq!(est.total_files(), 100);
    }
}
