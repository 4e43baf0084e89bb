//! Progress publisher (C9): on a fixed cadence, reads the progress estimator and throttler
//! state, writes a CAS-like progress update to the job row (refusing to overwrite a job
//! that has already left `running`), and emits a progress event over the bus. Periodic
//! tick-then-act shape follows the batch persister's `run_periodic_flush`.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use scanhive_contracts::{EventBus, ScanEvent, ScanEventKind};

use crate::cancel::CancelToken;
use crate::config::ScannerSettings;
use crate::progress::ProgressEstimator;
use crate::storage::JobStore;
use crate::throttle::Throttler;

pub struct ProgressPublisher {
    job_id: Uuid,
    library_id: Uuid,
    settings: ScannerSettings,
}

impl ProgressPublisher {
    pub fn new(job_id: Uuid, library_id: Uuid, settings: ScannerSettings) -> Self {
        Self {
            job_id,
            library_id,
            settings,
        }
    }

    /// Runs until `cancel` fires, publishing once more immediately before returning so the
    /// job row reflects final counters even if the last tick hadn't landed yet.
    pub async fn run(
        &self,
        progress: Arc<ProgressEstimator>,
        throttler: Arc<Throttler>,
        store: Arc<dyn JobStore>,
        event_bus: Arc<dyn EventBus>,
        cancel: CancelToken,
    ) {
        let mut interval = tokio::time::interval(self.settings.progress_publish_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.publish_once(&progress, &throttler, &store, &event_bus).await;
                }
            }
        }
        self.publish_once(&progress, &throttler, &store, &event_bus).await;
    }

    async fn publish_once(
        &self,
        progress: &Arc<ProgressEstimator>,
        throttler: &Arc<Throttler>,
        store: &Arc<dyn JobStore>,
        event_bus: &Arc<dyn EventBus>,
    ) {
        let estimate = progress.estimate();
        let updated = store
            .update_progress_if_running(
                self.job_id,
                progress.total_files() as i64,
                progress.processed_files() as i64,
                progress.skipped_files() as i64,
                progress.processed_bytes() as i64,
                estimate.percent,
            )
            .await;

        match updated {
            Ok(true) => debug!(job_id = %self.job_id, percent = estimate.percent, "progress published"),
            Ok(false) => debug!(job_id = %self.job_id, "progress update skipped: job no longer running"),
            Err(e) => warn!(job_id = %self.job_id, error = %e, "failed to persist progress"),
        }

        if !progress.is_discovery_complete() {
            event_bus
                .publish(ScanEvent::new(
                    ScanEventKind::ScanDiscovery,
                    self.job_id,
                    self.library_id,
                    json!({
                        "files_found": progress.total_files(),
                        "bytes_found": progress.total_bytes(),
                    }),
                ))
                .await;
        }

        let limits = throttler.current_limits().await;
        let metrics = throttler.system_metrics().await;
        let net = throttler.network_stats().await;

        let payload = json!({
            "percent": estimate.percent,
            "files_per_sec": estimate.files_per_sec,
            "eta_secs": estimate.eta_secs,
            "processed_files": progress.processed_files(),
            "skipped_files": progress.skipped_files(),
            "total_files": progress.total_files(),
            "errors": progress.errors(),
            "worker_count": limits.worker_count,
            "batch_size": limits.batch_size,
            "cpu_pct": metrics.cpu_pct,
            "memory_pct": metrics.memory_pct,
            "container": metrics.container,
            "network_healthy": net.healthy,
        });

        event_bus
            .publish(ScanEvent::new(ScanEventKind::ScanProgress, self.job_id, self.library_id, payload))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result as ScanResult;
    use crate::types::{ScanJob, ScanStatus};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;
    use tokio::sync::Mutex as AsyncMutex;

    struct FakeJobStore {
        running: Mutex<bool>,
        last_update: AsyncMutex<Option<(i64, i64, f32)>>,
    }

    #[async_trait]
    impl JobStore for FakeJobStore {
        async fn insert_job(&self, _job: &ScanJob) -> ScanResult<()> {
            Ok(())
        }
        async fn get_job(&self, _job_id: Uuid) -> ScanResult<Option<ScanJob>> {
            Ok(None)
        }
        async fn get_jobs_for_library(&self, _library_id: Uuid) -> ScanResult<Vec<ScanJob>> {
            Ok(Vec::new())
        }
        async fn update_status(
            &self,
            _job_id: Uuid,
            _status: ScanStatus,
            _explicit_pause: bool,
            _status_message: Option<String>,
            _error_message: Option<String>,
        ) -> ScanResult<()> {
            Ok(())
        }
        async fn update_progress_if_running(
            &self,
            _job_id: Uuid,
            files_found: i64,
            files_processed: i64,
            _files_skipped: i64,
            _bytes_processed: i64,
            progress_pct: f32,
        ) -> ScanResult<bool> {
            if !*self.running.lock().unwrap() {
                return Ok(false);
            }
            *self.last_update.lock().await = Some((files_found, files_processed, progress_pct));
            Ok(true)
        }
        async fn finalize(&self, _job_id: Uuid, _status: ScanStatus, _completed_at: DateTime<Utc>) -> ScanResult<()> {
            Ok(())
        }
        async fn delete_job(&self, _job_id: Uuid) -> ScanResult<()> {
            Ok(())
        }
    }

    struct CapturingBus {
        events: AsyncMutex<Vec<ScanEvent>>,
    }

    #[async_trait]
    impl EventBus for CapturingBus {
        async fn publish(&self, event: ScanEvent) {
            self.events.lock().await.push(event);
        }
    }

    #[tokio::test]
    async fn publishes_progress_and_emits_event_when_running() {
        let job_id = Uuid::new_v4();
        let library_id = Uuid::new_v4();
        let publisher = ProgressPublisher::new(job_id, library_id, ScannerSettings::default());

        let progress = Arc::new(ProgressEstimator::new());
        progress.add_total(10, 1000);
        progress.record_processed(4, 400);
        progress.mark_discovery_complete();

        let throttler = Throttler::new(ScannerSettings::default());
        let store: Arc<dyn JobStore> = Arc::new(FakeJobStore {
            running: Mutex::new(true),
            last_update: AsyncMutex::new(None),
        });
        let bus = Arc::new(CapturingBus { events: AsyncMutex::new(Vec::new()) });

        publisher.publish_once(&progress, &throttler, &store, &(bus.clone() as Arc<dyn EventBus>)).await;

        assert_eq!(bus.events.lock().await.len(), 1);
        assert_eq!(bus.events.lock().await[0].kind, ScanEventKind::ScanProgress);
    }

    #[tokio::test]
    async fn emits_discovery_event_while_discovery_is_in_progress() {
        let job_id = Uuid::new_v4();
        let library_id = Uuid::new_v4();
        let publisher = ProgressPublisher::new(job_id, library_id, ScannerSettings::default());

        let progress = Arc::new(ProgressEstimator::new());
        progress.add_total(10, 1000);

        let throttler = Throttler::new(ScannerSettings::default());
        let store: Arc<dyn JobStore> = Arc::new(FakeJobStore {
            running: Mutex::new(true),
            last_update: AsyncMutex::new(None),
        });
        let bus = Arc::new(CapturingBus { events: AsyncMutex::new(Vec::new()) });

        publisher.publish_once(&progress, &throttler, &store, &(bus.clone() as Arc<dyn EventBus>)).await;

        let events = bus.events.lock().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, ScanEventKind::ScanDiscovery);
        assert_eq!(events[1].kind, ScanEventKind::ScanProgress);
    }

    #[tokio::test]
    async fn skips_job_update_when_not_running_but_still_emits_event() {
        let job_id = Uuid::new_v4();
        let library_id = Uuid::new_v4();
        let publisher = ProgressPublisher::new(job_id, library_id, ScannerSettings::default());

        let progress = Arc::new(ProgressEstimator::new());
        progress.mark_discovery_complete();
        let throttler = Throttler::new(ScannerSettings::default());
        let store = Arc::new(FakeJobStore {
            running: Mutex::new(false),
            last_update: AsyncMutex::new(None),
        });
        let bus = Arc::new(CapturingBus { events: AsyncMutex::new(Vec::new()) });

        publisher
            .publish_once(&progress, &throttler, &(store.clone() as Arc<dyn JobStore>), &(bus.clone() as Arc<dyn EventBus>))
            .await;

        assert!(store.last_update.lock().await.is_none());
        assert_eq!(bus.events.lock().await.len(), 1);
    }
}
