use std::collections::HashMap;

use uuid::Uuid;

use crate::Result;

/// Final counters handed to `on_scan_completed`.
#[derive(Debug, Clone)]
pub struct ScanStats {
    pub files_found: u64,
    pub files_processed: u64,
    pub files_skipped: u64,
    pub bytes_processed: u64,
    pub errors: u64,
}

/// Lifecycle observer invoked by the result processor (C8) and the scanner (C10). Hook
/// calls are bounded by a timeout tied to the job's cancellation so they abort cleanly on
/// pause/terminate (spec §5 "Cancellation and timeout semantics").
#[async_trait::async_trait]
pub trait ScannerHook: Send + Sync {
    async fn on_scan_started(&self, job_id: Uuid, library_id: Uuid, root_path: &str) -> Result<()>;

    /// `metadata` is a flat string projection drawn from both the database record and
    /// anything plugins extracted; unknown keys are tolerated by design.
    async fn on_media_file_scanned(
        &self,
        media_file_id: Uuid,
        metadata: HashMap<String, String>,
    ) -> Result<()>;

    async fn on_scan_completed(&self, job_id: Uuid, library_id: Uuid, stats: ScanStats) -> Result<()>;
}
