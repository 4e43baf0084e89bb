use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persisted lifecycle status of a scan job (spec §3, §4.10).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "database", derive(sqlx::Type))]
#[cfg_attr(feature = "database", sqlx(type_name = "scan_status", rename_all = "snake_case"))]
pub enum ScanStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

impl ScanStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Failed)
    }
}

/// The durable record of one scan run against one library (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
pub struct ScanJob {
    pub id: Uuid,
    pub library_id: Uuid,
    pub status: ScanStatus,

    pub files_found: i64,
    pub files_processed: i64,
    pub files_skipped: i64,
    pub bytes_processed: i64,

    pub progress_pct: f32,
    pub status_message: Option<String>,
    pub error_message: Option<String>,

    /// Set when the job was paused explicitly (as opposed to completing its drain). Used
    /// by finalize() to decide whether a drained pipeline means "completed" or "paused".
    pub explicit_pause: bool,

    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ScanJob {
    pub fn new(library_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            library_id,
            status: ScanStatus::Pending,
            files_found: 0,
            files_processed: 0,
            files_skipped: 0,
            bytes_processed: 0,
            progress_pct: 0.0,
            status_message: None,
            error_message: None,
            explicit_pause: false,
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Invariant 3 (spec §8): processed + skipped never exceeds found.
    pub fn remaining(&self) -> i64 {
        (self.files_found - self.files_processed - self.files_skipped).max(0)
    }
}
