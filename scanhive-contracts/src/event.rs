use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The named events the core emits over its event bus (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanEventKind {
    ScanStarted,
    ScanResumed,
    ScanPaused,
    ScanCompleted,
    ScanFailed,
    ScanProgress,
    ScanDiscovery,
    ScanDiscoveryComplete,
    ThrottleAdjusted,
    EmergencyBrake,
    EmergencyBrakeReleased,
}

/// A single event published by the scan core. `payload` is a flat JSON object; the core
/// documents the keys it writes per `kind` but callers should tolerate unknown/missing keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanEvent {
    pub kind: ScanEventKind,
    pub job_id: Uuid,
    pub library_id: Uuid,
    pub at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl ScanEvent {
    pub fn new(kind: ScanEventKind, job_id: Uuid, library_id: Uuid, payload: serde_json::Value) -> Self {
        Self {
            kind,
            job_id,
            library_id,
            at: Utc::now(),
            payload,
        }
    }
}

/// The in-process publish side the core depends on. A thin RPC layer above the core may
/// implement this to fan events out over a wire protocol; tests use an in-memory channel.
#[async_trait::async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: ScanEvent);
}
