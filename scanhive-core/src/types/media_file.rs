use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Classification assigned during C7 step 3, derived from library type + extension.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "database", derive(sqlx::Type))]
#[cfg_attr(feature = "database", sqlx(type_name = "media_file_type", rename_all = "snake_case"))]
pub enum MediaType {
    Track,
    Movie,
    Episode,
    Image,
    Unknown,
}

/// A scanned media file (spec §3). Unique on (library_id, path); rescans upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
pub struct MediaFileRecord {
    pub id: Uuid,
    pub library_id: Uuid,
    pub path: String,
    pub size_bytes: i64,
    pub content_hash: String,
    pub container_format: String,
    pub media_type: MediaType,

    /// Links to the extracted entity this file belongs to (track/movie/episode), if a
    /// plugin has matched it; left unset until a plugin runs.
    pub linked_entity_id: Option<Uuid>,
    pub linked_entity_type: Option<String>,

    pub duration_secs: Option<f64>,
    pub bitrate_kbps: Option<i32>,
    pub codec: Option<String>,
    pub resolution: Option<String>,

    pub scan_job_id: Uuid,

    pub last_seen_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MediaFileRecord {
    pub fn classify(library_type: crate::types::LibraryType, extension: &str) -> MediaType {
        use crate::types::LibraryType::*;
        let ext = extension.to_ascii_lowercase();
        let is_audio = matches!(ext.as_str(), "mp3" | "flac" | "ogg" | "m4a" | "wav" | "aac" | "opus");
        let is_video = matches!(ext.as_str(), "mp4" | "mkv" | "avi" | "mov" | "webm" | "m4v" | "ts");
        let is_image = matches!(ext.as_str(), "jpg" | "jpeg" | "png" | "webp" | "gif");

        match (library_type, is_audio, is_video, is_image) {
            (_, _, _, true) => MediaType::Image,
            (Music, true, _, _) => MediaType::Track,
            (Movie, _, true, _) => MediaType::Movie,
            (TvShow, _, true, _) => MediaType::Episode,
            (Image, _, _, _) => MediaType::Image,
            _ => MediaType::Unknown,
        }
    }
}
