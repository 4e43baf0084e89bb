use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The media type a library is configured to hold, steering file-type classification
/// during processing (spec §3, §4.7 step 3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "database", derive(sqlx::Type))]
#[cfg_attr(feature = "database", sqlx(type_name = "library_type", rename_all = "snake_case"))]
pub enum LibraryType {
    Music,
    Movie,
    TvShow,
    Image,
}

/// Read-only to the scan core; owned by an external library-management surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
pub struct Library {
    pub id: Uuid,
    pub root_path: String,
    pub library_type: LibraryType,
}
