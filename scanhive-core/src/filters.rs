//! Path/extension/media-type classification and blocklists used by the directory pool
//! (C6, spec §4.6). Grounded on `ferrex-core::scanner::MediaScanner::is_video_file` for the
//! extension-table shape and `thicclatka-nefaxer::engine::tools::is_os_hidden_file` for the
//! system/metadata-subtree blocklist idiom.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::RegexSet;

use crate::types::LibraryType;

pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "ogg", "m4a", "wav", "aac", "opus", "wma"];
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "avi", "mov", "webm", "m4v", "ts", "flv", "wmv", "mpg", "mpeg", "3gp", "ogv",
    "mts", "m2ts",
];
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif", "bmp", "tiff"];

/// Directory names that are never descended into, regardless of library type.
const BLOCKED_DIR_NAMES: &[&str] = &[
    ".git",
    ".svn",
    ".hg",
    "@eaDir",
    "#recycle",
    "$RECYCLE.BIN",
    ".Trash-1000",
    ".Trashes",
    "lost+found",
    "@tmp",
];

/// Pattern blocklist for preview/trickplay/sprite subtrees, applied to directory names
/// (spec §4.6 "pattern-based blocklist for preview/trickplay/sprite directories").
static BLOCKED_DIR_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)^\.?trickplay$",
        r"(?i)^\.?previews?$",
        r"(?i)^\.?sprites?$",
        r"(?i)^\.?thumbs?$",
        r"(?i)^\.?bif$",
    ])
    .expect("static blocked-dir regex set is valid")
});

/// Filename patterns for artwork, subtitles, previews, NFO, and system files (spec §4.6
/// filter layer 2).
static BLOCKED_FILE_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)^\.ds_store$",
        r"(?i)^thumbs\.db$",
        r"(?i)^desktop\.ini$",
        r"(?i)^\._.*",
        r"(?i)\.nfo$",
        r"(?i)\.(srt|sub|idx|ass|ssa|vtt)$",
        r"(?i)-(poster|fanart|banner|thumb|landscape|clearlogo|clearart|disc)\.(jpg|jpeg|png|webp)$",
        r"(?i)^(poster|fanart|banner|folder|cover)\.(jpg|jpeg|png|webp)$",
        r"(?i)-trickplay",
        r"(?i)\.trickplay\.",
    ])
    .expect("static blocked-file regex set is valid")
});

pub fn is_blocked_directory(name: &str) -> bool {
    BLOCKED_DIR_NAMES.iter().any(|b| b.eq_ignore_ascii_case(name)) || BLOCKED_DIR_PATTERNS.is_match(name)
}

/// Filter layer 3: parent directory pattern check (spec §4.6).
pub fn is_blocked_parent(parent_name: &str) -> bool {
    BLOCKED_DIR_PATTERNS.is_match(parent_name)
}

pub fn is_blocked_filename(name: &str) -> bool {
    BLOCKED_FILE_PATTERNS.is_match(name)
}

/// Filter layer 1: extension must be in the media set.
pub fn extension_is_media(ext: &str) -> bool {
    let ext = ext.to_ascii_lowercase();
    AUDIO_EXTENSIONS.contains(&ext.as_str())
        || VIDEO_EXTENSIONS.contains(&ext.as_str())
        || IMAGE_EXTENSIONS.contains(&ext.as_str())
}

/// Applies all three filter layers plus the minimum-size floor (spec §4.6). Returns
/// `true` if the file should be enqueued for processing.
pub fn should_enqueue_file(path: &Path, size: u64, min_file_size_bytes: u64) -> bool {
    if size < min_file_size_bytes {
        return false;
    }

    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    if !extension_is_media(ext) {
        return false;
    }

    if let Some(name) = path.file_name().and_then(|n| n.to_str())
        && is_blocked_filename(name)
    {
        return false;
    }

    if let Some(parent_name) = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        && is_blocked_parent(parent_name)
    {
        return false;
    }

    true
}

/// Container format label derived from the file extension (spec §4.7 step 3).
pub fn container_format_label(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Media-type classification driven by library type + extension (spec §4.7 step 3),
/// delegating to `MediaFileRecord::classify` so the core has one definition.
pub fn classify_media_type(library_type: LibraryType, path: &Path) -> crate::types::MediaType {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    crate::types::MediaFileRecord::classify(library_type, ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_known_system_dirs() {
        assert!(is_blocked_directory(".git"));
        assert!(is_blocked_directory("@eaDir"));
        assert!(!is_blocked_directory("Season 01"));
    }

    #[test]
    fn blocks_trickplay_and_preview_dirs() {
        assert!(is_blocked_directory("trickplay"));
        assert!(is_blocked_directory(".previews"));
        assert!(is_blocked_directory("Sprites"));
    }

    #[test]
    fn blocks_artwork_and_subtitle_files() {
        assert!(is_blocked_filename("folder.jpg"));
        assert!(is_blocked_filename("movie.srt"));
        assert!(is_blocked_filename("movie-poster.jpg"));
        assert!(!is_blocked_filename("movie.mkv"));
    }

    #[test]
    fn enforces_minimum_size_floor() {
        let p = Path::new("/lib/a.mp3");
        assert!(!should_enqueue_file(p, 100, 1024));
        assert!(should_enqueue_file(p, 2048, 1024));
    }

    #[test]
    fn rejects_non_media_extensions() {
        assert!(!should_enqueue_file(Path::new("/lib/readme.txt"), 10_000, 1024));
    }

    #[test]
    fn classifies_by_library_type() {
        use crate::types::MediaType;
        assert_eq!(
            classify_media_type(LibraryType::Music, Path::new("a.mp3")),
            MediaType::Track
        );
        assert_eq!(
            classify_media_type(LibraryType::Movie, Path::new("a.mkv")),
            MediaType::Movie
        );
        assert_eq!(
            classify_media_type(LibraryType::TvShow, Path::new("a.mkv")),
            MediaType::Episode
        );
        assert_eq!(
            classify_media_type(LibraryType::Movie, Path::new("cover.jpg")),
            MediaType::Image
        );
    }
}
