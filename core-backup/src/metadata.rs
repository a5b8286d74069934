//! # Metadata Reader
//!
//! Per-item metadata from Google Takeout JSON sidecars.
//!
//! ## Sidecar shape
//!
//! ```json
//! {
//!   "title": "IMG_0001.jpg",
//!   "photoTakenTime": { "timestamp": "1767657000" },
//!   "favorited": true
//! }
//! ```
//!
//! Capture time is read from `photoTakenTime`, `creationTime` or `takenTime`
//! (epoch seconds as string or number), then from RFC 3339
//! `mediaMetadata.creationTime`. A missing sidecar or capture time never drops
//! the item: it is tagged with a [`MetadataIssue`] and routed to the fallback
//! date instead.

use bytes::Bytes;
use bridge_traits::archive::ArchiveRef;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;

use crate::error::{BackupError, Result};

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

const TIMESTAMP_OBJECTS: &[&str] = &["photoTakenTime", "creationTime", "takenTime"];
const FAVORITE_KEYS: &[&str] = &["isFavorite", "favorite", "favorited", "is_favorite"];
const STARRED_KEYS: &[&str] = &["starred", "isStarred"];

const MEDIA_TYPES: &[(&str, &str)] = &[
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("heic", "image/heic"),
    ("heif", "image/heif"),
    ("bmp", "image/bmp"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
    ("dng", "image/x-adobe-dng"),
    ("cr2", "image/x-canon-cr2"),
    ("nef", "image/x-nikon-nef"),
    ("arw", "image/x-sony-arw"),
    ("mp4", "video/mp4"),
    ("m4v", "video/x-m4v"),
    ("mov", "video/quicktime"),
    ("3gp", "video/3gpp"),
    ("avi", "video/x-msvideo"),
    ("mkv", "video/x-matroska"),
    ("webm", "video/webm"),
    ("mts", "video/mp2t"),
    ("m2ts", "video/mp2t"),
    ("wmv", "video/x-ms-wmv"),
];

/// Why an item's capture date could not be trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataIssue {
    MissingSidecar,
    UnreadableSidecar(String),
    UnparsableSidecar(String),
    MissingCaptureTime,
}

impl fmt::Display for MetadataIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataIssue::MissingSidecar => write!(f, "no sidecar"),
            MetadataIssue::UnreadableSidecar(e) => write!(f, "sidecar unreadable: {}", e),
            MetadataIssue::UnparsableSidecar(e) => write!(f, "sidecar unparsable: {}", e),
            MetadataIssue::MissingCaptureTime => write!(f, "sidecar has no capture time"),
        }
    }
}

/// Everything known about one item before its bytes are read.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemMetadata {
    pub capture_time: Option<DateTime<Utc>>,
    pub mime_type: String,
    pub original_name: String,
    pub favorite: bool,
    pub sidecar_path: Option<String>,
    pub sidecar: Option<Value>,
    pub issue: Option<MetadataIssue>,
}

/// One media item read from an archive. Immutable once built.
#[derive(Debug, Clone)]
pub struct MediaItem {
    pub archive: ArchiveRef,
    pub entry_path: String,
    pub metadata: ItemMetadata,
    pub bytes: Bytes,
}

// ============================================================================
// Entry classification & sidecar pairing
// ============================================================================

pub fn is_sidecar(path: &str) -> bool {
    extension(path).is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// Whether the entry looks like a photo or video by its extension.
pub fn is_media_path(path: &str) -> bool {
    guess_mime_type(path).is_some()
}

pub fn guess_mime_type(path: &str) -> Option<&'static str> {
    let ext = extension(path)?.to_ascii_lowercase();
    MEDIA_TYPES
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, mime)| *mime)
}

fn extension(path: &str) -> Option<&str> {
    let name = basename(path);
    match name.rfind('.') {
        Some(0) | None => None,
        Some(idx) => Some(&name[idx + 1..]),
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Candidate sidecar paths for a media entry, in preference order.
pub fn sidecar_candidates(media_path: &str) -> Vec<String> {
    let mut candidates = vec![
        format!("{}.json", media_path),
        format!("{}.supplemental-metadata.json", media_path),
    ];
    let name = basename(media_path);
    if let Some(idx) = name.rfind('.').filter(|idx| *idx > 0) {
        let stem_len = media_path.len() - (name.len() - idx);
        candidates.push(format!("{}.json", &media_path[..stem_len]));
    }
    candidates
}

/// First candidate sidecar that exists among `entries`.
pub fn find_sidecar(media_path: &str, entries: &HashSet<&str>) -> Option<String> {
    sidecar_candidates(media_path)
        .into_iter()
        .find(|candidate| entries.contains(candidate.as_str()))
}

/// File name safe to use in the destination: no path separators, never
/// empty.
pub fn sanitize_name(name: &str) -> String {
    let cleaned = name.replace(['\\', '/'], "_");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}

// ============================================================================
// Sidecar parsing
// ============================================================================

pub fn parse_sidecar(bytes: &[u8]) -> Result<Map<String, Value>> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(BackupError::Metadata("sidecar is not a JSON object".to_string())),
        Err(e) => Err(BackupError::Metadata(e.to_string())),
    }
}

pub fn capture_time(meta: &Map<String, Value>) -> Option<DateTime<Utc>> {
    for key in TIMESTAMP_OBJECTS {
        let seconds = meta
            .get(*key)
            .and_then(Value::as_object)
            .and_then(|obj| obj.get("timestamp"))
            .and_then(epoch_seconds);
        if let Some(t) = seconds.and_then(|s| DateTime::<Utc>::from_timestamp(s, 0)) {
            return Some(t);
        }
    }

    meta.get("mediaMetadata")
        .and_then(Value::as_object)
        .and_then(|m| m.get("creationTime"))
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn epoch_seconds(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn favorite_flag(meta: &Map<String, Value>) -> bool {
    for key in FAVORITE_KEYS {
        if let Some(value) = meta.get(*key) {
            if let Some(flag) = truthy(value, true) {
                return flag;
            }
        }
    }
    for key in STARRED_KEYS {
        if let Some(value) = meta.get(*key) {
            if let Some(flag) = truthy(value, false) {
                return flag;
            }
        }
    }
    false
}

fn truthy(value: &Value, numbers: bool) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => Some(matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes" | "y"
        )),
        Value::Number(n) if numbers => Some(n.as_f64().is_some_and(|f| f != 0.0)),
        _ => None,
    }
}

fn sidecar_string<'a>(meta: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| meta.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

/// Sidecar as read from the archive, or why it could not be.
pub enum SidecarInput<'a> {
    Absent,
    Unreadable { path: &'a str, error: String },
    Present { path: &'a str, bytes: &'a [u8] },
}

/// Build [`ItemMetadata`] for a media entry.
pub fn read_metadata(entry_path: &str, sidecar: SidecarInput<'_>) -> ItemMetadata {
    let fallback_name = sanitize_name(basename(entry_path));
    let guessed_mime = guess_mime_type(entry_path).unwrap_or(DEFAULT_MIME_TYPE);

    let mut metadata = ItemMetadata {
        capture_time: None,
        mime_type: guessed_mime.to_string(),
        original_name: fallback_name,
        favorite: false,
        sidecar_path: None,
        sidecar: None,
        issue: None,
    };

    let (path, bytes) = match sidecar {
        SidecarInput::Absent => {
            metadata.issue = Some(MetadataIssue::MissingSidecar);
            return metadata;
        }
        SidecarInput::Unreadable { path, error } => {
            metadata.sidecar_path = Some(path.to_string());
            metadata.issue = Some(MetadataIssue::UnreadableSidecar(error));
            return metadata;
        }
        SidecarInput::Present { path, bytes } => (path, bytes),
    };
    metadata.sidecar_path = Some(path.to_string());

    let meta = match parse_sidecar(bytes) {
        Ok(meta) => meta,
        Err(e) => {
            metadata.issue = Some(MetadataIssue::UnparsableSidecar(e.to_string()));
            return metadata;
        }
    };

    if let Some(title) = sidecar_string(&meta, &["title"]) {
        metadata.original_name = sanitize_name(title);
    }
    if let Some(mime) = sidecar_string(&meta, &["mimeType", "mime_type"]) {
        metadata.mime_type = mime.to_string();
    }
    metadata.favorite = favorite_flag(&meta);
    metadata.capture_time = capture_time(&meta);
    if metadata.capture_time.is_none() {
        metadata.issue = Some(MetadataIssue::MissingCaptureTime);
    }
    metadata.sidecar = Some(Value::Object(meta));
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn present<'a>(bytes: &'a [u8]) -> SidecarInput<'a> {
        SidecarInput::Present {
            path: "Takeout/Google Photos/a.jpg.json",
            bytes,
        }
    }

    #[test]
    fn test_capture_time_sources_in_order() {
        let meta = json!({
            "creationTime": {"timestamp": "1700000000"},
            "photoTakenTime": {"timestamp": "1767657000"}
        });
        assert_eq!(
            capture_time(meta.as_object().unwrap()),
            Some(Utc.with_ymd_and_hms(2026, 1, 5, 23, 50, 0).unwrap())
        );

        let numeric = json!({"takenTime": {"timestamp": 1767657000}});
        assert_eq!(
            capture_time(numeric.as_object().unwrap()),
            Some(Utc.with_ymd_and_hms(2026, 1, 5, 23, 50, 0).unwrap())
        );

        let rfc = json!({"mediaMetadata": {"creationTime": "2026-01-06T08:50:00+09:00"}});
        assert_eq!(
            capture_time(rfc.as_object().unwrap()),
            Some(Utc.with_ymd_and_hms(2026, 1, 5, 23, 50, 0).unwrap())
        );

        let garbage = json!({"photoTakenTime": {"timestamp": "yesterday"}});
        assert_eq!(capture_time(garbage.as_object().unwrap()), None);
    }

    #[test]
    fn test_favorite_flag_shapes() {
        let cases = [
            (json!({"favorited": true}), true),
            (json!({"isFavorite": "Yes"}), true),
            (json!({"favorite": 1}), true),
            (json!({"favorite": 0}), false),
            (json!({"starred": "1"}), true),
            (json!({"isStarred": false}), false),
            (json!({"title": "x"}), false),
        ];
        for (meta, expected) in cases {
            assert_eq!(favorite_flag(meta.as_object().unwrap()), expected, "{meta}");
        }
    }

    #[test]
    fn test_sidecar_candidates() {
        assert_eq!(
            sidecar_candidates("Takeout/Google Photos/IMG_1.jpg"),
            vec![
                "Takeout/Google Photos/IMG_1.jpg.json",
                "Takeout/Google Photos/IMG_1.jpg.supplemental-metadata.json",
                "Takeout/Google Photos/IMG_1.json",
            ]
        );
        assert_eq!(sidecar_candidates("a.b/noext").len(), 2);

        let entries: HashSet<&str> = ["Takeout/IMG_2.json", "Takeout/IMG_2.mp4"].into_iter().collect();
        assert_eq!(
            find_sidecar("Takeout/IMG_2.mp4", &entries),
            Some("Takeout/IMG_2.json".to_string())
        );
        assert_eq!(find_sidecar("Takeout/IMG_3.mp4", &entries), None);
    }

    #[test]
    fn test_entry_classification() {
        assert!(is_sidecar("a/b.JSON"));
        assert!(!is_sidecar("a/json"));
        assert!(is_media_path("a/VID.MOV"));
        assert!(!is_media_path("archive_browser.html"));
        assert_eq!(guess_mime_type("x.heic"), Some("image/heic"));
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("a/b\\c.jpg"), "a_b_c.jpg");
        assert_eq!(sanitize_name("   "), "file");
    }

    #[test]
    fn test_read_metadata_full_sidecar() {
        let sidecar = br#"{
            "title": "Beach/Day.jpg",
            "mimeType": "image/jpeg",
            "photoTakenTime": {"timestamp": "1767657000"},
            "favorited": true
        }"#;
        let metadata = read_metadata("Takeout/Google Photos/IMG_1.jpg", present(sidecar));

        assert_eq!(metadata.original_name, "Beach_Day.jpg");
        assert_eq!(metadata.mime_type, "image/jpeg");
        assert!(metadata.favorite);
        assert!(metadata.capture_time.is_some());
        assert_eq!(metadata.issue, None);
        assert!(metadata.sidecar.is_some());
    }

    #[test]
    fn test_read_metadata_degrades_without_dropping() {
        let missing = read_metadata("Takeout/VID_1.mp4", SidecarInput::Absent);
        assert_eq!(missing.issue, Some(MetadataIssue::MissingSidecar));
        assert_eq!(missing.original_name, "VID_1.mp4");
        assert_eq!(missing.mime_type, "video/mp4");

        let broken = read_metadata("Takeout/IMG_1.jpg", present(b"{not json"));
        assert!(matches!(broken.issue, Some(MetadataIssue::UnparsableSidecar(_))));
        assert_eq!(broken.sidecar_path.as_deref(), Some("Takeout/Google Photos/a.jpg.json"));

        let no_time = read_metadata("Takeout/IMG_1.jpg", present(br#"{"title": "IMG_1.jpg"}"#));
        assert_eq!(no_time.issue, Some(MetadataIssue::MissingCaptureTime));

        let unknown = read_metadata("Takeout/blob.bin", SidecarInput::Absent);
        assert_eq!(unknown.mime_type, DEFAULT_MIME_TYPE);
    }
}
