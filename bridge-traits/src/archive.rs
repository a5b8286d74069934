//! Source Archive Abstraction
//!
//! Read-only access to export archives (for example Google Takeout zips).
//! Archives are listed, their entries enumerated, and individual entries read
//! fully into memory. Implementations never modify the source.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Reference to one archive in the source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArchiveRef {
    /// Adapter-specific identifier (path, object key, ...)
    pub id: String,
    /// Display name, also the tie-breaker when ordering archives
    pub name: String,
    /// Last modification time, when the source knows it
    pub modified_at: Option<DateTime<Utc>>,
    /// Archive size in bytes, when known
    pub size: Option<u64>,
}

impl ArchiveRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            modified_at: None,
            size: None,
        }
    }

    pub fn with_modified_at(mut self, modified_at: DateTime<Utc>) -> Self {
        self.modified_at = Some(modified_at);
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Processing order: modification time, then name. Archives without a
    /// timestamp sort first.
    pub fn order_key(&self) -> (DateTime<Utc>, &str) {
        (
            self.modified_at.unwrap_or(DateTime::<Utc>::MIN_UTC),
            self.name.as_str(),
        )
    }
}

/// One file inside an archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    /// Path relative to the archive root, `/`-separated
    pub path: String,
    /// Uncompressed size in bytes
    pub size: u64,
}

impl ArchiveEntry {
    pub fn new(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
        }
    }

    /// Final path component.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Source of export archives.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::archive::ArchiveSource;
///
/// async fn count_entries(source: &dyn ArchiveSource) -> Result<usize> {
///     let mut total = 0;
///     for archive in source.list_archives().await? {
///         total += source.list_entries(&archive).await?.len();
///     }
///     Ok(total)
/// }
/// ```
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    /// List every archive currently available, in no particular order.
    async fn list_archives(&self) -> Result<Vec<ArchiveRef>>;

    /// List the file entries of one archive. Directories are omitted.
    async fn list_entries(&self, archive: &ArchiveRef) -> Result<Vec<ArchiveEntry>>;

    /// Read one entry completely.
    async fn read_entry(&self, archive: &ArchiveRef, path: &str) -> Result<Bytes>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_order_key_sorts_by_time_then_name() {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut archives = vec![
            ArchiveRef::new("b", "takeout-002.zip").with_modified_at(t),
            ArchiveRef::new("a", "takeout-001.zip").with_modified_at(t),
            ArchiveRef::new("c", "takeout-000.zip")
                .with_modified_at(t - chrono::Duration::days(1)),
            ArchiveRef::new("d", "takeout-999.zip"),
        ];
        archives.sort_by(|a, b| a.order_key().cmp(&b.order_key()));

        let names: Vec<_> = archives.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "takeout-999.zip",
                "takeout-000.zip",
                "takeout-001.zip",
                "takeout-002.zip"
            ]
        );
    }

    #[test]
    fn test_entry_file_name() {
        let entry = ArchiveEntry::new("Takeout/Google Photos/2025/IMG_1.jpg", 10);
        assert_eq!(entry.file_name(), "IMG_1.jpg");
        assert_eq!(ArchiveEntry::new("plain.jpg", 1).file_name(), "plain.jpg");
    }
}
