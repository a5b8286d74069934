//! Processing Cursor Persistence
//!
//! The cursor is the high-water mark of archives that were fully processed by
//! an incremental run. It is plain data: the scanner receives it explicitly
//! and the service persists it through [`CursorStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::archive::ArchiveRef;
use crate::error::Result;

/// High-water mark `(archive modified time, archive name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingCursor {
    pub archive_modified_at: DateTime<Utc>,
    pub archive_name: String,
    pub updated_at: DateTime<Utc>,
}

impl ProcessingCursor {
    /// Cursor positioned at `archive`.
    pub fn at(archive: &ArchiveRef, updated_at: DateTime<Utc>) -> Self {
        let (modified_at, name) = archive.order_key();
        Self {
            archive_modified_at: modified_at,
            archive_name: name.to_string(),
            updated_at,
        }
    }

    /// Whether `archive` is at or before the mark and therefore already
    /// processed.
    pub fn covers(&self, archive: &ArchiveRef) -> bool {
        archive.order_key() <= (self.archive_modified_at, self.archive_name.as_str())
    }
}

/// Cursor persistence trait
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Load the stored cursor, `None` before the first incremental run.
    async fn load(&self) -> Result<Option<ProcessingCursor>>;

    /// Replace the stored cursor.
    async fn save(&self, cursor: &ProcessingCursor) -> Result<()>;
}
