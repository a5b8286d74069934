//! Destination Store Abstraction
//!
//! A date-keyed folder store with a per-record string property index, modeled
//! on the Google Drive v3 `appProperties` mechanism. Records are uploaded
//! either in one multipart request or through a resumable session that
//! accepts fixed-size chunks and reports the committed offset.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;

/// String properties attached to a record and queryable by exact match.
pub type PropertyMap = BTreeMap<String, String>;

/// Property every backed-up record carries so lookups can be scoped to one
/// backup root.
pub const ROOT_PROPERTY_KEY: &str = "backupRoot";

/// A completed record in the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationRecord {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub size: Option<u64>,
    pub properties: PropertyMap,
}

impl DestinationRecord {
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// Metadata sent with an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub name: String,
    pub parent_id: String,
    pub mime_type: String,
    pub properties: PropertyMap,
    /// Free-text description stored alongside the record
    pub description: Option<String>,
}

/// An open resumable upload session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumableSession {
    /// Opaque session locator returned by the store
    pub session_uri: String,
    /// Total number of bytes the session expects
    pub total_size: u64,
}

/// Result of sending a chunk (or querying a session).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkProgress {
    /// The store has durably received bytes `[0, committed)`.
    Incomplete { committed: u64 },
    /// All bytes were received and the record now exists.
    Complete(DestinationRecord),
}

/// Destination store trait
///
/// Implementations return [`BridgeError::Http`](crate::error::BridgeError::Http)
/// for non-success statuses so callers can classify them, and
/// [`BridgeError::Unauthorized`](crate::error::BridgeError::Unauthorized) when
/// the credential is refused.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::DestinationStore;
///
/// async fn already_stored(store: &dyn DestinationStore, root: &str, hash: &str) -> Result<bool> {
///     let matches = store.find_by_property(root, "contentIdentity", hash).await?;
///     Ok(!matches.is_empty())
/// }
/// ```
#[async_trait]
pub trait DestinationStore: Send + Sync {
    /// Check that the backup root exists and is reachable with the current
    /// credential.
    async fn check_root(&self, root_id: &str) -> Result<()>;

    /// Return the id of the folder `name` directly under `parent_id`,
    /// creating it when absent.
    async fn ensure_folder(&self, parent_id: &str, name: &str) -> Result<String>;

    /// Find completed, non-deleted records carrying property `key = value`
    /// and [`ROOT_PROPERTY_KEY`]` = root_id`.
    async fn find_by_property(
        &self,
        root_id: &str,
        key: &str,
        value: &str,
    ) -> Result<Vec<DestinationRecord>>;

    /// Upload metadata and content atomically in one request.
    async fn upload_multipart(
        &self,
        metadata: &RecordMetadata,
        data: Bytes,
    ) -> Result<DestinationRecord>;

    /// Open a resumable session carrying the full metadata.
    async fn start_resumable(
        &self,
        metadata: &RecordMetadata,
        total_size: u64,
    ) -> Result<ResumableSession>;

    /// Send `chunk` starting at byte `offset` of the session.
    async fn upload_chunk(
        &self,
        session: &ResumableSession,
        offset: u64,
        chunk: Bytes,
    ) -> Result<ChunkProgress>;

    /// Ask the store how many bytes of the session it has committed.
    async fn query_resumable(&self, session: &ResumableSession) -> Result<ChunkProgress>;

    /// Abandon a session. No record is created for it.
    async fn cancel_resumable(&self, session: &ResumableSession) -> Result<()>;

    /// Permanently delete a record.
    async fn delete_record(&self, record_id: &str) -> Result<()>;
}
