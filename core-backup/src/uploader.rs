//! # Resilient Uploader
//!
//! Transfers one item to the destination.
//!
//! - Below the resumable threshold: one multipart request (metadata + bytes)
//!   retried as a whole. Before a retry the property index is consulted so a
//!   request that succeeded without us seeing the response is not repeated.
//! - Otherwise: a resumable session carrying the full metadata, fed in
//!   fixed-size chunks. Each chunk is retried on its own; before a retry the
//!   store is asked for the committed offset and the transfer resumes there.
//!
//! Any failure or cancellation after a session was opened cancels the
//! session, so no completed record is left behind. A completed record whose
//! properties do not match what was sent is deleted and reported as
//! [`BackupError::DestinationInconsistency`].

use bridge_traits::retry::RetryPolicy;
use bridge_traits::storage::{
    ChunkProgress, DestinationRecord, DestinationStore, PropertyMap, RecordMetadata,
    ResumableSession, ROOT_PROPERTY_KEY,
};
use bytes::Bytes;
use core_async::sync::CancellationToken;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{BackupError, Result};
use crate::retry::retry_with_backoff;

/// Property keys written on every record.
pub mod keys {
    pub const CONTENT_IDENTITY: &str = "contentIdentity";
    pub const CAPTURE_LOCAL_DATE: &str = "captureLocalDate";
    pub const MIME_TYPE: &str = "mimeType";
    pub const SOURCE: &str = "source";
    pub const DATE_SOURCE: &str = "dateSource";
}

/// Properties a record must carry to count as a completed backup.
pub const REQUIRED_PROPERTIES: &[&str] = &[
    keys::CONTENT_IDENTITY,
    keys::CAPTURE_LOCAL_DATE,
    keys::MIME_TYPE,
    keys::SOURCE,
];

/// One transfer.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub folder_id: String,
    pub name: String,
    pub mime_type: String,
    pub bytes: Bytes,
    pub properties: PropertyMap,
    pub description: Option<String>,
}

impl UploadRequest {
    fn metadata(&self) -> RecordMetadata {
        RecordMetadata {
            name: self.name.clone(),
            parent_id: self.folder_id.clone(),
            mime_type: self.mime_type.clone(),
            properties: self.properties.clone(),
            description: self.description.clone(),
        }
    }

    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

pub struct ResilientUploader {
    store: Arc<dyn DestinationStore>,
    chunk_size: usize,
    resumable_threshold: u64,
    retry: RetryPolicy,
}

impl ResilientUploader {
    pub fn new(
        store: Arc<dyn DestinationStore>,
        chunk_size: usize,
        resumable_threshold: u64,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
            resumable_threshold,
            retry,
        }
    }

    #[instrument(skip(self, request, cancel), fields(name = %request.name, size = request.size()))]
    pub async fn upload(
        &self,
        request: &UploadRequest,
        cancel: &CancellationToken,
    ) -> Result<DestinationRecord> {
        let record = if request.size() < self.resumable_threshold {
            self.upload_simple(request, cancel).await?
        } else {
            self.upload_resumable(request, cancel).await?
        };

        self.verify(request, record).await
    }

    async fn upload_simple(
        &self,
        request: &UploadRequest,
        cancel: &CancellationToken,
    ) -> Result<DestinationRecord> {
        let metadata = request.metadata();
        let store = &self.store;

        retry_with_backoff(&self.retry, "multipart upload", cancel, |attempt| {
            let metadata = &metadata;
            async move {
                if attempt > 0 {
                    if let Some(existing) = Self::already_landed(store.as_ref(), request).await? {
                        info!(record = %existing.id, "Earlier attempt completed");
                        return Ok(existing);
                    }
                }
                store.upload_multipart(metadata, request.bytes.clone()).await
            }
        })
        .await
    }

    /// The record an earlier attempt may have created despite reporting an
    /// error.
    async fn already_landed(
        store: &dyn DestinationStore,
        request: &UploadRequest,
    ) -> bridge_traits::error::Result<Option<DestinationRecord>> {
        let (Some(root), Some(identity)) = (
            request.properties.get(ROOT_PROPERTY_KEY),
            request.properties.get(keys::CONTENT_IDENTITY),
        ) else {
            return Ok(None);
        };
        let mut found = store
            .find_by_property(root, keys::CONTENT_IDENTITY, identity)
            .await?;
        Ok(if found.len() == 1 { found.pop() } else { None })
    }

    async fn upload_resumable(
        &self,
        request: &UploadRequest,
        cancel: &CancellationToken,
    ) -> Result<DestinationRecord> {
        let metadata = request.metadata();
        let total = request.size();
        let store = &self.store;

        let session = retry_with_backoff(&self.retry, "open upload session", cancel, |_| {
            store.start_resumable(&metadata, total)
        })
        .await?;
        debug!(total, "Resumable session opened");

        match self.send_chunks(&session, request, cancel).await {
            Ok(record) => Ok(record),
            Err(e) => {
                self.abandon(&session).await;
                Err(e)
            }
        }
    }

    async fn send_chunks(
        &self,
        session: &ResumableSession,
        request: &UploadRequest,
        cancel: &CancellationToken,
    ) -> Result<DestinationRecord> {
        let total = request.size();
        let chunk_size = self.chunk_size as u64;
        let store = &self.store;
        let mut offset: u64 = 0;
        let mut stalled: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(BackupError::Cancelled);
            }

            let sent_from = offset;
            let progress = retry_with_backoff(&self.retry, "upload chunk", cancel, |attempt| async move {
                let mut start = sent_from;
                if attempt > 0 {
                    match store.query_resumable(session).await? {
                        ChunkProgress::Complete(record) => return Ok(ChunkProgress::Complete(record)),
                        ChunkProgress::Incomplete { committed } if committed >= total => {
                            return Ok(ChunkProgress::Incomplete { committed });
                        }
                        ChunkProgress::Incomplete { committed } => start = committed,
                    }
                }
                let end = (start + chunk_size).min(total);
                let chunk = request.bytes.slice(start as usize..end as usize);
                store.upload_chunk(session, start, chunk).await
            })
            .await?;

            match progress {
                ChunkProgress::Complete(record) => {
                    debug!(record = %record.id, "Resumable upload complete");
                    return Ok(record);
                }
                ChunkProgress::Incomplete { committed } if committed > total => {
                    return Err(BackupError::DestinationInconsistency(format!(
                        "store reports {} of {} bytes committed",
                        committed, total
                    )));
                }
                ChunkProgress::Incomplete { committed } if committed == total => {
                    // Every byte is in but the store has not confirmed the
                    // record yet.
                    return match retry_with_backoff(&self.retry, "finalize upload", cancel, |_| {
                        store.query_resumable(session)
                    })
                    .await?
                    {
                        ChunkProgress::Complete(record) => Ok(record),
                        ChunkProgress::Incomplete { .. } => Err(BackupError::DestinationInconsistency(
                            format!("all {} bytes committed but no record was created", total),
                        )),
                    };
                }
                ChunkProgress::Incomplete { committed } => {
                    if committed <= offset {
                        stalled += 1;
                        if stalled >= self.retry.max_attempts.max(1) {
                            return Err(BackupError::TransientNetwork {
                                operation: "upload chunk".to_string(),
                                attempts: stalled,
                                message: format!("no progress past byte {}", offset),
                            });
                        }
                        warn!(offset, "Chunk made no progress");
                    } else {
                        stalled = 0;
                    }
                    offset = committed;
                }
            }
        }
    }

    /// Best-effort session cancellation. A session that outlives this only
    /// expires on the store side; it never becomes a record.
    async fn abandon(&self, session: &ResumableSession) {
        match self.store.cancel_resumable(session).await {
            Ok(()) => debug!("Upload session cancelled"),
            Err(e) => warn!(error = %e, "Failed to cancel upload session"),
        }
    }

    async fn verify(&self, request: &UploadRequest, record: DestinationRecord) -> Result<DestinationRecord> {
        let mismatched: Vec<&str> = request
            .properties
            .iter()
            .filter(|(key, value)| record.property(key) != Some(value.as_str()))
            .map(|(key, _)| key.as_str())
            .collect();

        if mismatched.is_empty() {
            return Ok(record);
        }

        error!(record = %record.id, ?mismatched, "Uploaded record lacks its properties; deleting");
        let cleanup = retry_with_backoff(&self.retry, "delete partial record", &CancellationToken::new(), |_| {
            self.store.delete_record(&record.id)
        })
        .await;

        let detail = match cleanup {
            Ok(()) => "deleted".to_string(),
            Err(e) => format!("delete failed: {}", e),
        };
        Err(BackupError::DestinationInconsistency(format!(
            "record {} missing properties {} ({})",
            record.id,
            mismatched.join(", "),
            detail
        )))
    }
}
