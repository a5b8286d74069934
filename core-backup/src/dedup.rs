//! # Dedup Index
//!
//! Answers "is this content already backed up?" by content identity.
//!
//! The destination-backed index queries the store's property index and
//! treats anything ambiguous as an inconsistency rather than guessing: more
//! than one record per identity, or a record missing the properties every
//! completed upload carries.

use async_trait::async_trait;
use bridge_traits::retry::RetryPolicy;
use bridge_traits::storage::{DestinationRecord, DestinationStore};
use core_async::sync::{CancellationToken, Mutex};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, instrument};

use crate::error::{BackupError, Result};
use crate::hasher::ContentIdentity;
use crate::retry::retry_with_backoff;
use crate::uploader::{keys, REQUIRED_PROPERTIES};

/// Dedup capability
#[async_trait]
pub trait DedupIndex: Send + Sync {
    /// Whether a completed record with this identity exists.
    ///
    /// Errors are never folded into `false`. Retries stop with
    /// [`BackupError::Cancelled`] once `cancel` fires.
    async fn exists(&self, identity: &ContentIdentity, cancel: &CancellationToken) -> Result<bool>;
}

/// [`DedupIndex`] over a [`DestinationStore`] scoped to one backup root.
pub struct DestinationDedupIndex {
    store: Arc<dyn DestinationStore>,
    root_id: String,
    retry: RetryPolicy,
}

impl DestinationDedupIndex {
    pub fn new(store: Arc<dyn DestinationStore>, root_id: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            store,
            root_id: root_id.into(),
            retry,
        }
    }

    fn check_record(identity: &ContentIdentity, record: &DestinationRecord) -> Result<()> {
        let stored = record
            .property(keys::CONTENT_IDENTITY)
            .and_then(ContentIdentity::parse);
        if stored.as_ref() != Some(identity) {
            return Err(BackupError::DestinationInconsistency(format!(
                "record {} answered a lookup for {} but carries identity {:?}",
                record.id,
                identity,
                record.property(keys::CONTENT_IDENTITY)
            )));
        }

        let missing: Vec<&str> = REQUIRED_PROPERTIES
            .iter()
            .copied()
            .filter(|key| record.property(key).map_or(true, str::is_empty))
            .collect();
        if !missing.is_empty() {
            return Err(BackupError::DestinationInconsistency(format!(
                "record {} for {} lacks properties: {}",
                record.id,
                identity,
                missing.join(", ")
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DedupIndex for DestinationDedupIndex {
    #[instrument(skip(self, identity, cancel), fields(identity = %identity))]
    async fn exists(&self, identity: &ContentIdentity, cancel: &CancellationToken) -> Result<bool> {
        let records = retry_with_backoff(&self.retry, "dedup lookup", cancel, |_| {
            self.store
                .find_by_property(&self.root_id, keys::CONTENT_IDENTITY, identity.as_str())
        })
        .await?;

        match records.as_slice() {
            [] => Ok(false),
            [record] => {
                if let Err(e) = Self::check_record(identity, record) {
                    error!(error = %e, "Partial record");
                    return Err(e);
                }
                debug!(record = %record.id, "Already backed up");
                Ok(true)
            }
            many => {
                let ids: Vec<&str> = many.iter().map(|r| r.id.as_str()).collect();
                error!(count = many.len(), ?ids, "Multiple records share one identity");
                Err(BackupError::DestinationInconsistency(format!(
                    "{} records for {}: {}",
                    many.len(),
                    identity,
                    ids.join(", ")
                )))
            }
        }
    }
}

/// In-process [`DedupIndex`].
#[derive(Default)]
pub struct InMemoryDedupIndex {
    known: Mutex<HashSet<ContentIdentity>>,
}

impl InMemoryDedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, identity: ContentIdentity) {
        self.known.lock().await.insert(identity);
    }
}

#[async_trait]
impl DedupIndex for InMemoryDedupIndex {
    async fn exists(&self, identity: &ContentIdentity, cancel: &CancellationToken) -> Result<bool> {
        if cancel.is_cancelled() {
            return Err(BackupError::Cancelled);
        }
        Ok(self.known.lock().await.contains(identity))
    }
}
