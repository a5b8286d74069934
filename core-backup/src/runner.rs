//! # Pipeline Runner
//!
//! Drives every planned item through
//! `Discovered → Hashed → DedupChecked → {Skipped | Uploading → Uploaded | Failed}`
//! on a bounded pool and folds the results into one [`RunOutcome`].
//!
//! ## Concurrency
//!
//! - Items run on `futures` `buffer_unordered`, at most
//!   `max_concurrent_items` at a time.
//! - The loop draining that stream is the only writer of the outcome.
//! - Date folders are resolved behind one mutex with a per-run cache.
//! - Items with equal content are serialised on their identity; the later
//!   one resolves to `Skipped`.
//!
//! ## Cancellation
//!
//! The caller's token, a run timeout and any fatal error all cancel the same
//! run-scoped token. Items not yet started are counted as abandoned;
//! in-flight uploads stop between chunks and cancel their session.

use bridge_traits::archive::{ArchiveRef, ArchiveSource};
use bridge_traits::cursor::ProcessingCursor;
use bridge_traits::retry::RetryPolicy;
use bridge_traits::storage::{DestinationStore, PropertyMap, ROOT_PROPERTY_KEY};
use core_async::sync::{CancellationToken, Mutex};
use core_async::task::{spawn, spawn_blocking};
use core_async::time::{timeout, Duration};
use core_runtime::logging::strip_path;
use core_runtime::BackupConfig;
use futures::stream::{self, StreamExt};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::date::DateResolver;
use crate::dedup::DedupIndex;
use crate::error::{BackupError, Result};
use crate::hasher::{hash_bytes, ContentIdentity};
use crate::metadata::MediaItem;
use crate::outcome::{DateSource, ItemReport, ItemState, RunOutcome, SkipReason};
use crate::retry::retry_with_backoff;
use crate::scanner::{PlannedItem, ScanPlan};
use crate::uploader::{keys, ResilientUploader, UploadRequest};

/// Sidecars larger than this are left out of the record description.
const MAX_EMBEDDED_SIDECAR_BYTES: usize = 16 * 1024;

/// Settings the runner takes from [`BackupConfig`].
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub root_id: String,
    pub source_tag: String,
    pub max_concurrent_items: usize,
    pub run_timeout: Option<Duration>,
    /// Policy for the root check and folder resolution
    pub query_retry: RetryPolicy,
}

impl RunnerConfig {
    pub fn from_config(config: &BackupConfig) -> Self {
        Self {
            root_id: config.drive_root_id.clone(),
            source_tag: config.source_tag.clone(),
            max_concurrent_items: config.max_concurrent_items,
            run_timeout: config.run_timeout,
            query_retry: config.query_retry.clone(),
        }
    }
}

/// Outcome plus the cursor position the run earned.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub outcome: RunOutcome,
    /// Last archive of the leading run of fully processed archives. `None`
    /// for dry runs, fatal runs, or when the first archive is incomplete.
    pub cursor: Option<ProcessingCursor>,
}

/// State shared by the items of one run.
struct RunContext {
    cancel: CancellationToken,
    folders: Mutex<HashMap<String, String>>,
    identity_locks: Mutex<HashMap<ContentIdentity, Arc<Mutex<()>>>>,
    completed: Mutex<HashSet<ContentIdentity>>,
}

impl RunContext {
    fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            folders: Mutex::new(HashMap::new()),
            identity_locks: Mutex::new(HashMap::new()),
            completed: Mutex::new(HashSet::new()),
        }
    }

    async fn identity_lock(&self, identity: &ContentIdentity) -> Arc<Mutex<()>> {
        self.identity_locks
            .lock()
            .await
            .entry(identity.clone())
            .or_default()
            .clone()
    }
}

enum Finished {
    NotStarted {
        archive: usize,
    },
    Done {
        archive: usize,
        report: ItemReport,
        error: Option<BackupError>,
    },
}

pub struct PipelineRunner {
    source: Arc<dyn ArchiveSource>,
    store: Arc<dyn DestinationStore>,
    dedup: Arc<dyn DedupIndex>,
    uploader: ResilientUploader,
    resolver: DateResolver,
    config: RunnerConfig,
}

impl PipelineRunner {
    pub fn new(
        source: Arc<dyn ArchiveSource>,
        store: Arc<dyn DestinationStore>,
        dedup: Arc<dyn DedupIndex>,
        resolver: DateResolver,
        config: &BackupConfig,
    ) -> Self {
        let uploader = ResilientUploader::new(
            store.clone(),
            config.chunk_size_bytes,
            config.resumable_threshold_bytes,
            config.upload_retry.clone(),
        );
        Self {
            source,
            store,
            dedup,
            uploader,
            resolver,
            config: RunnerConfig::from_config(config),
        }
    }

    /// Process `plan`. Always returns an outcome, even when every item
    /// failed or the run was aborted.
    #[instrument(skip(self, plan, cancel), fields(label = %plan.label))]
    pub async fn run(&self, plan: ScanPlan, dry_run: bool, cancel: &CancellationToken) -> RunResult {
        let mut outcome = RunOutcome::new(plan.label.clone(), dry_run, self.resolver.now());
        outcome.archives = plan.archives.len();

        let ctx = RunContext::new(cancel.child_token());
        let timed_out = Arc::new(AtomicBool::new(false));
        let timer = self.config.run_timeout.map(|limit| {
            let token = ctx.cancel.clone();
            let fired = timed_out.clone();
            spawn(async move {
                if timeout(limit, token.cancelled()).await.is_err() {
                    warn!(timeout_secs = limit.as_secs(), "Run timeout reached, stopping");
                    fired.store(true, Ordering::SeqCst);
                    token.cancel();
                }
            })
        });

        let mut archives: Vec<ArchiveRef> = Vec::with_capacity(plan.archives.len());
        let mut clean: Vec<bool> = Vec::with_capacity(plan.archives.len());
        let mut work: Vec<(usize, PlannedItem)> = Vec::new();
        for (index, archive_plan) in plan.archives.into_iter().enumerate() {
            if let Some(message) = &archive_plan.read_error {
                outcome.record_failure(
                    archive_plan.archive.name.clone(),
                    format!("ReadError: {}", message),
                );
            }
            clean.push(archive_plan.read_error.is_none());
            work.extend(archive_plan.items.into_iter().map(|item| (index, item)));
            archives.push(archive_plan.archive);
        }

        match self.verify_root(&ctx.cancel).await {
            Ok(()) => self.drive(&ctx, work, dry_run, &mut outcome, &mut clean).await,
            Err(e) => {
                if e != BackupError::Cancelled {
                    error!(error = %e, root = %self.config.root_id, "Backup root unreachable");
                    outcome.mark_fatal(format!("{}: backup root unreachable: {}", e.kind(), e));
                }
                for (archive, _) in &work {
                    clean[*archive] = false;
                }
                outcome.abandoned += work.len();
            }
        }

        // Releases the timer task.
        ctx.cancel.cancel();
        if let Some(timer) = timer {
            if let Err(e) = timer.await {
                warn!(error = %e, "Run timeout task ended abnormally");
            }
        }
        outcome.timed_out = timed_out.load(Ordering::SeqCst);
        outcome.finish(self.resolver.now());

        let cursor = if dry_run || outcome.fatal.is_some() {
            None
        } else {
            archives
                .iter()
                .zip(&clean)
                .take_while(|(_, complete)| **complete)
                .last()
                .map(|(archive, _)| ProcessingCursor::at(archive, self.resolver.now()))
        };

        info!(
            seen = outcome.seen,
            uploaded = outcome.uploaded,
            uploaded_fallback = outcome.uploaded_fallback,
            skipped = outcome.skipped,
            failed = outcome.failed,
            would_upload = outcome.would_upload,
            metadata_fallbacks = outcome.metadata_fallbacks,
            abandoned = outcome.abandoned,
            fatal = outcome.fatal.is_some(),
            "Run finished"
        );

        RunResult { outcome, cursor }
    }

    async fn drive(
        &self,
        ctx: &RunContext,
        work: Vec<(usize, PlannedItem)>,
        dry_run: bool,
        outcome: &mut RunOutcome,
        clean: &mut [bool],
    ) {
        let mut results = stream::iter(work)
            .map(|(archive, item)| async move {
                if ctx.cancel.is_cancelled() {
                    return Finished::NotStarted { archive };
                }
                let (report, error) = self.process(ctx, item, dry_run).await;
                Finished::Done {
                    archive,
                    report,
                    error,
                }
            })
            .buffer_unordered(self.config.max_concurrent_items.max(1));

        while let Some(finished) = results.next().await {
            match finished {
                Finished::NotStarted { archive } => {
                    outcome.abandoned += 1;
                    clean[archive] = false;
                }
                Finished::Done {
                    archive,
                    report,
                    error,
                } => {
                    match &error {
                        Some(BackupError::Cancelled) => {
                            outcome.abandoned += 1;
                            clean[archive] = false;
                            continue;
                        }
                        Some(e) if e.is_fatal() => {
                            error!(error = %e, "Fatal error, aborting run");
                            outcome.mark_fatal(format!("{}: {}", e.kind(), e));
                            ctx.cancel.cancel();
                        }
                        _ => {}
                    }
                    if !matches!(report.state, ItemState::Uploaded | ItemState::Skipped) {
                        clean[archive] = false;
                    }
                    outcome.record(report);
                }
            }
        }
    }

    async fn verify_root(&self, cancel: &CancellationToken) -> Result<()> {
        retry_with_backoff(&self.config.query_retry, "check backup root", cancel, |_| {
            self.store.check_root(&self.config.root_id)
        })
        .await
    }

    #[instrument(skip_all, fields(archive = %item.archive.name, entry = %item.entry.path))]
    async fn process(
        &self,
        ctx: &RunContext,
        item: PlannedItem,
        dry_run: bool,
    ) -> (ItemReport, Option<BackupError>) {
        let mut report = ItemReport::discovered(
            &item.archive.name,
            &item.entry.path,
            &item.folder,
            item.date_source,
            item.metadata.issue.as_ref().map(ToString::to_string),
        );
        if let Some(issue) = &item.metadata.issue {
            warn!(%issue, folder = %item.folder, "MetadataError: using fallback date");
        }

        match self.advance(ctx, item, &mut report, dry_run).await {
            Ok(()) => (report, None),
            Err(e) => {
                if e != BackupError::Cancelled {
                    warn!(error = %e, kind = e.kind(), state = %report.state, "Item failed");
                }
                report.fail(e.kind(), e.to_string());
                (report, Some(e))
            }
        }
    }

    async fn advance(
        &self,
        ctx: &RunContext,
        item: PlannedItem,
        report: &mut ItemReport,
        dry_run: bool,
    ) -> Result<()> {
        let PlannedItem {
            archive,
            entry,
            metadata,
            folder,
            date_source,
        } = item;

        let bytes = self
            .source
            .read_entry(&archive, &entry.path)
            .await
            .map_err(|e| BackupError::Read {
                archive: archive.name.clone(),
                message: format!("{}: {}", entry.path, e),
            })?;
        let media = MediaItem {
            archive,
            entry_path: entry.path,
            metadata,
            bytes,
        };

        let identity = self.hash(&media).await?;
        report.identity = Some(identity.to_string());
        report.advance(ItemState::Hashed);

        let lock = ctx.identity_lock(&identity).await;
        let _held = lock.lock().await;

        if ctx.completed.lock().await.contains(&identity) {
            report.advance(ItemState::DedupChecked);
            report.skip(SkipReason::DuplicateInRun);
            debug!(%identity, "Same content already handled in this run");
            return Ok(());
        }

        let exists = self.dedup.exists(&identity, &ctx.cancel).await?;
        report.advance(ItemState::DedupChecked);

        if exists {
            report.skip(SkipReason::Duplicate);
            ctx.completed.lock().await.insert(identity);
            return Ok(());
        }
        if dry_run {
            report.skip(SkipReason::DryRun);
            ctx.completed.lock().await.insert(identity);
            return Ok(());
        }
        if ctx.cancel.is_cancelled() {
            return Err(BackupError::Cancelled);
        }

        let folder_id = self.folder_id(ctx, &folder).await?;
        report.advance(ItemState::Uploading);

        let request = self.upload_request(&media, &identity, &folder, date_source, folder_id);
        let record = self.uploader.upload(&request, &ctx.cancel).await?;

        info!(file = strip_path(&media.entry_path), record = %record.id, folder = %folder, "Uploaded");
        report.record_id = Some(record.id);
        report.advance(ItemState::Uploaded);
        ctx.completed.lock().await.insert(identity);
        Ok(())
    }

    /// Hash off the async workers; videos can be large.
    async fn hash(&self, media: &MediaItem) -> Result<ContentIdentity> {
        let bytes = media.bytes.clone();
        spawn_blocking(move || hash_bytes(&bytes))
            .await
            .map_err(|e| BackupError::Read {
                archive: media.archive.name.clone(),
                message: format!("{}: hashing aborted: {}", media.entry_path, e),
            })
    }

    /// Folder id for `name` under the backup root, created once per run.
    async fn folder_id(&self, ctx: &RunContext, name: &str) -> Result<String> {
        let mut folders = ctx.folders.lock().await;
        if let Some(id) = folders.get(name) {
            return Ok(id.clone());
        }

        let root = self.config.root_id.as_str();
        let id = retry_with_backoff(&self.config.query_retry, "ensure date folder", &ctx.cancel, |_| {
            self.store.ensure_folder(root, name)
        })
        .await?;
        debug!(folder = name, id = %id, "Date folder resolved");
        folders.insert(name.to_string(), id.clone());
        Ok(id)
    }

    fn upload_request(
        &self,
        media: &MediaItem,
        identity: &ContentIdentity,
        folder: &str,
        date_source: DateSource,
        folder_id: String,
    ) -> UploadRequest {
        let mut properties = PropertyMap::new();
        properties.insert(keys::CONTENT_IDENTITY.to_string(), identity.to_string());
        properties.insert(keys::CAPTURE_LOCAL_DATE.to_string(), folder.to_string());
        properties.insert(keys::MIME_TYPE.to_string(), media.metadata.mime_type.clone());
        properties.insert(keys::SOURCE.to_string(), self.config.source_tag.clone());
        properties.insert(keys::DATE_SOURCE.to_string(), date_source.as_str().to_string());
        properties.insert(ROOT_PROPERTY_KEY.to_string(), self.config.root_id.clone());

        UploadRequest {
            folder_id,
            name: media.metadata.original_name.clone(),
            mime_type: media.metadata.mime_type.clone(),
            bytes: media.bytes.clone(),
            properties,
            description: Some(self.description(media, identity, folder, date_source)),
        }
    }

    /// Free-text description: provenance plus the sidecar when small.
    fn description(
        &self,
        media: &MediaItem,
        identity: &ContentIdentity,
        folder: &str,
        date_source: DateSource,
    ) -> String {
        let mut doc = json!({
            "source": self.config.source_tag,
            "archive": media.archive.name,
            "path": media.entry_path,
            "contentIdentity": identity.as_str(),
            "captureLocalDate": folder,
            "dateSource": date_source.as_str(),
        });
        if let Some(path) = &media.metadata.sidecar_path {
            doc["sidecarPath"] = json!(path);
        }
        if let Some(sidecar) = &media.metadata.sidecar {
            let size = serde_json::to_string(sidecar).map_or(usize::MAX, |s| s.len());
            if size <= MAX_EMBEDDED_SIDECAR_BYTES {
                doc["sidecar"] = sidecar.clone();
            }
        }
        doc.to_string()
    }
}
