//! Backup run lifecycle.
//!
//! One [`BackupService::run`] call:
//!
//! 1. loads the processing cursor (incremental runs only)
//! 2. plans the run with [`ArchiveScanner`]
//! 3. drives the plan through [`PipelineRunner`]
//! 4. saves the earned cursor when the run was incremental, real and not fatal
//! 5. hands the summary to every notifier

use bridge_traits::archive::ArchiveSource;
use bridge_traits::cursor::{CursorStore, ProcessingCursor};
use bridge_traits::storage::DestinationStore;
use bridge_traits::time::{Clock, SystemClock};
use core_async::sync::CancellationToken;
use core_backup::{
    ArchiveScanner, BackupError, DateResolver, DedupIndex, DestinationDedupIndex, PipelineRunner,
    RunOutcome, ScanOptions, ScanRequest,
};
use core_runtime::BackupConfig;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::error::Result;
use crate::notify::{Notifier, RunSummary};

/// One invocation from the scheduling surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub scan: ScanRequest,
    /// Stop every item at `DedupChecked`; no destination writes
    pub dry_run: bool,
    /// Enumerate and count only; no media reads, dedup or upload
    pub scan_only: bool,
}

impl RunRequest {
    pub fn new(scan: ScanRequest) -> Self {
        Self {
            scan,
            dry_run: false,
            scan_only: false,
        }
    }

    pub fn incremental() -> Self {
        Self::new(ScanRequest::Incremental)
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn scan_only(mut self) -> Self {
        self.scan_only = true;
        self
    }
}

/// Primary façade exposed to schedulers and host applications.
#[derive(Clone)]
pub struct BackupService {
    config: BackupConfig,
    source: Arc<dyn ArchiveSource>,
    store: Arc<dyn DestinationStore>,
    cursor_store: Option<Arc<dyn CursorStore>>,
    dedup: Option<Arc<dyn DedupIndex>>,
    notifiers: Vec<Arc<dyn Notifier>>,
    clock: Arc<dyn Clock>,
}

impl BackupService {
    pub fn new(
        config: BackupConfig,
        source: Arc<dyn ArchiveSource>,
        store: Arc<dyn DestinationStore>,
    ) -> Self {
        Self {
            config,
            source,
            store,
            cursor_store: None,
            dedup: None,
            notifiers: Vec::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Persist the processing cursor between incremental runs.
    pub fn with_cursor_store(mut self, store: Arc<dyn CursorStore>) -> Self {
        self.cursor_store = Some(store);
        self
    }

    /// Replace the destination-backed dedup index.
    pub fn with_dedup_index(mut self, dedup: Arc<dyn DedupIndex>) -> Self {
        self.dedup = Some(dedup);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Execute one run.
    ///
    /// Returns `Err` only when the run could not start (cursor unreadable).
    /// Everything after that, including fatal aborts, is reported in the
    /// returned summary and delivered to the notifiers.
    #[instrument(skip(self, request, cancel), fields(scan = ?request.scan, dry_run = request.dry_run))]
    pub async fn run(&self, request: RunRequest, cancel: &CancellationToken) -> Result<RunSummary> {
        let resolver = DateResolver::new(self.config.target_offset, self.clock.clone());
        let cursor = self.load_cursor(&request.scan).await?;
        let scanner = ArchiveScanner::new(self.source.clone(), resolver.clone(), self.scan_options());

        if request.scan_only {
            let report = scanner.scan_only(&request.scan, cursor.as_ref()).await?;
            let summary = RunSummary::Scan(report);
            self.deliver(&summary).await;
            return Ok(summary);
        }

        let plan = match scanner.plan(&request.scan, cursor.as_ref()).await {
            Ok(plan) => plan,
            Err(e) => {
                error!(error = %e, "Archive listing failed");
                let mut outcome =
                    RunOutcome::new(request.scan.label(&resolver), request.dry_run, resolver.now());
                outcome.mark_fatal(format!("{}: {}", e.kind(), e));
                outcome.finish(resolver.now());
                let summary = RunSummary::Backup(outcome);
                self.deliver(&summary).await;
                return Ok(summary);
            }
        };

        let dedup: Arc<dyn DedupIndex> = match &self.dedup {
            Some(dedup) => dedup.clone(),
            None => Arc::new(DestinationDedupIndex::new(
                self.store.clone(),
                self.config.drive_root_id.clone(),
                self.config.query_retry.clone(),
            )),
        };
        let runner = PipelineRunner::new(
            self.source.clone(),
            self.store.clone(),
            dedup,
            resolver,
            &self.config,
        );

        let result = runner.run(plan, request.dry_run, cancel).await;
        let mut outcome = result.outcome;

        if request.scan == ScanRequest::Incremental && !request.dry_run && outcome.fatal.is_none() {
            if let Some(next) = result.cursor {
                if let Err(e) = self.save_cursor(&next).await {
                    error!(error = %e, "Cursor not saved; next run repeats these archives");
                    outcome.record_failure("cursor", format!("{}: {}", e.kind(), e));
                }
            }
        }

        let summary = RunSummary::Backup(outcome);
        self.deliver(&summary).await;
        Ok(summary)
    }

    fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            favorites_only: self.config.favorites_only,
            max_archives: self.config.max_archives_per_run,
            fallback: self.config.fallback_policy.clone(),
        }
    }

    async fn load_cursor(&self, scan: &ScanRequest) -> Result<Option<ProcessingCursor>> {
        let (ScanRequest::Incremental, Some(store)) = (scan, &self.cursor_store) else {
            return Ok(None);
        };
        let cursor = store
            .load()
            .await
            .map_err(|e| BackupError::Cursor(format!("load failed: {}", e)))?;
        match &cursor {
            Some(c) => info!(archive = %c.archive_name, at = %c.archive_modified_at, "Resuming after cursor"),
            None => info!("No cursor stored, scanning every archive"),
        }
        Ok(cursor)
    }

    async fn save_cursor(&self, cursor: &ProcessingCursor) -> std::result::Result<(), BackupError> {
        let Some(store) = &self.cursor_store else {
            return Ok(());
        };
        store
            .save(cursor)
            .await
            .map_err(|e| BackupError::Cursor(format!("save failed: {}", e)))?;
        info!(archive = %cursor.archive_name, "Cursor advanced");
        Ok(())
    }

    async fn deliver(&self, summary: &RunSummary) {
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(summary).await {
                warn!(error = %e, "Notifier failed");
            }
        }
    }
}
