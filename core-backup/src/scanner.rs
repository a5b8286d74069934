//! # Archive Scanner
//!
//! Selects archives and the media items inside them for a run.
//!
//! ## Requests
//!
//! - [`ScanRequest::Incremental`]: archives after the processing cursor
//! - [`ScanRequest::Range`]: items whose local date falls in inclusive bounds
//! - [`ScanRequest::RecentMonths`]: rolling window ending today
//! - [`ScanRequest::All`]: everything
//!
//! Archives are processed oldest first (modification time, then name). Only
//! sidecars are read while planning; media bytes are left to the runner.
//! [`ArchiveScanner::scan_only`] reports what a plan would contain without
//! touching the destination.

use bridge_traits::archive::{ArchiveEntry, ArchiveRef, ArchiveSource};
use bridge_traits::cursor::ProcessingCursor;
use chrono::NaiveDate;
use core_runtime::FallbackDatePolicy;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::date::{format_date, month_end, months_before, parse_date, parse_month, DateResolver};
use crate::error::{BackupError, Result};
use crate::metadata::{
    find_sidecar, is_media_path, is_sidecar, read_metadata, ItemMetadata, SidecarInput,
};
use crate::outcome::DateSource;

/// What a run should cover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanRequest {
    Incremental,
    /// Inclusive local-date bounds
    Range { start: NaiveDate, end: NaiveDate },
    /// `[today - n months, today]` in the target offset
    RecentMonths(u32),
    All,
}

impl ScanRequest {
    pub fn range(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(BackupError::Config(format!(
                "Range start {} is after end {}",
                start, end
            )));
        }
        Ok(ScanRequest::Range { start, end })
    }

    /// Local days, `YYYY-MM-DD` to `YYYY-MM-DD` inclusive.
    pub fn days(start: &str, end: &str) -> Result<Self> {
        Self::range(parse_date(start)?, parse_date(end)?)
    }

    /// Whole months, `YYYY-MM` to `YYYY-MM` inclusive.
    pub fn months(start: &str, end: &str) -> Result<Self> {
        let first = parse_month(start)?;
        let last = month_end(parse_month(end)?);
        Self::range(first, last)
    }

    /// Resolved inclusive bounds, if the request filters by date.
    pub fn bounds(&self, resolver: &DateResolver) -> Option<(NaiveDate, NaiveDate)> {
        match self {
            ScanRequest::Range { start, end } => Some((*start, *end)),
            ScanRequest::RecentMonths(n) => {
                let today = resolver.today();
                Some((months_before(today, *n), today))
            }
            ScanRequest::Incremental | ScanRequest::All => None,
        }
    }

    pub fn label(&self, resolver: &DateResolver) -> String {
        match (self, self.bounds(resolver)) {
            (ScanRequest::Incremental, _) => "incremental".to_string(),
            (ScanRequest::All, _) => "all".to_string(),
            (_, Some((start, end))) => format!("{}..{}", format_date(start), format_date(end)),
            (_, None) => "all".to_string(),
        }
    }
}

/// Scanner settings taken from the run configuration.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub favorites_only: bool,
    pub max_archives: Option<usize>,
    pub fallback: FallbackDatePolicy,
}

/// One media entry selected for processing.
#[derive(Debug, Clone)]
pub struct PlannedItem {
    pub archive: ArchiveRef,
    pub entry: ArchiveEntry,
    pub metadata: ItemMetadata,
    /// Destination folder name (`YYYY-MM-DD` or the fallback bucket)
    pub folder: String,
    pub date_source: DateSource,
}

/// Items of one archive, in entry order.
#[derive(Debug, Clone)]
pub struct ArchivePlan {
    pub archive: ArchiveRef,
    pub items: Vec<PlannedItem>,
    /// Set when the archive could not be listed
    pub read_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ScanPlan {
    pub label: String,
    pub archives: Vec<ArchivePlan>,
}

impl ScanPlan {
    pub fn item_count(&self) -> usize {
        self.archives.iter().map(|a| a.items.len()).sum()
    }
}

/// Scan-only summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub label: String,
    pub archives: usize,
    pub unreadable_archives: usize,
    pub media_entries: usize,
    pub with_sidecar: usize,
    pub without_sidecar: usize,
    pub fallback_dates: usize,
    pub favorites: usize,
    pub selected: usize,
}

impl ScanReport {
    pub fn to_markdown(&self) -> String {
        format!(
            "## Photo backup scan\n\n\
             - **Range**: {}\n\
             - **Archives**: {} ({} unreadable)\n\
             - **Media entries**: {}\n\
             - **With sidecar**: {}\n\
             - **Without sidecar**: {}\n\
             - **Fallback dates**: {}\n\
             - **Favorites**: {}\n\
             - **Selected**: {}\n",
            self.label,
            self.archives,
            self.unreadable_archives,
            self.media_entries,
            self.with_sidecar,
            self.without_sidecar,
            self.fallback_dates,
            self.favorites,
            self.selected
        )
    }
}

pub struct ArchiveScanner {
    source: Arc<dyn ArchiveSource>,
    resolver: DateResolver,
    options: ScanOptions,
}

impl ArchiveScanner {
    pub fn new(source: Arc<dyn ArchiveSource>, resolver: DateResolver, options: ScanOptions) -> Self {
        Self {
            source,
            resolver,
            options,
        }
    }

    /// Archives the request covers, oldest first, capped by
    /// `max_archives`.
    pub async fn select_archives(
        &self,
        request: &ScanRequest,
        cursor: Option<&ProcessingCursor>,
    ) -> Result<Vec<ArchiveRef>> {
        let mut archives = self.source.list_archives().await.map_err(|e| BackupError::Read {
            archive: "<source>".to_string(),
            message: e.to_string(),
        })?;
        archives.sort_by(|a, b| a.order_key().cmp(&b.order_key()));

        if let (ScanRequest::Incremental, Some(cursor)) = (request, cursor) {
            let before = archives.len();
            archives.retain(|archive| !cursor.covers(archive));
            debug!(
                skipped = before - archives.len(),
                cursor = %cursor.archive_name,
                "Archives already covered by cursor"
            );
        }

        if let Some(max) = self.options.max_archives {
            archives.truncate(max);
        }
        Ok(archives)
    }

    /// Build the work plan for a run.
    #[instrument(skip(self, cursor))]
    pub async fn plan(
        &self,
        request: &ScanRequest,
        cursor: Option<&ProcessingCursor>,
    ) -> Result<ScanPlan> {
        let bounds = request.bounds(&self.resolver);
        let archives = self.select_archives(request, cursor).await?;

        let mut plans = Vec::with_capacity(archives.len());
        for archive in archives {
            plans.push(self.plan_archive(archive, bounds).await);
        }

        let plan = ScanPlan {
            label: request.label(&self.resolver),
            archives: plans,
        };
        info!(
            archives = plan.archives.len(),
            items = plan.item_count(),
            label = %plan.label,
            "Scan planned"
        );
        Ok(plan)
    }

    /// Enumerate and count without reading media bytes or contacting the
    /// destination.
    pub async fn scan_only(
        &self,
        request: &ScanRequest,
        cursor: Option<&ProcessingCursor>,
    ) -> Result<ScanReport> {
        let bounds = request.bounds(&self.resolver);
        let archives = self.select_archives(request, cursor).await?;

        let mut report = ScanReport {
            label: request.label(&self.resolver),
            archives: archives.len(),
            ..ScanReport::default()
        };

        for archive in archives {
            let entries = match self.source.list_entries(&archive).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(archive = %archive.name, error = %e, "Archive unreadable");
                    report.unreadable_archives += 1;
                    continue;
                }
            };
            let media = self.media_entries(&entries);
            report.media_entries += media.len();

            for (entry, sidecar) in media {
                if sidecar.is_some() {
                    report.with_sidecar += 1;
                } else {
                    report.without_sidecar += 1;
                }
                let item = self.describe(&archive, entry, sidecar).await;
                if item.date_source == DateSource::Fallback {
                    report.fallback_dates += 1;
                }
                if item.metadata.favorite {
                    report.favorites += 1;
                }
                if self.selected(&item, bounds) {
                    report.selected += 1;
                }
            }
        }
        Ok(report)
    }

    async fn plan_archive(
        &self,
        archive: ArchiveRef,
        bounds: Option<(NaiveDate, NaiveDate)>,
    ) -> ArchivePlan {
        let entries = match self.source.list_entries(&archive).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(archive = %archive.name, error = %e, "Archive unreadable");
                return ArchivePlan {
                    archive,
                    items: Vec::new(),
                    read_error: Some(e.to_string()),
                };
            }
        };

        let mut items = Vec::new();
        for (entry, sidecar) in self.media_entries(&entries) {
            let item = self.describe(&archive, entry, sidecar).await;
            if self.selected(&item, bounds) {
                items.push(item);
            }
        }
        debug!(archive = %archive.name, items = items.len(), "Archive planned");

        ArchivePlan {
            archive,
            items,
            read_error: None,
        }
    }

    /// Media entries paired with their sidecar path.
    fn media_entries<'a>(&self, entries: &'a [ArchiveEntry]) -> Vec<(&'a ArchiveEntry, Option<String>)> {
        let paths: HashSet<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        entries
            .iter()
            .filter(|e| !is_sidecar(&e.path))
            .filter_map(|entry| {
                let sidecar = find_sidecar(&entry.path, &paths);
                (sidecar.is_some() || is_media_path(&entry.path)).then_some((entry, sidecar))
            })
            .collect()
    }

    async fn describe(
        &self,
        archive: &ArchiveRef,
        entry: &ArchiveEntry,
        sidecar: Option<String>,
    ) -> PlannedItem {
        let metadata = match sidecar.as_deref() {
            None => read_metadata(&entry.path, SidecarInput::Absent),
            Some(path) => match self.source.read_entry(archive, path).await {
                Ok(bytes) => read_metadata(&entry.path, SidecarInput::Present { path, bytes: &bytes }),
                Err(e) => read_metadata(
                    &entry.path,
                    SidecarInput::Unreadable {
                        path,
                        error: e.to_string(),
                    },
                ),
            },
        };

        let (folder, date_source) = match metadata.capture_time {
            Some(instant) => (self.resolver.folder_name(instant), DateSource::Capture),
            None => (self.fallback_folder(archive), DateSource::Fallback),
        };

        if let Some(issue) = &metadata.issue {
            debug!(entry = %entry.path, %issue, folder = %folder, "Using fallback date");
        }

        PlannedItem {
            archive: archive.clone(),
            entry: entry.clone(),
            metadata,
            folder,
            date_source,
        }
    }

    /// Date an item was ingested: the archive's timestamp, or today.
    fn ingestion_date(&self, archive: &ArchiveRef) -> NaiveDate {
        match archive.modified_at {
            Some(t) => self.resolver.local_date(t),
            None => self.resolver.today(),
        }
    }

    fn fallback_folder(&self, archive: &ArchiveRef) -> String {
        match &self.options.fallback {
            FallbackDatePolicy::IngestionDate => format_date(self.ingestion_date(archive)),
            FallbackDatePolicy::Bucket(name) => name.clone(),
        }
    }

    fn selected(&self, item: &PlannedItem, bounds: Option<(NaiveDate, NaiveDate)>) -> bool {
        if self.options.favorites_only && !item.metadata.favorite {
            return false;
        }
        let Some((start, end)) = bounds else {
            return true;
        };
        let date = match item.metadata.capture_time {
            Some(instant) => self.resolver.local_date(instant),
            None => self.ingestion_date(&item.archive),
        };
        start <= date && date <= end
    }
}
