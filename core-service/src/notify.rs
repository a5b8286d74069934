//! Run notification sinks.
//!
//! The service hands every finished run to each configured [`Notifier`].
//! Delivery to the operator (mail, chat) lives outside this workspace; the
//! sinks here cover structured logs and Markdown step summaries.

use async_trait::async_trait;
use core_async::fs::OpenOptions;
use core_async::io::AsyncWriteExt;
use core_backup::{RunOutcome, ScanReport};
use std::path::PathBuf;
use tracing::{error, info, warn};

use crate::error::{CoreError, Result};

/// What a run produced.
#[derive(Debug, Clone)]
pub enum RunSummary {
    Backup(RunOutcome),
    Scan(ScanReport),
}

impl RunSummary {
    pub fn to_markdown(&self) -> String {
        match self {
            RunSummary::Backup(outcome) => outcome.to_markdown(),
            RunSummary::Scan(report) => report.to_markdown(),
        }
    }

    /// The backup outcome, if this was not a scan-only run.
    pub fn outcome(&self) -> Option<&RunOutcome> {
        match self {
            RunSummary::Backup(outcome) => Some(outcome),
            RunSummary::Scan(_) => None,
        }
    }
}

/// Consumer of finished runs.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, summary: &RunSummary) -> Result<()>;
}

/// Emits the summary as structured log events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, summary: &RunSummary) -> Result<()> {
        match summary {
            RunSummary::Scan(report) => {
                info!(
                    label = %report.label,
                    archives = report.archives,
                    media_entries = report.media_entries,
                    without_sidecar = report.without_sidecar,
                    selected = report.selected,
                    "Scan complete"
                );
            }
            RunSummary::Backup(outcome) => {
                if let Some(fatal) = &outcome.fatal {
                    error!(label = %outcome.label, %fatal, "Backup run aborted");
                }
                for (subject, reason) in &outcome.failures {
                    warn!(%subject, %reason, "Item failed");
                }
                info!(
                    label = %outcome.label,
                    dry_run = outcome.dry_run,
                    seen = outcome.seen,
                    uploaded = outcome.uploaded,
                    uploaded_fallback = outcome.uploaded_fallback,
                    skipped = outcome.skipped,
                    failed = outcome.failed,
                    would_upload = outcome.would_upload,
                    metadata_fallbacks = outcome.metadata_fallbacks,
                    abandoned = outcome.abandoned,
                    timed_out = outcome.timed_out,
                    "Backup run complete"
                );
            }
        }
        Ok(())
    }
}

/// Appends the Markdown summary to a file, such as the one named by
/// `GITHUB_STEP_SUMMARY`.
#[derive(Debug, Clone)]
pub struct MarkdownSummaryNotifier {
    path: PathBuf,
}

impl MarkdownSummaryNotifier {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Notifier for the CI step summary file, when one is configured.
    pub fn from_env() -> Option<Self> {
        std::env::var_os("GITHUB_STEP_SUMMARY")
            .filter(|v| !v.is_empty())
            .map(Self::new)
    }
}

#[async_trait]
impl Notifier for MarkdownSummaryNotifier {
    async fn notify(&self, summary: &RunSummary) -> Result<()> {
        let failed = |e: std::io::Error| {
            CoreError::Notification(format!("{}: {}", self.path.display(), e))
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(failed)?;
        let mut text = summary.to_markdown();
        text.push('\n');
        file.write_all(text.as_bytes()).await.map_err(failed)?;
        file.flush().await.map_err(failed)?;
        Ok(())
    }
}
