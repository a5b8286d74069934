//! # Run Outcome
//!
//! Per-item state machine and the run tally.
//!
//! ```text
//! Discovered → Hashed → DedupChecked → Skipped
//!      │          │           └──────→ Uploading → Uploaded
//!      └──────────┴───────────────────────┴──────→ Failed
//! ```
//!
//! The runner's aggregation loop is the only writer of [`RunOutcome`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one item within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemState {
    Discovered,
    Hashed,
    DedupChecked,
    Uploading,
    Uploaded,
    Skipped,
    Failed,
}

impl ItemState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemState::Uploaded | ItemState::Skipped | ItemState::Failed)
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(self, next: ItemState) -> bool {
        use ItemState::*;
        matches!(
            (self, next),
            (Discovered, Hashed)
                | (Hashed, DedupChecked)
                | (DedupChecked, Skipped)
                | (DedupChecked, Uploading)
                | (Uploading, Uploaded)
                | (Discovered | Hashed | DedupChecked | Uploading, Failed)
        )
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemState::Discovered => "discovered",
            ItemState::Hashed => "hashed",
            ItemState::DedupChecked => "dedup_checked",
            ItemState::Uploading => "uploading",
            ItemState::Uploaded => "uploaded",
            ItemState::Skipped => "skipped",
            ItemState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Where an item's date folder came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateSource {
    Capture,
    Fallback,
}

impl DateSource {
    pub fn as_str(self) -> &'static str {
        match self {
            DateSource::Capture => "capture",
            DateSource::Fallback => "fallback",
        }
    }
}

/// Why a `Skipped` item was not uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// Already in the destination
    Duplicate,
    /// Same content earlier in this run
    DuplicateInRun,
    /// Dry run; would have been uploaded
    DryRun,
}

/// Detail record for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemReport {
    pub archive: String,
    pub entry_path: String,
    pub identity: Option<String>,
    pub state: ItemState,
    pub folder: String,
    pub date_source: DateSource,
    pub metadata_error: Option<String>,
    pub skip_reason: Option<SkipReason>,
    /// Error category and message for `Failed` items
    pub failure: Option<(String, String)>,
    pub record_id: Option<String>,
}

impl ItemReport {
    pub fn discovered(
        archive: impl Into<String>,
        entry_path: impl Into<String>,
        folder: impl Into<String>,
        date_source: DateSource,
        metadata_error: Option<String>,
    ) -> Self {
        Self {
            archive: archive.into(),
            entry_path: entry_path.into(),
            identity: None,
            state: ItemState::Discovered,
            folder: folder.into(),
            date_source,
            metadata_error,
            skip_reason: None,
            failure: None,
            record_id: None,
        }
    }

    /// Move to `next`. Illegal transitions are a programming error and are
    /// recorded as a failure rather than silently accepted.
    pub fn advance(&mut self, next: ItemState) {
        if self.state.can_transition_to(next) {
            self.state = next;
        } else {
            tracing::error!(from = %self.state, to = %next, item = %self.entry_path, "Invalid item transition");
            self.failure = Some((
                "InvalidTransition".to_string(),
                format!("{} -> {}", self.state, next),
            ));
            self.state = ItemState::Failed;
        }
    }

    pub fn skip(&mut self, reason: SkipReason) {
        self.advance(ItemState::Skipped);
        self.skip_reason = Some(reason);
    }

    pub fn fail(&mut self, kind: &str, message: impl Into<String>) {
        self.advance(ItemState::Failed);
        self.failure = Some((kind.to_string(), message.into()));
    }

    /// `archive:path`
    pub fn label(&self) -> String {
        format!("{}:{}", self.archive, self.entry_path)
    }
}

/// Result of one run, delivered to notifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub label: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub archives: usize,
    pub seen: usize,
    /// Uploads filed under a capture date read from the sidecar
    pub uploaded: usize,
    /// Uploads filed under a fallback date, never counted in `uploaded`
    pub uploaded_fallback: usize,
    pub skipped: usize,
    pub failed: usize,
    pub would_upload: usize,
    pub metadata_fallbacks: usize,
    /// Items never started because the run was aborted or timed out
    pub abandoned: usize,
    pub failures: Vec<(String, String)>,
    pub items: Vec<ItemReport>,
    pub fatal: Option<String>,
    pub timed_out: bool,
}

/// Number of failures shown in rendered summaries.
const SUMMARY_FAILURE_SAMPLE: usize = 20;

impl RunOutcome {
    pub fn new(label: impl Into<String>, dry_run: bool, started_at: DateTime<Utc>) -> Self {
        Self {
            label: label.into(),
            dry_run,
            started_at,
            finished_at: None,
            archives: 0,
            seen: 0,
            uploaded: 0,
            uploaded_fallback: 0,
            skipped: 0,
            failed: 0,
            would_upload: 0,
            metadata_fallbacks: 0,
            abandoned: 0,
            failures: Vec::new(),
            items: Vec::new(),
            fatal: None,
            timed_out: false,
        }
    }

    /// Fold one terminal item into the tally.
    pub fn record(&mut self, report: ItemReport) {
        self.seen += 1;
        if report.metadata_error.is_some() {
            self.metadata_fallbacks += 1;
        }
        match report.state {
            ItemState::Uploaded if report.date_source == DateSource::Fallback => {
                self.uploaded_fallback += 1
            }
            ItemState::Uploaded => self.uploaded += 1,
            ItemState::Skipped => {
                self.skipped += 1;
                if report.skip_reason == Some(SkipReason::DryRun) {
                    self.would_upload += 1;
                }
            }
            _ => {
                self.failed += 1;
                let reason = match &report.failure {
                    Some((kind, message)) => format!("{}: {}", kind, message),
                    None => format!("ended in state {}", report.state),
                };
                self.failures.push((report.label(), reason));
            }
        }
        self.items.push(report);
    }

    /// A failure that is not tied to one item (an unreadable archive).
    pub fn record_failure(&mut self, subject: impl Into<String>, reason: impl Into<String>) {
        self.failed += 1;
        self.failures.push((subject.into(), reason.into()));
    }

    pub fn mark_fatal(&mut self, reason: impl Into<String>) {
        if self.fatal.is_none() {
            self.fatal = Some(reason.into());
        }
    }

    pub fn finish(&mut self, at: DateTime<Utc>) {
        self.finished_at = Some(at);
    }

    pub fn is_success(&self) -> bool {
        self.fatal.is_none() && self.failed == 0 && self.abandoned == 0
    }

    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        md.push_str("## Photo backup\n\n");
        md.push_str(&format!("- **Range**: {}\n", self.label));
        md.push_str(&format!(
            "- **Mode**: {}\n",
            if self.dry_run { "dry-run" } else { "upload" }
        ));
        md.push_str(&format!("- **Archives**: {}\n", self.archives));
        md.push_str(&format!("- **Seen**: {}\n", self.seen));
        md.push_str(&format!("- **Uploaded**: {}\n", self.uploaded));
        md.push_str(&format!(
            "- **Uploaded (fallback date)**: {}\n",
            self.uploaded_fallback
        ));
        md.push_str(&format!("- **Skipped**: {}\n", self.skipped));
        if self.dry_run {
            md.push_str(&format!("- **Would upload**: {}\n", self.would_upload));
        }
        md.push_str(&format!("- **Failed**: {}\n", self.failed));
        md.push_str(&format!(
            "- **Fallback dates**: {}\n",
            self.metadata_fallbacks
        ));
        if self.abandoned > 0 {
            md.push_str(&format!("- **Not started**: {}\n", self.abandoned));
        }
        if self.timed_out {
            md.push_str("- **Timed out**: true\n");
        }
        if let Some(fatal) = &self.fatal {
            md.push_str(&format!("\n**FATAL**: {}\n", fatal));
        }

        if !self.failures.is_empty() {
            md.push_str("\n### Failures (sample)\n\n```\n");
            for (subject, reason) in self.failures.iter().take(SUMMARY_FAILURE_SAMPLE) {
                md.push_str(&format!("{} - {}\n", subject, reason));
            }
            md.push_str("```\n");
        }
        md
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(state_path: &[ItemState]) -> ItemReport {
        let mut report = ItemReport::discovered("t.zip", "a.jpg", "2026-01-06", DateSource::Capture, None);
        for state in state_path {
            report.advance(*state);
        }
        report
    }

    #[test]
    fn test_transitions() {
        use ItemState::*;
        assert!(Discovered.can_transition_to(Hashed));
        assert!(DedupChecked.can_transition_to(Skipped));
        assert!(Uploading.can_transition_to(Failed));
        assert!(!Discovered.can_transition_to(Uploaded));
        assert!(!Skipped.can_transition_to(Uploading));
        assert!(!Failed.can_transition_to(Failed));
        assert!(Uploaded.is_terminal() && !Uploading.is_terminal());
    }

    #[test]
    fn test_invalid_transition_fails_item() {
        let report = report(&[ItemState::Uploaded]);
        assert_eq!(report.state, ItemState::Failed);
        assert_eq!(report.failure.as_ref().map(|f| f.0.as_str()), Some("InvalidTransition"));
    }

    #[test]
    fn test_tally() {
        use ItemState::*;
        let mut outcome = RunOutcome::new("incremental", true, Utc::now());

        outcome.record(report(&[Hashed, DedupChecked, Uploading, Uploaded]));

        let mut dry = report(&[Hashed, DedupChecked]);
        dry.skip(SkipReason::DryRun);
        outcome.record(dry);

        let mut dup = report(&[Hashed, DedupChecked]);
        dup.metadata_error = Some("no sidecar".to_string());
        dup.skip(SkipReason::Duplicate);
        outcome.record(dup);

        let mut failed = report(&[Hashed]);
        failed.fail("TransientNetworkError", "gave up");
        outcome.record(failed);

        assert_eq!(outcome.seen, 4);
        assert_eq!(outcome.uploaded, 1);
        assert_eq!(outcome.skipped, 2);
        assert_eq!(outcome.would_upload, 1);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.metadata_fallbacks, 1);
        assert_eq!(outcome.failures[0].0, "t.zip:a.jpg");
        assert!(!outcome.is_success());
    }

    #[test]
    fn test_fallback_upload_is_its_own_category() {
        use ItemState::*;
        let mut outcome = RunOutcome::new("all", false, Utc::now());

        outcome.record(report(&[Hashed, DedupChecked, Uploading, Uploaded]));

        let mut fallback =
            ItemReport::discovered("t.zip", "c.jpg", "2026-02-15", DateSource::Fallback, Some("no sidecar".into()));
        for state in [Hashed, DedupChecked, Uploading, Uploaded] {
            fallback.advance(state);
        }
        outcome.record(fallback);

        let mut dup = report(&[Hashed, DedupChecked]);
        dup.skip(SkipReason::Duplicate);
        outcome.record(dup);

        assert_eq!(outcome.seen, 3);
        assert_eq!(outcome.uploaded, 1);
        assert_eq!(outcome.uploaded_fallback, 1);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.failed, 0);
        assert_eq!(
            outcome.seen,
            outcome.uploaded + outcome.uploaded_fallback + outcome.skipped + outcome.failed
        );
        assert!(outcome.is_success());
        assert!(outcome.to_markdown().contains("- **Uploaded (fallback date)**: 1"));
    }

    #[test]
    fn test_markdown() {
        let mut outcome = RunOutcome::new("2026-01-01..2026-01-31", false, Utc::now());
        outcome.record_failure("takeout-003.zip", "ReadError: corrupt");
        outcome.mark_fatal("AuthError: token revoked");
        outcome.mark_fatal("second reason is ignored");

        let md = outcome.to_markdown();
        assert!(md.contains("- **Range**: 2026-01-01..2026-01-31"));
        assert!(md.contains("- **Failed**: 1"));
        assert!(md.contains("**FATAL**: AuthError: token revoked"));
        assert!(md.contains("takeout-003.zip - ReadError: corrupt"));
        assert!(!md.contains("Would upload"));
    }
}
