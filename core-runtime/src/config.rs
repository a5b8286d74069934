//! # Backup Configuration Module
//!
//! Provides the configuration value that drives a backup run.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a
//! `BackupConfig`. Building enforces fail-fast validation with actionable
//! messages, so a misconfigured deployment stops before any archive is read.
//! Deployments driven by a scheduler load the same builder from
//! `PHOTO_BACKUP_*` environment variables via [`BackupConfig::from_env`].
//!
//! ## Required Settings
//!
//! - `drive_root_id` - Destination folder under which date folders are created
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::BackupConfig;
//! use std::time::Duration;
//!
//! let config = BackupConfig::builder()
//!     .drive_root_id("1AbCdEf")
//!     .target_offset("+09:00")
//!     .max_concurrent_items(8)
//!     .run_timeout(Duration::from_secs(3600))
//!     .build()?;
//! ```
//!
//! ### From the environment
//!
//! ```ignore
//! // PHOTO_BACKUP_DRIVE_FOLDER_ID=1AbCdEf PHOTO_BACKUP_MAX_ATTEMPTS=8 ...
//! let config = BackupConfig::from_env()?;
//! ```

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use bridge_traits::retry::RetryPolicy;
use chrono::FixedOffset;

use crate::error::{Error, Result};

/// Resumable upload chunks must be a multiple of this many bytes.
pub const CHUNK_ALIGNMENT_BYTES: usize = 256 * 1024;

const DEFAULT_TARGET_OFFSET_SECS: i32 = 9 * 3600;
const DEFAULT_SOURCE_TAG: &str = "google_takeout";
const DEFAULT_CHUNK_SIZE_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_RESUMABLE_THRESHOLD_BYTES: u64 = 5 * 1024 * 1024;
const DEFAULT_MAX_CONCURRENT_ITEMS: usize = 4;
const MAX_CONCURRENT_ITEMS_LIMIT: usize = 64;

const ENV_PREFIX: &str = "PHOTO_BACKUP_";

/// Where items without a usable capture time are filed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FallbackDatePolicy {
    /// Use the archive's modification time in the target offset, or the run
    /// date when the archive carries no timestamp.
    #[default]
    IngestionDate,
    /// File every such item under one fixed folder name.
    Bucket(String),
}

impl fmt::Display for FallbackDatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackDatePolicy::IngestionDate => write!(f, "ingestion-date"),
            FallbackDatePolicy::Bucket(name) => write!(f, "bucket:{}", name),
        }
    }
}

impl FromStr for FallbackDatePolicy {
    type Err = Error;

    /// Accepts `ingestion-date` or `bucket:<folder name>`.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("ingestion-date") {
            return Ok(FallbackDatePolicy::IngestionDate);
        }
        match trimmed.split_once(':') {
            Some((kind, name)) if kind.eq_ignore_ascii_case("bucket") => {
                let name = name.trim();
                if name.is_empty() || name.contains('/') {
                    return Err(Error::Config(format!(
                        "Fallback bucket name '{}' must be non-empty and contain no '/'",
                        name
                    )));
                }
                Ok(FallbackDatePolicy::Bucket(name.to_string()))
            }
            _ => Err(Error::Config(format!(
                "Unknown fallback policy '{}'. Use 'ingestion-date' or 'bucket:<name>'",
                s
            ))),
        }
    }
}

/// Parse a fixed UTC offset such as `+09:00`, `-0530`, `+9`, `Z` or `UTC`.
pub fn parse_offset(value: &str) -> Result<FixedOffset> {
    let v = value.trim();
    if v.eq_ignore_ascii_case("z") || v.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0)
            .ok_or_else(|| Error::Internal("zero offset rejected".to_string()));
    }

    let invalid = || {
        Error::Config(format!(
            "Invalid target offset '{}'. Expected a form like '+09:00' or '-05:30'",
            value
        ))
    };

    let (sign, rest) = match v.as_bytes().first() {
        Some(b'+') => (1, &v[1..]),
        Some(b'-') => (-1, &v[1..]),
        _ => return Err(invalid()),
    };

    let (hours, minutes) = if let Some((h, m)) = rest.split_once(':') {
        (h, m)
    } else if rest.len() == 4 {
        rest.split_at(2)
    } else {
        (rest, "0")
    };

    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if !(0..=14).contains(&hours) || !(0..60).contains(&minutes) {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

/// Validated settings for one backup deployment.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupConfig {
    /// Destination folder id under which `YYYY-MM-DD` folders live
    pub drive_root_id: String,
    /// Offset in which capture instants are turned into calendar dates
    pub target_offset: FixedOffset,
    /// Value written to the `source` property of every record
    pub source_tag: String,
    /// Resumable chunk size, a multiple of [`CHUNK_ALIGNMENT_BYTES`]
    pub chunk_size_bytes: usize,
    /// Items at or above this size use resumable upload
    pub resumable_threshold_bytes: u64,
    /// Upper bound on items in flight at once
    pub max_concurrent_items: usize,
    /// Backoff for upload requests and chunks
    pub upload_retry: RetryPolicy,
    /// Backoff for dedup queries, folder resolution and the root check
    pub query_retry: RetryPolicy,
    /// Whole-run deadline; items not finished by then are cancelled
    pub run_timeout: Option<Duration>,
    /// Process at most this many archives per run, oldest first
    pub max_archives_per_run: Option<usize>,
    /// Skip items whose sidecar does not mark them as favorite
    pub favorites_only: bool,
    /// Routing for items without a capture time
    pub fallback_policy: FallbackDatePolicy,
    /// Directory holding Takeout archives (desktop wiring)
    pub archive_dir: Option<PathBuf>,
    /// SQLite file for the processing cursor (desktop wiring)
    pub cursor_db_path: Option<PathBuf>,
    /// Drive folder Takeout delivers archives to, used when no local
    /// archive directory is set
    pub takeout_folder_id: Option<String>,
}

impl BackupConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> BackupConfigBuilder {
        BackupConfigBuilder::default()
    }

    /// Load configuration from `PHOTO_BACKUP_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup. Keys are the
    /// full variable names including the `PHOTO_BACKUP_` prefix.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{}{}", ENV_PREFIX, name))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut builder = BackupConfig::builder();

        if let Some(v) = get("DRIVE_FOLDER_ID") {
            builder = builder.drive_root_id(v);
        }
        if let Some(v) = get("TARGET_OFFSET") {
            builder = builder.target_offset(v);
        }
        if let Some(v) = get("SOURCE_TAG") {
            builder = builder.source_tag(v);
        }
        if let Some(v) = get("CHUNK_SIZE_BYTES") {
            builder = builder.chunk_size_bytes(parse_number("CHUNK_SIZE_BYTES", &v)?);
        }
        if let Some(v) = get("RESUMABLE_THRESHOLD_BYTES") {
            builder =
                builder.resumable_threshold_bytes(parse_number("RESUMABLE_THRESHOLD_BYTES", &v)?);
        }
        if let Some(v) = get("MAX_CONCURRENT_ITEMS") {
            builder = builder.max_concurrent_items(parse_number("MAX_CONCURRENT_ITEMS", &v)?);
        }

        let mut upload_retry = RetryPolicy::for_uploads();
        if let Some(v) = get("MAX_ATTEMPTS") {
            upload_retry.max_attempts = parse_number("MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("BASE_DELAY_MS") {
            upload_retry.base_delay = Duration::from_millis(parse_number("BASE_DELAY_MS", &v)?);
        }
        if let Some(v) = get("MAX_DELAY_MS") {
            upload_retry.max_delay = Duration::from_millis(parse_number("MAX_DELAY_MS", &v)?);
        }
        if let Some(v) = get("MAX_ELAPSED_SECS") {
            let secs: u64 = parse_number("MAX_ELAPSED_SECS", &v)?;
            upload_retry.max_elapsed = (secs > 0).then(|| Duration::from_secs(secs));
        }
        builder = builder.upload_retry(upload_retry);

        if let Some(v) = get("RUN_TIMEOUT_SECS") {
            builder = builder.run_timeout(Duration::from_secs(parse_number("RUN_TIMEOUT_SECS", &v)?));
        }
        if let Some(v) = get("MAX_ARCHIVES_PER_RUN") {
            builder = builder.max_archives_per_run(parse_number("MAX_ARCHIVES_PER_RUN", &v)?);
        }
        if let Some(v) = get("FAVORITES_ONLY") {
            builder = builder.favorites_only(parse_flag("FAVORITES_ONLY", &v)?);
        }
        if let Some(v) = get("FALLBACK_POLICY") {
            builder = builder.fallback_policy(v.parse()?);
        }
        if let Some(v) = get("ARCHIVE_DIR") {
            builder = builder.archive_dir(v);
        }
        if let Some(v) = get("CURSOR_DB") {
            builder = builder.cursor_db_path(v);
        }
        if let Some(v) = get("TAKEOUT_FOLDER_ID") {
            builder = builder.takeout_folder_id(v);
        }

        builder.build()
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.drive_root_id.trim().is_empty() {
            return Err(Error::Config(
                "Destination root folder id is required. Use .drive_root_id() or set \
                 PHOTO_BACKUP_DRIVE_FOLDER_ID."
                    .to_string(),
            ));
        }

        if self.source_tag.trim().is_empty() {
            return Err(Error::Config("Source tag cannot be empty".to_string()));
        }

        if self.chunk_size_bytes == 0 || self.chunk_size_bytes % CHUNK_ALIGNMENT_BYTES != 0 {
            return Err(Error::Config(format!(
                "Chunk size {} must be a positive multiple of {} bytes (256 KiB)",
                self.chunk_size_bytes, CHUNK_ALIGNMENT_BYTES
            )));
        }

        if self.max_concurrent_items == 0 || self.max_concurrent_items > MAX_CONCURRENT_ITEMS_LIMIT
        {
            return Err(Error::Config(format!(
                "max_concurrent_items must be between 1 and {}",
                MAX_CONCURRENT_ITEMS_LIMIT
            )));
        }

        for (name, policy) in [("upload", &self.upload_retry), ("query", &self.query_retry)] {
            if policy.max_attempts == 0 {
                return Err(Error::Config(format!(
                    "{} retry policy needs at least one attempt",
                    name
                )));
            }
            if policy.base_delay > policy.max_delay {
                return Err(Error::Config(format!(
                    "{} retry base delay {:?} exceeds its max delay {:?}",
                    name, policy.base_delay, policy.max_delay
                )));
            }
        }

        if let Some(timeout) = self.run_timeout {
            if timeout.is_zero() {
                return Err(Error::Config(
                    "Run timeout must be greater than zero".to_string(),
                ));
            }
        }

        if self.max_archives_per_run == Some(0) {
            return Err(Error::Config(
                "max_archives_per_run must be at least 1 when set".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        Error::Config(format!(
            "{}{} must be a non-negative integer, got '{}'",
            ENV_PREFIX, name, value
        ))
    })
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Ok(true),
        "0" | "false" | "no" | "n" | "off" => Ok(false),
        _ => Err(Error::Config(format!(
            "{}{} must be a boolean, got '{}'",
            ENV_PREFIX, name, value
        ))),
    }
}

/// Builder for constructing [`BackupConfig`] instances.
///
/// Unset values fall back to deployment defaults; `build()` validates the
/// result.
#[derive(Debug, Default)]
pub struct BackupConfigBuilder {
    drive_root_id: Option<String>,
    target_offset: Option<String>,
    source_tag: Option<String>,
    chunk_size_bytes: Option<usize>,
    resumable_threshold_bytes: Option<u64>,
    max_concurrent_items: Option<usize>,
    upload_retry: Option<RetryPolicy>,
    query_retry: Option<RetryPolicy>,
    run_timeout: Option<Duration>,
    max_archives_per_run: Option<usize>,
    favorites_only: bool,
    fallback_policy: FallbackDatePolicy,
    archive_dir: Option<PathBuf>,
    cursor_db_path: Option<PathBuf>,
    takeout_folder_id: Option<String>,
}

impl BackupConfigBuilder {
    /// Sets the destination root folder id.
    pub fn drive_root_id(mut self, id: impl Into<String>) -> Self {
        self.drive_root_id = Some(id.into());
        self
    }

    /// Sets the target offset, e.g. `"+09:00"`. Parsed during `build()`.
    pub fn target_offset(mut self, offset: impl Into<String>) -> Self {
        self.target_offset = Some(offset.into());
        self
    }

    pub fn source_tag(mut self, tag: impl Into<String>) -> Self {
        self.source_tag = Some(tag.into());
        self
    }

    pub fn chunk_size_bytes(mut self, size: usize) -> Self {
        self.chunk_size_bytes = Some(size);
        self
    }

    pub fn resumable_threshold_bytes(mut self, size: u64) -> Self {
        self.resumable_threshold_bytes = Some(size);
        self
    }

    pub fn max_concurrent_items(mut self, count: usize) -> Self {
        self.max_concurrent_items = Some(count);
        self
    }

    pub fn upload_retry(mut self, policy: RetryPolicy) -> Self {
        self.upload_retry = Some(policy);
        self
    }

    pub fn query_retry(mut self, policy: RetryPolicy) -> Self {
        self.query_retry = Some(policy);
        self
    }

    pub fn run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    pub fn max_archives_per_run(mut self, count: usize) -> Self {
        self.max_archives_per_run = Some(count);
        self
    }

    pub fn favorites_only(mut self, enabled: bool) -> Self {
        self.favorites_only = enabled;
        self
    }

    pub fn fallback_policy(mut self, policy: FallbackDatePolicy) -> Self {
        self.fallback_policy = policy;
        self
    }

    pub fn archive_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.archive_dir = Some(path.into());
        self
    }

    pub fn cursor_db_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cursor_db_path = Some(path.into());
        self
    }

    pub fn takeout_folder_id(mut self, id: impl Into<String>) -> Self {
        self.takeout_folder_id = Some(id.into());
        self
    }

    /// Builds the final `BackupConfig` instance.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when the root folder id is missing, the
    /// offset cannot be parsed, or any value is out of range.
    pub fn build(self) -> Result<BackupConfig> {
        let drive_root_id = self.drive_root_id.ok_or_else(|| {
            Error::Config(
                "Destination root folder id is required. Use .drive_root_id() to set it."
                    .to_string(),
            )
        })?;

        let target_offset = match self.target_offset {
            Some(raw) => parse_offset(&raw)?,
            None => FixedOffset::east_opt(DEFAULT_TARGET_OFFSET_SECS)
                .ok_or_else(|| Error::Internal("default offset rejected".to_string()))?,
        };

        let config = BackupConfig {
            drive_root_id,
            target_offset,
            source_tag: self
                .source_tag
                .unwrap_or_else(|| DEFAULT_SOURCE_TAG.to_string()),
            chunk_size_bytes: self.chunk_size_bytes.unwrap_or(DEFAULT_CHUNK_SIZE_BYTES),
            resumable_threshold_bytes: self
                .resumable_threshold_bytes
                .unwrap_or(DEFAULT_RESUMABLE_THRESHOLD_BYTES),
            max_concurrent_items: self
                .max_concurrent_items
                .unwrap_or(DEFAULT_MAX_CONCURRENT_ITEMS),
            upload_retry: self.upload_retry.unwrap_or_else(RetryPolicy::for_uploads),
            query_retry: self.query_retry.unwrap_or_else(RetryPolicy::for_queries),
            run_timeout: self.run_timeout,
            max_archives_per_run: self.max_archives_per_run,
            favorites_only: self.favorites_only,
            fallback_policy: self.fallback_policy,
            archive_dir: self.archive_dir,
            cursor_db_path: self.cursor_db_path,
            takeout_folder_id: self.takeout_folder_id,
        };

        config.validate()?;

        Ok(config)
    }
}
