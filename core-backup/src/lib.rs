//! # Backup Pipeline Module
//!
//! The ingest, dedup and upload pipeline that moves media out of export
//! archives into date-keyed destination folders.
//!
//! ## Overview
//!
//! This module provides:
//! - Content identity (SHA-256) and sidecar metadata parsing
//! - Date routing into one fixed target offset
//! - Destination-backed duplicate detection
//! - Resumable, retried uploads that never leave a half-written record
//! - Archive selection (incremental, explicit range, rolling window)
//! - The per-item state machine and the run tally

pub mod date;
pub mod dedup;
pub mod error;
pub mod hasher;
pub mod metadata;
pub mod outcome;
pub mod retry;
pub mod runner;
pub mod scanner;
pub mod uploader;

pub use date::DateResolver;
pub use dedup::{DedupIndex, DestinationDedupIndex, InMemoryDedupIndex};
pub use error::{BackupError, Result};
pub use hasher::{hash_bytes, ContentIdentity};
pub use metadata::{ItemMetadata, MediaItem, MetadataIssue};
pub use outcome::{DateSource, ItemReport, ItemState, RunOutcome, SkipReason};
pub use runner::{PipelineRunner, RunResult, RunnerConfig};
pub use scanner::{ArchiveScanner, ScanOptions, ScanPlan, ScanReport, ScanRequest};
pub use uploader::{ResilientUploader, UploadRequest};
