//! # Google Drive Provider
//!
//! Google Drive v3 adapters for the backup pipeline.
//!
//! ## Overview
//!
//! - [`GoogleDriveStore`] implements [`bridge_traits::storage::DestinationStore`]:
//!   folder resolution, `appProperties` lookups, multipart and resumable uploads.
//! - [`DriveArchiveSource`] implements [`bridge_traits::archive::ArchiveSource`]
//!   for Takeout exports delivered into a Drive folder.
//! - [`DriveClient`] is the shared request layer (bearer token, error mapping,
//!   pagination).
//!
//! HTTP and credentials are injected as trait objects so every adapter can be
//! exercised against mocks.

pub mod archive;
pub mod client;
pub mod error;
pub mod store;
pub mod types;

pub use archive::DriveArchiveSource;
pub use client::DriveClient;
pub use error::{GoogleDriveError, Result};
pub use store::GoogleDriveStore;
pub use types::{DriveFile, FOLDER_MIME_TYPE};
