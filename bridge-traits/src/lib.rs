//! # Host Bridge Traits
//!
//! Collaborator contracts between the backup pipeline and the outside world.
//!
//! ## Overview
//!
//! This crate defines every capability the pipeline needs but does not own:
//! reading export archives, talking to the destination store, obtaining
//! credentials, persisting the processing cursor, telling time and forwarding
//! logs. Concrete adapters live in `bridge-desktop` (reqwest, zip, SQLite)
//! and `provider-google-drive`; tests substitute in-memory fakes.
//!
//! ## Traits
//!
//! ### Source & Destination
//! - [`ArchiveSource`](archive::ArchiveSource) - List and read export archives
//! - [`DestinationStore`](storage::DestinationStore) - Folders, property index, uploads
//! - [`HttpClient`](http::HttpClient) - Transport used by remote stores
//!
//! ### Credentials & State
//! - [`CredentialProvider`](auth::CredentialProvider) - Bearer tokens
//! - [`CursorStore`](cursor::CursorStore) - Processing high-water mark
//!
//! ### Utilities
//! - [`RetryPolicy`](retry::RetryPolicy) - Shared backoff configuration
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to the host
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Adapters should:
//!
//! - Map non-success HTTP statuses to `BridgeError::Http` so the pipeline can
//!   classify them as transient or permanent
//! - Map refused credentials to `BridgeError::Unauthorized`
//! - Map connection failures and timeouts to `Network` / `Timeout`
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so one adapter instance can be
//! shared by concurrent upload workers behind an `Arc`.
//!
//! ## Example
//!
//! ```ignore
//! use bridge_traits::cursor::{CursorStore, ProcessingCursor};
//! use bridge_traits::error::Result;
//! use async_trait::async_trait;
//!
//! /// Cursor kept only for the lifetime of the process.
//! #[derive(Default)]
//! pub struct MemoryCursor(std::sync::Mutex<Option<ProcessingCursor>>);
//!
//! #[async_trait]
//! impl CursorStore for MemoryCursor {
//!     async fn load(&self) -> Result<Option<ProcessingCursor>> {
//!         Ok(self.0.lock().unwrap().clone())
//!     }
//!
//!     async fn save(&self, cursor: &ProcessingCursor) -> Result<()> {
//!         *self.0.lock().unwrap() = Some(cursor.clone());
//!         Ok(())
//!     }
//! }
//! ```

pub mod archive;
pub mod auth;
pub mod cursor;
pub mod error;
pub mod http;
pub mod retry;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use archive::{ArchiveEntry, ArchiveRef, ArchiveSource};
pub use auth::CredentialProvider;
pub use cursor::{CursorStore, ProcessingCursor};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use retry::RetryPolicy;
pub use storage::{
    ChunkProgress, DestinationRecord, DestinationStore, PropertyMap, RecordMetadata,
    ResumableSession, ROOT_PROPERTY_KEY,
};
pub use time::{Clock, FixedClock, LogEntry, LogLevel, LoggerSink, SystemClock};
