//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop and CI runners
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest` (rustls, redirects disabled)
//! - `ArchiveSource` over a directory of Takeout zips (`zip` crate) or of
//!   extracted exports
//! - `CursorStore` using a single-row SQLite table (`sqlx`)
//! - Default data/cache locations via `dirs`
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ReqwestHttpClient, SqliteCursorStore, ZipArchiveSource};
//!
//! #[tokio::main]
//! async fn main() -> bridge_traits::error::Result<()> {
//!     let http = ReqwestHttpClient::new()?;
//!     let source = ZipArchiveSource::new("/data/takeout");
//!     let cursor = SqliteCursorStore::connect(&bridge_desktop::paths::default_cursor_db()).await?;
//!     // Hand these to core-service
//!     Ok(())
//! }
//! ```

mod archive;
mod cursor_store;
mod http;
pub mod paths;

pub use archive::{DirectoryArchiveSource, ZipArchiveSource};
pub use cursor_store::SqliteCursorStore;
pub use http::ReqwestHttpClient;
