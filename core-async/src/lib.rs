//! Executor seam for the photo backup workspace.
//!
//! Pipeline, provider and bridge crates reach spawning, timers, locks and
//! file access through these modules rather than naming Tokio themselves.
//!
//! - [`task`]: spawning, including blocking work such as hashing
//! - [`time`]: sleeps and deadlines for retry backoff and run timeouts
//! - [`sync`]: locks and run cancellation
//! - [`fs`] / [`io`]: archive staging and summary files
//! - [`runtime`]: executor handles for synchronous callers

pub mod fs;
pub mod io;
pub mod runtime;
pub mod sync;
pub mod task;
pub mod time;
