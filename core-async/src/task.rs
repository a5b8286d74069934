//! Task spawning.
//!
//! CPU-bound work such as SHA-256 hashing or zip inflation goes through
//! [`spawn_blocking`] so it never stalls the upload workers.
//!
//! ```rust
//! use core_async::task;
//!
//! async fn digest_len() -> usize {
//!     task::spawn_blocking(|| [0u8; 32].len()).await.unwrap_or(0)
//! }
//! ```

pub use tokio::task::{spawn, spawn_blocking, JoinError, JoinHandle};
