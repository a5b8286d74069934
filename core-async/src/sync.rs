//! Synchronization primitives.
//!
//! A run owns one [`CancellationToken`]; workers receive child tokens so
//! a run deadline, a revoked credential or an operator abort reaches every
//! in-flight transfer.
//!
//! ```rust
//! use core_async::sync::{CancellationToken, Mutex};
//!
//! async fn example() {
//!     let run = CancellationToken::new();
//!     let worker = run.child_token();
//!     run.cancel();
//!     assert!(worker.is_cancelled());
//!
//!     let uploaded = Mutex::new(0u64);
//!     *uploaded.lock().await += 1;
//! }
//! ```

pub use tokio::sync::{Mutex, MutexGuard, Semaphore};

pub use tokio_util::sync::CancellationToken;
