//! Timers.
//!
//! These come from `tokio::time`, so a test on a paused clock
//! (`#[tokio::test(start_paused = true)]`) walks through a full retry
//! schedule or run deadline instantly.

pub use tokio::time::error::Elapsed;
pub use tokio::time::{sleep, timeout, Instant};

pub use std::time::Duration;
