//! # Retry Executor
//!
//! One executor drives every retried remote call (dedup lookups, folder
//! resolution, uploads, the start-of-run root check) against a shared
//! [`RetryPolicy`]. [`classify`] decides what a [`BridgeError`] means for the
//! pipeline.

use bridge_traits::error::BridgeError;
use bridge_traits::retry::RetryPolicy;
use core_async::sync::CancellationToken;
use core_async::time::{timeout, Instant};
use std::future::Future;
use tracing::{debug, warn};

use crate::error::{BackupError, Result};

/// What to do after a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Transient: network, timeout, 408, 429, 5xx
    Retry,
    /// Permanent for this item
    Abort,
    /// Credential refused; abort the run
    Auth,
}

pub fn classify(error: &BridgeError) -> Disposition {
    if error.is_auth() {
        Disposition::Auth
    } else if error.is_transient() {
        Disposition::Retry
    } else {
        Disposition::Abort
    }
}

/// Map a non-retried bridge error into the pipeline taxonomy.
pub fn into_backup_error(operation: &str, error: BridgeError) -> BackupError {
    match classify(&error) {
        Disposition::Auth => BackupError::Auth(format!("{}: {}", operation, error)),
        Disposition::Retry => BackupError::TransientNetwork {
            operation: operation.to_string(),
            attempts: 1,
            message: error.to_string(),
        },
        Disposition::Abort => BackupError::Destination(format!("{}: {}", operation, error)),
    }
}

/// Run `op` until it succeeds, fails permanently, or the policy gives up.
///
/// `op` receives the 0-based attempt number so callers can re-synchronise
/// state (for example ask for the committed upload offset) before a retry.
/// Backoff sleeps end early when `cancel` fires.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = bridge_traits::error::Result<T>>,
{
    let started = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(BackupError::Cancelled);
        }

        let error = match op(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(operation, attempts = attempt + 1, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        if classify(&error) != Disposition::Retry {
            return Err(into_backup_error(operation, error));
        }

        let attempts = attempt + 1;
        let delay = policy.delay_for_retry(attempt);
        let exhausted = attempts >= max_attempts || !policy.within_budget(started.elapsed(), delay);
        if exhausted {
            warn!(operation, attempts, error = %error, "Giving up after retries");
            return Err(BackupError::TransientNetwork {
                operation: operation.to_string(),
                attempts,
                message: error.to_string(),
            });
        }

        warn!(
            operation,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Transient failure, backing off"
        );

        // Ok means the token fired before the delay ran out.
        if timeout(delay, cancel.cancelled()).await.is_ok() {
            return Err(BackupError::Cancelled);
        }
        attempt += 1;
    }
}
