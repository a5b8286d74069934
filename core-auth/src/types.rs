//! Token types.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A short-lived access token and its expiry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, issued_at: DateTime<Utc>, expires_in_secs: i64) -> Self {
        Self {
            token: token.into(),
            expires_at: issued_at + Duration::seconds(expires_in_secs),
        }
    }

    /// Whether the token expires within `buffer_seconds` of `now`.
    ///
    /// ```
    /// use core_auth::AccessToken;
    /// use chrono::Utc;
    ///
    /// let now = Utc::now();
    /// let token = AccessToken::new("ya29.x", now, 600);
    /// assert!(!token.is_expired_with_buffer(now, 300));
    /// assert!(token.is_expired_with_buffer(now, 601));
    /// ```
    pub fn is_expired_with_buffer(&self, now: DateTime<Utc>, buffer_seconds: i64) -> bool {
        now + Duration::seconds(buffer_seconds) >= self.expires_at
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
