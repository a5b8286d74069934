//! Credential providers.
//!
//! # Example
//!
//! ```ignore
//! use core_auth::{OAuthClientConfig, RefreshTokenCredentials};
//! use bridge_traits::time::SystemClock;
//! use std::sync::Arc;
//!
//! let config = OAuthClientConfig::from_env()?;
//! let credentials = RefreshTokenCredentials::new(config, http_client, Arc::new(SystemClock));
//! let token = credentials.bearer_token().await?;
//! ```

use async_trait::async_trait;
use bridge_traits::{
    auth::CredentialProvider,
    error::{BridgeError, Result as BridgeResult},
    http::{HttpClient, HttpMethod, HttpRequest},
    time::Clock,
};
use bytes::Bytes;
use core_async::sync::Mutex;
use core_async::time::{sleep, Duration};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::{AuthError, Result};
use crate::types::AccessToken;

/// Google's OAuth 2.0 token endpoint.
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Refresh this many seconds before the token actually expires.
const EXPIRY_BUFFER_SECS: i64 = 300;

const MAX_REFRESH_ATTEMPTS: u32 = 3;

/// A fixed bearer token.
#[derive(Clone)]
pub struct StaticCredentials {
    token: String,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn bearer_token(&self) -> BridgeResult<String> {
        if self.token.is_empty() {
            return Err(AuthError::NotAuthenticated.into());
        }
        Ok(self.token.clone())
    }
}

/// OAuth client registration plus the long-lived refresh token.
#[derive(Clone)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub refresh_token: String,
    pub token_url: String,
}

impl OAuthClientConfig {
    pub fn new(client_id: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            refresh_token: refresh_token.into(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
        }
    }

    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    /// Read `GOOGLE_CLIENT_ID`, `GOOGLE_CLIENT_SECRET` and
    /// `GOOGLE_REFRESH_TOKEN`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let client_id = get("GOOGLE_CLIENT_ID")
            .ok_or_else(|| AuthError::InvalidConfig("GOOGLE_CLIENT_ID is not set".to_string()))?;
        let refresh_token = get("GOOGLE_REFRESH_TOKEN").ok_or_else(|| {
            AuthError::InvalidConfig("GOOGLE_REFRESH_TOKEN is not set".to_string())
        })?;

        let mut config = Self::new(client_id, refresh_token);
        config.client_secret = get("GOOGLE_CLIENT_SECRET");
        Ok(config)
    }
}

impl fmt::Debug for OAuthClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthClientConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .field("refresh_token", &"[REDACTED]")
            .field("token_url", &self.token_url)
            .finish()
    }
}

/// Token response from the OAuth provider.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

/// Exchanges a refresh token for access tokens and caches the result.
///
/// The cache is guarded by an async mutex so concurrent upload workers that
/// all find the token stale trigger a single refresh.
pub struct RefreshTokenCredentials {
    config: OAuthClientConfig,
    http_client: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
    cached: Mutex<Option<AccessToken>>,
}

impl RefreshTokenCredentials {
    pub fn new(
        config: OAuthClientConfig,
        http_client: Arc<dyn HttpClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            http_client,
            clock,
            cached: Mutex::new(None),
        }
    }

    /// Perform the `refresh_token` grant.
    #[instrument(skip(self), fields(endpoint = %self.config.token_url))]
    async fn refresh(&self) -> Result<AccessToken> {
        let mut params: Vec<(&str, &str)> = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", self.config.refresh_token.as_str()),
            ("client_id", self.config.client_id.as_str()),
        ];
        if let Some(ref secret) = self.config.client_secret {
            params.push(("client_secret", secret.as_str()));
        }

        let encoded_body = serde_urlencoded::to_string(&params)
            .map_err(|e| AuthError::Other(format!("Failed to encode token request: {}", e)))?;
        let body = Bytes::from(encoded_body);

        let mut attempts = 0;

        loop {
            attempts += 1;

            let request = HttpRequest::new(HttpMethod::Post, self.config.token_url.clone())
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(body.clone());

            let outcome = self.http_client.execute(request).await;
            let retry_reason = match outcome {
                Ok(response) if response.is_success() => {
                    let token: TokenResponse = response.json().map_err(|e| {
                        AuthError::Other(format!("Failed to parse token response: {}", e))
                    })?;
                    info!(expires_in = token.expires_in, "Access token refreshed");
                    return Ok(AccessToken::new(
                        token.access_token,
                        self.clock.now(),
                        token.expires_in,
                    ));
                }
                Ok(response) if response.is_client_error() => {
                    let error_body = response
                        .text()
                        .unwrap_or_else(|_| "Unable to read error response".to_string());
                    warn!(status = response.status, "Token refresh rejected");
                    return Err(AuthError::RefreshRejected {
                        endpoint: self.config.token_url.clone(),
                        reason: format!("{}: {}", response.status, error_body),
                    });
                }
                Ok(response) => format!("token endpoint returned {}", response.status),
                Err(BridgeError::Unauthorized(msg)) => {
                    return Err(AuthError::RefreshRejected {
                        endpoint: self.config.token_url.clone(),
                        reason: msg,
                    })
                }
                Err(e) => e.to_string(),
            };

            if attempts >= MAX_REFRESH_ATTEMPTS {
                return Err(AuthError::TokenRefreshFailed(format!(
                    "Token refresh failed after {} attempts. Last error: {}",
                    attempts, retry_reason
                )));
            }

            let delay = Duration::from_millis(100 * 2u64.pow(attempts - 1));
            warn!(
                attempts = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %retry_reason,
                "Token refresh failed, retrying"
            );
            sleep(delay).await;
        }
    }
}

#[async_trait]
impl CredentialProvider for RefreshTokenCredentials {
    async fn bearer_token(&self) -> BridgeResult<String> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if !token.is_expired_with_buffer(self.clock.now(), EXPIRY_BUFFER_SECS) {
                return Ok(token.token.clone());
            }
            debug!("Cached access token is about to expire");
        }

        let fresh = self.refresh().await?;
        let value = fresh.token.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    async fn invalidate(&self) {
        debug!("Dropping cached access token");
        *self.cached.lock().await = None;
    }
}
