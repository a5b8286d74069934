//! Credential Abstraction
//!
//! Supplies bearer tokens for destination requests. How the token was
//! obtained (interactive consent, refresh grant, service account) is the
//! provider's concern.

use async_trait::async_trait;

use crate::error::Result;

/// Bearer token provider
///
/// `bearer_token` may refresh transparently. When the destination rejects a
/// token the caller invokes `invalidate` so the next call fetches a fresh
/// one. A provider that cannot produce a token returns
/// [`BridgeError::Unauthorized`](crate::error::BridgeError::Unauthorized).
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Current access token, without the `Bearer ` prefix.
    async fn bearer_token(&self) -> Result<String>;

    /// Drop any cached token.
    async fn invalidate(&self) {}
}
