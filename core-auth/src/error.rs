use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Token refresh rejected by {endpoint}: {reason}")]
    RefreshRejected { endpoint: String, reason: String },

    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(String),

    #[error("Invalid OAuth configuration: {0}")]
    InvalidConfig(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Authentication error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;

impl From<AuthError> for BridgeError {
    /// A rejected grant or missing credential is an authorization failure the
    /// pipeline must not retry; a token endpoint that could not be reached is
    /// a network failure it may retry.
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::TokenRefreshFailed(msg) => BridgeError::Network(msg),
            other => BridgeError::Unauthorized(other.to_string()),
        }
    }
}
