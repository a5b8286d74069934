use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    /// Credential rejected or missing. Never retried.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Remote service answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Connection-level failure (DNS, reset, TLS handshake).
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            BridgeError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the failure is worth retrying: connection drops, timeouts,
    /// request timeout (408), rate limiting (429) and server errors (5xx).
    pub fn is_transient(&self) -> bool {
        match self {
            BridgeError::Network(_) | BridgeError::Timeout(_) => true,
            BridgeError::Http { status, .. } => {
                *status == 408 || *status == 429 || (500..600).contains(status)
            }
            _ => false,
        }
    }

    /// Whether the failure means the credential itself was refused.
    pub fn is_auth(&self) -> bool {
        match self {
            BridgeError::Unauthorized(_) => true,
            BridgeError::Http { status, .. } => *status == 401 || *status == 403,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> BridgeError {
        BridgeError::Http {
            status,
            message: String::new(),
        }
    }

    #[test]
    fn test_transient_classification() {
        assert!(http(500).is_transient());
        assert!(http(503).is_transient());
        assert!(http(429).is_transient());
        assert!(http(408).is_transient());
        assert!(BridgeError::Network("reset".into()).is_transient());
        assert!(BridgeError::Timeout("30s".into()).is_transient());

        assert!(!http(400).is_transient());
        assert!(!http(404).is_transient());
        assert!(!BridgeError::Unauthorized("expired".into()).is_transient());
    }

    #[test]
    fn test_auth_classification() {
        assert!(http(401).is_auth());
        assert!(http(403).is_auth());
        assert!(BridgeError::Unauthorized("revoked".into()).is_auth());
        assert!(!http(500).is_auth());
        assert_eq!(http(404).status(), Some(404));
        assert_eq!(BridgeError::Network("x".into()).status(), None);
    }
}
