//! Drive API failures and their mapping onto `BridgeError`.

use bridge_traits::error::BridgeError;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GoogleDriveError {
    /// 401 after a token refresh
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Google Drive API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    /// Rate limit exceeded (429, or 403 with a rate-limit reason)
    #[error("Drive quota throttled: {0}")]
    RateLimitExceeded(String),

    #[error("No such Drive file: {file_id}")]
    FileNotFound { file_id: String },

    /// Resumable session no longer exists on the server
    #[error("Upload session expired (status {status_code})")]
    SessionExpired { status_code: u16 },

    #[error("Unexpected Drive response: {0}")]
    ParseError(String),

    #[error(transparent)]
    BridgeError(#[from] BridgeError),
}

pub type Result<T> = std::result::Result<T, GoogleDriveError>;

/// Reasons Drive attaches to 403 responses that are really throttling.
const RATE_LIMIT_REASONS: &[&str] = &[
    "rateLimitExceeded",
    "userRateLimitExceeded",
    "sharingRateLimitExceeded",
];

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    reason: String,
}

impl GoogleDriveError {
    /// Classify a non-success Drive response.
    ///
    /// `resource` names what was addressed (file id, session) for 404s.
    pub fn from_response(status: u16, body: &[u8], resource: &str) -> Self {
        let parsed = serde_json::from_slice::<ErrorEnvelope>(body).ok();
        let message = parsed
            .as_ref()
            .map(|e| e.error.message.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| String::from_utf8_lossy(body).chars().take(512).collect());
        let rate_limited = parsed.as_ref().is_some_and(|e| {
            e.error
                .errors
                .iter()
                .any(|d| RATE_LIMIT_REASONS.contains(&d.reason.as_str()))
        });

        match status {
            401 => GoogleDriveError::AuthenticationFailed(message),
            429 => GoogleDriveError::RateLimitExceeded(message),
            403 if rate_limited => GoogleDriveError::RateLimitExceeded(message),
            404 => GoogleDriveError::FileNotFound {
                file_id: resource.to_string(),
            },
            _ => GoogleDriveError::ApiError {
                status_code: status,
                message,
            },
        }
    }
}

impl From<GoogleDriveError> for BridgeError {
    fn from(error: GoogleDriveError) -> Self {
        match error {
            GoogleDriveError::AuthenticationFailed(msg) => BridgeError::Unauthorized(msg),
            GoogleDriveError::ApiError {
                status_code,
                message,
            } => BridgeError::Http {
                status: status_code,
                message,
            },
            GoogleDriveError::RateLimitExceeded(message) => BridgeError::Http {
                status: 429,
                message,
            },
            GoogleDriveError::FileNotFound { file_id } => BridgeError::NotFound(file_id),
            GoogleDriveError::SessionExpired { status_code } => BridgeError::Http {
                status: status_code,
                message: "upload session expired".to_string(),
            },
            GoogleDriveError::ParseError(msg) => {
                BridgeError::OperationFailed(format!("Parse error: {}", msg))
            }
            GoogleDriveError::BridgeError(e) => e,
        }
    }
}
