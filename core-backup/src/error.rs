use thiserror::Error;

/// Pipeline error taxonomy.
///
/// A duplicate item is not an error: it ends in the `Skipped` state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackupError {
    /// Source archive or entry unreadable. Fatal for the item only.
    #[error("Read error in {archive}: {message}")]
    Read { archive: String, message: String },

    /// Sidecar missing or unparsable. Degrades to the fallback date.
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// Credential refused. Aborts the whole run.
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("{operation} failed after {attempts} attempt(s): {message}")]
    TransientNetwork {
        operation: String,
        attempts: u32,
        message: String,
    },

    /// The destination holds a partial or ambiguous record.
    #[error("Destination inconsistency: {0}")]
    DestinationInconsistency(String),

    /// Non-retryable destination failure for one item.
    #[error("Destination error: {0}")]
    Destination(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Cursor error: {0}")]
    Cursor(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BackupError {
    /// Errors that make every later operation pointless.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BackupError::Auth(_))
    }

    /// Short category tag used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            BackupError::Read { .. } => "ReadError",
            BackupError::Metadata(_) => "MetadataError",
            BackupError::Auth(_) => "AuthError",
            BackupError::TransientNetwork { .. } => "TransientNetworkError",
            BackupError::DestinationInconsistency(_) => "DestinationInconsistency",
            BackupError::Destination(_) => "DestinationError",
            BackupError::Cancelled => "Cancelled",
            BackupError::Cursor(_) => "CursorError",
            BackupError::Config(_) => "ConfigError",
        }
    }
}

impl From<core_runtime::Error> for BackupError {
    fn from(err: core_runtime::Error) -> Self {
        BackupError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
