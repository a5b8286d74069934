use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("Authentication error: {0}")]
    Auth(#[from] core_auth::AuthError),

    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),

    #[error("Backup error: {0}")]
    Backup(#[from] core_backup::BackupError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Notification failed: {0}")]
    Notification(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
