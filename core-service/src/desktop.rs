//! Desktop wiring: reqwest HTTP, Google Drive, local or Drive-staged
//! Takeout archives, and a SQLite cursor.

use bridge_desktop::paths::{default_cache_dir, default_cursor_db};
use bridge_desktop::{
    DirectoryArchiveSource, ReqwestHttpClient, SqliteCursorStore, ZipArchiveSource,
};
use bridge_traits::archive::ArchiveSource;
use bridge_traits::http::HttpClient;
use bridge_traits::time::SystemClock;
use core_async::fs;
use core_auth::{OAuthClientConfig, RefreshTokenCredentials};
use core_runtime::logging::{init_logging, LoggingConfig};
use core_runtime::BackupConfig;
use provider_google_drive::{DriveArchiveSource, DriveClient, GoogleDriveStore};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::error::{CoreError, Result};
use crate::notify::{MarkdownSummaryNotifier, TracingNotifier};
use crate::service::BackupService;

/// Install the process-wide subscriber from `PHOTO_BACKUP_LOG_FORMAT`,
/// `PHOTO_BACKUP_LOG_LEVEL` and `RUST_LOG`.
pub fn init_desktop_logging() -> Result<()> {
    init_logging(LoggingConfig::from_env()?)?;
    Ok(())
}

/// Build a [`BackupService`] from `config` and the `GOOGLE_*` credential
/// variables.
///
/// Archives come from `archive_dir` when set, otherwise from the Drive
/// folder `takeout_folder_id`.
pub async fn bootstrap_desktop(config: BackupConfig) -> Result<BackupService> {
    let http: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new()?);
    let credentials = Arc::new(RefreshTokenCredentials::new(
        OAuthClientConfig::from_env()?,
        http.clone(),
        Arc::new(SystemClock),
    ));
    let client = DriveClient::new(http, credentials);

    let source = archive_source(&config, client.clone()).await?;
    let store = Arc::new(GoogleDriveStore::new(client));

    let cursor_path = config
        .cursor_db_path
        .clone()
        .unwrap_or_else(default_cursor_db);
    let cursors = SqliteCursorStore::connect(&cursor_path).await?;
    info!(cursor_db = %cursor_path.display(), "Cursor store ready");

    let mut service = BackupService::new(config, source, store)
        .with_cursor_store(Arc::new(cursors))
        .with_notifier(Arc::new(TracingNotifier));
    if let Some(summary) = MarkdownSummaryNotifier::from_env() {
        service = service.with_notifier(Arc::new(summary));
    }
    Ok(service)
}

async fn archive_source(config: &BackupConfig, client: DriveClient) -> Result<Arc<dyn ArchiveSource>> {
    if let Some(dir) = &config.archive_dir {
        return if holds_zip_archives(dir).await? {
            info!(dir = %dir.display(), "Reading zip archives");
            Ok(Arc::new(ZipArchiveSource::new(dir.clone())))
        } else {
            info!(dir = %dir.display(), "Reading extracted archives");
            Ok(Arc::new(DirectoryArchiveSource::new(dir.clone())))
        };
    }

    if let Some(folder) = &config.takeout_folder_id {
        let staging = default_cache_dir().join("takeout");
        info!(folder = %folder, staging = %staging.display(), "Reading archives from Drive");
        let local = Arc::new(ZipArchiveSource::new(staging.clone()));
        let source = DriveArchiveSource::new(client, folder.clone(), staging, local)
            .with_retry_policy(config.query_retry.clone());
        return Ok(Arc::new(source));
    }

    Err(CoreError::CapabilityMissing {
        capability: "archive source".to_string(),
        message: "Set PHOTO_BACKUP_ARCHIVE_DIR or PHOTO_BACKUP_TAKEOUT_FOLDER_ID".to_string(),
    })
}

/// A single zip file, or a directory containing at least one.
async fn holds_zip_archives(path: &Path) -> Result<bool> {
    let io_error = |e: std::io::Error| {
        CoreError::InitializationFailed(format!("{}: {}", path.display(), e))
    };
    let metadata = fs::metadata(path).await.map_err(io_error)?;
    if metadata.is_file() {
        return Ok(is_zip(path));
    }

    let mut entries = fs::read_dir(path).await.map_err(io_error)?;
    while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
        if is_zip(&entry.path()) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn is_zip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
}
