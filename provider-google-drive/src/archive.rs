//! Takeout archives stored in a Google Drive folder
//!
//! Google Takeout can deliver its export straight into Drive. This source
//! lists the `.zip` files of that folder and, on first access to an archive,
//! downloads it into a local staging directory in ranged pieces. Entry
//! listing and reading are then delegated to a local archive reader (the
//! desktop zip reader), which addresses archives by file path.

use async_trait::async_trait;
use bridge_traits::archive::{ArchiveEntry, ArchiveRef, ArchiveSource};
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::http::{HttpMethod, HttpRequest};
use bridge_traits::retry::RetryPolicy;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use core_async::fs;
use core_async::io::AsyncWriteExt;
use core_async::sync::Mutex;
use core_async::time::sleep;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::client::{escape_query_value, DriveClient};
use crate::types::DriveFile;

/// Size of each ranged download request.
const DOWNLOAD_PIECE_BYTES: u64 = 32 * 1024 * 1024;

const ZIP_MIME_TYPES: &[&str] = &["application/zip", "application/x-zip-compressed"];

/// Upper bound on archives listed from the Takeout folder.
const ARCHIVE_LIST_LIMIT: usize = 10_000;

/// [`ArchiveSource`] over a Drive folder of Takeout zips.
pub struct DriveArchiveSource {
    client: DriveClient,
    folder_id: String,
    staging_dir: PathBuf,
    local: Arc<dyn ArchiveSource>,
    retry: RetryPolicy,
    staged: Mutex<HashMap<String, PathBuf>>,
}

impl DriveArchiveSource {
    /// `local` must read zip archives whose [`ArchiveRef::id`] is a file path.
    pub fn new(
        client: DriveClient,
        folder_id: impl Into<String>,
        staging_dir: impl Into<PathBuf>,
        local: Arc<dyn ArchiveSource>,
    ) -> Self {
        Self {
            client,
            folder_id: folder_id.into(),
            staging_dir: staging_dir.into(),
            local,
            retry: RetryPolicy::for_uploads(),
            staged: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn is_zip(file: &DriveFile) -> bool {
        ZIP_MIME_TYPES.contains(&file.mime_type.as_str())
            || file.name.to_ascii_lowercase().ends_with(".zip")
    }

    fn staging_path(&self, archive: &ArchiveRef) -> PathBuf {
        let safe: String = archive
            .id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.staging_dir.join(format!("{}.zip", safe))
    }

    /// Local reference for `archive`, downloading it first if needed.
    async fn staged_ref(&self, archive: &ArchiveRef) -> Result<ArchiveRef> {
        let mut staged = self.staged.lock().await;

        let path = match staged.get(&archive.id) {
            Some(path) => path.clone(),
            None => {
                let path = self.staging_path(archive);
                let reusable = match (fs::metadata(&path).await, archive.size) {
                    (Ok(meta), Some(size)) => meta.len() == size,
                    _ => false,
                };
                if reusable {
                    debug!(archive = %archive.name, "Reusing staged archive");
                } else {
                    self.download(archive, &path).await?;
                }
                staged.insert(archive.id.clone(), path.clone());
                path
            }
        };

        let mut local = ArchiveRef::new(path.to_string_lossy().into_owned(), archive.name.clone());
        local.modified_at = archive.modified_at;
        local.size = archive.size;
        Ok(local)
    }

    #[instrument(skip(self, archive, dest), fields(archive = %archive.name))]
    async fn download(&self, archive: &ArchiveRef, dest: &Path) -> Result<()> {
        fs::create_dir_all(&self.staging_dir).await?;
        let partial = dest.with_extension("zip.part");
        let mut file = fs::File::create(&partial).await?;

        let url = self.client.api_url(&format!(
            "files/{}?alt=media",
            urlencoding::encode(&archive.id)
        ));
        let mut offset: u64 = 0;

        loop {
            let end = match archive.size {
                Some(0) => break,
                Some(size) => (offset + DOWNLOAD_PIECE_BYTES).min(size) - 1,
                None => offset + DOWNLOAD_PIECE_BYTES - 1,
            };
            let requested = end - offset + 1;

            let (status, piece) = self.fetch_range(&url, &archive.id, offset, end).await?;
            let received = piece.len() as u64;
            file.write_all(&piece).await?;
            offset += received;

            // 200 instead of 206 means the server ignored the range and sent
            // the whole file.
            let finished = status != 206
                || received == 0
                || match archive.size {
                    Some(size) => offset >= size,
                    None => received < requested,
                };
            if finished {
                break;
            }
        }

        file.flush().await?;
        drop(file);
        fs::rename(&partial, dest).await?;

        info!(bytes = offset, "Archive staged locally");
        Ok(())
    }

    /// One ranged GET, retried on transient failure.
    async fn fetch_range(
        &self,
        url: &str,
        file_id: &str,
        start: u64,
        end: u64,
    ) -> Result<(u16, Bytes)> {
        let mut retry = 0;
        loop {
            let request = HttpRequest::new(HttpMethod::Get, url.to_string())
                .header("Range", format!("bytes={}-{}", start, end));

            match self.client.send(request, &[], file_id).await {
                Ok(response) => return Ok((response.status, response.body)),
                Err(e) if e.is_transient() && retry + 1 < self.retry.max_attempts => {
                    let delay = self.retry.delay_for_retry(retry);
                    warn!(
                        error = %e,
                        attempt = retry + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Archive download failed, retrying"
                    );
                    sleep(delay).await;
                    retry += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl ArchiveSource for DriveArchiveSource {
    #[instrument(skip(self), fields(folder = %self.folder_id))]
    async fn list_archives(&self) -> Result<Vec<ArchiveRef>> {
        let query = format!(
            "'{}' in parents and trashed=false",
            escape_query_value(&self.folder_id)
        );
        let files = self.client.list_files(&query, ARCHIVE_LIST_LIMIT).await?;

        let archives: Vec<ArchiveRef> = files
            .into_iter()
            .filter(Self::is_zip)
            .map(|file| {
                let modified_at = file
                    .modified_time
                    .as_deref()
                    .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                    .map(|t| t.with_timezone(&Utc));
                ArchiveRef {
                    size: file.size_bytes(),
                    id: file.id,
                    name: file.name,
                    modified_at,
                }
            })
            .collect();

        info!(count = archives.len(), "Listed Takeout archives in Drive");
        Ok(archives)
    }

    async fn list_entries(&self, archive: &ArchiveRef) -> Result<Vec<ArchiveEntry>> {
        let local = self.staged_ref(archive).await?;
        self.local.list_entries(&local).await
    }

    async fn read_entry(&self, archive: &ArchiveRef, path: &str) -> Result<Bytes> {
        let local = self.staged_ref(archive).await?;
        self.local.read_entry(&local, path).await.map_err(|e| match e {
            BridgeError::NotFound(_) => {
                BridgeError::NotFound(format!("{} in {}", path, archive.name))
            }
            other => other,
        })
    }
}
