//! Google Drive destination store
//!
//! Implements [`DestinationStore`] for Google Drive API v3:
//!
//! - Date folders are plain Drive folders under the backup root
//! - The property index is Drive `appProperties`, queried with
//!   `appProperties has { key='..' and value='..' }`
//! - Small items go through `uploadType=multipart`, large ones through
//!   `uploadType=resumable` sessions fed with `Content-Range` chunks; a
//!   `308 Resume Incomplete` response carries the committed offset in its
//!   `Range` header

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::http::{HttpMethod, HttpRequest, HttpResponse};
use bridge_traits::storage::{
    ChunkProgress, DestinationRecord, DestinationStore, RecordMetadata, ResumableSession,
    ROOT_PROPERTY_KEY,
};
use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, info, instrument, warn};

use crate::client::{escape_query_value, parse_json, DriveClient, FILE_FIELDS};
use crate::error::GoogleDriveError;
use crate::types::{CreateFileBody, DriveFile, FOLDER_MIME_TYPE};

/// Status Drive uses for an unfinished resumable upload.
const RESUME_INCOMPLETE: u16 = 308;

/// Status Drive returns after a session was cancelled by the client.
const CLIENT_CLOSED: u16 = 499;

/// Cap on matches fetched by a property lookup; more than one already means
/// the index is inconsistent.
const PROPERTY_MATCH_LIMIT: usize = 10;

/// Google Drive implementation of [`DestinationStore`].
///
/// # Example
///
/// ```ignore
/// use provider_google_drive::{DriveClient, GoogleDriveStore};
///
/// let store = GoogleDriveStore::new(DriveClient::new(http_client, credentials));
/// let folder_id = store.ensure_folder(&root_id, "2026-01-06").await?;
/// ```
#[derive(Clone)]
pub struct GoogleDriveStore {
    client: DriveClient,
}

impl GoogleDriveStore {
    pub fn new(client: DriveClient) -> Self {
        Self { client }
    }

    fn file_fields_param() -> String {
        format!("fields={}", FILE_FIELDS)
    }

    /// Build a `multipart/related` body: JSON metadata part, then media part.
    fn multipart_body(boundary: &str, metadata_json: &[u8], mime_type: &str, data: &[u8]) -> Bytes {
        let mut body = BytesMut::with_capacity(data.len() + metadata_json.len() + 256);
        body.put_slice(format!("--{}\r\n", boundary).as_bytes());
        body.put_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
        body.put_slice(metadata_json);
        body.put_slice(format!("\r\n--{}\r\n", boundary).as_bytes());
        body.put_slice(format!("Content-Type: {}\r\n\r\n", mime_type).as_bytes());
        body.put_slice(data);
        body.put_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
        body.freeze()
    }

    fn create_body(metadata: &RecordMetadata) -> CreateFileBody<'_> {
        CreateFileBody {
            name: metadata.name.as_str(),
            mime_type: Some(metadata.mime_type.as_str()),
            parents: [metadata.parent_id.as_str()],
            app_properties: Some(&metadata.properties),
            description: metadata.description.as_deref(),
        }
    }

    fn encode_json<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| {
            BridgeError::OperationFailed(format!("JSON serialization failed: {}", e))
        })
    }

    /// Interpret the answer to a chunk PUT or a status query.
    fn chunk_progress(response: HttpResponse) -> Result<ChunkProgress> {
        if response.status == RESUME_INCOMPLETE {
            let committed = match response.header("Range") {
                Some(range) => parse_committed_range(range).ok_or_else(|| {
                    BridgeError::OperationFailed(format!("Unparsable Range header '{}'", range))
                })?,
                None => 0,
            };
            return Ok(ChunkProgress::Incomplete { committed });
        }

        let file: DriveFile = parse_json(&response)?;
        Ok(ChunkProgress::Complete(file.into()))
    }

    async fn send_session(
        &self,
        session: &ResumableSession,
        request: HttpRequest,
    ) -> Result<HttpResponse> {
        match self
            .client
            .send(request, &[RESUME_INCOMPLETE], "upload session")
            .await
        {
            Err(BridgeError::NotFound(_)) => Err(GoogleDriveError::SessionExpired {
                status_code: 404,
            }
            .into()),
            Err(BridgeError::Http { status: 410, .. }) => {
                Err(GoogleDriveError::SessionExpired { status_code: 410 }.into())
            }
            other => {
                if other.is_err() {
                    debug!(total = session.total_size, "Resumable request failed");
                }
                other
            }
        }
    }
}

/// `Range: bytes=0-N` means bytes `[0, N]` are committed.
fn parse_committed_range(range: &str) -> Option<u64> {
    let bounds = range.trim().strip_prefix("bytes=")?;
    let (start, end) = bounds.split_once('-')?;
    if start.trim() != "0" {
        return None;
    }
    end.trim().parse::<u64>().ok().map(|last| last + 1)
}

#[async_trait]
impl DestinationStore for GoogleDriveStore {
    #[instrument(skip(self))]
    async fn check_root(&self, root_id: &str) -> Result<()> {
        let url = self.client.api_url(&format!(
            "files/{}?fields=id,mimeType,trashed",
            urlencoding::encode(root_id)
        ));
        let response = self
            .client
            .send(HttpRequest::new(HttpMethod::Get, url), &[], root_id)
            .await?;
        let file: DriveFile = parse_json(&response)?;

        if !file.is_folder() || file.trashed {
            return Err(BridgeError::OperationFailed(format!(
                "Backup root {} is not a usable folder (mimeType={}, trashed={})",
                root_id, file.mime_type, file.trashed
            )));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn ensure_folder(&self, parent_id: &str, name: &str) -> Result<String> {
        let query = format!(
            "mimeType='{}' and '{}' in parents and name='{}' and trashed=false",
            FOLDER_MIME_TYPE,
            escape_query_value(parent_id),
            escape_query_value(name)
        );
        if let Some(existing) = self.client.list_files(&query, 1).await?.into_iter().next() {
            debug!(folder_id = %existing.id, "Folder exists");
            return Ok(existing.id);
        }

        let body = CreateFileBody {
            name,
            mime_type: Some(FOLDER_MIME_TYPE),
            parents: [parent_id],
            app_properties: None,
            description: None,
        };
        let request = HttpRequest::new(HttpMethod::Post, self.client.api_url("files?fields=id"))
            .json(&body)?;
        let response = self.client.send(request, &[], parent_id).await?;
        let created: DriveFile = parse_json(&response)?;

        info!(folder_id = %created.id, "Created folder");
        Ok(created.id)
    }

    #[instrument(skip(self))]
    async fn find_by_property(
        &self,
        root_id: &str,
        key: &str,
        value: &str,
    ) -> Result<Vec<DestinationRecord>> {
        let query = format!(
            "trashed=false and appProperties has {{ key='{}' and value='{}' }} \
             and appProperties has {{ key='{}' and value='{}' }}",
            escape_query_value(key),
            escape_query_value(value),
            ROOT_PROPERTY_KEY,
            escape_query_value(root_id)
        );
        let files = self.client.list_files(&query, PROPERTY_MATCH_LIMIT).await?;
        Ok(files.into_iter().map(DestinationRecord::from).collect())
    }

    #[instrument(skip(self, metadata, data), fields(name = %metadata.name, size = data.len()))]
    async fn upload_multipart(
        &self,
        metadata: &RecordMetadata,
        data: Bytes,
    ) -> Result<DestinationRecord> {
        let boundary = format!("photo_backup_{}", uuid::Uuid::new_v4().simple());
        let metadata_json = Self::encode_json(&Self::create_body(metadata))?;
        let body = Self::multipart_body(&boundary, &metadata_json, &metadata.mime_type, &data);

        let url = self.client.upload_url(&format!(
            "files?uploadType=multipart&{}",
            Self::file_fields_param()
        ));
        let request = HttpRequest::new(HttpMethod::Post, url)
            .header(
                "Content-Type",
                format!("multipart/related; boundary={}", boundary),
            )
            .body(body);

        let response = self.client.send(request, &[], &metadata.name).await?;
        let file: DriveFile = parse_json(&response)?;
        debug!(file_id = %file.id, "Multipart upload complete");
        Ok(file.into())
    }

    #[instrument(skip(self, metadata), fields(name = %metadata.name))]
    async fn start_resumable(
        &self,
        metadata: &RecordMetadata,
        total_size: u64,
    ) -> Result<ResumableSession> {
        let url = self.client.upload_url(&format!(
            "files?uploadType=resumable&{}",
            Self::file_fields_param()
        ));
        let request = HttpRequest::new(HttpMethod::Post, url)
            .header("X-Upload-Content-Type", metadata.mime_type.clone())
            .header("X-Upload-Content-Length", total_size.to_string())
            .json(&Self::create_body(metadata))?;

        let response = self.client.send(request, &[], &metadata.name).await?;
        let session_uri = response.header("Location").ok_or_else(|| {
            BridgeError::OperationFailed(
                "Resumable session response carried no Location header".to_string(),
            )
        })?;

        debug!("Opened resumable session");
        Ok(ResumableSession {
            session_uri: session_uri.to_string(),
            total_size,
        })
    }

    #[instrument(skip(self, session, chunk), fields(len = chunk.len()))]
    async fn upload_chunk(
        &self,
        session: &ResumableSession,
        offset: u64,
        chunk: Bytes,
    ) -> Result<ChunkProgress> {
        if chunk.is_empty() {
            return self.query_resumable(session).await;
        }
        let last = offset + chunk.len() as u64 - 1;
        if last >= session.total_size {
            return Err(BridgeError::OperationFailed(format!(
                "Chunk {}-{} exceeds session size {}",
                offset, last, session.total_size
            )));
        }

        let request = HttpRequest::new(HttpMethod::Put, session.session_uri.clone())
            .header(
                "Content-Range",
                format!("bytes {}-{}/{}", offset, last, session.total_size),
            )
            .body(chunk);

        let response = self.send_session(session, request).await?;
        Self::chunk_progress(response)
    }

    #[instrument(skip(self, session))]
    async fn query_resumable(&self, session: &ResumableSession) -> Result<ChunkProgress> {
        let request = HttpRequest::new(HttpMethod::Put, session.session_uri.clone())
            .header("Content-Range", format!("bytes */{}", session.total_size))
            .body(Bytes::new());

        let response = self.send_session(session, request).await?;
        Self::chunk_progress(response)
    }

    #[instrument(skip(self, session))]
    async fn cancel_resumable(&self, session: &ResumableSession) -> Result<()> {
        let request = HttpRequest::new(HttpMethod::Delete, session.session_uri.clone());
        match self
            .client
            .send(request, &[CLIENT_CLOSED], "upload session")
            .await
        {
            Ok(_) | Err(BridgeError::NotFound(_)) => Ok(()),
            Err(BridgeError::Http { status: 410, .. }) => Ok(()),
            Err(e) => {
                warn!(error = %e, "Failed to cancel resumable session");
                Err(e)
            }
        }
    }

    #[instrument(skip(self))]
    async fn delete_record(&self, record_id: &str) -> Result<()> {
        let url = self
            .client
            .api_url(&format!("files/{}", urlencoding::encode(record_id)));
        match self
            .client
            .send(HttpRequest::new(HttpMethod::Delete, url), &[], record_id)
            .await
        {
            Ok(_) | Err(BridgeError::NotFound(_)) => {
                info!("Deleted record");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
