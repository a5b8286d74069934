//! Authenticated request plumbing shared by the store and the archive source.

use bridge_traits::auth::CredentialProvider;
use bridge_traits::error::Result;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::GoogleDriveError;
use crate::types::{DriveFile, FilesListResponse};

/// Google Drive API base URL
pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

/// Google Drive upload API base URL
pub const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

/// Fields requested for every file resource
pub const FILE_FIELDS: &str = "id,name,mimeType,size,modifiedTime,parents,appProperties,trashed";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Thin Drive v3 client: attaches the bearer token, invalidates it on 401
/// and turns non-success statuses into typed errors.
#[derive(Clone)]
pub struct DriveClient {
    http_client: Arc<dyn HttpClient>,
    credentials: Arc<dyn CredentialProvider>,
    api_base: String,
    upload_base: String,
    request_timeout: Duration,
}

impl DriveClient {
    pub fn new(http_client: Arc<dyn HttpClient>, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            http_client,
            credentials,
            api_base: DRIVE_API_BASE.to_string(),
            upload_base: DRIVE_UPLOAD_BASE.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Point the client at another host (tests, emulators).
    pub fn with_base_urls(mut self, api_base: impl Into<String>, upload_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self.upload_base = upload_base.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    pub fn upload_url(&self, path: &str) -> String {
        format!("{}/{}", self.upload_base, path.trim_start_matches('/'))
    }

    /// Execute `request` with credentials. Statuses listed in `accept` are
    /// returned as-is in addition to 2xx.
    pub async fn send(
        &self,
        request: HttpRequest,
        accept: &[u16],
        resource: &str,
    ) -> Result<HttpResponse> {
        let token = self.credentials.bearer_token().await?;
        let method = request.method;
        let timeout = request.timeout.unwrap_or(self.request_timeout);
        let request = request.bearer_token(token).timeout(timeout);

        let response = self.http_client.execute(request).await?;

        if response.is_success() || accept.contains(&response.status) {
            debug!(status = response.status, ?method, "Drive request succeeded");
            return Ok(response);
        }

        if response.status == 401 {
            warn!("Drive rejected the access token; invalidating");
            self.credentials.invalidate().await;
        }

        Err(GoogleDriveError::from_response(response.status, &response.body, resource).into())
    }

    /// Run a `files.list` query to completion, following page tokens, up to
    /// `limit` results.
    pub async fn list_files(&self, query: &str, limit: usize) -> Result<Vec<DriveFile>> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        let page_size = limit.clamp(1, 1000);

        loop {
            let mut url = self.api_url(&format!(
                "files?q={}&spaces=drive&pageSize={}&fields=nextPageToken,files({})",
                urlencoding::encode(query),
                page_size,
                FILE_FIELDS
            ));
            if let Some(ref token) = page_token {
                url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
            }

            let response = self
                .send(HttpRequest::new(HttpMethod::Get, url), &[], "files")
                .await?;
            let page: FilesListResponse = parse_json(&response)?;

            files.extend(page.files);
            if files.len() >= limit {
                files.truncate(limit);
                break;
            }
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(files)
    }
}

pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(response: &HttpResponse) -> Result<T> {
    serde_json::from_slice(&response.body)
        .map_err(|e| GoogleDriveError::ParseError(e.to_string()).into())
}

/// Quote a value for a Drive query string literal.
pub fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}
