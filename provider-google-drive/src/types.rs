//! Drive v3 wire types.

use bridge_traits::storage::{DestinationRecord, PropertyMap};
use serde::{Deserialize, Serialize};

/// MIME type Drive uses for folders.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// The subset of the `files` resource the store asks for via `fields=`.
/// Drive omits `size` on folders and reports it as a decimal string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    /// RFC 3339
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<String>,
    #[serde(default)]
    pub parents: Vec<String>,
    /// Private to this OAuth client; carries `contentIdentity` and friends
    #[serde(default)]
    pub app_properties: PropertyMap,
    #[serde(default)]
    pub trashed: bool,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    pub fn size_bytes(&self) -> Option<u64> {
        self.size.as_deref().and_then(|s| s.parse().ok())
    }
}

impl From<DriveFile> for DestinationRecord {
    fn from(file: DriveFile) -> Self {
        let size = file.size_bytes();
        DestinationRecord {
            id: file.id,
            name: file.name,
            parent_id: file.parents.into_iter().next(),
            size,
            properties: file.app_properties,
        }
    }
}

/// One page of `files.list`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesListResponse {
    #[serde(default)]
    pub files: Vec<DriveFile>,
    pub next_page_token: Option<String>,
}

/// Metadata body for `files.create` and resumable session initiation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFileBody<'a> {
    pub name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<&'a str>,
    pub parents: [&'a str; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_properties: Option<&'a PropertyMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'a str>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_drive_file() {
        let json = r#"{
            "id": "abc123",
            "name": "IMG_0001.jpg",
            "mimeType": "image/jpeg",
            "size": "1024",
            "modifiedTime": "2026-01-02T00:00:00.000Z",
            "parents": ["folder1"],
            "appProperties": {"contentIdentity": "ff", "source": "google_takeout"}
        }"#;

        let file: DriveFile = serde_json::from_str(json).unwrap();
        assert_eq!(file.size_bytes(), Some(1024));
        assert!(!file.is_folder());

        let record: DestinationRecord = file.into();
        assert_eq!(record.parent_id.as_deref(), Some("folder1"));
        assert_eq!(record.property("source"), Some("google_takeout"));
    }

    #[test]
    fn test_deserialize_minimal_list() {
        let json = r#"{"files": [{"id": "f1"}], "nextPageToken": "token123"}"#;
        let response: FilesListResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.files.len(), 1);
        assert!(response.files[0].app_properties.is_empty());
        assert_eq!(response.next_page_token, Some("token123".to_string()));
    }

    #[test]
    fn test_create_body_omits_empty_fields() {
        let body = CreateFileBody {
            name: "2026-01-06",
            mime_type: Some(FOLDER_MIME_TYPE),
            parents: ["root"],
            app_properties: None,
            description: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["parents"][0], "root");
        assert!(json.get("appProperties").is_none());
        assert!(json.get("description").is_none());
    }
}
