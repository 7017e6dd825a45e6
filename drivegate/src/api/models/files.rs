use crate::types::{FileId, download_url, preview_url};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Query parameters accepted by `/upload`
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct UploadQuery {
    /// Classroom the file belongs to. Files without one go to the default folder.
    /// May also be sent as a `classroom_id` form field.
    pub classroom_id: Option<String>,
}

/// A stored, publicly readable file
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    /// Drive file id; use it with `/download/{file_id}` and `/delete/{file_id}`
    pub file_id: FileId,
    /// Browser preview link
    pub url: String,
    /// Direct download link
    pub download_url: String,
}

impl UploadResponse {
    pub fn for_file(file_id: FileId) -> Self {
        Self {
            url: preview_url(&file_id),
            download_url: download_url(&file_id),
            file_id,
        }
    }
}

/// Response for file deletion
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeleteResponse {
    /// Always "deleted"
    pub status: String,
    pub file_id: FileId,
}

impl DeleteResponse {
    pub fn deleted(file_id: FileId) -> Self {
        Self {
            status: "deleted".to_string(),
            file_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_response_links() {
        let json = serde_json::to_value(UploadResponse::for_file("1AbC".to_string())).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "file_id": "1AbC",
                "url": "https://drive.google.com/file/d/1AbC/preview",
                "download_url": "https://drive.google.com/uc?id=1AbC&export=download"
            })
        );
    }
}
