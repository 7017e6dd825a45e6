//! Identifier types.
//!
//! Every entity this service touches is owned by the storage provider, so identifiers are opaque
//! strings handed out by Drive. They are never parsed or generated locally.
//!
//! - [`FileId`]: a stored object
//! - [`FolderId`]: a container; the configured shared folder is the root of all uploads

pub type FileId = String;
pub type FolderId = String;

/// Browser preview link for a publicly readable Drive object
pub fn preview_url(file_id: &str) -> String {
    format!("https://drive.google.com/file/d/{file_id}/preview")
}

/// Direct download link for a publicly readable Drive object
pub fn download_url(file_id: &str) -> String {
    format!("https://drive.google.com/uc?id={file_id}&export=download")
}
