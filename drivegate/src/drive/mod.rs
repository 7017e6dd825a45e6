//! Google Drive access.
//!
//! The rest of the crate talks to Drive only through the [`DriveApi`] trait. The production
//! implementation is [`client::DriveClient`], a thin `reqwest` adapter over the Drive v3 REST API
//! authenticated with a service account ([`token::TokenSource`]). Tests substitute an in-memory
//! implementation.
//!
//! - [`client`]: REST adapter
//! - [`resolver`]: get-or-create walk that turns a logical folder path into a folder id
//! - [`token`]: service-account OAuth2 access tokens

pub mod client;
pub mod resolver;
pub mod token;

use crate::types::{FileId, FolderId};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;
use tracing::{debug, instrument};

pub use client::DriveClient;
pub use resolver::{FolderPath, resolve_folder};

/// MIME type Drive uses for folders
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Used when neither the uploader nor Drive supplies a content type
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// OAuth2 scope granting full Drive access to the service account
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

#[derive(Debug, ThisError)]
pub enum DriveError {
    /// The request never produced a response (connect, TLS, timeout, body read)
    #[error("Drive request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Drive answered with a non-success status
    #[error("Drive API returned {status}: {message}")]
    Api { status: StatusCode, message: String },

    /// Could not obtain an access token for the service account
    #[error(transparent)]
    Token(#[from] token::TokenError),

    /// Drive answered successfully but not in the shape we expect
    #[error("Unexpected Drive response: {0}")]
    Protocol(String),
}

impl DriveError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DriveError::Api { status, .. } if *status == StatusCode::NOT_FOUND)
    }
}

pub type Result<T> = std::result::Result<T, DriveError>;

/// Lazily produced object content. Finite; a new download is needed to read it again.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Name and content type of a stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub name: String,
    pub mime_type: String,
}

/// A file to be created in Drive
#[derive(Debug, Clone)]
pub struct NewFile {
    pub name: String,
    pub parent: FolderId,
    pub mime_type: String,
    pub content: Bytes,
}

/// Operations this service needs from the storage provider.
///
/// Every call is a single independent remote request (or, for uploads, one resumable session);
/// nothing is retried and no call is atomic with another.
#[async_trait]
pub trait DriveApi: Send + Sync {
    /// Find a live (non-trashed) folder called exactly `name` directly under `parent`.
    /// If several exist, the one with the lexicographically smallest id is returned.
    async fn find_folder(&self, name: &str, parent: &str) -> Result<Option<FolderId>>;

    /// Create a folder called `name` under `parent`
    async fn create_folder(&self, name: &str, parent: &str) -> Result<FolderId>;

    /// Store a new object. The object is private until [`DriveApi::grant_public_read`] is called.
    async fn create_file(&self, file: NewFile) -> Result<FileId>;

    /// Make an object readable by anyone who has its link
    async fn grant_public_read(&self, file_id: &str) -> Result<()>;

    async fn get_metadata(&self, file_id: &str) -> Result<FileMetadata>;

    /// Start downloading an object's content
    async fn stream_download(&self, file_id: &str) -> Result<ByteStream>;

    async fn delete_object(&self, file_id: &str) -> Result<()>;

    /// Create the object, then make it public.
    ///
    /// The two steps are independent remote calls. If the permission grant fails the object stays
    /// in Drive, private and unreferenced.
    #[instrument(skip(self, file), fields(name = %file.name, parent = %file.parent, bytes = file.content.len()))]
    async fn upload_object(&self, file: NewFile) -> Result<FileId> {
        let file_id = self.create_file(file).await?;
        debug!(%file_id, "Object created, granting public read");
        self.grant_public_read(&file_id).await?;
        Ok(file_id)
    }
}
