//! Drive v3 REST adapter.

use super::{
    ByteStream, DEFAULT_MIME_TYPE, DriveApi, DriveError, FOLDER_MIME_TYPE, FileMetadata, NewFile, Result, token::TokenSource,
};
use crate::types::{FileId, FolderId};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use reqwest::{RequestBuilder, Response, StatusCode, header};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, instrument, trace};
use url::Url;

/// Drive answers intermediate resumable-upload chunks with this status
const RESUME_INCOMPLETE: u16 = 308;

#[derive(Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<FileRef>,
}

#[derive(Deserialize)]
struct FileRef {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileResource {
    name: String,
    mime_type: Option<String>,
}

#[derive(Deserialize)]
struct GoogleErrorBody {
    error: GoogleError,
}

#[derive(Deserialize)]
struct GoogleError {
    message: String,
}

pub struct DriveClient {
    http: reqwest::Client,
    base_url: Url,
    tokens: Arc<TokenSource>,
    chunk_size: usize,
}

impl std::fmt::Debug for DriveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriveClient")
            .field("base_url", &self.base_url.as_str())
            .field("service_account", &self.tokens.client_email())
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

fn ensure_slash(url: &Url) -> Url {
    if url.path().ends_with('/') {
        url.clone()
    } else {
        let mut new_url = url.clone();
        let mut path = new_url.path().to_string();
        path.push('/');
        new_url.set_path(&path);
        new_url
    }
}

/// Quote a value for use inside a single-quoted Drive query string
fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// `bytes=0-1234` from a 308 response means the next byte to send is 1235
fn next_offset(response: &Response) -> Result<usize> {
    let Some(range) = response.headers().get(header::RANGE) else {
        return Ok(0);
    };
    let range = range
        .to_str()
        .map_err(|_| DriveError::Protocol("non-ASCII Range header".to_string()))?;
    range
        .strip_prefix("bytes=")
        .and_then(|r| r.split_once('-'))
        .and_then(|(_, last)| last.trim().parse::<usize>().ok())
        .map(|last| last + 1)
        .ok_or_else(|| DriveError::Protocol(format!("malformed Range header: {range}")))
}

/// Turn a non-success response into [`DriveError::Api`], keeping Google's own message when present
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<GoogleErrorBody>(&body) {
        Ok(parsed) => parsed.error.message,
        Err(_) if !body.trim().is_empty() => body.trim().to_string(),
        Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
    };
    Err(DriveError::Api { status, message })
}

impl DriveClient {
    pub fn new(http: reqwest::Client, base_url: &Url, tokens: Arc<TokenSource>, chunk_size: usize) -> Self {
        Self {
            http,
            base_url: ensure_slash(base_url),
            tokens,
            chunk_size,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| DriveError::Protocol(format!("failed to construct {path} URL: {e}")))
    }

    /// `drive/v3/files/<id>[/<suffix>]`, with the id encoded as a single path segment
    fn file_endpoint(&self, file_id: &str, suffix: Option<&str>) -> Result<Url> {
        let mut url = self.endpoint("drive/v3/files")?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| DriveError::Protocol("API base URL cannot be a base".to_string()))?;
            segments.push(file_id);
            if let Some(suffix) = suffix {
                segments.push(suffix);
            }
        }
        Ok(url)
    }

    async fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        let token = self.tokens.access_token().await?;
        Ok(request.bearer_auth(token))
    }

    /// Open a resumable upload session and return its URL
    async fn start_upload_session(&self, file: &NewFile) -> Result<Url> {
        let url = self.endpoint("upload/drive/v3/files")?;
        let request = self
            .http
            .post(url)
            .query(&[("uploadType", "resumable"), ("supportsAllDrives", "true"), ("fields", "id")])
            .header("X-Upload-Content-Type", &file.mime_type)
            .header("X-Upload-Content-Length", file.content.len())
            .json(&json!({
                "name": file.name,
                "parents": [file.parent],
                "mimeType": file.mime_type,
            }));
        let response = check(self.authorized(request).await?.send().await?).await?;

        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| DriveError::Protocol("upload session response has no Location header".to_string()))?;
        Url::parse(location).map_err(|e| DriveError::Protocol(format!("invalid upload session URL: {e}")))
    }

    async fn put_chunk(&self, session: &Url, body: Bytes, content_range: String) -> Result<Response> {
        let request = self.http.put(session.clone()).header(header::CONTENT_RANGE, content_range).body(body);
        Ok(self.authorized(request).await?.send().await?)
    }

    async fn finish_upload(response: Response) -> Result<FileId> {
        let created: FileRef = check(response).await?.json().await?;
        Ok(created.id)
    }

    /// Send the whole body through the session, one chunk per request
    async fn send_chunks(&self, session: &Url, content: &Bytes) -> Result<FileId> {
        let total = content.len();
        if total == 0 {
            let response = self.put_chunk(session, Bytes::new(), "bytes */0".to_string()).await?;
            return Self::finish_upload(response).await;
        }

        let mut offset = 0;
        loop {
            let end = (offset + self.chunk_size).min(total);
            let content_range = format!("bytes {}-{}/{}", offset, end - 1, total);
            trace!(%content_range, "Sending upload chunk");

            let response = self.put_chunk(session, content.slice(offset..end), content_range).await?;
            if response.status().as_u16() != RESUME_INCOMPLETE {
                return Self::finish_upload(response).await;
            }

            let next = next_offset(&response)?;
            if next <= offset || next > total {
                return Err(DriveError::Protocol(format!(
                    "upload stalled: server acknowledged {next} of {total} bytes after sending from {offset}"
                )));
            }
            offset = next;
        }
    }
}

#[async_trait]
impl DriveApi for DriveClient {
    #[instrument(skip(self), err)]
    async fn find_folder(&self, name: &str, parent: &str) -> Result<Option<FolderId>> {
        let query = format!(
            "name='{}' and '{}' in parents and mimeType='{}' and trashed=false",
            escape_query_value(name),
            escape_query_value(parent),
            FOLDER_MIME_TYPE
        );
        let request = self.http.get(self.endpoint("drive/v3/files")?).query(&[
            ("q", query.as_str()),
            ("spaces", "drive"),
            ("fields", "files(id)"),
            ("supportsAllDrives", "true"),
            ("includeItemsFromAllDrives", "true"),
        ]);
        let list: FileList = check(self.authorized(request).await?.send().await?).await?.json().await?;

        let found = list.files.into_iter().map(|f| f.id).min();
        debug!(?found, "Folder lookup finished");
        Ok(found)
    }

    #[instrument(skip(self), err)]
    async fn create_folder(&self, name: &str, parent: &str) -> Result<FolderId> {
        let request = self
            .http
            .post(self.endpoint("drive/v3/files")?)
            .query(&[("supportsAllDrives", "true"), ("fields", "id")])
            .json(&json!({
                "name": name,
                "mimeType": FOLDER_MIME_TYPE,
                "parents": [parent],
            }));
        let created: FileRef = check(self.authorized(request).await?.send().await?).await?.json().await?;
        debug!(folder_id = %created.id, "Created folder");
        Ok(created.id)
    }

    #[instrument(skip(self, file), fields(name = %file.name, bytes = file.content.len()), err)]
    async fn create_file(&self, file: NewFile) -> Result<FileId> {
        let session = self.start_upload_session(&file).await?;
        let file_id = self.send_chunks(&session, &file.content).await?;
        debug!(%file_id, "Upload complete");
        Ok(file_id)
    }

    #[instrument(skip(self), err)]
    async fn grant_public_read(&self, file_id: &str) -> Result<()> {
        let request = self
            .http
            .post(self.file_endpoint(file_id, Some("permissions"))?)
            .query(&[("supportsAllDrives", "true")])
            .json(&json!({ "type": "anyone", "role": "reader" }));
        check(self.authorized(request).await?.send().await?).await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn get_metadata(&self, file_id: &str) -> Result<FileMetadata> {
        let request = self
            .http
            .get(self.file_endpoint(file_id, None)?)
            .query(&[("fields", "name,mimeType"), ("supportsAllDrives", "true")]);
        let resource: FileResource = check(self.authorized(request).await?.send().await?).await?.json().await?;
        Ok(FileMetadata {
            name: resource.name,
            mime_type: resource
                .mime_type
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
        })
    }

    #[instrument(skip(self), err)]
    async fn stream_download(&self, file_id: &str) -> Result<ByteStream> {
        let request = self
            .http
            .get(self.file_endpoint(file_id, None)?)
            .query(&[("alt", "media"), ("supportsAllDrives", "true")]);
        let response = check(self.authorized(request).await?.send().await?).await?;
        Ok(response.bytes_stream().map_err(DriveError::from).boxed())
    }

    #[instrument(skip(self), err)]
    async fn delete_object(&self, file_id: &str) -> Result<()> {
        let request = self
            .http
            .delete(self.file_endpoint(file_id, None)?)
            .query(&[("supportsAllDrives", "true")]);
        let response = check(self.authorized(request).await?.send().await?).await?;
        if response.status() != StatusCode::NO_CONTENT {
            debug!(status = %response.status(), "Unexpected success status for delete");
        }
        Ok(())
    }
}
