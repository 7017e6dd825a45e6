use crate::{
    AppState,
    api::models::files::{DeleteResponse, UploadQuery, UploadResponse},
    auth::current_user::Authenticated,
    drive::{DEFAULT_MIME_TYPE, DriveError, FolderPath, NewFile, resolve_folder},
    errors::{Error, ErrorBody, Result},
    types::{FileId, FolderId},
};
use axum::{
    Json,
    body::Body,
    extract::{FromRequestParts, Multipart, Path, Query, State, multipart::MultipartError},
    http::{HeaderValue, StatusCode, header, request::Parts},
    response::Response,
};
use bytes::Bytes;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use tracing::{debug, info};

/// Everything except the RFC 3986 unreserved characters is escaped in `filename*`
const FILENAME_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

const FALLBACK_FILENAME: &str = "upload";

/// `Content-Disposition` value that lets browsers show the original (possibly non-ASCII) name
pub fn content_disposition(filename: &str) -> String {
    format!("inline; filename*=UTF-8''{}", utf8_percent_encode(filename, FILENAME_ESCAPE))
}

/// Provider error text without our own wrapping
fn provider_text(error: &DriveError) -> String {
    match error {
        DriveError::Api { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

/// The shared upload root. Rejects the request before authentication when it is not configured.
#[derive(Debug, Clone)]
pub struct SharedFolder(pub FolderId);

impl FromRequestParts<AppState> for SharedFolder {
    type Rejection = Error;

    async fn from_request_parts(_parts: &mut Parts, state: &AppState) -> Result<Self> {
        state
            .config
            .shared_folder_id()
            .map(|id| SharedFolder(id.to_string()))
            .ok_or_else(|| Error::NotConfigured {
                setting: "GOOGLE_DRIVE_SHARED_FOLDER_ID".to_string(),
            })
    }
}

fn multipart_error(e: MultipartError) -> Error {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::PayloadTooLarge {
            message: "File exceeds the maximum upload size".to_string(),
        }
    } else {
        Error::BadRequest {
            message: format!("Failed to parse multipart data: {}", e.body_text()),
        }
    }
}

struct UploadedPart {
    filename: String,
    mime_type: String,
    content: Bytes,
}

#[utoipa::path(
    post,
    path = "/upload",
    tag = "files",
    summary = "Upload file",
    description = "Store a file in Drive under the classroom's folder and make it readable by link.",
    request_body(
        content_type = "multipart/form-data",
        description = "A `file` part, and optionally a `classroom_id` part"
    ),
    params(UploadQuery),
    responses(
        (status = 200, description = "File stored", body = UploadResponse),
        (status = 400, description = "Malformed multipart body or no file part", body = ErrorBody),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody),
        (status = 413, description = "File too large", body = ErrorBody),
        (status = 500, description = "Shared folder not configured or Drive failure", body = ErrorBody),
    ),
    security(("bearer" = []))
)]
#[tracing::instrument(skip_all, fields(uid = %identity.uid))]
pub async fn upload_file(
    State(state): State<AppState>,
    SharedFolder(root): SharedFolder,
    Authenticated(identity): Authenticated,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    let mut part: Option<UploadedPart> = None;
    let mut form_classroom: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let field_name = field.name().unwrap_or("").to_string();
        match field_name.as_str() {
            "file" => {
                let filename = field
                    .file_name()
                    .filter(|name| !name.is_empty())
                    .unwrap_or(FALLBACK_FILENAME)
                    .to_string();
                let mime_type = field
                    .content_type()
                    .filter(|mime| !mime.is_empty())
                    .unwrap_or(DEFAULT_MIME_TYPE)
                    .to_string();
                let content = field.bytes().await.map_err(multipart_error)?;
                debug!(%filename, %mime_type, bytes = content.len(), "Received file part");
                part = Some(UploadedPart {
                    filename,
                    mime_type,
                    content,
                });
            }
            "classroom_id" | "classroomId" => {
                form_classroom = Some(field.text().await.map_err(multipart_error)?);
            }
            other => debug!(field = other, "Ignoring unknown form field"),
        }
    }

    let part = part.ok_or_else(|| Error::BadRequest {
        message: "Missing 'file' field".to_string(),
    })?;

    let classroom = query
        .classroom_id
        .filter(|c| !c.is_empty())
        .or(form_classroom.filter(|c| !c.is_empty()));
    let path = FolderPath::for_upload(
        &state.config.upload.root_folder,
        classroom.as_deref(),
        &state.config.upload.default_folder,
    );

    let upload_failed = |e: DriveError| Error::UploadFailed {
        message: provider_text(&e),
    };

    let folder = resolve_folder(state.drive.as_ref(), &root, &path).await.map_err(upload_failed)?;
    let bytes = part.content.len();
    let file_id = state
        .drive
        .upload_object(NewFile {
            name: part.filename.clone(),
            parent: folder,
            mime_type: part.mime_type,
            content: part.content,
        })
        .await
        .map_err(upload_failed)?;

    info!(%file_id, filename = %part.filename, folder = %path, bytes, "File uploaded");
    Ok(Json(UploadResponse::for_file(file_id)))
}

/// Look up the object's name and type, then stream its content back
async fn serve_file(state: &AppState, file_id: &str) -> Result<Response> {
    let not_found = |e: DriveError| Error::NotFound {
        message: provider_text(&e),
    };

    let metadata = state.drive.get_metadata(file_id).await.map_err(not_found)?;
    let stream = state.drive.stream_download(file_id).await.map_err(not_found)?;
    debug!(name = %metadata.name, mime_type = %metadata.mime_type, "Streaming file");

    let content_type = HeaderValue::from_str(&metadata.mime_type).unwrap_or(HeaderValue::from_static(DEFAULT_MIME_TYPE));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_DISPOSITION, content_disposition(&metadata.name))
        .body(Body::from_stream(stream))
        .map_err(|e| Error::Other(anyhow::anyhow!("Failed to build download response: {e}")))
}

#[utoipa::path(
    get,
    path = "/public/download/{file_id}",
    tag = "files",
    summary = "Download file (public)",
    description = "Stream a file's content. No authentication required.",
    params(("file_id" = String, Path, description = "Drive file id")),
    responses(
        (status = 200, description = "File content", body = Vec<u8>, content_type = "application/octet-stream"),
        (status = 404, description = "File not found", body = ErrorBody),
    )
)]
#[tracing::instrument(skip_all, fields(%file_id))]
pub async fn public_download_file(State(state): State<AppState>, Path(file_id): Path<FileId>) -> Result<Response> {
    serve_file(&state, &file_id).await
}

#[utoipa::path(
    get,
    path = "/download/{file_id}",
    tag = "files",
    summary = "Download file",
    description = "Stream a file's content to an authenticated caller.",
    params(("file_id" = String, Path, description = "Drive file id")),
    responses(
        (status = 200, description = "File content", body = Vec<u8>, content_type = "application/octet-stream"),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody),
        (status = 404, description = "File not found", body = ErrorBody),
    ),
    security(("bearer" = []))
)]
#[tracing::instrument(skip_all, fields(%file_id, uid = %identity.uid))]
pub async fn download_file(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
    Path(file_id): Path<FileId>,
) -> Result<Response> {
    serve_file(&state, &file_id).await
}

#[utoipa::path(
    delete,
    path = "/delete/{file_id}",
    tag = "files",
    summary = "Delete file",
    params(("file_id" = String, Path, description = "Drive file id")),
    responses(
        (status = 200, description = "File deleted", body = DeleteResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody),
        (status = 404, description = "File missing or could not be deleted", body = ErrorBody),
    ),
    security(("bearer" = []))
)]
#[tracing::instrument(skip_all, fields(%file_id, uid = %identity.uid))]
pub async fn delete_file(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
    Path(file_id): Path<FileId>,
) -> Result<Json<DeleteResponse>> {
    state.drive.delete_object(&file_id).await.map_err(|e| Error::DeleteFailed {
        message: provider_text(&e),
    })?;

    info!("File deleted");
    Ok(Json(DeleteResponse::deleted(file_id)))
}
