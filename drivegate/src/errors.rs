use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;
use utoipa::ToSchema;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Bearer credential missing, malformed or rejected by the identity provider
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// A setting needed to serve this request is absent
    #[error("{setting} not configured")]
    NotConfigured { setting: String },

    /// Malformed client input (e.g. broken multipart body)
    #[error("{message}")]
    BadRequest { message: String },

    /// Upload body exceeded the configured limit
    #[error("{message}")]
    PayloadTooLarge { message: String },

    /// Object absent or not reachable through the storage provider
    #[error("File not found: {message}")]
    NotFound { message: String },

    /// Storage provider failed while creating folders, the object, or its permission
    #[error("Upload failed: {message}")]
    UploadFailed { message: String },

    /// Storage provider refused or failed the deletion
    #[error("Delete failed: {message}")]
    DeleteFailed { message: String },

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// JSON error body. The browser client reads `detail`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub detail: String,
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::NotConfigured { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::UploadFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            // Deletion failures are reported as "not reachable"
            Error::DeleteFailed { .. } => StatusCode::NOT_FOUND,
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message returned to the caller. Provider error text is passed through, internal errors are not.
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "Authentication required".to_string()),
            Error::Other(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Other(_) | Error::NotConfigured { .. } | Error::UploadFailed { .. } => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Unauthenticated { .. } => {
                tracing::info!("Authentication error: {}", self.user_message());
            }
            Error::BadRequest { .. } | Error::PayloadTooLarge { .. } | Error::NotFound { .. } | Error::DeleteFailed { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        let body = ErrorBody {
            detail: self.user_message(),
        };
        (status, Json(body)).into_response()
    }
}

/// Type alias for handler results
pub type Result<T> = std::result::Result<T, Error>;
