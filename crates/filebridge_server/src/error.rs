//! Error types for the item server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use filebridge_protocol::{ErrorBody, ErrorCode, ProtocolError};
use thiserror::Error;
use tracing::error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the item server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// A path or body identifier could not be decoded.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Missing or rejected credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The caller may not touch this item.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// No such item.
    #[error("item not found: {0}")]
    NotFound(String),

    /// Content requested for a folder or container.
    #[error("not a file: {0}")]
    NotAFile(String),

    /// Content requested for a file that has none.
    #[error("no content uploaded for {0}")]
    NoContent(String),

    /// An update carried no recognized field.
    #[error("no valid fields to update")]
    NothingToUpdate,

    /// A content path escaped the content root.
    #[error("unsafe content path: {0}")]
    UnsafePath(String),

    /// Storing uploaded content failed.
    #[error("upload failed: {0}")]
    UploadFailed(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status().is_server_error()
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::InvalidIdentifier(_)
            | ServerError::InvalidRequest(_)
            | ServerError::NothingToUpdate
            | ServerError::UnsafePath(_) => StatusCode::BAD_REQUEST,
            ServerError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServerError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServerError::NotFound(_) | ServerError::NotAFile(_) | ServerError::NoContent(_) => {
                StatusCode::NOT_FOUND
            }
            ServerError::UploadFailed(_) | ServerError::Internal(_) | ServerError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            ServerError::InvalidIdentifier(_) => ErrorCode::InvalidIdentifier,
            ServerError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            ServerError::Unauthorized(_) => ErrorCode::Unauthorized,
            ServerError::Forbidden(_) => ErrorCode::Forbidden,
            ServerError::NotFound(_) => ErrorCode::NotFound,
            ServerError::NotAFile(_) => ErrorCode::NotAFile,
            ServerError::NoContent(_) => ErrorCode::NoContent,
            ServerError::NothingToUpdate => ErrorCode::NothingToUpdate,
            ServerError::UnsafePath(_) => ErrorCode::UnsafePath,
            ServerError::UploadFailed(_) => ErrorCode::UploadFailed,
            ServerError::Internal(_) | ServerError::Io(_) => ErrorCode::Internal,
        }
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::InvalidIdentifier { token } => ServerError::InvalidIdentifier(token),
            other => ServerError::InvalidRequest(other.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        let body = ErrorBody::new(self.code(), self.to_string());
        (status, Json(body)).into_response()
    }
}
