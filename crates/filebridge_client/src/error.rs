//! Error types for the client.

use filebridge_protocol::{ErrorBody, ErrorCode, ProtocolError};
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur while talking to the remote store.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Transport failure; the request may not have reached the server.
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with an empty body where data was expected.
    #[error("empty response")]
    EmptyResponse,

    /// The body is not JSON of the expected shape, or lacks an `id`.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// An identifier could not be decoded.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Credentials are missing or were rejected.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The item belongs to another principal.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// No such item.
    #[error("not found: {0}")]
    NotFound(String),

    /// Content requested for a folder or for a file without content.
    #[error("not a file: {0}")]
    NotAFile(String),

    /// An update would change nothing.
    #[error("nothing to update")]
    NothingToUpdate,

    /// The server rejected the request as malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Local filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The server failed to store uploaded content.
    #[error("upload failed: {0}")]
    UploadFailed(String),

    /// A sync anchor can no longer be used; enumerate from scratch.
    #[error("sync anchor expired")]
    SyncAnchorExpired,

    /// Root and trash cannot be modified or deleted.
    #[error("container {0} is read-only")]
    ReadOnlyContainer(String),

    /// The operation was cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,

    /// Any other non-success status.
    #[error("server error {status}: {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Server-provided message.
        message: String,
    },
}

impl ClientError {
    /// Maps a non-success response to an error.
    ///
    /// The JSON error body's `code` is preferred; the status decides when the
    /// body is missing or unreadable.
    pub fn from_response(status: u16, body: &[u8]) -> Self {
        match serde_json::from_slice::<ErrorBody>(body) {
            Ok(body) => Self::from_code(status, body.code, body.error),
            Err(_) => {
                let message = String::from_utf8_lossy(body).trim().to_string();
                Self::from_status(status, message)
            }
        }
    }

    fn from_code(status: u16, code: ErrorCode, message: String) -> Self {
        match code {
            ErrorCode::InvalidIdentifier => Self::InvalidIdentifier(message),
            ErrorCode::InvalidRequest | ErrorCode::UnsafePath => Self::InvalidRequest(message),
            ErrorCode::Unauthorized => Self::Unauthorized(message),
            ErrorCode::Forbidden => Self::Forbidden(message),
            ErrorCode::NotFound => Self::NotFound(message),
            ErrorCode::NotAFile | ErrorCode::NoContent => Self::NotAFile(message),
            ErrorCode::NothingToUpdate => Self::NothingToUpdate,
            ErrorCode::UploadFailed => Self::UploadFailed(message),
            ErrorCode::Internal => Self::Server { status, message },
        }
    }

    fn from_status(status: u16, message: String) -> Self {
        match status {
            400 => Self::InvalidRequest(message),
            401 => Self::Unauthorized(message),
            403 => Self::Forbidden(message),
            404 => Self::NotFound(message),
            _ => Self::Server { status, message },
        }
    }

    /// Returns true if the caller may retry the operation.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Network(_) => true,
            ClientError::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::InvalidIdentifier { token } => ClientError::InvalidIdentifier(token),
            ProtocolError::EmptyPayload => ClientError::EmptyResponse,
            other => ClientError::InvalidResponse(other.to_string()),
        }
    }
}
