//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding wire data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A token is not a valid encoded identifier.
    #[error("invalid identifier: {token:?}")]
    InvalidIdentifier {
        /// The offending token.
        token: String,
    },

    /// The payload was empty where a record was expected.
    #[error("empty response")]
    EmptyPayload,

    /// The payload is not well-formed JSON of the expected shape.
    #[error("invalid JSON: {message}")]
    InvalidJson {
        /// Parser message.
        message: String,
    },

    /// A record is missing its identifier, or the identifier is empty.
    #[error("missing or invalid 'id' in metadata")]
    MissingId,

    /// A field carried a value of the wrong type or range.
    #[error("invalid value for field '{field}': {message}")]
    InvalidField {
        /// Wire name of the field.
        field: &'static str,
        /// What was wrong with it.
        message: String,
    },
}

impl ProtocolError {
    /// Creates an invalid identifier error.
    pub fn invalid_identifier(token: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            token: token.into(),
        }
    }

    /// Creates an invalid field error.
    pub fn invalid_field(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidJson {
            message: err.to_string(),
        }
    }
}
