//! Request and response bodies other than the item record itself.

use crate::record::{ItemKind, ItemRecord};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Response header carrying the token of the next listing page.
pub const NEXT_PAGE_HEADER: &str = "x-next-page-token";

/// Multipart field name carrying uploaded content.
pub const CONTENT_FIELD: &str = "file";

/// Body of `POST /items`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateItemRequest {
    /// Display name of the new item.
    pub name: String,
    /// File or folder.
    #[serde(rename = "type")]
    pub kind: ItemKind,
    /// Parent token; omitted for root-level items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

/// Query of `GET /items`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    /// Parent token; omitted for root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Page token from a previous `x-next-page-token` header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
    /// Maximum number of items per page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<usize>,
}

/// Query of `GET /changes`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesQuery {
    /// Anchor returned by a previous call; omitted to fetch the current one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    /// Maximum number of changes to return.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// Body of a `GET /changes` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangesResponse {
    /// Current state of items changed since the anchor.
    pub updated: Vec<ItemRecord>,
    /// Raw ids of items deleted since the anchor.
    pub deleted: Vec<String>,
    /// Anchor to pass on the next call.
    pub anchor: u64,
    /// True when more changes are waiting past `anchor`.
    pub more_coming: bool,
}

/// Machine-readable error code of an error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// An identifier could not be decoded.
    InvalidIdentifier,
    /// The request body or query is malformed.
    InvalidRequest,
    /// Missing or rejected bearer token.
    Unauthorized,
    /// The item belongs to another principal or is read-only.
    Forbidden,
    /// No such item.
    NotFound,
    /// Content requested for a folder.
    NotAFile,
    /// Content requested for a file that has none.
    NoContent,
    /// An update carried no recognized field.
    NothingToUpdate,
    /// A content path escaped the content root.
    UnsafePath,
    /// Storing uploaded content failed.
    UploadFailed,
    /// Anything else.
    Internal,
}

impl ErrorCode {
    /// Wire spelling of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidIdentifier => "invalid_identifier",
            Self::InvalidRequest => "invalid_request",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::NotAFile => "not_a_file",
            Self::NoContent => "no_content",
            Self::NothingToUpdate => "nothing_to_update",
            Self::UnsafePath => "unsafe_path",
            Self::UploadFailed => "upload_failed",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable message.
    pub error: String,
    /// Machine-readable code.
    pub code: ErrorCode,
}

impl ErrorBody {
    /// Creates an error body.
    pub fn new(code: ErrorCode, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code,
        }
    }
}

/// Opaque listing cursor: the offset into the `(name, id)` ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PageToken(usize);

impl PageToken {
    const PREFIX: &'static str = "o:";

    /// Creates a token pointing at `offset`.
    pub fn new(offset: usize) -> Self {
        Self(offset)
    }

    /// Offset of the first item of the page.
    pub fn offset(&self) -> usize {
        self.0
    }

    /// Encodes the token for the wire.
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(format!("{}{}", Self::PREFIX, self.0))
    }

    /// Parses a wire token; returns `None` if it was not produced by [`encode`].
    ///
    /// [`encode`]: PageToken::encode
    pub fn decode(token: &str) -> Option<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(token).ok()?;
        let text = String::from_utf8(bytes).ok()?;
        text.strip_prefix(Self::PREFIX)?.parse().ok().map(Self)
    }
}
