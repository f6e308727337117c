//! # filebridge protocol
//!
//! Wire types shared by the filebridge server and client.
//!
//! This crate provides:
//! - The identifier codec and the root/trash sentinels
//! - The item record schema
//! - Partial-update diffs and their server-side allow-list
//! - Request/response bodies and error codes
//!
//! ## Key Invariants
//!
//! - `decode(encode(b)) == b` for all byte strings
//! - Sentinels are never passed through the codec
//! - Every decoded record carries a non-empty `id`
//! - A partial update never clears a field it does not name

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod error;
pub mod id;
mod messages;
mod patch;
pub mod record;

pub use error::{ProtocolError, ProtocolResult};
pub use id::{ItemId, ItemIdentifier, ROOT_SENTINEL, TRASH_SENTINEL};
pub use messages::{
    ChangesQuery, ChangesResponse, CreateItemRequest, ErrorBody, ErrorCode, ListQuery, PageToken,
    CONTENT_FIELD, NEXT_PAGE_HEADER,
};
pub use patch::{is_root_token, keys, FieldDiff, ItemFields, ItemPatch};
pub use record::{ItemKind, ItemRecord, TypeAndCreator};
