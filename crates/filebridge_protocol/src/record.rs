//! The item record schema shared by server storage and the wire.

use crate::error::{ProtocolError, ProtocolResult};
use crate::id::{ItemId, ItemIdentifier, TRASH_SENTINEL};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Whether an item is a file or a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    /// A file; may carry a content blob.
    #[default]
    File,
    /// A folder; never carries content.
    Folder,
}

impl ItemKind {
    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::File => "file",
            ItemKind::Folder => "folder",
        }
    }
}

/// Classic four-character type and creator codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeAndCreator {
    /// Type code, e.g. `ttxt`.
    #[serde(rename = "type")]
    pub type_code: String,
    /// Creator code.
    pub creator: String,
}

impl TypeAndCreator {
    /// Creates a type/creator pair.
    pub fn new(type_code: impl Into<String>, creator: impl Into<String>) -> Self {
        Self {
            type_code: type_code.into(),
            creator: creator.into(),
        }
    }
}

/// A file or folder record.
///
/// Identifiers inside a record (`id`, `parentId`) are raw, never encoded.
/// Timestamps are epoch seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRecord {
    /// Raw item identifier.
    pub id: String,
    /// Raw parent identifier; `None` for root-level items.
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Owning principal.
    #[serde(rename = "GUUID", default)]
    pub owner_id: String,
    /// Display name, possibly percent-encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// File or folder.
    #[serde(rename = "type", default)]
    pub kind: ItemKind,
    /// Blob location relative to the content root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_path: Option<String>,
    /// Opaque content version; empty until content is uploaded.
    #[serde(default)]
    pub content_version: String,
    /// Opaque metadata version.
    #[serde(default)]
    pub metadata_version: String,
    /// Creation time.
    #[serde(default, deserialize_with = "epoch::required")]
    pub created_at: i64,
    /// Last modification of any kind.
    #[serde(default, deserialize_with = "epoch::required")]
    pub updated_at: i64,
    /// Last time the item was opened.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "epoch::optional"
    )]
    pub last_used_date: Option<i64>,
    /// Last content modification as reported by the client.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "epoch::optional"
    )]
    pub content_modification_date: Option<i64>,
    /// Opaque tag bytes, base64 on the wire.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "tag_data")]
    pub tag_data: Option<Vec<u8>>,
    /// Favorite ordering rank.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favorite_rank: Option<i64>,
    /// File system flag bitmask.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_system_flags: Option<u32>,
    /// Extended attributes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_attributes: Option<BTreeMap<String, String>>,
    /// Type and creator codes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_and_creator: Option<TypeAndCreator>,
    /// True when the item lives under the trash container.
    #[serde(rename = "Trash", default, skip_serializing_if = "is_false")]
    pub trashed: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl ItemRecord {
    /// Creates a fresh record with no content.
    pub fn new(
        id: &ItemId,
        parent_id: Option<String>,
        owner_id: impl Into<String>,
        name: impl Into<String>,
        kind: ItemKind,
        now: i64,
    ) -> Self {
        Self {
            id: id.as_str().to_string(),
            parent_id,
            owner_id: owner_id.into(),
            name: Some(name.into()),
            kind,
            content_path: None,
            content_version: String::new(),
            metadata_version: String::new(),
            created_at: now,
            updated_at: now,
            last_used_date: None,
            content_modification_date: None,
            tag_data: None,
            favorite_rank: None,
            file_system_flags: None,
            extended_attributes: None,
            type_and_creator: None,
            trashed: false,
        }
    }

    /// Synthesizes the record for a sentinel container.
    ///
    /// Returns `None` for real items.
    pub fn synthesized(identifier: &ItemIdentifier, owner_id: &str, now: i64) -> Option<Self> {
        let name = identifier.sentinel_name()?;
        Some(Self {
            id: identifier.as_raw().to_string(),
            parent_id: None,
            owner_id: owner_id.to_string(),
            name: Some(name.to_string()),
            kind: ItemKind::Folder,
            content_path: None,
            content_version: String::new(),
            metadata_version: String::new(),
            created_at: now,
            updated_at: now,
            last_used_date: None,
            content_modification_date: None,
            tag_data: None,
            favorite_rank: None,
            file_system_flags: None,
            extended_attributes: None,
            type_and_creator: None,
            trashed: *identifier == ItemIdentifier::Trash,
        })
    }

    /// Decodes a single record, enforcing the non-empty `id` check.
    pub fn from_json(bytes: &[u8]) -> ProtocolResult<Self> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(ProtocolError::EmptyPayload);
        }
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        Self::from_value(value)
    }

    /// Decodes a JSON array of records; every element must carry an `id`.
    pub fn list_from_json(bytes: &[u8]) -> ProtocolResult<Vec<Self>> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(ProtocolError::EmptyPayload);
        }
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        match value {
            serde_json::Value::Array(values) => values.into_iter().map(Self::from_value).collect(),
            _ => Err(ProtocolError::InvalidJson {
                message: "expected an array of items".into(),
            }),
        }
    }

    /// Decodes a record from an already-parsed JSON value.
    pub fn from_value(value: serde_json::Value) -> ProtocolResult<Self> {
        let has_id = value
            .get("id")
            .and_then(serde_json::Value::as_str)
            .is_some_and(|id| !id.is_empty());
        if !has_id {
            return Err(ProtocolError::MissingId);
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Name shown to users; falls back to the identifier.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Returns true if this record is a folder.
    pub fn is_folder(&self) -> bool {
        self.kind == ItemKind::Folder
    }

    /// Returns true if a content blob has been uploaded.
    pub fn has_content(&self) -> bool {
        self.content_path.as_deref().is_some_and(|p| !p.is_empty())
    }

    /// Returns true if the parent is the trash container.
    pub fn is_in_trash(&self) -> bool {
        self.parent_id.as_deref() == Some(TRASH_SENTINEL)
    }

    /// Typed identifier of this record.
    pub fn identifier(&self) -> ProtocolResult<ItemIdentifier> {
        ItemIdentifier::from_raw(&self.id)
    }

    /// Typed identifier of this record's parent.
    pub fn parent_identifier(&self) -> ProtocolResult<ItemIdentifier> {
        ItemIdentifier::from_parent_id(self.parent_id.as_deref())
    }
}

/// Epoch-second fields tolerate floats, which are truncated.
pub mod epoch {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer};
    use serde_json::Number;

    /// Converts a JSON number to whole epoch seconds.
    pub fn to_seconds(number: &Number) -> Option<i64> {
        number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|f| f.is_finite())
                .map(|f| f.trunc() as i64)
        })
    }

    pub(crate) fn required<'de, D>(deserializer: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let number = Number::deserialize(deserializer)?;
        to_seconds(&number).ok_or_else(|| D::Error::custom("expected epoch seconds"))
    }

    pub(crate) fn optional<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Number>::deserialize(deserializer)? {
            Some(number) => to_seconds(&number)
                .map(Some)
                .ok_or_else(|| D::Error::custom("expected epoch seconds")),
            None => Ok(None),
        }
    }
}

/// Tag bytes travel as standard base64 text.
pub mod tag_data {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Encodes tag bytes for the wire.
    pub fn encode(bytes: &[u8]) -> String {
        STANDARD.encode(bytes)
    }

    /// Decodes wire tag text.
    pub fn decode(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(text)
    }

    pub(crate) fn serialize<S>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => serializer.serialize_str(&encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(text) => decode(&text).map(Some).map_err(D::Error::custom),
            None => Ok(None),
        }
    }
}
