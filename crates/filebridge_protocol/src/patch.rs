//! Partial-update bodies.
//!
//! A client sends a [`FieldDiff`]: a JSON object containing exactly the
//! fields it wants to change. The server parses it into an [`ItemPatch`]
//! against a fixed allow-list and applies it with `$set` semantics: keys that
//! are absent, or present with a `null` value, never clear a stored field.
//! `parentId` is the one exception where `null` is meaningful (move to root).

use crate::error::{ProtocolError, ProtocolResult};
use crate::id::{ItemIdentifier, ROOT_SENTINEL};
use crate::record::{epoch, tag_data, ItemRecord, TypeAndCreator};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Wire keys of the updatable fields.
pub mod keys {
    /// Display name.
    pub const NAME: &str = "name";
    /// Parent token.
    pub const PARENT_ID: &str = "parentId";
    /// Last-used timestamp.
    pub const LAST_USED_DATE: &str = "lastUsedDate";
    /// Creation timestamp.
    pub const CREATED_AT: &str = "createdAt";
    /// Legacy spelling of [`CREATED_AT`] accepted by the server.
    pub const CREATION_DATE: &str = "creationDate";
    /// Content modification timestamp.
    pub const CONTENT_MODIFICATION_DATE: &str = "contentModificationDate";
    /// Base64 tag data.
    pub const TAG_DATA: &str = "tagData";
    /// Favorite rank.
    pub const FAVORITE_RANK: &str = "favoriteRank";
    /// File system flags.
    pub const FILE_SYSTEM_FLAGS: &str = "fileSystemFlags";
    /// Extended attributes map.
    pub const EXTENDED_ATTRIBUTES: &str = "extendedAttributes";
    /// Type and creator codes.
    pub const TYPE_AND_CREATOR: &str = "typeAndCreator";
}

/// A set of item fields, as reported changed by the host.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ItemFields(u16);

impl ItemFields {
    /// Display name.
    pub const FILENAME: Self = Self(1 << 0);
    /// Parent container.
    pub const PARENT: Self = Self(1 << 1);
    /// Last-used timestamp.
    pub const LAST_USED_DATE: Self = Self(1 << 2);
    /// Creation timestamp.
    pub const CREATION_DATE: Self = Self(1 << 3);
    /// Content modification timestamp.
    pub const CONTENT_MODIFICATION_DATE: Self = Self(1 << 4);
    /// Tag data.
    pub const TAG_DATA: Self = Self(1 << 5);
    /// Favorite rank.
    pub const FAVORITE_RANK: Self = Self(1 << 6);
    /// File system flags.
    pub const FILE_SYSTEM_FLAGS: Self = Self(1 << 7);
    /// Extended attributes.
    pub const EXTENDED_ATTRIBUTES: Self = Self(1 << 8);
    /// Type and creator codes.
    pub const TYPE_AND_CREATOR: Self = Self(1 << 9);
    /// File contents. Never part of a diff; handled by upload.
    pub const CONTENTS: Self = Self(1 << 10);

    const NAMED: [(Self, &'static str); 11] = [
        (Self::FILENAME, "FILENAME"),
        (Self::PARENT, "PARENT"),
        (Self::LAST_USED_DATE, "LAST_USED_DATE"),
        (Self::CREATION_DATE, "CREATION_DATE"),
        (Self::CONTENT_MODIFICATION_DATE, "CONTENT_MODIFICATION_DATE"),
        (Self::TAG_DATA, "TAG_DATA"),
        (Self::FAVORITE_RANK, "FAVORITE_RANK"),
        (Self::FILE_SYSTEM_FLAGS, "FILE_SYSTEM_FLAGS"),
        (Self::EXTENDED_ATTRIBUTES, "EXTENDED_ATTRIBUTES"),
        (Self::TYPE_AND_CREATOR, "TYPE_AND_CREATOR"),
        (Self::CONTENTS, "CONTENTS"),
    ];

    /// The empty set.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Every field.
    pub const fn all() -> Self {
        Self((1 << 11) - 1)
    }

    /// Every field that can appear in a diff.
    pub const fn metadata() -> Self {
        Self(Self::all().0 & !Self::CONTENTS.0)
    }

    /// Returns true if all fields of `other` are in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if no field is set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Adds the fields of `other`.
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Removes the fields of `other`.
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Returns the fields in both sets.
    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Iterates over the single-field members of the set.
    pub fn iter(self) -> impl Iterator<Item = Self> {
        Self::NAMED
            .into_iter()
            .map(|(flag, _)| flag)
            .filter(move |flag| self.contains(*flag))
    }

    /// Wire key of a single metadata field.
    pub fn wire_key(self) -> Option<&'static str> {
        let key = match self {
            Self::FILENAME => keys::NAME,
            Self::PARENT => keys::PARENT_ID,
            Self::LAST_USED_DATE => keys::LAST_USED_DATE,
            Self::CREATION_DATE => keys::CREATED_AT,
            Self::CONTENT_MODIFICATION_DATE => keys::CONTENT_MODIFICATION_DATE,
            Self::TAG_DATA => keys::TAG_DATA,
            Self::FAVORITE_RANK => keys::FAVORITE_RANK,
            Self::FILE_SYSTEM_FLAGS => keys::FILE_SYSTEM_FLAGS,
            Self::EXTENDED_ATTRIBUTES => keys::EXTENDED_ATTRIBUTES,
            Self::TYPE_AND_CREATOR => keys::TYPE_AND_CREATOR,
            _ => return None,
        };
        Some(key)
    }
}

impl BitOr for ItemFields {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ItemFields {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for ItemFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMED
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "ItemFields({})", names.join(" | "))
    }
}

/// The body of a partial update: only the fields being changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FieldDiff(Map<String, Value>);

impl FieldDiff {
    /// Creates an empty diff.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Sets the display name.
    pub fn set_name(&mut self, name: &str) {
        self.0.insert(keys::NAME.into(), Value::from(name));
    }

    /// Sets the parent; sentinels are sent as literals, items encoded.
    pub fn set_parent(&mut self, parent: &ItemIdentifier) {
        self.0
            .insert(keys::PARENT_ID.into(), Value::from(parent.to_token()));
    }

    /// Sets a timestamp field in (possibly fractional) epoch seconds.
    pub fn set_timestamp(&mut self, key: &'static str, seconds: f64) {
        let value = serde_json::Number::from_f64(seconds)
            .map(Value::Number)
            .unwrap_or(Value::Null);
        if !value.is_null() {
            self.0.insert(key.into(), value);
        }
    }

    /// Sets tag data, base64 encoded.
    pub fn set_tag_data(&mut self, bytes: &[u8]) {
        self.0
            .insert(keys::TAG_DATA.into(), Value::from(tag_data::encode(bytes)));
    }

    /// Sets the favorite rank.
    pub fn set_favorite_rank(&mut self, rank: i64) {
        self.0.insert(keys::FAVORITE_RANK.into(), Value::from(rank));
    }

    /// Sets the file system flags.
    pub fn set_file_system_flags(&mut self, flags: u32) {
        self.0
            .insert(keys::FILE_SYSTEM_FLAGS.into(), Value::from(flags));
    }

    /// Sets the extended attributes.
    pub fn set_extended_attributes(&mut self, attributes: &BTreeMap<String, String>) {
        let map = attributes
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
            .collect();
        self.0
            .insert(keys::EXTENDED_ATTRIBUTES.into(), Value::Object(map));
    }

    /// Sets the type and creator codes.
    pub fn set_type_and_creator(&mut self, codes: &TypeAndCreator) {
        let mut map = Map::new();
        map.insert("type".into(), Value::from(codes.type_code.as_str()));
        map.insert("creator".into(), Value::from(codes.creator.as_str()));
        self.0
            .insert(keys::TYPE_AND_CREATOR.into(), Value::Object(map));
    }

    /// Returns true if nothing would be changed.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of fields in the diff.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Wire keys present in the diff.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Returns the value for a wire key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Borrows the underlying JSON object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Serializes the diff as a JSON body.
    pub fn to_json(&self) -> Vec<u8> {
        Value::Object(self.0.clone()).to_string().into_bytes()
    }
}

/// A parsed, allow-listed partial update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemPatch {
    /// New display name.
    pub name: Option<String>,
    /// New parent; `Some(Root)` moves to root level.
    pub parent: Option<ItemIdentifier>,
    /// New last-used timestamp.
    pub last_used_date: Option<i64>,
    /// New creation timestamp.
    pub created_at: Option<i64>,
    /// New content modification timestamp.
    pub content_modification_date: Option<i64>,
    /// New tag bytes.
    pub tag_data: Option<Vec<u8>>,
    /// New favorite rank.
    pub favorite_rank: Option<i64>,
    /// New file system flags.
    pub file_system_flags: Option<u32>,
    /// New extended attributes (replaces the whole map).
    pub extended_attributes: Option<BTreeMap<String, String>>,
    /// New type and creator codes.
    pub type_and_creator: Option<TypeAndCreator>,
}

impl ItemPatch {
    /// Parses a request body. Unknown keys are ignored.
    pub fn from_body(body: &Map<String, Value>) -> ProtocolResult<Self> {
        let present = |key: &str| body.get(key).filter(|v| !v.is_null());

        let name = match present(keys::NAME) {
            Some(Value::String(name)) if !name.is_empty() => Some(name.clone()),
            Some(_) => {
                return Err(ProtocolError::invalid_field(
                    keys::NAME,
                    "expected a non-empty string",
                ))
            }
            None => None,
        };

        let parent = match body.get(keys::PARENT_ID) {
            None => None,
            Some(Value::Null) => Some(ItemIdentifier::Root),
            Some(Value::String(token)) if token.is_empty() => Some(ItemIdentifier::Root),
            Some(Value::String(token)) => Some(ItemIdentifier::from_token(token)?),
            Some(_) => {
                return Err(ProtocolError::invalid_field(
                    keys::PARENT_ID,
                    "expected a token or null",
                ))
            }
        };

        let seconds = |key: &'static str| -> ProtocolResult<Option<i64>> {
            match present(key) {
                Some(Value::Number(n)) => epoch::to_seconds(n)
                    .map(Some)
                    .ok_or_else(|| ProtocolError::invalid_field(key, "expected epoch seconds")),
                Some(_) => Err(ProtocolError::invalid_field(key, "expected a number")),
                None => Ok(None),
            }
        };

        let created_at = match seconds(keys::CREATED_AT)? {
            Some(value) => Some(value),
            None => seconds(keys::CREATION_DATE)?,
        };

        let tag_data = match present(keys::TAG_DATA) {
            Some(Value::String(text)) => Some(tag_data::decode(text).map_err(|e| {
                ProtocolError::invalid_field(keys::TAG_DATA, e.to_string())
            })?),
            Some(_) => {
                return Err(ProtocolError::invalid_field(
                    keys::TAG_DATA,
                    "expected base64 text",
                ))
            }
            None => None,
        };

        let favorite_rank = match present(keys::FAVORITE_RANK) {
            Some(Value::Number(n)) => Some(epoch::to_seconds(n).ok_or_else(|| {
                ProtocolError::invalid_field(keys::FAVORITE_RANK, "expected an integer")
            })?),
            Some(_) => {
                return Err(ProtocolError::invalid_field(
                    keys::FAVORITE_RANK,
                    "expected an integer",
                ))
            }
            None => None,
        };

        let file_system_flags = match present(keys::FILE_SYSTEM_FLAGS) {
            Some(Value::Number(n)) => Some(
                n.as_u64()
                    .and_then(|flags| u32::try_from(flags).ok())
                    .ok_or_else(|| {
                        ProtocolError::invalid_field(
                            keys::FILE_SYSTEM_FLAGS,
                            "expected an unsigned 32-bit bitmask",
                        )
                    })?,
            ),
            Some(_) => {
                return Err(ProtocolError::invalid_field(
                    keys::FILE_SYSTEM_FLAGS,
                    "expected an integer",
                ))
            }
            None => None,
        };

        let extended_attributes = match present(keys::EXTENDED_ATTRIBUTES) {
            Some(Value::Object(map)) if map.is_empty() => None,
            Some(Value::Object(map)) => {
                let mut attributes = BTreeMap::new();
                for (key, value) in map {
                    let value = value.as_str().ok_or_else(|| {
                        ProtocolError::invalid_field(
                            keys::EXTENDED_ATTRIBUTES,
                            format!("value of '{key}' is not a string"),
                        )
                    })?;
                    attributes.insert(key.clone(), value.to_string());
                }
                Some(attributes)
            }
            Some(_) => {
                return Err(ProtocolError::invalid_field(
                    keys::EXTENDED_ATTRIBUTES,
                    "expected an object",
                ))
            }
            None => None,
        };

        let type_and_creator = match present(keys::TYPE_AND_CREATOR) {
            Some(Value::Object(map)) if map.is_empty() => None,
            Some(Value::Object(map)) => {
                let code = |name: &str| {
                    map.get(name)
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .ok_or_else(|| {
                            ProtocolError::invalid_field(
                                keys::TYPE_AND_CREATOR,
                                format!("missing '{name}' code"),
                            )
                        })
                };
                Some(TypeAndCreator {
                    type_code: code("type")?,
                    creator: code("creator")?,
                })
            }
            Some(_) => {
                return Err(ProtocolError::invalid_field(
                    keys::TYPE_AND_CREATOR,
                    "expected an object",
                ))
            }
            None => None,
        };

        Ok(Self {
            name,
            parent,
            last_used_date: seconds(keys::LAST_USED_DATE)?,
            created_at,
            content_modification_date: seconds(keys::CONTENT_MODIFICATION_DATE)?,
            tag_data,
            favorite_rank,
            file_system_flags,
            extended_attributes,
            type_and_creator,
        })
    }

    /// Returns true if the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }

    /// The set of fields this patch changes.
    pub fn fields(&self) -> ItemFields {
        let mut fields = ItemFields::empty();
        let mut mark = |present: bool, flag: ItemFields| {
            if present {
                fields.insert(flag);
            }
        };
        mark(self.name.is_some(), ItemFields::FILENAME);
        mark(self.parent.is_some(), ItemFields::PARENT);
        mark(self.last_used_date.is_some(), ItemFields::LAST_USED_DATE);
        mark(self.created_at.is_some(), ItemFields::CREATION_DATE);
        mark(
            self.content_modification_date.is_some(),
            ItemFields::CONTENT_MODIFICATION_DATE,
        );
        mark(self.tag_data.is_some(), ItemFields::TAG_DATA);
        mark(self.favorite_rank.is_some(), ItemFields::FAVORITE_RANK);
        mark(self.file_system_flags.is_some(), ItemFields::FILE_SYSTEM_FLAGS);
        mark(
            self.extended_attributes.is_some(),
            ItemFields::EXTENDED_ATTRIBUTES,
        );
        mark(self.type_and_creator.is_some(), ItemFields::TYPE_AND_CREATOR);
        fields
    }

    /// Applies the patch to a record. Absent fields are left untouched.
    pub fn apply(&self, record: &mut ItemRecord) {
        if let Some(name) = &self.name {
            record.name = Some(name.clone());
        }
        if let Some(parent) = &self.parent {
            record.parent_id = match parent {
                ItemIdentifier::Root => None,
                other => Some(other.as_raw().to_string()),
            };
        }
        if let Some(value) = self.last_used_date {
            record.last_used_date = Some(value);
        }
        if let Some(value) = self.created_at {
            record.created_at = value;
        }
        if let Some(value) = self.content_modification_date {
            record.content_modification_date = Some(value);
        }
        if let Some(value) = &self.tag_data {
            record.tag_data = Some(value.clone());
        }
        if let Some(value) = self.favorite_rank {
            record.favorite_rank = Some(value);
        }
        if let Some(value) = self.file_system_flags {
            record.file_system_flags = Some(value);
        }
        if let Some(value) = &self.extended_attributes {
            record.extended_attributes = Some(value.clone());
        }
        if let Some(value) = &self.type_and_creator {
            record.type_and_creator = Some(value.clone());
        }
    }
}

/// Returns true if `token` names the root container in a `parentId` field.
pub fn is_root_token(token: &str) -> bool {
    token.is_empty() || token == ROOT_SENTINEL
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{ItemId, TRASH_SENTINEL};
    use crate::record::ItemKind;
    use serde_json::json;

    fn body(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("test body must be an object"),
        }
    }

    fn record() -> ItemRecord {
        let mut record = ItemRecord::new(
            &ItemId::new("item1").unwrap(),
            Some("folder1".into()),
            "owner",
            "a.txt",
            ItemKind::File,
            100,
        );
        record.favorite_rank = Some(3);
        record
    }

    #[test]
    fn item_fields_set_operations() {
        let mut fields = ItemFields::FILENAME | ItemFields::PARENT;
        assert!(fields.contains(ItemFields::FILENAME));
        assert!(!fields.contains(ItemFields::TAG_DATA));
        fields.remove(ItemFields::FILENAME);
        assert_eq!(fields, ItemFields::PARENT);
        assert_eq!(ItemFields::all().iter().count(), 11);
        assert!(!ItemFields::metadata().contains(ItemFields::CONTENTS));
        assert_eq!(ItemFields::CONTENTS.wire_key(), None);
        assert_eq!(ItemFields::CREATION_DATE.wire_key(), Some("createdAt"));
        assert_eq!(
            format!("{:?}", ItemFields::FILENAME | ItemFields::TAG_DATA),
            "ItemFields(FILENAME | TAG_DATA)"
        );
    }

    #[test]
    fn diff_serializes_exact_keys() {
        let mut diff = FieldDiff::new();
        diff.set_name("b.txt");
        assert_eq!(diff.to_json(), br#"{"name":"b.txt"}"#.to_vec());
        assert_eq!(diff.len(), 1);
    }

    #[test]
    fn diff_encodes_parent_tokens() {
        let id = ItemId::new("folder2").unwrap();
        let mut diff = FieldDiff::new();
        diff.set_parent(&ItemIdentifier::Item(id.clone()));
        assert_eq!(diff.get(keys::PARENT_ID).unwrap(), &json!(id.to_token()));

        diff.set_parent(&ItemIdentifier::Trash);
        assert_eq!(diff.get(keys::PARENT_ID).unwrap(), &json!(TRASH_SENTINEL));
    }

    #[test]
    fn patch_parses_allow_listed_fields() {
        let parent = ItemId::new("folder2").unwrap();
        let patch = ItemPatch::from_body(&body(json!({
            "name": "b.txt",
            "parentId": parent.to_token(),
            "lastUsedDate": 12.5,
            "creationDate": 7,
            "tagData": "AQID",
            "favoriteRank": 9,
            "fileSystemFlags": 4,
            "extendedAttributes": {"k": "v"},
            "typeAndCreator": {"type": "ttxt", "creator": "abcd"},
            "unknown": "ignored"
        })))
        .unwrap();

        assert_eq!(patch.name.as_deref(), Some("b.txt"));
        assert_eq!(patch.parent, Some(ItemIdentifier::Item(parent)));
        assert_eq!(patch.last_used_date, Some(12));
        assert_eq!(patch.created_at, Some(7));
        assert_eq!(patch.tag_data, Some(vec![1, 2, 3]));
        assert_eq!(patch.file_system_flags, Some(4));
        assert_eq!(patch.fields().iter().count(), 10);
    }

    #[test]
    fn created_at_wins_over_legacy_alias() {
        let patch =
            ItemPatch::from_body(&body(json!({"createdAt": 1, "creationDate": 2}))).unwrap();
        assert_eq!(patch.created_at, Some(1));
    }

    #[test]
    fn nulls_and_empty_collections_are_not_changes() {
        let patch = ItemPatch::from_body(&body(json!({
            "name": null,
            "tagData": null,
            "extendedAttributes": {},
            "typeAndCreator": {}
        })))
        .unwrap();
        assert!(patch.is_empty());
    }

    #[test]
    fn null_parent_moves_to_root() {
        let patch = ItemPatch::from_body(&body(json!({"parentId": null}))).unwrap();
        assert_eq!(patch.parent, Some(ItemIdentifier::Root));

        let patch = ItemPatch::from_body(&body(json!({"parentId": "~root"}))).unwrap();
        assert_eq!(patch.parent, Some(ItemIdentifier::Root));

        let mut target = record();
        patch.apply(&mut target);
        assert_eq!(target.parent_id, None);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            ItemPatch::from_body(&body(json!({"parentId": "not/valid"}))),
            Err(ProtocolError::InvalidIdentifier { .. })
        ));
        assert!(ItemPatch::from_body(&body(json!({"name": 5}))).is_err());
        assert!(ItemPatch::from_body(&body(json!({"name": ""}))).is_err());
        assert!(ItemPatch::from_body(&body(json!({"fileSystemFlags": -1}))).is_err());
        assert!(ItemPatch::from_body(&body(json!({"tagData": "%%%"}))).is_err());
        assert!(ItemPatch::from_body(&body(json!({"typeAndCreator": {"type": "x"}}))).is_err());
        assert!(ItemPatch::from_body(&body(json!({"extendedAttributes": {"k": 1}}))).is_err());
    }

    #[test]
    fn apply_leaves_absent_fields() {
        let mut target = record();
        let patch = ItemPatch {
            name: Some("renamed".into()),
            ..ItemPatch::default()
        };
        patch.apply(&mut target);

        assert_eq!(target.name.as_deref(), Some("renamed"));
        assert_eq!(target.parent_id.as_deref(), Some("folder1"));
        assert_eq!(target.favorite_rank, Some(3));
        assert_eq!(target.created_at, 100);
    }

    #[test]
    fn apply_trash_parent() {
        let mut target = record();
        let patch = ItemPatch {
            parent: Some(ItemIdentifier::Trash),
            ..ItemPatch::default()
        };
        patch.apply(&mut target);
        assert!(target.is_in_trash());
    }

    #[test]
    fn root_tokens() {
        assert!(is_root_token(""));
        assert!(is_root_token(ROOT_SENTINEL));
        assert!(!is_root_token(TRASH_SENTINEL));
    }
}
