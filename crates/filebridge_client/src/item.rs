//! Host-facing item model.
//!
//! [`Item`] is what the replication bridge hands to the host: decoded
//! identifiers, a percent-decoded filename, `SystemTime` timestamps, version
//! bytes and a capability set. Server records are converted with
//! [`Item::from_record`].

use crate::error::ClientResult;
use filebridge_protocol::{ItemIdentifier, ItemKind, ItemRecord, TypeAndCreator};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::BitOr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Content and metadata version bytes.
///
/// Versions are compared by equality only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ItemVersion {
    /// Content version.
    pub content: Vec<u8>,
    /// Metadata version.
    pub metadata: Vec<u8>,
}

impl ItemVersion {
    /// Creates a version pair.
    pub fn new(content: impl Into<Vec<u8>>, metadata: impl Into<Vec<u8>>) -> Self {
        Self {
            content: content.into(),
            metadata: metadata.into(),
        }
    }
}

/// Operations the host may offer on an item.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Capabilities(u8);

impl Capabilities {
    /// Content can be read.
    pub const READING: Self = Self(1 << 0);
    /// Content can be written.
    pub const WRITING: Self = Self(1 << 1);
    /// The item can be moved.
    pub const REPARENTING: Self = Self(1 << 2);
    /// The item can be renamed.
    pub const RENAMING: Self = Self(1 << 3);
    /// The item can be moved to the trash.
    pub const TRASHING: Self = Self(1 << 4);
    /// The item can be deleted.
    pub const DELETING: Self = Self(1 << 5);
    /// Children can be created inside the item.
    pub const ADDING_SUB_ITEMS: Self = Self(1 << 6);

    const NAMES: [(Self, &'static str); 7] = [
        (Self::READING, "READING"),
        (Self::WRITING, "WRITING"),
        (Self::REPARENTING, "REPARENTING"),
        (Self::RENAMING, "RENAMING"),
        (Self::TRASHING, "TRASHING"),
        (Self::DELETING, "DELETING"),
        (Self::ADDING_SUB_ITEMS, "ADDING_SUB_ITEMS"),
    ];

    /// No capabilities.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Returns true if every capability in `other` is present.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Capabilities of a root or trash container.
    pub const fn container() -> Self {
        Self(Self::READING.0 | Self::ADDING_SUB_ITEMS.0)
    }

    /// Capabilities of an item of the given kind.
    pub const fn for_kind(kind: ItemKind) -> Self {
        let common =
            Self::READING.0 | Self::RENAMING.0 | Self::TRASHING.0 | Self::DELETING.0;
        match kind {
            ItemKind::Folder => Self(common | Self::ADDING_SUB_ITEMS.0 | Self::REPARENTING.0),
            ItemKind::File => Self(common | Self::WRITING.0 | Self::REPARENTING.0),
        }
    }
}

impl BitOr for Capabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "Capabilities({})", names.join(" | "))
    }
}

/// Host-editable attributes of an item.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemAttributes {
    /// Display filename.
    pub filename: String,
    /// Parent container.
    pub parent: ItemIdentifier,
    /// Creation time.
    pub creation_date: Option<SystemTime>,
    /// Last content modification.
    pub content_modification_date: Option<SystemTime>,
    /// Last time the item was used.
    pub last_used_date: Option<SystemTime>,
    /// Opaque tag bytes.
    pub tag_data: Option<Vec<u8>>,
    /// Favorite ordering rank.
    pub favorite_rank: Option<i64>,
    /// File system flag bitmask.
    pub file_system_flags: Option<u32>,
    /// Extended attributes.
    pub extended_attributes: Option<BTreeMap<String, String>>,
    /// Type and creator codes.
    pub type_and_creator: Option<TypeAndCreator>,
}

impl ItemAttributes {
    /// Attributes with only a filename and parent set.
    pub fn new(filename: impl Into<String>, parent: ItemIdentifier) -> Self {
        Self {
            filename: filename.into(),
            parent,
            creation_date: None,
            content_modification_date: None,
            last_used_date: None,
            tag_data: None,
            favorite_rank: None,
            file_system_flags: None,
            extended_attributes: None,
            type_and_creator: None,
        }
    }
}

/// A host-facing item.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    /// Item identifier.
    pub identifier: ItemIdentifier,
    /// File or folder.
    pub kind: ItemKind,
    /// Editable attributes.
    pub attributes: ItemAttributes,
    /// Content and metadata versions.
    pub version: ItemVersion,
    /// True once content has been uploaded.
    pub has_content: bool,
    /// True when the item sits in the trash.
    pub trashed: bool,
    /// Allowed operations.
    pub capabilities: Capabilities,
}

impl Item {
    /// Converts a server record.
    pub fn from_record(record: &ItemRecord) -> ClientResult<Self> {
        let identifier = record.identifier()?;
        let parent = record.parent_identifier()?;

        let display = record.display_name();
        let filename = urlencoding::decode(display)
            .map(|name| name.into_owned())
            .unwrap_or_else(|_| display.to_string());

        let capabilities = if identifier.is_sentinel() {
            Capabilities::container()
        } else {
            Capabilities::for_kind(record.kind)
        };

        Ok(Self {
            identifier,
            kind: record.kind,
            attributes: ItemAttributes {
                filename,
                parent,
                creation_date: Some(from_epoch(record.created_at)),
                content_modification_date: record.content_modification_date.map(from_epoch),
                last_used_date: record.last_used_date.map(from_epoch),
                tag_data: record.tag_data.clone(),
                favorite_rank: record.favorite_rank,
                file_system_flags: record.file_system_flags,
                extended_attributes: record.extended_attributes.clone(),
                type_and_creator: record.type_and_creator.clone(),
            },
            version: ItemVersion::new(
                record.content_version.as_bytes(),
                record.metadata_version.as_bytes(),
            ),
            has_content: record.has_content(),
            trashed: record.trashed || record.is_in_trash(),
            capabilities,
        })
    }

    /// Synthesizes the root or trash container without a server round-trip.
    ///
    /// Returns `None` for real items.
    pub fn synthesized(identifier: &ItemIdentifier) -> Option<Self> {
        let name = identifier.sentinel_name()?;
        Some(Self {
            identifier: identifier.clone(),
            kind: ItemKind::Folder,
            attributes: ItemAttributes::new(name, ItemIdentifier::Root),
            version: ItemVersion::default(),
            has_content: false,
            trashed: *identifier == ItemIdentifier::Trash,
            capabilities: Capabilities::container(),
        })
    }

    /// Display filename.
    pub fn filename(&self) -> &str {
        &self.attributes.filename
    }

    /// Returns true if this is a folder.
    pub fn is_folder(&self) -> bool {
        self.kind == ItemKind::Folder
    }
}

/// What the host wants created.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemTemplate {
    /// File or folder.
    pub kind: ItemKind,
    /// Initial attributes; `filename` and `parent` are always sent.
    pub attributes: ItemAttributes,
}

impl ItemTemplate {
    /// A file template.
    pub fn file(filename: impl Into<String>, parent: ItemIdentifier) -> Self {
        Self {
            kind: ItemKind::File,
            attributes: ItemAttributes::new(filename, parent),
        }
    }

    /// A folder template.
    pub fn folder(filename: impl Into<String>, parent: ItemIdentifier) -> Self {
        Self {
            kind: ItemKind::Folder,
            attributes: ItemAttributes::new(filename, parent),
        }
    }
}

/// Epoch seconds to `SystemTime`; negative values count back from the epoch.
pub(crate) fn from_epoch(seconds: i64) -> SystemTime {
    let magnitude = Duration::from_secs(seconds.unsigned_abs());
    if seconds >= 0 {
        UNIX_EPOCH + magnitude
    } else {
        UNIX_EPOCH - magnitude
    }
}

/// `SystemTime` to fractional epoch seconds.
pub(crate) fn to_epoch(time: SystemTime) -> f64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_secs_f64(),
        Err(before) => -before.duration().as_secs_f64(),
    }
}
