//! Item identifiers and their URL-safe wire encoding.
//!
//! Stored records carry *raw* identifiers. Whenever an identifier travels in a
//! URL path or a request body it is encoded with [`encode`], which produces
//! unpadded URL-safe base64. Two sentinel identifiers, [`ROOT_SENTINEL`] and
//! [`TRASH_SENTINEL`], are never encoded: every layer recognizes them as
//! literal strings. Both contain `~`, which is outside the base64url alphabet,
//! so a sentinel can never be mistaken for an encoded token.

use crate::error::{ProtocolError, ProtocolResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use std::fmt;
use uuid::Uuid;

/// Literal token for the root container.
pub const ROOT_SENTINEL: &str = "~root";

/// Literal token for the trash container.
pub const TRASH_SENTINEL: &str = "~trash";

/// Display name of the synthesized root folder.
pub const ROOT_DISPLAY_NAME: &str = "Root";

/// Display name of the synthesized trash folder.
pub const TRASH_DISPLAY_NAME: &str = "Recently Deleted";

/// Encodes raw identifier bytes as an unpadded URL-safe token.
pub fn encode(raw: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(raw)
}

/// Decodes a token produced by [`encode`].
///
/// Padding, characters outside the URL-safe alphabet and non-canonical
/// trailing bits are all rejected, so this is the exact inverse of [`encode`].
pub fn decode(token: &str) -> ProtocolResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| ProtocolError::invalid_identifier(token))
}

/// Returns true if `value` is one of the two sentinel literals.
pub fn is_sentinel(value: &str) -> bool {
    value == ROOT_SENTINEL || value == TRASH_SENTINEL
}

/// A server-assigned item identifier.
///
/// Item IDs are:
/// - Assigned once by the server at creation
/// - Immutable and never reused
/// - Never empty and never equal to a sentinel literal
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemId(String);

impl ItemId {
    /// Wraps a raw identifier.
    pub fn new(raw: impl Into<String>) -> ProtocolResult<Self> {
        let raw = raw.into();
        if raw.is_empty() || is_sentinel(&raw) {
            return Err(ProtocolError::invalid_identifier(raw));
        }
        Ok(Self(raw))
    }

    /// Generates a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Decodes an item identifier from its wire token.
    pub fn from_token(token: &str) -> ProtocolResult<Self> {
        let bytes = decode(token)?;
        let raw =
            String::from_utf8(bytes).map_err(|_| ProtocolError::invalid_identifier(token))?;
        Self::new(raw).map_err(|_| ProtocolError::invalid_identifier(token))
    }

    /// Returns the wire token for this identifier.
    #[must_use]
    pub fn to_token(&self) -> String {
        encode(self.0.as_bytes())
    }

    /// Returns the raw identifier.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemId({})", self.0)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ItemId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Any identifier a client can address: a real item or one of the containers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ItemIdentifier {
    /// The synthesized root container.
    Root,
    /// The synthesized trash container.
    Trash,
    /// A stored item.
    Item(ItemId),
}

impl ItemIdentifier {
    /// Parses a wire token. Sentinel literals bypass the codec.
    pub fn from_token(token: &str) -> ProtocolResult<Self> {
        match token {
            ROOT_SENTINEL => Ok(Self::Root),
            TRASH_SENTINEL => Ok(Self::Trash),
            _ => ItemId::from_token(token).map(Self::Item),
        }
    }

    /// Interprets a raw stored identifier.
    pub fn from_raw(raw: &str) -> ProtocolResult<Self> {
        match raw {
            ROOT_SENTINEL => Ok(Self::Root),
            TRASH_SENTINEL => Ok(Self::Trash),
            _ => ItemId::new(raw).map(Self::Item),
        }
    }

    /// Interprets a stored `parentId`; `None` means root-level.
    pub fn from_parent_id(parent_id: Option<&str>) -> ProtocolResult<Self> {
        parent_id.map_or(Ok(Self::Root), Self::from_raw)
    }

    /// Returns the wire token (sentinels as literals, items encoded).
    #[must_use]
    pub fn to_token(&self) -> String {
        match self {
            Self::Root => ROOT_SENTINEL.to_string(),
            Self::Trash => TRASH_SENTINEL.to_string(),
            Self::Item(id) => id.to_token(),
        }
    }

    /// Returns the raw form as stored in a record.
    #[must_use]
    pub fn as_raw(&self) -> &str {
        match self {
            Self::Root => ROOT_SENTINEL,
            Self::Trash => TRASH_SENTINEL,
            Self::Item(id) => id.as_str(),
        }
    }

    /// Returns true for the root and trash containers.
    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        !matches!(self, Self::Item(_))
    }

    /// Returns the item ID, if this is not a sentinel.
    #[must_use]
    pub fn item_id(&self) -> Option<&ItemId> {
        match self {
            Self::Item(id) => Some(id),
            _ => None,
        }
    }

    /// Fixed display name of a synthesized container.
    #[must_use]
    pub fn sentinel_name(&self) -> Option<&'static str> {
        match self {
            Self::Root => Some(ROOT_DISPLAY_NAME),
            Self::Trash => Some(TRASH_DISPLAY_NAME),
            Self::Item(_) => None,
        }
    }
}

impl From<ItemId> for ItemIdentifier {
    fn from(id: ItemId) -> Self {
        Self::Item(id)
    }
}

impl fmt::Display for ItemIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_raw())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn encode_is_url_safe_and_unpadded() {
        let token = encode(&[0xfb, 0xff, 0xfe]);
        assert_eq!(token, "-__-");
        assert_eq!(encode(b"a"), "YQ");
    }

    #[test]
    fn decode_rejects_padding_and_foreign_alphabet() {
        assert!(decode("YQ==").is_err());
        assert!(decode("+/8").is_err());
        assert!(decode("abc$").is_err());
        // Non-canonical trailing bits
        assert!(decode("YR").is_err());
    }

    #[test]
    fn sentinels_bypass_codec() {
        assert_eq!(
            ItemIdentifier::from_token(ROOT_SENTINEL).unwrap(),
            ItemIdentifier::Root
        );
        assert_eq!(
            ItemIdentifier::from_token(TRASH_SENTINEL).unwrap(),
            ItemIdentifier::Trash
        );
        assert!(decode(ROOT_SENTINEL).is_err());
        assert!(decode(TRASH_SENTINEL).is_err());
        assert_eq!(ItemIdentifier::Root.to_token(), ROOT_SENTINEL);
    }

    #[test]
    fn item_id_rejects_empty_and_sentinels() {
        assert!(ItemId::new("").is_err());
        assert!(ItemId::new(ROOT_SENTINEL).is_err());
        assert!(ItemId::new(TRASH_SENTINEL).is_err());
        assert!(ItemId::from_token("").is_err());
    }

    #[test]
    fn item_id_token_roundtrip() {
        let id = ItemId::generate();
        let token = id.to_token();
        assert_eq!(ItemId::from_token(&token).unwrap(), id);
        assert_eq!(
            ItemIdentifier::from_token(&token).unwrap(),
            ItemIdentifier::Item(id)
        );
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(ItemId::generate(), ItemId::generate());
    }

    #[test]
    fn parent_id_interpretation() {
        assert_eq!(
            ItemIdentifier::from_parent_id(None).unwrap(),
            ItemIdentifier::Root
        );
        assert_eq!(
            ItemIdentifier::from_parent_id(Some(TRASH_SENTINEL)).unwrap(),
            ItemIdentifier::Trash
        );
        let parent = ItemIdentifier::from_parent_id(Some("abc")).unwrap();
        assert_eq!(parent.as_raw(), "abc");
    }

    #[test]
    fn non_utf8_token_is_invalid() {
        let token = encode(&[0xff, 0xfe]);
        assert!(matches!(
            ItemId::from_token(&token),
            Err(ProtocolError::InvalidIdentifier { .. })
        ));
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(raw in prop::collection::vec(any::<u8>(), 0..256)) {
            let token = encode(&raw);
            prop_assert_eq!(decode(&token).unwrap(), raw);
        }

        #[test]
        fn tokens_never_collide_with_sentinels(raw in prop::collection::vec(any::<u8>(), 0..64)) {
            let token = encode(&raw);
            prop_assert!(!is_sentinel(&token));
        }

        #[test]
        fn decoding_foreign_strings_is_error_or_reencodes(s in "[A-Za-z0-9_=+/-]{0,24}") {
            match decode(&s) {
                Ok(bytes) => prop_assert_eq!(encode(&bytes), s),
                Err(err) => {
                    let is_invalid = matches!(err, ProtocolError::InvalidIdentifier { .. });
                    prop_assert!(is_invalid);
                }
            }
        }
    }
}
