//! Property-based test generators using proptest.
//!
//! Strategies here only produce values the protocol accepts: raw ids are
//! never empty or sentinel literals, names are never empty.

use filebridge_client::ItemAttributes;
use filebridge_protocol::{ItemFields, ItemId, ItemIdentifier, TypeAndCreator};
use proptest::prelude::*;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Strategy for arbitrary raw identifier bytes.
pub fn raw_bytes_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..64)
}

/// Strategy for valid item ids.
pub fn item_id_strategy() -> impl Strategy<Value = ItemId> {
    "[A-Za-z0-9_.-]{1,32}".prop_map(|raw| ItemId::new(raw).expect("generated id is valid"))
}

/// Strategy for identifiers, sentinels included.
pub fn identifier_strategy() -> impl Strategy<Value = ItemIdentifier> {
    prop_oneof![
        1 => Just(ItemIdentifier::Root),
        1 => Just(ItemIdentifier::Trash),
        8 => item_id_strategy().prop_map(ItemIdentifier::Item),
    ]
}

/// Strategy for display names.
pub fn item_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z0-9][A-Za-z0-9 ._-]{0,23}").expect("Invalid regex")
}

/// Strategy for whole-second timestamps between 1970 and 2033.
pub fn timestamp_strategy() -> impl Strategy<Value = SystemTime> {
    (0u64..2_000_000_000).prop_map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
}

/// Strategy for field sets, `CONTENTS` included.
pub fn item_fields_strategy() -> impl Strategy<Value = ItemFields> {
    let singles: Vec<ItemFields> = ItemFields::all().iter().collect();
    prop::sample::subsequence(singles.clone(), 0..=singles.len()).prop_map(|chosen| {
        chosen
            .into_iter()
            .fold(ItemFields::empty(), |set, field| set | field)
    })
}

/// Strategy for host attributes with a random subset of optional values.
///
/// Extended attribute maps are never empty, since the server ignores an
/// empty map.
pub fn attributes_strategy() -> impl Strategy<Value = ItemAttributes> {
    (
        item_name_strategy(),
        prop::option::of(timestamp_strategy()),
        prop::option::of(timestamp_strategy()),
        prop::option::of(timestamp_strategy()),
        prop::option::of(prop::collection::vec(any::<u8>(), 0..32)),
        prop::option::of(any::<i64>()),
        prop::option::of(any::<u32>()),
        prop::option::of(prop::collection::btree_map(
            "[a-z.]{1,12}",
            "[ -~]{0,16}",
            1..4,
        )),
        prop::option::of(("[A-Z]{4}", "[a-z]{4}")),
    )
        .prop_map(
            |(name, created, modified, used, tags, rank, flags, xattrs, codes)| ItemAttributes {
                filename: name,
                parent: ItemIdentifier::Root,
                creation_date: created,
                content_modification_date: modified,
                last_used_date: used,
                tag_data: tags,
                favorite_rank: rank,
                file_system_flags: flags,
                extended_attributes: xattrs,
                type_and_creator: codes.map(|(t, c)| TypeAndCreator::new(t, c)),
            },
        )
}
