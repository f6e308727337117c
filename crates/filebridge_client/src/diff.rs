//! Host change sets to partial-update bodies.

use crate::item::{to_epoch, ItemAttributes};
use filebridge_protocol::{keys, FieldDiff, ItemFields};

/// Builds the partial-update body for the fields the host changed.
///
/// Exactly one entry is emitted per changed field whose value is present;
/// absent values are skipped, never sent as a clear. An empty filename
/// counts as absent. [`ItemFields::CONTENTS`] never produces an entry.
pub fn build_field_diff(changed: ItemFields, attributes: &ItemAttributes) -> FieldDiff {
    let mut diff = FieldDiff::new();

    for field in changed.iter() {
        match field {
            ItemFields::FILENAME => {
                if !attributes.filename.is_empty() {
                    diff.set_name(&attributes.filename);
                }
            }
            ItemFields::PARENT => diff.set_parent(&attributes.parent),
            ItemFields::LAST_USED_DATE => {
                if let Some(time) = attributes.last_used_date {
                    diff.set_timestamp(keys::LAST_USED_DATE, to_epoch(time));
                }
            }
            ItemFields::CREATION_DATE => {
                if let Some(time) = attributes.creation_date {
                    diff.set_timestamp(keys::CREATED_AT, to_epoch(time));
                }
            }
            ItemFields::CONTENT_MODIFICATION_DATE => {
                if let Some(time) = attributes.content_modification_date {
                    diff.set_timestamp(keys::CONTENT_MODIFICATION_DATE, to_epoch(time));
                }
            }
            ItemFields::TAG_DATA => {
                if let Some(tags) = &attributes.tag_data {
                    diff.set_tag_data(tags);
                }
            }
            ItemFields::FAVORITE_RANK => {
                if let Some(rank) = attributes.favorite_rank {
                    diff.set_favorite_rank(rank);
                }
            }
            ItemFields::FILE_SYSTEM_FLAGS => {
                if let Some(flags) = attributes.file_system_flags {
                    diff.set_file_system_flags(flags);
                }
            }
            ItemFields::EXTENDED_ATTRIBUTES => {
                if let Some(xattrs) = &attributes.extended_attributes {
                    diff.set_extended_attributes(xattrs);
                }
            }
            ItemFields::TYPE_AND_CREATOR => {
                if let Some(codes) = &attributes.type_and_creator {
                    diff.set_type_and_creator(codes);
                }
            }
            _ => {}
        }
    }

    diff
}

/// Fields of `changed` whose value in `attributes` is present.
pub fn present_fields(changed: ItemFields, attributes: &ItemAttributes) -> ItemFields {
    let mut present = ItemFields::empty();
    for field in changed.iter() {
        let has_value = match field {
            ItemFields::FILENAME => !attributes.filename.is_empty(),
            ItemFields::PARENT => true,
            ItemFields::LAST_USED_DATE => attributes.last_used_date.is_some(),
            ItemFields::CREATION_DATE => attributes.creation_date.is_some(),
            ItemFields::CONTENT_MODIFICATION_DATE => {
                attributes.content_modification_date.is_some()
            }
            ItemFields::TAG_DATA => attributes.tag_data.is_some(),
            ItemFields::FAVORITE_RANK => attributes.favorite_rank.is_some(),
            ItemFields::FILE_SYSTEM_FLAGS => attributes.file_system_flags.is_some(),
            ItemFields::EXTENDED_ATTRIBUTES => attributes.extended_attributes.is_some(),
            ItemFields::TYPE_AND_CREATOR => attributes.type_and_creator.is_some(),
            _ => false,
        };
        if has_value {
            present.insert(field);
        }
    }
    present
}
