//! Identifier codec commands.

use filebridge_protocol::{id, ItemId, ItemIdentifier};

/// Encodes a raw id. Sentinels are printed unchanged.
pub fn encode(raw: &str) -> Result<String, Box<dyn std::error::Error>> {
    if id::is_sentinel(raw) {
        return Ok(raw.to_string());
    }
    Ok(ItemId::new(raw)?.to_token())
}

/// Decodes a wire token to its raw id.
pub fn decode(token: &str) -> Result<String, Box<dyn std::error::Error>> {
    Ok(ItemIdentifier::from_token(token)?.as_raw().to_string())
}
