//! Token command implementation.

use filebridge_server::{AuthConfig, TokenValidator};

/// Mints a bearer token for `owner`.
pub fn run(secret: &str, owner: &str) -> Result<String, Box<dyn std::error::Error>> {
    if secret.is_empty() {
        return Err("--secret must not be empty".into());
    }
    if owner.is_empty() {
        return Err("--owner must not be empty".into());
    }
    let validator = TokenValidator::new(AuthConfig::new(secret.as_bytes().to_vec()));
    Ok(validator.create_token(owner)?)
}
