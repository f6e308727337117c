//! Bearer-token authentication.
//!
//! Every request carries `Authorization: Bearer <token>`. An
//! [`Authenticator`] turns the token into the [`Principal`] whose `ownerId`
//! filters all reads and writes.
//!
//! ## Token Format
//!
//! Signed tokens are composed of:
//! - N bytes: owner id (UTF-8)
//! - 8 bytes: issue timestamp (Unix millis, big-endian)
//! - 32 bytes: HMAC-SHA256 signature over the preceding bytes
//!
//! The whole is base64url encoded without padding for transport.

use crate::error::{ServerError, ServerResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

const TIMESTAMP_LEN: usize = 8;
const SIGNATURE_LEN: usize = 32;

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Principal {
    /// Owner id compared against each record's `GUUID`.
    pub owner_id: String,
}

impl Principal {
    /// Creates a principal.
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
        }
    }

    /// Returns true if this principal owns a record with `owner_id`.
    pub fn owns(&self, owner_id: &str) -> bool {
        self.owner_id == owner_id
    }
}

/// Resolves bearer tokens to principals.
pub trait Authenticator: Send + Sync {
    /// Validates a bearer token.
    fn authenticate(&self, bearer: &str) -> ServerResult<Principal>;
}

/// Authentication configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token expiration duration.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a new auth configuration.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the token expiration duration.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

/// Signs and validates HMAC bearer tokens.
#[derive(Clone)]
pub struct TokenValidator {
    config: AuthConfig,
}

impl TokenValidator {
    /// Creates a new token validator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Issues a token for `owner_id`, valid from now.
    pub fn create_token(&self, owner_id: &str) -> ServerResult<String> {
        self.create_token_at(owner_id, now_millis())
    }

    fn create_token_at(&self, owner_id: &str, issued_at: u64) -> ServerResult<String> {
        if owner_id.is_empty() {
            return Err(ServerError::InvalidRequest("owner id must not be empty".into()));
        }

        let mut data = Vec::with_capacity(owner_id.len() + TIMESTAMP_LEN + SIGNATURE_LEN);
        data.extend_from_slice(owner_id.as_bytes());
        data.extend_from_slice(&issued_at.to_be_bytes());

        let mut mac = self.mac()?;
        mac.update(&data);
        data.extend_from_slice(&mac.finalize().into_bytes());

        Ok(URL_SAFE_NO_PAD.encode(data))
    }

    /// Validates a token and returns its principal.
    pub fn validate_token(&self, token: &str) -> ServerResult<Principal> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| ServerError::Unauthorized("malformed token".into()))?;
        if bytes.len() <= TIMESTAMP_LEN + SIGNATURE_LEN {
            return Err(ServerError::Unauthorized("invalid token length".into()));
        }

        let (signed, signature) = bytes.split_at(bytes.len() - SIGNATURE_LEN);
        let mut mac = self.mac()?;
        mac.update(signed);
        mac.verify_slice(signature)
            .map_err(|_| ServerError::Unauthorized("invalid signature".into()))?;

        let (owner, timestamp) = signed.split_at(signed.len() - TIMESTAMP_LEN);
        let mut millis = [0u8; TIMESTAMP_LEN];
        millis.copy_from_slice(timestamp);
        let issued_at = u64::from_be_bytes(millis);

        let expiry = u64::try_from(self.config.token_expiry.as_millis()).unwrap_or(u64::MAX);
        if now_millis() > issued_at.saturating_add(expiry) {
            return Err(ServerError::Unauthorized("token expired".into()));
        }

        let owner = std::str::from_utf8(owner)
            .map_err(|_| ServerError::Unauthorized("invalid owner".into()))?;
        Ok(Principal::new(owner))
    }

    fn mac(&self) -> ServerResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| ServerError::Internal(format!("hmac key: {e}")))
    }
}

impl Authenticator for TokenValidator {
    fn authenticate(&self, bearer: &str) -> ServerResult<Principal> {
        self.validate_token(bearer)
    }
}

/// Fixed token-to-owner table. Useful for tests and local setups.
#[derive(Debug, Clone, Default)]
pub struct StaticTokens {
    tokens: HashMap<String, String>,
}

impl StaticTokens {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a token for an owner.
    pub fn with_token(mut self, token: impl Into<String>, owner_id: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), owner_id.into());
        self
    }
}

impl Authenticator for StaticTokens {
    fn authenticate(&self, bearer: &str) -> ServerResult<Principal> {
        self.tokens
            .get(bearer)
            .map(Principal::new)
            .ok_or_else(|| ServerError::Unauthorized("unknown token".into()))
    }
}

fn now_millis() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    u64::try_from(millis).unwrap_or(u64::MAX)
}
