//! Server configuration.

use crate::store::DEFAULT_CHANGE_RETENTION;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the item server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Directory holding uploaded content blobs.
    pub content_root: PathBuf,
    /// Maximum accepted upload size in bytes.
    pub max_upload_bytes: usize,
    /// Page size used when a listing does not ask for one.
    pub default_page_size: usize,
    /// Upper bound on a requested page size.
    pub max_page_size: usize,
    /// Maximum number of changes returned by one change-feed call.
    pub max_change_batch: usize,
    /// Number of change-feed entries kept. Older anchors expire.
    pub change_retention: usize,
    /// Lifetime of issued bearer tokens.
    pub token_expiry: Duration,
    /// Secret key for token signing and validation.
    pub auth_secret: Option<Vec<u8>>,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr, content_root: impl Into<PathBuf>) -> Self {
        Self {
            bind_addr,
            content_root: content_root.into(),
            max_upload_bytes: 512 * 1024 * 1024,
            default_page_size: 1000,
            max_page_size: 1000,
            max_change_batch: 500,
            change_retention: DEFAULT_CHANGE_RETENTION,
            token_expiry: Duration::from_secs(24 * 60 * 60),
            auth_secret: None,
        }
    }

    /// Sets the content root.
    pub fn with_content_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.content_root = root.into();
        self
    }

    /// Sets the maximum upload size.
    pub fn with_max_upload_bytes(mut self, bytes: usize) -> Self {
        self.max_upload_bytes = bytes;
        self
    }

    /// Sets the default and maximum listing page sizes.
    pub fn with_page_sizes(mut self, default: usize, max: usize) -> Self {
        self.max_page_size = max.max(1);
        self.default_page_size = default.clamp(1, self.max_page_size);
        self
    }

    /// Sets the maximum change-feed batch.
    pub fn with_max_change_batch(mut self, size: usize) -> Self {
        self.max_change_batch = size.max(1);
        self
    }

    /// Sets how many change-feed entries are kept.
    pub fn with_change_retention(mut self, entries: usize) -> Self {
        self.change_retention = entries.max(1);
        self
    }

    /// Sets the token lifetime.
    pub fn with_token_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }

    /// Enables HMAC token authentication with the given secret.
    pub fn with_auth(mut self, secret: Vec<u8>) -> Self {
        self.auth_secret = Some(secret);
        self
    }

    /// Resolves a requested page size against the configured bounds.
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size)
    }

    /// Resolves a requested change batch against the configured bound.
    pub fn change_batch(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.max_change_batch)
            .clamp(1, self.max_change_batch)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 8080)), "content")
    }
}
