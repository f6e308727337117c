//! Client configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the remote store client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server URL without a trailing slash, e.g. `https://files.example.com`.
    pub base_url: String,
    /// Request timeout.
    pub timeout: Duration,
    /// Listing page size; `None` lets the server decide.
    pub page_size: Option<usize>,
    /// Maximum number of changes requested per change-feed call.
    pub change_batch: Option<usize>,
    /// Directory for downloaded content.
    pub staging_dir: PathBuf,
}

impl ClientConfig {
    /// Creates a new client configuration.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(30),
            page_size: None,
            change_batch: None,
            staging_dir: std::env::temp_dir().join("filebridge"),
        }
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the listing page size.
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    /// Sets the change-feed batch size.
    pub fn with_change_batch(mut self, size: usize) -> Self {
        self.change_batch = Some(size);
        self
    }

    /// Sets the staging directory.
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = dir.into();
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("http://127.0.0.1:8080")
    }
}
