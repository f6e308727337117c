//! Serve command implementation.

use filebridge_server::{ItemServer, ServerConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

/// Options of the `serve` command.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// Address to listen on.
    pub bind: SocketAddr,
    /// Directory holding uploaded content.
    pub content_root: PathBuf,
    /// Token signing secret.
    pub secret: String,
    /// Token lifetime in seconds.
    pub token_expiry_secs: u64,
    /// Maximum upload size in bytes.
    pub max_upload_bytes: Option<usize>,
    /// Change-feed entries kept.
    pub change_retention: Option<usize>,
}

impl ServeOptions {
    /// Builds the server configuration.
    pub fn config(&self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        if self.secret.is_empty() {
            return Err("--secret must not be empty".into());
        }
        let mut config = ServerConfig::new(self.bind, &self.content_root)
            .with_token_expiry(Duration::from_secs(self.token_expiry_secs))
            .with_auth(self.secret.as_bytes().to_vec());
        if let Some(bytes) = self.max_upload_bytes {
            config = config.with_max_upload_bytes(bytes);
        }
        if let Some(entries) = self.change_retention {
            config = config.with_change_retention(entries);
        }
        Ok(config)
    }
}

/// Runs the server until Ctrl-C.
pub async fn run(options: ServeOptions) -> Result<(), Box<dyn std::error::Error>> {
    let config = options.config()?;
    let listener = TcpListener::bind(config.bind_addr).await?;
    let server = ItemServer::from_config(config)?;

    server
        .serve_with_shutdown(listener, async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
            }
        })
        .await?;
    Ok(())
}
