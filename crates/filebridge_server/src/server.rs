//! Main item server.

use crate::auth::{AuthConfig, Authenticator, TokenValidator};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::ItemService;
use crate::routes::{router, ServerState};
use crate::store::{MemoryRecordStore, RecordStore};
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// The item server.
///
/// Owns the record store and content blob area and exposes them over
/// HTTP+JSON.
///
/// # Example
///
/// ```no_run
/// use filebridge_server::{ItemServer, ServerConfig};
///
/// # async fn run() -> filebridge_server::ServerResult<()> {
/// let config = ServerConfig::default().with_auth(b"secret".to_vec());
/// let server = ItemServer::from_config(config)?;
/// server.serve().await
/// # }
/// ```
pub struct ItemServer {
    state: Arc<ServerState>,
}

impl ItemServer {
    /// Creates a server over the given store and authenticator.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn RecordStore>,
        auth: Arc<dyn Authenticator>,
    ) -> Self {
        let service = ItemService::new(config, store);
        Self {
            state: Arc::new(ServerState { service, auth }),
        }
    }

    /// Creates a server with an in-memory store and HMAC token auth.
    ///
    /// Fails if the configuration has no auth secret.
    pub fn from_config(config: ServerConfig) -> ServerResult<Self> {
        let secret = config
            .auth_secret
            .clone()
            .ok_or_else(|| ServerError::InvalidRequest("an auth secret is required".into()))?;
        let validator =
            TokenValidator::new(AuthConfig::new(secret).with_expiry(config.token_expiry));
        let store = MemoryRecordStore::with_retention(config.change_retention);
        Ok(Self::new(config, Arc::new(store), Arc::new(validator)))
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        self.state.service.config()
    }

    /// Builds the HTTP router.
    pub fn router(&self) -> Router {
        router(Arc::clone(&self.state))
    }

    /// Binds the configured address and serves until the process exits.
    pub async fn serve(self) -> ServerResult<()> {
        let listener = TcpListener::bind(self.config().bind_addr).await?;
        self.serve_with_shutdown(listener, std::future::pending())
            .await
    }

    /// Serves on an existing listener until `shutdown` completes.
    pub async fn serve_with_shutdown<F>(self, listener: TcpListener, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.state.service.content().ensure().await?;
        info!(
            addr = %listener.local_addr()?,
            content_root = %self.config().content_root.display(),
            "item server listening"
        );
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;
        info!("item server stopped");
        Ok(())
    }
}
