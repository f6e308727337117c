//! In-process server fixtures.
//!
//! [`TestServer`] runs the real server router over a temporary content root.
//! Clients created with [`TestServer::client_for`] reach it through the
//! loopback transport, so every request goes through routing, extraction,
//! authentication and error mapping exactly as it would over a socket.

use async_trait::async_trait;
use axum::body::{to_bytes, Body, Bytes};
use axum::Router;
use filebridge_client::{
    ClientConfig, HttpRequest, HttpResponse, LoopbackClient, LoopbackServer, RemoteStoreClient,
    ReqwestClient, RequestBody, StaticCredentials,
};
use filebridge_server::{AuthConfig, ItemServer, ServerConfig, TokenValidator};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tower::ServiceExt;

/// Secret used to sign test tokens.
pub const TEST_SECRET: &[u8] = b"filebridge-test-secret";

/// A client wired to a [`TestServer`].
pub type TestClient = RemoteStoreClient<LoopbackClient<RouterHandle>>;

/// A cloneable handle that feeds loopback requests into a router.
#[derive(Clone)]
pub struct RouterHandle {
    router: Router,
}

impl RouterHandle {
    /// Wraps a router.
    pub fn new(router: Router) -> Self {
        Self { router }
    }
}

#[async_trait]
impl LoopbackServer for RouterHandle {
    async fn handle(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        let mut http_request = http::Request::builder()
            .method(request.method)
            .uri(request.path)
            .body(Body::from(match request.body {
                RequestBody::Bytes(bytes) => bytes,
                RequestBody::Empty | RequestBody::File(_) => Bytes::new(),
            }))
            .map_err(|e| e.to_string())?;
        *http_request.headers_mut() = request.headers;

        let response = self
            .router
            .clone()
            .oneshot(http_request)
            .await
            .map_err(|e| e.to_string())?;

        let (parts, body) = response.into_parts();
        let body = to_bytes(body, usize::MAX)
            .await
            .map_err(|e| e.to_string())?;
        Ok(HttpResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}

/// A server over a temporary content root, signing tokens with
/// [`TEST_SECRET`].
pub struct TestServer {
    router: Router,
    tokens: TokenValidator,
    content_dir: TempDir,
    staging_dir: TempDir,
}

impl TestServer {
    /// Creates a server with the default configuration.
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    /// Creates a server, letting `configure` adjust the configuration.
    ///
    /// The content root and auth secret are always overridden.
    pub fn with_config(configure: impl FnOnce(ServerConfig) -> ServerConfig) -> Self {
        let content_dir = TempDir::new().expect("Failed to create content directory");
        let staging_dir = TempDir::new().expect("Failed to create staging directory");

        let config = configure(ServerConfig::default())
            .with_content_root(content_dir.path())
            .with_auth(TEST_SECRET.to_vec());
        let tokens = TokenValidator::new(
            AuthConfig::new(TEST_SECRET.to_vec()).with_expiry(config.token_expiry),
        );
        let server = ItemServer::from_config(config).expect("Failed to build test server");

        Self {
            router: server.router(),
            tokens,
            content_dir,
            staging_dir,
        }
    }

    /// Mints a bearer token for `owner`.
    pub fn token_for(&self, owner: &str) -> String {
        self.tokens
            .create_token(owner)
            .expect("Failed to create test token")
    }

    /// A client authenticated as `owner`.
    pub fn client_for(&self, owner: &str) -> TestClient {
        self.client_with(owner, |config| config)
    }

    /// A client authenticated as `owner`, letting `configure` adjust the
    /// client configuration.
    pub fn client_with(
        &self,
        owner: &str,
        configure: impl FnOnce(ClientConfig) -> ClientConfig,
    ) -> TestClient {
        let config = configure(
            ClientConfig::new("http://loopback").with_staging_dir(self.staging_dir.path()),
        );
        RemoteStoreClient::new(
            LoopbackClient::new(RouterHandle::new(self.router.clone())),
            Arc::new(StaticCredentials::new(self.token_for(owner))),
            config,
        )
    }

    /// Serves the router on an ephemeral local port and returns its base URL.
    ///
    /// The server task lives until the test runtime shuts down.
    pub async fn listen(&self) -> String {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let addr = listener
            .local_addr()
            .expect("Failed to read listener address");
        let router = self.router.clone();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{addr}")
    }

    /// A `reqwest` client authenticated as `owner`, for a server started
    /// with [`TestServer::listen`].
    pub fn network_client_for(
        &self,
        owner: &str,
        base_url: &str,
    ) -> RemoteStoreClient<ReqwestClient> {
        let config = ClientConfig::new(base_url).with_staging_dir(self.staging_dir.path());
        RemoteStoreClient::connect(
            Arc::new(StaticCredentials::new(self.token_for(owner))),
            config,
        )
        .expect("Failed to build network client")
    }

    /// The router, for driving raw requests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Where uploaded blobs are stored.
    pub fn content_root(&self) -> &Path {
        self.content_dir.path()
    }

    /// A scratch directory for client-side files.
    pub fn staging_dir(&self) -> &Path {
        self.staging_dir.path()
    }
}

impl Default for TestServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes `contents` to `name` under `dir` and returns the path.
pub fn write_file(dir: &Path, name: &str, contents: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("Failed to write test file");
    path
}
