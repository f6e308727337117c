//! HTTP transport.
//!
//! The client talks to the server through the [`HttpClient`] trait so the
//! actual HTTP library can be swapped out. [`ReqwestClient`] is the network
//! implementation; [`LoopbackClient`] hands requests straight to an
//! in-process [`LoopbackServer`], which is how tests drive a real server
//! router without sockets.
//!
//! File uploads and content downloads never hold a whole blob in memory on
//! the network path: uploads stream the source file as a multipart part and
//! downloads are written to a sink chunk by chunk.

use crate::error::{ClientError, ClientResult};
use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderName, AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use reqwest::multipart::{Form, Part};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

/// A file sent as the single part of a `multipart/form-data` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    /// Form field name.
    pub field: String,
    /// File name announced to the server.
    pub filename: String,
    /// Where the content is read from when the request is sent.
    pub path: PathBuf,
}

impl FilePart {
    /// Reads the file and encodes it as a complete form body.
    ///
    /// Returns the content type (with boundary) and the body. Only the
    /// loopback transport needs this; the network transport streams.
    async fn encode(&self) -> std::io::Result<(String, Vec<u8>)> {
        let content = tokio::fs::read(&self.path).await?;
        let boundary = format!("filebridge-{}", Uuid::new_v4().simple());
        let filename = self.filename.replace(['"', '\r', '\n'], "_");

        let mut body = Vec::with_capacity(content.len() + 256);
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{filename}\"\r\n",
                self.field
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(&content);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        Ok((format!("multipart/form-data; boundary={boundary}"), body))
    }
}

/// Body of an outgoing request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RequestBody {
    /// No body.
    #[default]
    Empty,
    /// An in-memory body.
    Bytes(Bytes),
    /// A file upload.
    File(FilePart),
}

impl RequestBody {
    /// In-memory bytes of the body; empty for file uploads.
    pub fn bytes(&self) -> &[u8] {
        match self {
            RequestBody::Bytes(bytes) => bytes,
            RequestBody::Empty | RequestBody::File(_) => &[],
        }
    }
}

/// An outgoing request. `path` includes the query string.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Request method.
    pub method: Method,
    /// Path and query, starting with `/`.
    pub path: String,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body.
    pub body: RequestBody,
}

impl HttpRequest {
    /// Creates a request without headers or body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
        }
    }

    /// Attaches a bearer token.
    pub fn bearer(self, token: &str) -> ClientResult<Self> {
        self.header(AUTHORIZATION, &format!("Bearer {token}"))
    }

    /// Sets a header.
    pub fn header(mut self, name: HeaderName, value: &str) -> ClientResult<Self> {
        let value = HeaderValue::from_str(value)
            .map_err(|e| ClientError::InvalidRequest(format!("header {name}: {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Sets the body and its content type.
    pub fn body(self, content_type: &str, body: impl Into<Bytes>) -> ClientResult<Self> {
        let mut request = self.header(CONTENT_TYPE, content_type)?;
        request.body = RequestBody::Bytes(body.into());
        Ok(request)
    }

    /// Sends `path` as a multipart file field. The transport sets the
    /// content type.
    pub fn file(mut self, field: &str, filename: &str, path: &Path) -> Self {
        self.body = RequestBody::File(FilePart {
            field: field.to_string(),
            filename: filename.to_string(),
            path: path.to_path_buf(),
        });
        self
    }

    /// Replaces a file body by its encoded form, reading the file.
    async fn buffered(self) -> Result<Self, String> {
        let RequestBody::File(part) = &self.body else {
            return Ok(self);
        };
        let (content_type, body) = part
            .encode()
            .await
            .map_err(|e| format!("{}: {e}", part.path.display()))?;
        self.body(&content_type, body).map_err(|e| e.to_string())
    }
}

/// A received response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub body: Bytes,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Returns a header value as text.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// HTTP client abstraction.
///
/// Implementations return `Err` only for transport failures; any response
/// the server produced, whatever its status, is `Ok`.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a request.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String>;

    /// Sends a request and writes a successful response body to `sink`.
    ///
    /// On success the returned response has an empty body. Any other status
    /// is returned with its body untouched and nothing written. Transport
    /// failures are `Network`, sink failures `Io`.
    async fn download(
        &self,
        request: HttpRequest,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> ClientResult<HttpResponse> {
        let mut response = self.send(request).await.map_err(ClientError::Network)?;
        if response.status.is_success() {
            sink.write_all(&response.body).await?;
            response.body = Bytes::new();
        }
        Ok(response)
    }
}

/// [`HttpClient`] over `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestClient {
    /// Creates a client for `base_url`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> ClientResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn execute(&self, request: HttpRequest) -> Result<reqwest::Response, String> {
        let url = format!("{}{}", self.base_url, request.path);
        let builder = self
            .client
            .request(request.method, url)
            .headers(request.headers);

        let builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Bytes(bytes) => builder.body(bytes),
            RequestBody::File(file) => {
                let source = tokio::fs::File::open(&file.path)
                    .await
                    .map_err(|e| format!("{}: {e}", file.path.display()))?;
                let length = source.metadata().await.map_err(|e| e.to_string())?.len();
                let part = Part::stream_with_length(source, length)
                    .file_name(file.filename)
                    .mime_str("application/octet-stream")
                    .map_err(|e| e.to_string())?;
                builder.multipart(Form::new().part(file.field, part))
            }
        };

        builder.send().await.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        let response = self.execute(request).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| e.to_string())?;
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn download(
        &self,
        request: HttpRequest,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> ClientResult<HttpResponse> {
        let mut response = self.execute(request).await.map_err(ClientError::Network)?;
        let status = response.status();
        let headers = response.headers().clone();
        if !status.is_success() {
            let body = response
                .bytes()
                .await
                .map_err(|e| ClientError::Network(e.to_string()))?;
            return Ok(HttpResponse {
                status,
                headers,
                body,
            });
        }

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?
        {
            sink.write_all(&chunk).await?;
        }
        Ok(HttpResponse {
            status,
            headers,
            body: Bytes::new(),
        })
    }
}

/// Trait for servers that can handle loopback requests.
#[async_trait]
pub trait LoopbackServer: Send + Sync {
    /// Handles a request and returns the response.
    ///
    /// File bodies have already been encoded into bytes.
    async fn handle(&self, request: HttpRequest) -> Result<HttpResponse, String>;
}

/// A loopback HTTP client that routes requests directly to a server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    /// The server behind this client.
    pub fn server(&self) -> &S {
        &self.server
    }
}

#[async_trait]
impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        self.server.handle(request.buffered().await?).await
    }
}
