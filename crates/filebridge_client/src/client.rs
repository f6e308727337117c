//! Remote store operations over HTTP.

use crate::config::ClientConfig;
use crate::credentials::CredentialProvider;
use crate::error::{ClientError, ClientResult};
use crate::transport::{HttpClient, HttpRequest, HttpResponse, ReqwestClient};
use async_trait::async_trait;
use filebridge_protocol::{
    ChangesResponse, CreateItemRequest, FieldDiff, ItemIdentifier, ItemKind, ItemRecord,
    CONTENT_FIELD, NEXT_PAGE_HEADER,
};
use http::Method;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// One page of a listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListPage {
    /// Records on this page.
    pub items: Vec<ItemRecord>,
    /// Token for the next page, if there is one.
    pub next_page: Option<String>,
}

/// Operations against the remote item store.
///
/// This trait abstracts the wire, so the bridge and enumerator can run
/// against the HTTP client or a test double.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Lists the children of a container.
    async fn list_children(
        &self,
        parent: &ItemIdentifier,
        page: Option<&str>,
    ) -> ClientResult<ListPage>;

    /// Fetches an item's record.
    async fn get_metadata(&self, id: &ItemIdentifier) -> ClientResult<ItemRecord>;

    /// Downloads an item's content to `destination`.
    async fn download_content(
        &self,
        id: &ItemIdentifier,
        destination: &Path,
    ) -> ClientResult<PathBuf>;

    /// Creates an item.
    async fn create_item(
        &self,
        parent: &ItemIdentifier,
        name: &str,
        kind: ItemKind,
    ) -> ClientResult<ItemRecord>;

    /// Applies a partial update.
    async fn update_item(&self, id: &ItemIdentifier, diff: &FieldDiff)
        -> ClientResult<ItemRecord>;

    /// Deletes an item.
    async fn delete_item(&self, id: &ItemIdentifier) -> ClientResult<()>;

    /// Uploads `source` as the item's content.
    async fn upload_content(&self, id: &ItemIdentifier, source: &Path)
        -> ClientResult<ItemRecord>;

    /// Fetches changes after `anchor`; `None` returns only the current anchor.
    async fn changes_since(&self, anchor: Option<u64>) -> ClientResult<ChangesResponse>;

    /// The server's current change anchor.
    async fn current_anchor(&self) -> ClientResult<u64> {
        Ok(self.changes_since(None).await?.anchor)
    }
}

/// [`RemoteStore`] over an [`HttpClient`].
pub struct RemoteStoreClient<C: HttpClient> {
    http: C,
    credentials: Arc<dyn CredentialProvider>,
    config: ClientConfig,
}

impl<C: HttpClient> RemoteStoreClient<C> {
    /// Creates a client.
    pub fn new(http: C, credentials: Arc<dyn CredentialProvider>, config: ClientConfig) -> Self {
        Self {
            http,
            credentials,
            config,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the transport.
    pub fn http(&self) -> &C {
        &self.http
    }

    fn request(&self, method: Method, path: String) -> ClientResult<HttpRequest> {
        let token = self
            .credentials
            .bearer_token()
            .ok_or_else(|| ClientError::Unauthorized("no credentials available".into()))?;
        HttpRequest::new(method, path).bearer(&token)
    }

    async fn send(&self, request: HttpRequest) -> ClientResult<HttpResponse> {
        debug!(method = %request.method, path = %request.path, "sending request");
        let response = self
            .http
            .send(request)
            .await
            .map_err(ClientError::Network)?;
        if response.status.is_success() {
            Ok(response)
        } else {
            Err(ClientError::from_response(
                response.status.as_u16(),
                &response.body,
            ))
        }
    }

    async fn send_for_record(&self, request: HttpRequest) -> ClientResult<ItemRecord> {
        let response = self.send(request).await?;
        Ok(ItemRecord::from_json(&response.body)?)
    }

    /// Streams a response body into a new file at `temp`, returning its size.
    async fn download_into(&self, request: HttpRequest, temp: &Path) -> ClientResult<u64> {
        let file = tokio::fs::File::create(temp).await?;
        let mut sink = BufWriter::new(file);
        let response = self.http.download(request, &mut sink).await?;
        if !response.status.is_success() {
            return Err(ClientError::from_response(
                response.status.as_u16(),
                &response.body,
            ));
        }
        sink.flush().await?;
        sink.into_inner().sync_all().await?;
        Ok(tokio::fs::metadata(temp).await?.len())
    }
}

impl RemoteStoreClient<ReqwestClient> {
    /// Creates a network client for `config.base_url`.
    pub fn connect(
        credentials: Arc<dyn CredentialProvider>,
        config: ClientConfig,
    ) -> ClientResult<Self> {
        let http = ReqwestClient::new(config.base_url.clone(), config.timeout)?;
        Ok(Self::new(http, credentials, config))
    }
}

fn item_path(id: &ItemIdentifier) -> String {
    format!("/items/{}", id.to_token())
}

fn query_string(params: &[(&str, Option<String>)]) -> String {
    let pairs: Vec<String> = params
        .iter()
        .filter_map(|(key, value)| {
            value
                .as_ref()
                .map(|v| format!("{key}={}", urlencoding::encode(v)))
        })
        .collect();
    if pairs.is_empty() {
        String::new()
    } else {
        format!("?{}", pairs.join("&"))
    }
}

#[async_trait]
impl<C: HttpClient> RemoteStore for RemoteStoreClient<C> {
    async fn list_children(
        &self,
        parent: &ItemIdentifier,
        page: Option<&str>,
    ) -> ClientResult<ListPage> {
        let parent_token = match parent {
            ItemIdentifier::Root => None,
            other => Some(other.to_token()),
        };
        let query = query_string(&[
            ("parentId", parent_token),
            ("pageToken", page.map(str::to_string)),
            ("pageSize", self.config.page_size.map(|n| n.to_string())),
        ]);

        let response = self
            .send(self.request(Method::GET, format!("/items{query}"))?)
            .await?;
        let next_page = response
            .header(NEXT_PAGE_HEADER)
            .filter(|token| !token.is_empty())
            .map(str::to_string);
        let items = ItemRecord::list_from_json(&response.body)?;
        Ok(ListPage { items, next_page })
    }

    async fn get_metadata(&self, id: &ItemIdentifier) -> ClientResult<ItemRecord> {
        self.send_for_record(self.request(Method::GET, item_path(id))?)
            .await
    }

    async fn download_content(
        &self,
        id: &ItemIdentifier,
        destination: &Path,
    ) -> ClientResult<PathBuf> {
        if id.is_sentinel() {
            return Err(ClientError::NotAFile(id.to_string()));
        }
        let path = format!("{}/content", item_path(id));
        let request = self.request(Method::GET, path)?;

        if let Some(dir) = destination.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let mut temp = destination.as_os_str().to_owned();
        temp.push(format!(".{}.part", Uuid::new_v4().simple()));
        let temp = PathBuf::from(temp);

        debug!(method = %request.method, path = %request.path, "downloading content");
        let written = self.download_into(request, &temp).await;
        let result = match written {
            Ok(bytes) => tokio::fs::rename(&temp, destination)
                .await
                .map(|()| bytes)
                .map_err(ClientError::from),
            Err(e) => Err(e),
        };
        let bytes = match result {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp).await;
                return Err(e);
            }
        };

        debug!(id = %id, bytes, "downloaded content");
        Ok(destination.to_path_buf())
    }

    async fn create_item(
        &self,
        parent: &ItemIdentifier,
        name: &str,
        kind: ItemKind,
    ) -> ClientResult<ItemRecord> {
        let body = CreateItemRequest {
            name: name.to_string(),
            kind,
            parent_id: match parent {
                ItemIdentifier::Root => None,
                other => Some(other.to_token()),
            },
        };
        let body = serde_json::to_vec(&body)
            .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;
        let request = self
            .request(Method::POST, "/items".to_string())?
            .body("application/json", body)?;

        let record = self.send_for_record(request).await?;
        info!(id = %record.id, kind = kind.as_str(), "created remote item");
        Ok(record)
    }

    async fn update_item(
        &self,
        id: &ItemIdentifier,
        diff: &FieldDiff,
    ) -> ClientResult<ItemRecord> {
        if diff.is_empty() {
            return Err(ClientError::NothingToUpdate);
        }
        let request = self
            .request(Method::PUT, item_path(id))?
            .body("application/json", diff.to_json())?;
        self.send_for_record(request).await
    }

    async fn delete_item(&self, id: &ItemIdentifier) -> ClientResult<()> {
        self.send(self.request(Method::DELETE, item_path(id))?)
            .await?;
        info!(id = %id, "deleted remote item");
        Ok(())
    }

    async fn upload_content(
        &self,
        id: &ItemIdentifier,
        source: &Path,
    ) -> ClientResult<ItemRecord> {
        let size = tokio::fs::metadata(source).await?.len();
        let filename = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "content".to_string());

        let path = format!("{}/content", item_path(id));
        let request = self
            .request(Method::PUT, path)?
            .file(CONTENT_FIELD, &filename, source);

        let record = self.send_for_record(request).await?;
        debug!(id = %id, bytes = size, "uploaded content");
        Ok(record)
    }

    async fn changes_since(&self, anchor: Option<u64>) -> ClientResult<ChangesResponse> {
        let query = query_string(&[
            ("since", anchor.map(|a| a.to_string())),
            ("limit", self.config.change_batch.map(|n| n.to_string())),
        ]);
        let response = self
            .send(self.request(Method::GET, format!("/changes{query}"))?)
            .await?;
        if response.body.iter().all(u8::is_ascii_whitespace) {
            return Err(ClientError::EmptyResponse);
        }
        let changes: ChangesResponse = serde_json::from_slice(&response.body)
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        if changes.updated.iter().any(|record| record.id.is_empty()) {
            return Err(ClientError::InvalidResponse(
                "changed item without an id".into(),
            ));
        }
        Ok(changes)
    }
}

/// Runs `future` until it completes or `token` is cancelled.
///
/// Cancellation abandons the future; a request already received by the
/// server may still complete there.
pub async fn cancellable<T, F>(token: &CancellationToken, future: F) -> ClientResult<T>
where
    F: Future<Output = ClientResult<T>>,
{
    if token.is_cancelled() {
        return Err(ClientError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(ClientError::Cancelled),
        result = future => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{NoCredentials, StaticCredentials};
    use crate::transport::{FilePart, RequestBody};
    use bytes::Bytes;
    use http::{HeaderValue, StatusCode};
    use parking_lot::Mutex;

    /// Replays canned responses and records requests.
    #[derive(Default)]
    struct MockHttp {
        responses: Mutex<Vec<Result<HttpResponse, String>>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl MockHttp {
        fn respond(self, status: StatusCode, body: &str) -> Self {
            self.responses
                .lock()
                .push(Ok(HttpResponse::new(status, Bytes::from(body.to_string()))));
            self
        }

        fn respond_with(self, response: HttpResponse) -> Self {
            self.responses.lock().push(Ok(response));
            self
        }

        fn fail(self, message: &str) -> Self {
            self.responses.lock().push(Err(message.to_string()));
            self
        }

        fn sent(&self) -> Vec<HttpRequest> {
            self.requests.lock().clone()
        }
    }

    #[async_trait]
    impl HttpClient for MockHttp {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String> {
            self.requests.lock().push(request);
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                return Err("no response queued".into());
            }
            responses.remove(0)
        }
    }

    fn client(http: MockHttp) -> RemoteStoreClient<MockHttp> {
        RemoteStoreClient::new(
            http,
            Arc::new(StaticCredentials::new("tok")),
            ClientConfig::default(),
        )
    }

    fn item(raw: &str) -> ItemIdentifier {
        ItemIdentifier::from_raw(raw).unwrap()
    }

    const RECORD: &str = r#"{"id":"abc","GUUID":"owner-1","name":"a.txt","type":"file","createdAt":1,"updatedAt":1}"#;

    #[tokio::test]
    async fn get_metadata_sends_bearer_and_token() {
        let client = client(MockHttp::default().respond(StatusCode::OK, RECORD));
        let record = client.get_metadata(&item("abc")).await.unwrap();
        assert_eq!(record.id, "abc");

        let sent = client.http().sent();
        assert_eq!(sent[0].method, Method::GET);
        assert_eq!(sent[0].path, "/items/YWJj");
        assert_eq!(sent[0].headers.get("authorization").unwrap(), "Bearer tok");
    }

    #[tokio::test]
    async fn structural_checks() {
        let client = client(
            MockHttp::default()
                .respond(StatusCode::OK, "")
                .respond(StatusCode::OK, "not json")
                .respond(StatusCode::OK, r#"{"id":"","name":"x"}"#)
                .respond(StatusCode::OK, r#"{"name":"x"}"#),
        );
        let id = item("abc");
        assert!(matches!(
            client.get_metadata(&id).await,
            Err(ClientError::EmptyResponse)
        ));
        for _ in 0..3 {
            assert!(matches!(
                client.get_metadata(&id).await,
                Err(ClientError::InvalidResponse(_))
            ));
        }
    }

    #[tokio::test]
    async fn status_errors_are_typed() {
        let client = client(
            MockHttp::default()
                .respond(
                    StatusCode::FORBIDDEN,
                    r#"{"error":"not yours","code":"forbidden"}"#,
                )
                .respond(StatusCode::NOT_FOUND, "")
                .fail("connection refused"),
        );
        let id = item("abc");
        assert!(matches!(
            client.get_metadata(&id).await,
            Err(ClientError::Forbidden(_))
        ));
        assert!(matches!(
            client.get_metadata(&id).await,
            Err(ClientError::NotFound(_))
        ));
        let err = client.get_metadata(&id).await.unwrap_err();
        assert!(matches!(err, ClientError::Network(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn missing_credentials() {
        let client = RemoteStoreClient::new(
            MockHttp::default(),
            Arc::new(NoCredentials),
            ClientConfig::default(),
        );
        assert!(matches!(
            client.get_metadata(&item("abc")).await,
            Err(ClientError::Unauthorized(_))
        ));
        assert!(client.http().sent().is_empty());
    }

    #[tokio::test]
    async fn empty_diff_rejected_locally() {
        let client = client(MockHttp::default());
        let result = client.update_item(&item("abc"), &FieldDiff::new()).await;
        assert!(matches!(result, Err(ClientError::NothingToUpdate)));
        assert!(client.http().sent().is_empty());
    }

    #[tokio::test]
    async fn update_sends_only_diff() {
        let client = client(MockHttp::default().respond(StatusCode::OK, RECORD));
        let mut diff = FieldDiff::new();
        diff.set_name("b.txt");
        client.update_item(&item("abc"), &diff).await.unwrap();

        let sent = client.http().sent();
        assert_eq!(sent[0].method, Method::PUT);
        assert_eq!(sent[0].body.bytes(), br#"{"name":"b.txt"}"#);
    }

    #[tokio::test]
    async fn list_children_reads_page_header() {
        let mut response = HttpResponse::new(StatusCode::OK, format!("[{RECORD}]"));
        response
            .headers
            .insert(NEXT_PAGE_HEADER, HeaderValue::from_static("next"));
        let client = RemoteStoreClient::new(
            MockHttp::default()
                .respond_with(response)
                .respond(StatusCode::OK, "[]"),
            Arc::new(StaticCredentials::new("tok")),
            ClientConfig::default().with_page_size(1),
        );

        let page = client
            .list_children(&ItemIdentifier::Root, None)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.next_page.as_deref(), Some("next"));

        let page = client
            .list_children(&ItemIdentifier::Trash, Some("next"))
            .await
            .unwrap();
        assert!(page.items.is_empty());
        assert!(page.next_page.is_none());

        let sent = client.http().sent();
        assert_eq!(sent[0].path, "/items?pageSize=1");
        assert_eq!(
            sent[1].path,
            "/items?parentId=~trash&pageToken=next&pageSize=1"
        );
    }

    #[tokio::test]
    async fn create_item_body() {
        let client = client(MockHttp::default().respond(StatusCode::CREATED, RECORD));
        client
            .create_item(&item("folder"), "a.txt", ItemKind::File)
            .await
            .unwrap();

        let sent = client.http().sent();
        let body: serde_json::Value = serde_json::from_slice(sent[0].body.bytes()).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"name": "a.txt", "type": "file", "parentId": item("folder").to_token()})
        );
    }

    #[tokio::test]
    async fn download_writes_destination() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested").join("a.txt");
        let client = client(MockHttp::default().respond(StatusCode::OK, "hello"));

        let path = client.download_content(&item("abc"), &dest).await.unwrap();
        assert_eq!(path, dest);
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello");
        assert_eq!(std::fs::read_dir(dest.parent().unwrap()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn download_of_container_is_not_a_file() {
        let client = client(MockHttp::default());
        let dir = tempfile::tempdir().unwrap();
        let result = client
            .download_content(&ItemIdentifier::Root, &dir.path().join("x"))
            .await;
        assert!(matches!(result, Err(ClientError::NotAFile(_))));
    }

    #[tokio::test]
    async fn upload_streams_file_part() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.txt");
        std::fs::write(&source, b"payload").unwrap();
        let client = client(MockHttp::default().respond(StatusCode::OK, RECORD));

        client.upload_content(&item("abc"), &source).await.unwrap();

        let sent = client.http().sent();
        assert_eq!(sent[0].method, Method::PUT);
        assert_eq!(sent[0].path, "/items/YWJj/content");
        assert_eq!(
            sent[0].body,
            RequestBody::File(FilePart {
                field: "file".into(),
                filename: "a.txt".into(),
                path: source,
            })
        );
    }

    #[tokio::test]
    async fn upload_of_missing_source_is_io() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(MockHttp::default());
        let result = client
            .upload_content(&item("abc"), &dir.path().join("absent"))
            .await;
        assert!(matches!(result, Err(ClientError::Io(_))));
        assert!(client.http().sent().is_empty());
    }

    #[tokio::test]
    async fn failed_download_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.txt");
        let client = client(MockHttp::default().respond(
            StatusCode::NOT_FOUND,
            r#"{"error":"no content","code":"no_content"}"#,
        ));

        let result = client.download_content(&item("abc"), &dest).await;
        assert!(matches!(result, Err(ClientError::NotAFile(_))));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn changes_feed() {
        let body = format!(r#"{{"updated":[{RECORD}],"deleted":["gone"],"anchor":7,"moreComing":false}}"#);
        let client = client(
            MockHttp::default()
                .respond(StatusCode::OK, &body)
                .respond(StatusCode::OK, r#"{"updated":[],"deleted":[],"anchor":9,"moreComing":false}"#),
        );

        let changes = client.changes_since(Some(3)).await.unwrap();
        assert_eq!(changes.anchor, 7);
        assert_eq!(changes.deleted, vec!["gone".to_string()]);
        assert_eq!(client.current_anchor().await.unwrap(), 9);

        let sent = client.http().sent();
        assert_eq!(sent[0].path, "/changes?since=3");
        assert_eq!(sent[1].path, "/changes");
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let token = CancellationToken::new();
        token.cancel();
        let result: ClientResult<()> = cancellable(&token, async { Ok(()) }).await;
        assert!(matches!(result, Err(ClientError::Cancelled)));
    }

    #[tokio::test]
    async fn cancellation_abandons_pending_future() {
        let token = CancellationToken::new();
        let child = token.clone();
        tokio::spawn(async move { child.cancel() });
        let result: ClientResult<()> = cancellable(&token, std::future::pending()).await;
        assert!(matches!(result, Err(ClientError::Cancelled)));
    }

    #[test]
    fn connect_uses_config() {
        let config = ClientConfig::new("http://files.test/");
        let client = RemoteStoreClient::connect(Arc::new(NoCredentials), config).unwrap();
        assert_eq!(client.http().base_url(), "http://files.test");
    }

    #[test]
    fn query_encoding() {
        assert_eq!(query_string(&[("a", None)]), "");
        assert_eq!(
            query_string(&[("a", Some("x y".into())), ("b", Some("1".into()))]),
            "?a=x%20y&b=1"
        );
    }
}
