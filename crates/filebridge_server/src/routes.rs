//! HTTP routes.

use crate::auth::{Authenticator, Principal};
use crate::error::{ServerError, ServerResult};
use crate::handler::ItemService;
use axum::body::{Body, Bytes};
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::QueryRejection;
use axum::extract::{DefaultBodyLimit, FromRequestParts, Multipart, Path, Query, State};
use axum::http::header::{AUTHORIZATION, CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use filebridge_protocol::{
    is_root_token, ChangesQuery, ChangesResponse, CreateItemRequest, ItemIdentifier, ItemRecord,
    ListQuery, CONTENT_FIELD, NEXT_PAGE_HEADER,
};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::debug;

/// Shared state of all routes.
pub struct ServerState {
    /// Item operations.
    pub service: ItemService,
    /// Bearer-token authenticator.
    pub auth: Arc<dyn Authenticator>,
}

/// Builds the item API router.
pub fn router(state: Arc<ServerState>) -> Router {
    let upload_limit = state.service.config().max_upload_bytes;
    Router::new()
        .route("/items", get(list_items).post(create_item))
        .route(
            "/items/{id}",
            get(get_item).put(update_item).delete(delete_item),
        )
        .route(
            "/items/{id}/content",
            get(get_content).put(upload_content).post(upload_content),
        )
        .route("/changes", get(changes))
        .layer(DefaultBodyLimit::max(upload_limit))
        .with_state(state)
}

/// The principal behind the request's bearer token.
pub struct Authenticated(pub Principal);

impl FromRequestParts<Arc<ServerState>> for Authenticated {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<ServerState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ServerError::Unauthorized("missing bearer token".into()))?;
        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ServerError::Unauthorized("malformed authorization header".into()))?;
        state.auth.authenticate(token).map(Self)
    }
}

fn identifier(token: &str) -> ServerResult<ItemIdentifier> {
    Ok(ItemIdentifier::from_token(token)?)
}

async fn list_items(
    State(state): State<Arc<ServerState>>,
    Authenticated(principal): Authenticated,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ServerResult<Response> {
    let Query(query) = query.map_err(|e| ServerError::InvalidRequest(e.body_text()))?;
    let parent = match query.parent_id.as_deref() {
        None => ItemIdentifier::Root,
        Some(token) if is_root_token(token) => ItemIdentifier::Root,
        Some(token) => identifier(token)?,
    };

    let page = state.service.list_children(
        &principal,
        &parent,
        query.page_token.as_deref(),
        query.page_size,
    )?;

    let mut headers = HeaderMap::new();
    if let Some(next) = page.next_page {
        let value = HeaderValue::from_str(&next.encode())
            .map_err(|e| ServerError::Internal(e.to_string()))?;
        headers.insert(NEXT_PAGE_HEADER, value);
    }
    Ok((headers, Json(page.items)).into_response())
}

async fn get_item(
    State(state): State<Arc<ServerState>>,
    Authenticated(principal): Authenticated,
    Path(token): Path<String>,
) -> ServerResult<Json<ItemRecord>> {
    let record = state.service.get_item(&principal, &identifier(&token)?)?;
    Ok(Json(record))
}

async fn get_content(
    State(state): State<Arc<ServerState>>,
    Authenticated(principal): Authenticated,
    Path(token): Path<String>,
) -> ServerResult<Response> {
    let (record, file) = state
        .service
        .open_content(&principal, &identifier(&token)?)
        .await?;

    let disposition = HeaderValue::from_str(&attachment(record.display_name()))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
    let headers = [
        (
            CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        ),
        (CONTENT_DISPOSITION, disposition),
    ];
    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}

fn attachment(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let safe: String = base
        .chars()
        .map(|c| if c == '"' || c.is_control() { '_' } else { c })
        .collect();
    format!("attachment; filename=\"{safe}\"")
}

async fn create_item(
    State(state): State<Arc<ServerState>>,
    Authenticated(principal): Authenticated,
    body: Bytes,
) -> ServerResult<(StatusCode, Json<ItemRecord>)> {
    let request: CreateItemRequest = serde_json::from_slice(&body)
        .map_err(|e| ServerError::InvalidRequest(format!("invalid create body: {e}")))?;
    let record = state.service.create_item(&principal, request)?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn update_item(
    State(state): State<Arc<ServerState>>,
    Authenticated(principal): Authenticated,
    Path(token): Path<String>,
    body: Bytes,
) -> ServerResult<Json<ItemRecord>> {
    let identifier = identifier(&token)?;
    let fields = match serde_json::from_slice::<Value>(&body) {
        Ok(Value::Object(fields)) => fields,
        Ok(_) => {
            return Err(ServerError::InvalidRequest(
                "update body must be a JSON object".into(),
            ))
        }
        Err(e) => return Err(ServerError::InvalidRequest(format!("invalid JSON: {e}"))),
    };
    let record = state
        .service
        .update_item(&principal, &identifier, &fields)?;
    Ok(Json(record))
}

async fn delete_item(
    State(state): State<Arc<ServerState>>,
    Authenticated(principal): Authenticated,
    Path(token): Path<String>,
) -> ServerResult<StatusCode> {
    state
        .service
        .delete_item(&principal, &identifier(&token)?)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn upload_content(
    State(state): State<Arc<ServerState>>,
    Authenticated(principal): Authenticated,
    Path(token): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ServerResult<Json<ItemRecord>> {
    let identifier = identifier(&token)?;
    let mut multipart = multipart.map_err(|e| ServerError::InvalidRequest(e.body_text()))?;
    let limit = state.service.config().max_upload_bytes;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::InvalidRequest(e.body_text()))?
    {
        if field.name() != Some(CONTENT_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or("content").to_string();
        let mut upload = state
            .service
            .begin_upload(&principal, &identifier, &filename)
            .await?;

        loop {
            let chunk = match field.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    upload.abort().await;
                    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                        return Err(ServerError::InvalidRequest(e.body_text()));
                    }
                    return Err(ServerError::UploadFailed(e.body_text()));
                }
            };
            if upload.writer().written() + chunk.len() > limit {
                upload.abort().await;
                return Err(ServerError::InvalidRequest(format!(
                    "upload exceeds {limit} bytes"
                )));
            }
            let written = upload.writer().write(&chunk).await;
            if let Err(e) = written {
                upload.abort().await;
                return Err(e);
            }
        }

        debug!(owner = %principal.owner_id, filename = %filename, "received upload");
        let record = state.service.finish_upload(&principal, upload).await?;
        return Ok(Json(record));
    }

    Err(ServerError::InvalidRequest("no file uploaded".into()))
}

async fn changes(
    State(state): State<Arc<ServerState>>,
    Authenticated(principal): Authenticated,
    query: Result<Query<ChangesQuery>, QueryRejection>,
) -> ServerResult<Json<ChangesResponse>> {
    let Query(query) = query.map_err(|e| ServerError::InvalidRequest(e.body_text()))?;
    Ok(Json(state.service.changes_since(&principal, query)?))
}
