//! Item operations, independent of HTTP.

use crate::auth::Principal;
use crate::blobs::{BlobWriter, ContentRoot};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::store::{ContentUpdate, RecordStore, RecordUpdate};
use filebridge_protocol::{
    is_root_token, ChangesQuery, ChangesResponse, CreateItemRequest, ItemId, ItemIdentifier,
    ItemPatch, ItemRecord, PageToken, TRASH_SENTINEL,
};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs::File;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One page of a listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ListPage {
    /// Items on this page, ordered by `(name, id)`.
    pub items: Vec<ItemRecord>,
    /// Token for the next page, if any.
    pub next_page: Option<PageToken>,
}

/// An upload whose blob is being written.
#[derive(Debug)]
pub struct PendingUpload {
    record: ItemRecord,
    blob_path: String,
    writer: BlobWriter,
}

impl PendingUpload {
    /// The blob writer receiving the content.
    pub fn writer(&mut self) -> &mut BlobWriter {
        &mut self.writer
    }

    /// Discards the partial blob.
    pub async fn abort(self) {
        self.writer.abort().await;
    }
}

/// Performs item operations on behalf of authenticated principals.
pub struct ItemService {
    config: ServerConfig,
    store: Arc<dyn RecordStore>,
    content: ContentRoot,
}

impl ItemService {
    /// Creates a service over a record store.
    pub fn new(config: ServerConfig, store: Arc<dyn RecordStore>) -> Self {
        let content = ContentRoot::new(config.content_root.clone());
        Self {
            config,
            store,
            content,
        }
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The content blob area.
    pub fn content(&self) -> &ContentRoot {
        &self.content
    }

    /// Lists the children of a container.
    ///
    /// A parent that does not exist simply has no children.
    pub fn list_children(
        &self,
        principal: &Principal,
        parent: &ItemIdentifier,
        page_token: Option<&str>,
        page_size: Option<usize>,
    ) -> ServerResult<ListPage> {
        let parent_id = match parent {
            ItemIdentifier::Root => None,
            other => Some(other.as_raw()),
        };
        let offset = match page_token {
            Some(token) => PageToken::decode(token)
                .ok_or_else(|| ServerError::InvalidRequest("invalid page token".into()))?
                .offset(),
            None => 0,
        };
        let page_size = self.config.page_size(page_size);

        let mut children = self.store.find_children(parent_id, &principal.owner_id)?;
        children.sort_by(|a, b| (a.display_name(), &a.id).cmp(&(b.display_name(), &b.id)));

        let total = children.len();
        let items = children
            .into_iter()
            .skip(offset)
            .take(page_size)
            .map(|record| self.present(record))
            .collect::<ServerResult<Vec<_>>>()?;
        let end = offset.saturating_add(page_size);
        let next_page = (end < total).then(|| PageToken::new(end));

        debug!(
            owner = %principal.owner_id,
            parent = %parent,
            count = items.len(),
            "listed children"
        );
        Ok(ListPage { items, next_page })
    }

    /// Returns the metadata of an item; containers are synthesized.
    pub fn get_item(
        &self,
        principal: &Principal,
        identifier: &ItemIdentifier,
    ) -> ServerResult<ItemRecord> {
        let id = match identifier {
            ItemIdentifier::Item(id) => id,
            sentinel => {
                return ItemRecord::synthesized(sentinel, &principal.owner_id, now())
                    .ok_or_else(|| ServerError::Internal("unsynthesizable container".into()))
            }
        };
        let record = self.owned(principal, id)?;
        self.present(record)
    }

    /// Opens an item's content for streaming.
    pub async fn open_content(
        &self,
        principal: &Principal,
        identifier: &ItemIdentifier,
    ) -> ServerResult<(ItemRecord, File)> {
        let id = identifier
            .item_id()
            .ok_or_else(|| ServerError::NotAFile(identifier.to_string()))?;
        let record = self.owned(principal, id)?;
        if record.is_folder() {
            return Err(ServerError::NotAFile(record.id));
        }
        let Some(path) = record.content_path.as_deref().filter(|p| !p.is_empty()) else {
            return Err(ServerError::NoContent(record.id));
        };
        let Some(file) = self.content.open(path).await? else {
            return Err(ServerError::NoContent(record.id));
        };
        debug!(owner = %principal.owner_id, id = %record.id, "serving content");
        Ok((record, file))
    }

    /// Creates an item with a fresh id.
    pub fn create_item(
        &self,
        principal: &Principal,
        request: CreateItemRequest,
    ) -> ServerResult<ItemRecord> {
        if request.name.is_empty() {
            return Err(ServerError::InvalidRequest("name must not be empty".into()));
        }
        let parent = match request.parent_id.as_deref() {
            None => ItemIdentifier::Root,
            Some(token) if is_root_token(token) => ItemIdentifier::Root,
            Some(token) => ItemIdentifier::from_token(token)?,
        };

        let id = ItemId::generate();
        let parent_id = match &parent {
            ItemIdentifier::Root => None,
            other => Some(other.as_raw().to_string()),
        };
        let mut record = ItemRecord::new(
            &id,
            parent_id,
            principal.owner_id.as_str(),
            request.name,
            request.kind,
            now(),
        );
        record.metadata_version = new_version();
        self.store.insert(record.clone())?;

        info!(
            owner = %principal.owner_id,
            id = %id,
            kind = record.kind.as_str(),
            "created item"
        );
        self.present(record)
    }

    /// Applies a partial update from a JSON body.
    pub fn update_item(
        &self,
        principal: &Principal,
        identifier: &ItemIdentifier,
        body: &Map<String, Value>,
    ) -> ServerResult<ItemRecord> {
        let id = self.mutable(identifier)?;
        self.owned(principal, id)?;

        let patch = ItemPatch::from_body(body)?;
        if patch.is_empty() {
            return Err(ServerError::NothingToUpdate);
        }

        let update = RecordUpdate {
            metadata_version: Some(new_version()),
            updated_at: now(),
            content: None,
            patch,
        };
        let updated = self
            .store
            .update(id.as_str(), &principal.owner_id, &update)?
            .ok_or_else(|| ServerError::NotFound(id.to_string()))?;

        info!(
            owner = %principal.owner_id,
            id = %id,
            fields = ?update.patch.fields(),
            "updated item"
        );
        self.present(updated.current)
    }

    /// Deletes an item and its blob. Children are not touched.
    pub async fn delete_item(
        &self,
        principal: &Principal,
        identifier: &ItemIdentifier,
    ) -> ServerResult<()> {
        let id = self.mutable(identifier)?;
        self.owned(principal, id)?;

        let removed = self
            .store
            .remove(id.as_str(), &principal.owner_id)?
            .ok_or_else(|| ServerError::NotFound(id.to_string()))?;
        if let Some(path) = removed.content_path.as_deref().filter(|p| !p.is_empty()) {
            self.content.remove(path).await;
        }

        info!(owner = %principal.owner_id, id = %id, "deleted item");
        Ok(())
    }

    /// Validates an upload target and opens a blob writer for it.
    pub async fn begin_upload(
        &self,
        principal: &Principal,
        identifier: &ItemIdentifier,
        filename: &str,
    ) -> ServerResult<PendingUpload> {
        let id = identifier
            .item_id()
            .ok_or_else(|| ServerError::NotAFile(identifier.to_string()))?;
        let record = self.owned(principal, id)?;
        if record.is_folder() {
            return Err(ServerError::NotAFile(record.id));
        }

        let blob_path = ContentRoot::blob_name(&record.id, filename);
        let writer = self.content.create(&blob_path).await?;
        Ok(PendingUpload {
            record,
            blob_path,
            writer,
        })
    }

    /// Moves an uploaded blob into place and records it.
    pub async fn finish_upload(
        &self,
        principal: &Principal,
        upload: PendingUpload,
    ) -> ServerResult<ItemRecord> {
        let PendingUpload {
            record,
            blob_path,
            writer,
        } = upload;
        let size = writer.written();
        writer.commit().await?;

        let update = RecordUpdate {
            content: Some(ContentUpdate {
                path: blob_path.clone(),
                version: new_version(),
            }),
            updated_at: now(),
            ..RecordUpdate::default()
        };
        let Some(updated) = self
            .store
            .update(&record.id, &principal.owner_id, &update)?
        else {
            // Deleted while uploading.
            self.content.remove(&blob_path).await;
            return Err(ServerError::NotFound(record.id));
        };

        if let Some(old) = updated.previous.content_path.as_deref() {
            if !old.is_empty() && old != blob_path {
                self.content.remove(old).await;
            }
        }

        info!(
            owner = %principal.owner_id,
            id = %record.id,
            bytes = size,
            "stored content"
        );
        self.present(updated.current)
    }

    /// Returns the caller's changes after an anchor.
    pub fn changes_since(
        &self,
        principal: &Principal,
        query: ChangesQuery,
    ) -> ServerResult<ChangesResponse> {
        let Some(since) = query.since else {
            return Ok(ChangesResponse {
                anchor: self.store.head(),
                ..ChangesResponse::default()
            });
        };

        let limit = self.config.change_batch(query.limit);
        let changes = self
            .store
            .changes_since(&principal.owner_id, since, limit)?;
        let updated = changes
            .updated
            .into_iter()
            .map(|record| self.present(record))
            .collect::<ServerResult<Vec<_>>>()?;

        debug!(
            owner = %principal.owner_id,
            since,
            anchor = changes.anchor,
            updated = updated.len(),
            deleted = changes.deleted.len(),
            "served changes"
        );
        Ok(ChangesResponse {
            updated,
            deleted: changes.deleted,
            anchor: changes.anchor,
            more_coming: changes.more_coming,
        })
    }

    /// Fetches a record, enforcing ownership.
    fn owned(&self, principal: &Principal, id: &ItemId) -> ServerResult<ItemRecord> {
        let record = self
            .store
            .find_one(id.as_str())?
            .ok_or_else(|| ServerError::NotFound(id.to_string()))?;
        if !principal.owns(&record.owner_id) {
            warn!(owner = %principal.owner_id, id = %id, "ownership mismatch");
            return Err(ServerError::Forbidden(format!("item {id} is not yours")));
        }
        Ok(record)
    }

    fn mutable<'a>(&self, identifier: &'a ItemIdentifier) -> ServerResult<&'a ItemId> {
        identifier.item_id().ok_or_else(|| {
            ServerError::Forbidden(format!("container {identifier} cannot be modified"))
        })
    }

    /// Fills in computed fields before a record leaves the server.
    fn present(&self, mut record: ItemRecord) -> ServerResult<ItemRecord> {
        record.trashed = self.is_trashed(&record)?;
        Ok(record)
    }

    fn is_trashed(&self, record: &ItemRecord) -> ServerResult<bool> {
        let mut current = record.parent_id.clone();
        let mut visited = HashSet::new();
        while let Some(parent) = current {
            if parent == TRASH_SENTINEL {
                return Ok(true);
            }
            if !visited.insert(parent.clone()) {
                break;
            }
            current = self
                .store
                .find_one(&parent)?
                .and_then(|record| record.parent_id);
        }
        Ok(false)
    }
}

fn now() -> i64 {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    i64::try_from(secs).unwrap_or(i64::MAX)
}

fn new_version() -> String {
    Uuid::new_v4().simple().to_string()
}
