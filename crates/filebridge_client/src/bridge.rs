//! Host item-lifecycle events mapped onto remote store calls.
//!
//! Metadata and content travel in separate round-trips. When the second one
//! fails the first is not rolled back; the outcome types report each half
//! independently so the host can retry just the content.

use crate::client::{cancellable, RemoteStore};
use crate::config::ClientConfig;
use crate::diff::build_field_diff;
use crate::enumerator::SyncEnumerator;
use crate::error::{ClientError, ClientResult};
use crate::item::{Item, ItemTemplate};
use filebridge_protocol::{ItemFields, ItemIdentifier};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Directory that receives fetched contents.
    pub staging_dir: PathBuf,
}

impl BridgeConfig {
    /// Creates a configuration staging into `staging_dir`.
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::new(std::env::temp_dir().join("filebridge"))
    }
}

impl From<&ClientConfig> for BridgeConfig {
    fn from(config: &ClientConfig) -> Self {
        Self::new(config.staging_dir.clone())
    }
}

/// Result of the content half of a create or modify.
#[derive(Debug)]
pub enum ContentOutcome {
    /// No contents were supplied.
    NotRequested,
    /// Contents were uploaded.
    Uploaded,
    /// The upload failed; the metadata change stands.
    Failed(ClientError),
}

impl ContentOutcome {
    /// Returns true unless the upload failed.
    pub fn is_ok(&self) -> bool {
        !matches!(self, ContentOutcome::Failed(_))
    }
}

/// Downloaded contents plus the metadata fetched afterwards.
#[derive(Debug)]
pub struct FetchedContents {
    /// Where the contents were written.
    pub path: PathBuf,
    /// The item, or why it could not be fetched after the download.
    pub metadata: ClientResult<Item>,
}

/// Result of [`ReplicationBridge::create_item`].
#[derive(Debug)]
pub struct CreateOutcome {
    /// The created item as last seen from the server.
    pub item: Item,
    /// Requested fields that could not be applied.
    pub pending_fields: ItemFields,
    /// What happened to the contents.
    pub content: ContentOutcome,
}

/// Result of [`ReplicationBridge::modify_item`].
#[derive(Debug)]
pub struct ModifyOutcome {
    /// The item as last seen from the server.
    pub item: Item,
    /// What happened to the contents.
    pub content: ContentOutcome,
}

/// Applies host intents to the remote store.
pub struct ReplicationBridge {
    remote: Arc<dyn RemoteStore>,
    config: BridgeConfig,
}

impl ReplicationBridge {
    /// Creates a bridge.
    pub fn new(remote: Arc<dyn RemoteStore>, config: BridgeConfig) -> Self {
        Self { remote, config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Looks up an item. Containers are synthesized locally.
    pub async fn item(&self, id: &ItemIdentifier, cancel: &CancellationToken) -> ClientResult<Item> {
        if let Some(item) = Item::synthesized(id) {
            return Ok(item);
        }
        let record = cancellable(cancel, self.remote.get_metadata(id)).await?;
        Item::from_record(&record)
    }

    /// Downloads an item's contents into the staging directory, then fetches
    /// its metadata.
    ///
    /// A metadata failure after a successful download is returned inside
    /// [`FetchedContents::metadata`].
    pub async fn fetch_contents(
        &self,
        id: &ItemIdentifier,
        cancel: &CancellationToken,
    ) -> ClientResult<FetchedContents> {
        let destination = self.config.staging_dir.join(id.to_token());
        let path = cancellable(cancel, self.remote.download_content(id, &destination)).await?;

        let metadata = match cancellable(cancel, self.remote.get_metadata(id)).await {
            Ok(record) => Item::from_record(&record),
            Err(e) => Err(e),
        };
        if let Err(e) = &metadata {
            warn!(id = %id, error = %e, "metadata fetch failed after download");
        }
        Ok(FetchedContents { path, metadata })
    }

    /// Creates an item, then applies any further requested fields and uploads
    /// `contents` if given.
    ///
    /// Only the create itself is fatal. Fields that could not be applied are
    /// reported in [`CreateOutcome::pending_fields`], upload failures in
    /// [`CreateOutcome::content`].
    pub async fn create_item(
        &self,
        template: &ItemTemplate,
        fields: ItemFields,
        contents: Option<&Path>,
        cancel: &CancellationToken,
    ) -> ClientResult<CreateOutcome> {
        let attributes = &template.attributes;
        let record = cancellable(
            cancel,
            self.remote
                .create_item(&attributes.parent, &attributes.filename, template.kind),
        )
        .await?;
        let mut item = Item::from_record(&record)?;
        info!(id = %item.identifier, name = %item.filename(), "created item");

        let mut extra = fields.intersection(ItemFields::metadata());
        extra.remove(ItemFields::FILENAME | ItemFields::PARENT);
        let mut pending_fields = ItemFields::empty();
        let diff = build_field_diff(extra, attributes);
        if !diff.is_empty() {
            match cancellable(cancel, self.remote.update_item(&item.identifier, &diff)).await {
                Ok(updated) => item = Item::from_record(&updated)?,
                Err(e) => {
                    warn!(id = %item.identifier, error = %e, "initial metadata not applied");
                    pending_fields = extra;
                }
            }
        }

        let content = self.upload(&mut item, contents, cancel).await;
        Ok(CreateOutcome {
            item,
            pending_fields,
            content,
        })
    }

    /// Pushes the host's changes to an existing item.
    ///
    /// The metadata update is skipped when no changed field has a value but
    /// contents were supplied; with neither, the call fails with
    /// [`ClientError::NothingToUpdate`]. A metadata failure is returned as
    /// an error; an upload failure after it is reported in
    /// [`ModifyOutcome::content`].
    pub async fn modify_item(
        &self,
        item: &Item,
        changed: ItemFields,
        contents: Option<&Path>,
        cancel: &CancellationToken,
    ) -> ClientResult<ModifyOutcome> {
        if item.identifier.is_sentinel() {
            return Err(ClientError::ReadOnlyContainer(item.identifier.to_token()));
        }
        let diff = build_field_diff(changed, &item.attributes);
        if diff.is_empty() && contents.is_none() {
            return Err(ClientError::NothingToUpdate);
        }

        let mut current = item.clone();
        if !diff.is_empty() {
            let record =
                cancellable(cancel, self.remote.update_item(&item.identifier, &diff)).await?;
            current = Item::from_record(&record)?;
            info!(id = %current.identifier, fields = diff.len(), "modified item");
        }

        let content = self.upload(&mut current, contents, cancel).await;
        Ok(ModifyOutcome {
            item: current,
            content,
        })
    }

    /// Deletes an item.
    pub async fn delete_item(
        &self,
        id: &ItemIdentifier,
        cancel: &CancellationToken,
    ) -> ClientResult<()> {
        if id.is_sentinel() {
            return Err(ClientError::ReadOnlyContainer(id.to_token()));
        }
        cancellable(cancel, self.remote.delete_item(id)).await
    }

    /// An enumerator for `container`.
    pub fn enumerator(&self, container: ItemIdentifier) -> SyncEnumerator {
        SyncEnumerator::new(Arc::clone(&self.remote), container)
    }

    async fn upload(
        &self,
        item: &mut Item,
        contents: Option<&Path>,
        cancel: &CancellationToken,
    ) -> ContentOutcome {
        let Some(source) = contents else {
            return ContentOutcome::NotRequested;
        };
        let uploaded = cancellable(cancel, self.remote.upload_content(&item.identifier, source))
            .await
            .and_then(|record| Item::from_record(&record));
        match uploaded {
            Ok(updated) => {
                *item = updated;
                ContentOutcome::Uploaded
            }
            Err(e) => {
                warn!(id = %item.identifier, error = %e, "content upload failed");
                ContentOutcome::Failed(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ListPage;
    use crate::item::ItemAttributes;
    use async_trait::async_trait;
    use filebridge_protocol::{ChangesResponse, FieldDiff, ItemId, ItemKind, ItemRecord};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// An in-memory remote with switchable failures.
    #[derive(Default)]
    struct MemoryRemote {
        records: Mutex<HashMap<String, ItemRecord>>,
        calls: Mutex<Vec<String>>,
        fail_update: bool,
        fail_upload: bool,
        fail_metadata: bool,
    }

    impl MemoryRemote {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        fn record(&self, id: &ItemIdentifier) -> ClientResult<ItemRecord> {
            self.records
                .lock()
                .get(id.as_raw())
                .cloned()
                .ok_or_else(|| ClientError::NotFound(id.to_string()))
        }
    }

    #[async_trait]
    impl RemoteStore for MemoryRemote {
        async fn list_children(
            &self,
            _: &ItemIdentifier,
            _: Option<&str>,
        ) -> ClientResult<ListPage> {
            Ok(ListPage::default())
        }

        async fn get_metadata(&self, id: &ItemIdentifier) -> ClientResult<ItemRecord> {
            self.calls.lock().push("get".into());
            if self.fail_metadata {
                return Err(ClientError::Network("offline".into()));
            }
            self.record(id)
        }

        async fn download_content(
            &self,
            id: &ItemIdentifier,
            destination: &Path,
        ) -> ClientResult<PathBuf> {
            self.calls.lock().push("download".into());
            self.record(id)?;
            if let Some(dir) = destination.parent() {
                tokio::fs::create_dir_all(dir).await?;
            }
            tokio::fs::write(destination, b"remote bytes").await?;
            Ok(destination.to_path_buf())
        }

        async fn create_item(
            &self,
            parent: &ItemIdentifier,
            name: &str,
            kind: ItemKind,
        ) -> ClientResult<ItemRecord> {
            self.calls.lock().push("create".into());
            let id = ItemId::generate();
            let parent_id = parent.item_id().map(|p| p.as_str().to_string());
            let record = ItemRecord::new(&id, parent_id, "owner-1", name, kind, 0);
            self.records.lock().insert(record.id.clone(), record.clone());
            Ok(record)
        }

        async fn update_item(
            &self,
            id: &ItemIdentifier,
            diff: &FieldDiff,
        ) -> ClientResult<ItemRecord> {
            self.calls.lock().push(format!("update {}", diff.as_map().len()));
            if self.fail_update {
                return Err(ClientError::Server {
                    status: 500,
                    message: "boom".into(),
                });
            }
            let mut record = self.record(id)?;
            let patch = filebridge_protocol::ItemPatch::from_body(diff.as_map())?;
            patch.apply(&mut record);
            record.metadata_version = "m2".into();
            self.records.lock().insert(record.id.clone(), record.clone());
            Ok(record)
        }

        async fn delete_item(&self, id: &ItemIdentifier) -> ClientResult<()> {
            self.calls.lock().push("delete".into());
            self.records
                .lock()
                .remove(id.as_raw())
                .map(|_| ())
                .ok_or_else(|| ClientError::NotFound(id.to_string()))
        }

        async fn upload_content(
            &self,
            id: &ItemIdentifier,
            _source: &Path,
        ) -> ClientResult<ItemRecord> {
            self.calls.lock().push("upload".into());
            if self.fail_upload {
                return Err(ClientError::UploadFailed("disk full".into()));
            }
            let mut record = self.record(id)?;
            record.content_path = Some(format!("{}_blob", record.id));
            record.content_version = "c1".into();
            self.records.lock().insert(record.id.clone(), record.clone());
            Ok(record)
        }

        async fn changes_since(&self, anchor: Option<u64>) -> ClientResult<ChangesResponse> {
            Ok(ChangesResponse {
                anchor: anchor.unwrap_or(0),
                ..Default::default()
            })
        }
    }

    fn bridge(remote: MemoryRemote) -> (ReplicationBridge, Arc<MemoryRemote>, tempfile::TempDir) {
        let staging = tempfile::tempdir().unwrap();
        let remote = Arc::new(remote);
        let bridge = ReplicationBridge::new(remote.clone(), BridgeConfig::new(staging.path()));
        (bridge, remote, staging)
    }

    fn source_file(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("upload.txt");
        std::fs::write(&path, b"local bytes").unwrap();
        path
    }

    #[tokio::test]
    async fn containers_are_synthesized() {
        let (bridge, remote, _dir) = bridge(MemoryRemote::default());
        let cancel = CancellationToken::new();

        let root = bridge.item(&ItemIdentifier::Root, &cancel).await.unwrap();
        assert_eq!(root.filename(), "Root");
        let trash = bridge.item(&ItemIdentifier::Trash, &cancel).await.unwrap();
        assert_eq!(trash.filename(), "Recently Deleted");
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn create_with_contents() {
        let (bridge, remote, dir) = bridge(MemoryRemote::default());
        let cancel = CancellationToken::new();
        let source = source_file(&dir);

        let mut template = ItemTemplate::file("a.txt", ItemIdentifier::Root);
        template.attributes.favorite_rank = Some(3);
        let fields = ItemFields::FILENAME | ItemFields::FAVORITE_RANK | ItemFields::CONTENTS;

        let outcome = bridge
            .create_item(&template, fields, Some(&source), &cancel)
            .await
            .unwrap();
        assert!(matches!(outcome.content, ContentOutcome::Uploaded));
        assert!(outcome.pending_fields.is_empty());
        assert!(outcome.item.has_content);
        assert_eq!(outcome.item.attributes.favorite_rank, Some(3));
        assert_eq!(outcome.item.version.content, b"c1");
        assert_eq!(remote.calls(), vec!["create", "update 1", "upload"]);
    }

    #[tokio::test]
    async fn create_keeps_record_when_upload_fails() {
        let (bridge, remote, dir) = bridge(MemoryRemote {
            fail_upload: true,
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        let source = source_file(&dir);

        let template = ItemTemplate::file("a.txt", ItemIdentifier::Root);
        let outcome = bridge
            .create_item(&template, ItemFields::FILENAME, Some(&source), &cancel)
            .await
            .unwrap();
        assert!(matches!(
            outcome.content,
            ContentOutcome::Failed(ClientError::UploadFailed(_))
        ));
        assert!(!outcome.item.has_content);
        assert_eq!(remote.records.lock().len(), 1);
    }

    #[tokio::test]
    async fn create_reports_pending_fields() {
        let (bridge, _remote, _dir) = bridge(MemoryRemote {
            fail_update: true,
            ..Default::default()
        });
        let cancel = CancellationToken::new();

        let mut template = ItemTemplate::folder("Docs", ItemIdentifier::Root);
        template.attributes.tag_data = Some(vec![1]);
        let outcome = bridge
            .create_item(&template, ItemFields::TAG_DATA, None, &cancel)
            .await
            .unwrap();
        assert_eq!(outcome.pending_fields, ItemFields::TAG_DATA);
        assert!(matches!(outcome.content, ContentOutcome::NotRequested));
        assert!(outcome.item.is_folder());
    }

    #[tokio::test]
    async fn modify_renames() {
        let (bridge, remote, _dir) = bridge(MemoryRemote::default());
        let cancel = CancellationToken::new();
        let template = ItemTemplate::file("a.txt", ItemIdentifier::Root);
        let created = bridge
            .create_item(&template, ItemFields::empty(), None, &cancel)
            .await
            .unwrap();

        let mut item = created.item;
        item.attributes.filename = "b.txt".into();
        let outcome = bridge
            .modify_item(&item, ItemFields::FILENAME, None, &cancel)
            .await
            .unwrap();
        assert_eq!(outcome.item.filename(), "b.txt");
        assert_eq!(outcome.item.version.metadata, b"m2");
        assert_eq!(remote.calls(), vec!["create", "update 1"]);
    }

    #[tokio::test]
    async fn modify_contents_only_skips_update() {
        let (bridge, remote, dir) = bridge(MemoryRemote::default());
        let cancel = CancellationToken::new();
        let source = source_file(&dir);
        let template = ItemTemplate::file("a.txt", ItemIdentifier::Root);
        let item = bridge
            .create_item(&template, ItemFields::empty(), None, &cancel)
            .await
            .unwrap()
            .item;

        let outcome = bridge
            .modify_item(&item, ItemFields::CONTENTS, Some(&source), &cancel)
            .await
            .unwrap();
        assert!(matches!(outcome.content, ContentOutcome::Uploaded));
        assert_eq!(remote.calls(), vec!["create", "upload"]);
    }

    #[tokio::test]
    async fn modify_nothing() {
        let (bridge, remote, _dir) = bridge(MemoryRemote::default());
        let cancel = CancellationToken::new();
        let mut item = Item::synthesized(&ItemIdentifier::Root).unwrap();
        item.identifier = ItemIdentifier::Item(ItemId::new("x").unwrap());
        item.attributes = ItemAttributes::new("x", ItemIdentifier::Root);

        let result = bridge
            .modify_item(&item, ItemFields::TAG_DATA, None, &cancel)
            .await;
        assert!(matches!(result, Err(ClientError::NothingToUpdate)));
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn modify_metadata_failure_is_fatal() {
        let (bridge, remote, dir) = bridge(MemoryRemote {
            fail_update: true,
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        let source = source_file(&dir);
        let template = ItemTemplate::file("a.txt", ItemIdentifier::Root);
        let item = bridge
            .create_item(&template, ItemFields::empty(), None, &cancel)
            .await
            .unwrap()
            .item;

        let result = bridge
            .modify_item(&item, ItemFields::FILENAME, Some(&source), &cancel)
            .await;
        assert!(matches!(result, Err(ClientError::Server { status: 500, .. })));
        assert!(!remote.calls().contains(&"upload".to_string()));
    }

    #[tokio::test]
    async fn containers_are_read_only() {
        let (bridge, _remote, _dir) = bridge(MemoryRemote::default());
        let cancel = CancellationToken::new();
        let root = Item::synthesized(&ItemIdentifier::Root).unwrap();

        assert!(matches!(
            bridge.modify_item(&root, ItemFields::FILENAME, None, &cancel).await,
            Err(ClientError::ReadOnlyContainer(_))
        ));
        assert!(matches!(
            bridge.delete_item(&ItemIdentifier::Trash, &cancel).await,
            Err(ClientError::ReadOnlyContainer(_))
        ));
    }

    #[tokio::test]
    async fn delete_propagates_errors() {
        let (bridge, _remote, _dir) = bridge(MemoryRemote::default());
        let cancel = CancellationToken::new();
        let template = ItemTemplate::file("a.txt", ItemIdentifier::Root);
        let id = bridge
            .create_item(&template, ItemFields::empty(), None, &cancel)
            .await
            .unwrap()
            .item
            .identifier;

        bridge.delete_item(&id, &cancel).await.unwrap();
        assert!(matches!(
            bridge.delete_item(&id, &cancel).await,
            Err(ClientError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn fetch_contents_partial_success() {
        let remote = MemoryRemote {
            fail_metadata: true,
            ..Default::default()
        };
        let id = ItemId::new("abc").unwrap();
        let record = ItemRecord::new(&id, None, "owner-1", "a.txt", ItemKind::File, 0);
        remote.records.lock().insert("abc".into(), record);
        let (bridge, _remote, dir) = bridge(remote);
        let cancel = CancellationToken::new();

        let fetched = bridge
            .fetch_contents(&ItemIdentifier::Item(id.clone()), &cancel)
            .await
            .unwrap();
        assert_eq!(fetched.path, dir.path().join(id.to_token()));
        assert_eq!(std::fs::read(&fetched.path).unwrap(), b"remote bytes");
        assert!(matches!(fetched.metadata, Err(ClientError::Network(_))));
    }

    #[tokio::test]
    async fn cancelled_operations_do_not_reach_remote() {
        let (bridge, remote, _dir) = bridge(MemoryRemote::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let template = ItemTemplate::file("a.txt", ItemIdentifier::Root);
        let result = bridge
            .create_item(&template, ItemFields::empty(), None, &cancel)
            .await;
        assert!(matches!(result, Err(ClientError::Cancelled)));
        assert!(remote.calls().is_empty());
    }
}
