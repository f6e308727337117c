//! Record storage and the change feed.

use crate::error::{ServerError, ServerResult};
use filebridge_protocol::{ItemIdentifier, ItemPatch, ItemRecord, TRASH_SENTINEL};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};

/// Number of change-log entries kept by default.
pub const DEFAULT_CHANGE_RETENTION: usize = 100_000;

/// New content location written by an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentUpdate {
    /// Blob path relative to the content root.
    pub path: String,
    /// Fresh content version.
    pub version: String,
}

/// A field set applied atomically to one record.
#[derive(Debug, Clone, Default)]
pub struct RecordUpdate {
    /// Allow-listed metadata fields.
    pub patch: ItemPatch,
    /// Replacement metadata version, if metadata changed.
    pub metadata_version: Option<String>,
    /// New content location, for uploads.
    pub content: Option<ContentUpdate>,
    /// New `updatedAt`.
    pub updated_at: i64,
}

/// Record state before and after an update.
#[derive(Debug, Clone)]
pub struct Updated {
    /// The record as it was.
    pub previous: ItemRecord,
    /// The record as stored now.
    pub current: ItemRecord,
}

/// Changes visible to one owner after an anchor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    /// Current state of changed items, oldest change first.
    pub updated: Vec<ItemRecord>,
    /// Raw ids of removed items.
    pub deleted: Vec<String>,
    /// Anchor to resume from.
    pub anchor: u64,
    /// True when more changes are waiting.
    pub more_coming: bool,
}

/// A key-filtered document store of item records.
///
/// Mutations are filtered by `(id, ownerId)` and each one is atomic. Every
/// successful mutation appends to the change sequence under the same lock.
/// Tree invariants (a parent exists, is a folder of the same owner, and is
/// not a descendant of the moved item) are checked inside that same
/// critical section, against the tree as it is when the write lands.
pub trait RecordStore: Send + Sync {
    /// Looks up a record by raw id, regardless of owner.
    fn find_one(&self, id: &str) -> ServerResult<Option<ItemRecord>>;

    /// Lists records with the given parent and owner.
    fn find_children(&self, parent_id: Option<&str>, owner_id: &str)
        -> ServerResult<Vec<ItemRecord>>;

    /// Inserts a new record.
    ///
    /// Fails if the id is taken or the parent is not a folder of the
    /// record's owner.
    fn insert(&self, record: ItemRecord) -> ServerResult<()>;

    /// Applies a field set to the record matching `(id, owner_id)`.
    ///
    /// A parent change is rejected if the new parent is missing, not a
    /// folder of the same owner, or would put the record under itself.
    fn update(&self, id: &str, owner_id: &str, update: &RecordUpdate)
        -> ServerResult<Option<Updated>>;

    /// Removes the record matching `(id, owner_id)`, returning it.
    fn remove(&self, id: &str, owner_id: &str) -> ServerResult<Option<ItemRecord>>;

    /// Returns up to `limit` changes for `owner_id` after `since`.
    ///
    /// An anchor ahead of the head, or older than the retained log, is an
    /// `InvalidRequest`.
    fn changes_since(&self, owner_id: &str, since: u64, limit: usize) -> ServerResult<ChangeSet>;

    /// The latest change sequence number.
    fn head(&self) -> u64;
}

#[derive(Debug, Clone)]
struct ChangeEntry {
    seq: u64,
    owner_id: String,
    id: String,
}

struct Inner {
    records: HashMap<String, ItemRecord>,
    log: VecDeque<ChangeEntry>,
    head: u64,
    /// Highest sequence number dropped from the log.
    horizon: u64,
    retention: usize,
}

impl Inner {
    fn record_change(&mut self, owner_id: &str, id: &str) {
        self.head += 1;
        self.log.push_back(ChangeEntry {
            seq: self.head,
            owner_id: owner_id.to_string(),
            id: id.to_string(),
        });
        while self.log.len() > self.retention {
            if let Some(dropped) = self.log.pop_front() {
                self.horizon = dropped.seq;
            }
        }
    }

    /// A parent must be root, trash, or a folder owned by `owner_id`.
    fn check_parent(&self, owner_id: &str, parent: &ItemIdentifier) -> ServerResult<()> {
        let Some(parent_id) = parent.item_id() else {
            return Ok(());
        };
        let record = self
            .records
            .get(parent_id.as_str())
            .ok_or_else(|| ServerError::NotFound(parent_id.to_string()))?;
        if record.owner_id != owner_id {
            return Err(ServerError::Forbidden(format!(
                "item {parent_id} is not yours"
            )));
        }
        if !record.is_folder() {
            return Err(ServerError::InvalidRequest(format!(
                "parent {parent_id} is not a folder"
            )));
        }
        Ok(())
    }

    fn check_no_cycle(&self, id: &str, new_parent: &ItemIdentifier) -> ServerResult<()> {
        let mut current = new_parent.item_id().map(|p| p.as_str());
        let mut visited = HashSet::new();
        while let Some(ancestor) = current {
            if ancestor == id {
                return Err(ServerError::InvalidRequest(format!(
                    "moving {id} under {new_parent} would create a cycle"
                )));
            }
            if !visited.insert(ancestor) {
                break;
            }
            current = self
                .records
                .get(ancestor)
                .and_then(|record| record.parent_id.as_deref())
                .filter(|p| *p != TRASH_SENTINEL);
        }
        Ok(())
    }
}

/// In-memory [`RecordStore`].
pub struct MemoryRecordStore {
    inner: RwLock<Inner>,
}

impl MemoryRecordStore {
    /// Creates an empty store keeping [`DEFAULT_CHANGE_RETENTION`] changes.
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_CHANGE_RETENTION)
    }

    /// Creates an empty store keeping at most `retention` change-log
    /// entries. Anchors older than the oldest kept entry expire.
    pub fn with_retention(retention: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                records: HashMap::new(),
                log: VecDeque::new(),
                head: 0,
                horizon: 0,
                retention: retention.max(1),
            }),
        }
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    /// Returns true if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore for MemoryRecordStore {
    fn find_one(&self, id: &str) -> ServerResult<Option<ItemRecord>> {
        Ok(self.inner.read().records.get(id).cloned())
    }

    fn find_children(
        &self,
        parent_id: Option<&str>,
        owner_id: &str,
    ) -> ServerResult<Vec<ItemRecord>> {
        let inner = self.inner.read();
        Ok(inner
            .records
            .values()
            .filter(|r| r.owner_id == owner_id && r.parent_id.as_deref() == parent_id)
            .cloned()
            .collect())
    }

    fn insert(&self, record: ItemRecord) -> ServerResult<()> {
        let mut inner = self.inner.write();
        if inner.records.contains_key(&record.id) {
            return Err(ServerError::Internal(format!(
                "duplicate item id {}",
                record.id
            )));
        }
        let parent = ItemIdentifier::from_parent_id(record.parent_id.as_deref())?;
        inner.check_parent(&record.owner_id, &parent)?;

        let (owner_id, id) = (record.owner_id.clone(), record.id.clone());
        inner.records.insert(id.clone(), record);
        inner.record_change(&owner_id, &id);
        Ok(())
    }

    fn update(
        &self,
        id: &str,
        owner_id: &str,
        update: &RecordUpdate,
    ) -> ServerResult<Option<Updated>> {
        let mut inner = self.inner.write();
        let owned = inner
            .records
            .get(id)
            .is_some_and(|r| r.owner_id == owner_id);
        if !owned {
            return Ok(None);
        }
        if let Some(parent) = &update.patch.parent {
            inner.check_parent(owner_id, parent)?;
            inner.check_no_cycle(id, parent)?;
        }

        let Some(record) = inner.records.get_mut(id) else {
            return Ok(None);
        };

        let previous = record.clone();
        update.patch.apply(record);
        if let Some(version) = &update.metadata_version {
            record.metadata_version = version.clone();
        }
        if let Some(content) = &update.content {
            record.content_path = Some(content.path.clone());
            record.content_version = content.version.clone();
        }
        record.updated_at = update.updated_at;
        let current = record.clone();

        inner.record_change(owner_id, id);
        Ok(Some(Updated { previous, current }))
    }

    fn remove(&self, id: &str, owner_id: &str) -> ServerResult<Option<ItemRecord>> {
        let mut inner = self.inner.write();
        let owned = inner
            .records
            .get(id)
            .is_some_and(|r| r.owner_id == owner_id);
        if !owned {
            return Ok(None);
        }
        let removed = inner.records.remove(id);
        inner.record_change(owner_id, id);
        Ok(removed)
    }

    fn changes_since(&self, owner_id: &str, since: u64, limit: usize) -> ServerResult<ChangeSet> {
        let inner = self.inner.read();
        if since > inner.head {
            return Err(ServerError::InvalidRequest(format!(
                "sync anchor {since} is ahead of the change feed"
            )));
        }

        if since < inner.horizon {
            return Err(ServerError::InvalidRequest(format!(
                "sync anchor {since} has expired"
            )));
        }

        let start = inner.log.partition_point(|e| e.seq <= since);
        let mut pending = inner
            .log
            .range(start..)
            .filter(|e| e.owner_id == owner_id);
        let batch: Vec<&ChangeEntry> = pending.by_ref().take(limit).collect();
        let more_coming = pending.next().is_some();
        let anchor = match batch.last() {
            Some(last) if more_coming => last.seq,
            _ => inner.head,
        };

        // Latest entry per id decides whether it is updated or deleted.
        let mut seen = HashSet::new();
        let mut latest: Vec<&str> = batch
            .iter()
            .rev()
            .map(|e| e.id.as_str())
            .filter(|id| seen.insert(*id))
            .collect();
        latest.reverse();

        let mut changes = ChangeSet {
            anchor,
            more_coming,
            ..ChangeSet::default()
        };
        for id in latest {
            match inner.records.get(id) {
                Some(record) => changes.updated.push(record.clone()),
                None => changes.deleted.push(id.to_string()),
            }
        }
        Ok(changes)
    }

    fn head(&self) -> u64 {
        self.inner.read().head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filebridge_protocol::{ItemId, ItemKind};

    fn record(id: &str, parent: Option<&str>, owner: &str) -> ItemRecord {
        ItemRecord::new(
            &ItemId::new(id).unwrap(),
            parent.map(str::to_string),
            owner,
            id,
            ItemKind::File,
            1,
        )
    }

    fn folder(id: &str, parent: Option<&str>, owner: &str) -> ItemRecord {
        ItemRecord::new(
            &ItemId::new(id).unwrap(),
            parent.map(str::to_string),
            owner,
            id,
            ItemKind::Folder,
            1,
        )
    }

    fn move_to(parent: &str) -> RecordUpdate {
        RecordUpdate {
            patch: ItemPatch {
                parent: Some(ItemIdentifier::from_raw(parent).unwrap()),
                ..ItemPatch::default()
            },
            updated_at: 3,
            ..RecordUpdate::default()
        }
    }

    fn rename(name: &str) -> RecordUpdate {
        RecordUpdate {
            patch: ItemPatch {
                name: Some(name.into()),
                ..ItemPatch::default()
            },
            metadata_version: Some("m2".into()),
            content: None,
            updated_at: 9,
        }
    }

    #[test]
    fn empty_store() {
        let store = MemoryRecordStore::new();
        assert!(store.is_empty());
        assert_eq!(store.head(), 0);
        assert!(store.find_one("x").unwrap().is_none());
    }

    #[test]
    fn children_filtered_by_parent_and_owner() {
        let store = MemoryRecordStore::new();
        store.insert(folder("a", None, "alice")).unwrap();
        store.insert(record("b", Some("a"), "alice")).unwrap();
        store.insert(record("c", None, "bob")).unwrap();

        let root = store.find_children(None, "alice").unwrap();
        assert_eq!(root.len(), 1);
        assert_eq!(root[0].id, "a");
        assert_eq!(store.find_children(Some("a"), "alice").unwrap().len(), 1);
        assert!(store.find_children(Some("a"), "bob").unwrap().is_empty());
    }

    #[test]
    fn duplicate_insert_fails() {
        let store = MemoryRecordStore::new();
        store.insert(record("a", None, "alice")).unwrap();
        assert!(store.insert(record("a", None, "alice")).is_err());
        assert_eq!(store.head(), 1);
    }

    #[test]
    fn update_is_owner_filtered() {
        let store = MemoryRecordStore::new();
        store.insert(record("a", None, "alice")).unwrap();

        assert!(store.update("a", "bob", &rename("x")).unwrap().is_none());
        let updated = store.update("a", "alice", &rename("x")).unwrap().unwrap();
        assert_eq!(updated.previous.name.as_deref(), Some("a"));
        assert_eq!(updated.current.name.as_deref(), Some("x"));
        assert_eq!(updated.current.metadata_version, "m2");
        assert_eq!(updated.current.updated_at, 9);
        assert_eq!(store.head(), 2);
    }

    #[test]
    fn update_sets_content() {
        let store = MemoryRecordStore::new();
        store.insert(record("a", None, "alice")).unwrap();
        let update = RecordUpdate {
            content: Some(ContentUpdate {
                path: "a_file.txt".into(),
                version: "c1".into(),
            }),
            updated_at: 5,
            ..RecordUpdate::default()
        };
        let updated = store.update("a", "alice", &update).unwrap().unwrap();
        assert!(updated.current.has_content());
        assert_eq!(updated.current.content_version, "c1");
        assert_eq!(updated.current.name.as_deref(), Some("a"));
    }

    #[test]
    fn remove_is_owner_filtered() {
        let store = MemoryRecordStore::new();
        store.insert(record("a", None, "alice")).unwrap();
        assert!(store.remove("a", "bob").unwrap().is_none());
        assert!(store.remove("a", "alice").unwrap().is_some());
        assert!(store.remove("a", "alice").unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn change_feed_resolves_updates_and_deletes() {
        let store = MemoryRecordStore::new();
        store.insert(record("a", None, "alice")).unwrap();
        store.insert(record("b", None, "alice")).unwrap();
        store.insert(record("z", None, "bob")).unwrap();
        store.update("a", "alice", &rename("a2")).unwrap();
        store.remove("b", "alice").unwrap();

        let changes = store.changes_since("alice", 0, 100).unwrap();
        assert_eq!(changes.updated.len(), 1);
        assert_eq!(changes.updated[0].name.as_deref(), Some("a2"));
        assert_eq!(changes.deleted, vec!["b".to_string()]);
        assert_eq!(changes.anchor, store.head());
        assert!(!changes.more_coming);

        let none = store.changes_since("alice", changes.anchor, 100).unwrap();
        assert!(none.updated.is_empty() && none.deleted.is_empty());
    }

    #[test]
    fn change_feed_pagination() {
        let store = MemoryRecordStore::new();
        for id in ["a", "b", "c"] {
            store.insert(record(id, None, "alice")).unwrap();
        }

        let first = store.changes_since("alice", 0, 2).unwrap();
        assert_eq!(first.updated.len(), 2);
        assert!(first.more_coming);
        assert_eq!(first.anchor, 2);

        let second = store.changes_since("alice", first.anchor, 2).unwrap();
        assert_eq!(second.updated.len(), 1);
        assert!(!second.more_coming);
        assert_eq!(second.anchor, 3);
    }

    #[test]
    fn anchor_ahead_of_head_is_rejected() {
        let store = MemoryRecordStore::new();
        assert!(matches!(
            store.changes_since("alice", 5, 10),
            Err(ServerError::InvalidRequest(_))
        ));
    }

    #[test]
    fn insert_checks_parent_under_the_lock() {
        let store = MemoryRecordStore::new();
        store.insert(folder("docs", None, "alice")).unwrap();
        store.insert(record("a.txt", None, "alice")).unwrap();

        assert!(matches!(
            store.insert(record("x", Some("gone"), "alice")),
            Err(ServerError::NotFound(_))
        ));
        assert!(matches!(
            store.insert(record("x", Some("a.txt"), "alice")),
            Err(ServerError::InvalidRequest(_))
        ));
        assert!(matches!(
            store.insert(record("x", Some("docs"), "bob")),
            Err(ServerError::Forbidden(_))
        ));
        store.insert(record("x", Some("~trash"), "alice")).unwrap();
        assert_eq!(store.head(), 3);
    }

    #[test]
    fn moves_reject_cycles() {
        let store = MemoryRecordStore::new();
        store.insert(folder("a", None, "alice")).unwrap();
        store.insert(folder("b", Some("a"), "alice")).unwrap();
        store.insert(folder("c", Some("b"), "alice")).unwrap();
        let head = store.head();

        assert!(matches!(
            store.update("a", "alice", &move_to("c")),
            Err(ServerError::InvalidRequest(_))
        ));
        assert!(matches!(
            store.update("a", "alice", &move_to("a")),
            Err(ServerError::InvalidRequest(_))
        ));
        assert_eq!(store.head(), head);

        let moved = store.update("c", "alice", &move_to("a")).unwrap().unwrap();
        assert_eq!(moved.current.parent_id.as_deref(), Some("a"));
    }

    #[test]
    fn trimmed_log_expires_old_anchors() {
        let store = MemoryRecordStore::with_retention(2);
        for id in ["a", "b", "c"] {
            store.insert(record(id, None, "alice")).unwrap();
        }

        assert!(matches!(
            store.changes_since("alice", 0, 10),
            Err(ServerError::InvalidRequest(_))
        ));
        let kept = store.changes_since("alice", 1, 10).unwrap();
        let ids: Vec<&str> = kept.updated.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(kept.anchor, 3);
    }
}
