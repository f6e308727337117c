//! Container listing and the change-anchor protocol.

use crate::client::RemoteStore;
use crate::error::{ClientError, ClientResult};
use crate::item::Item;
use filebridge_protocol::ItemIdentifier;
use std::sync::Arc;
use tracing::{debug, warn};

/// An opaque sync position.
///
/// Holds the server's change sequence number as decimal text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SyncAnchor(Vec<u8>);

impl SyncAnchor {
    /// Anchor for a change sequence number.
    pub fn from_seq(seq: u64) -> Self {
        Self(seq.to_string().into_bytes())
    }

    /// Wraps bytes previously returned by [`SyncAnchor::as_bytes`].
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// The raw anchor bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Parses the sequence number, if the anchor is well formed.
    pub fn to_seq(&self) -> Option<u64> {
        std::str::from_utf8(&self.0).ok()?.parse().ok()
    }
}

/// One page of container items.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemPage {
    /// Items on this page.
    pub items: Vec<Item>,
    /// Token for the next page, if there is one.
    pub next_page: Option<String>,
}

/// Changes since an anchor.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeBatch {
    /// Items created or modified.
    pub updated: Vec<Item>,
    /// Items deleted.
    pub deleted: Vec<ItemIdentifier>,
    /// Anchor to resume from.
    pub anchor: SyncAnchor,
    /// True when another call would return more changes.
    pub more_coming: bool,
}

/// Enumerates one container and its changes.
pub struct SyncEnumerator {
    remote: Arc<dyn RemoteStore>,
    container: ItemIdentifier,
}

impl SyncEnumerator {
    /// Creates an enumerator for `container`.
    pub fn new(remote: Arc<dyn RemoteStore>, container: ItemIdentifier) -> Self {
        Self { remote, container }
    }

    /// The enumerated container.
    pub fn container(&self) -> &ItemIdentifier {
        &self.container
    }

    /// Lists one page of the container.
    pub async fn enumerate_items(&self, page: Option<&str>) -> ClientResult<ItemPage> {
        let listing = self.remote.list_children(&self.container, page).await?;
        let items = listing
            .items
            .iter()
            .map(Item::from_record)
            .collect::<ClientResult<Vec<_>>>()?;
        debug!(
            container = %self.container,
            count = items.len(),
            more = listing.next_page.is_some(),
            "enumerated items"
        );
        Ok(ItemPage {
            items,
            next_page: listing.next_page,
        })
    }

    /// Lists changes after `anchor`.
    ///
    /// Fails with [`ClientError::SyncAnchorExpired`] when the anchor cannot be
    /// parsed or the server no longer accepts it; the caller should then
    /// enumerate from scratch.
    pub async fn enumerate_changes(&self, anchor: &SyncAnchor) -> ClientResult<ChangeBatch> {
        let since = anchor.to_seq().ok_or(ClientError::SyncAnchorExpired)?;
        let changes = match self.remote.changes_since(Some(since)).await {
            Ok(changes) => changes,
            Err(ClientError::InvalidRequest(message)) => {
                warn!(since, %message, "sync anchor rejected");
                return Err(ClientError::SyncAnchorExpired);
            }
            Err(e) => return Err(e),
        };

        let updated = changes
            .updated
            .iter()
            .map(Item::from_record)
            .collect::<ClientResult<Vec<_>>>()?;
        let deleted = changes
            .deleted
            .iter()
            .map(|raw| ItemIdentifier::from_raw(raw))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            since,
            anchor = changes.anchor,
            updated = updated.len(),
            deleted = deleted.len(),
            "enumerated changes"
        );
        Ok(ChangeBatch {
            updated,
            deleted,
            anchor: SyncAnchor::from_seq(changes.anchor),
            more_coming: changes.more_coming,
        })
    }

    /// The latest anchor.
    pub async fn current_anchor(&self) -> ClientResult<SyncAnchor> {
        Ok(SyncAnchor::from_seq(self.remote.current_anchor().await?))
    }
}
