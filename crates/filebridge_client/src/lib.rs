//! # filebridge client
//!
//! Client side of the filebridge protocol.
//!
//! This crate provides:
//! - `RemoteStoreClient`: typed CRUD, listing, content and change-feed calls
//! - `SyncEnumerator`: paged container listing and change anchors
//! - `ReplicationBridge`: host create/modify/delete/fetch intents mapped onto
//!   remote calls
//! - Field-diff construction from host change sets
//! - HTTP transport abstraction with `reqwest` and loopback implementations
//!
//! ## Architecture
//!
//! The bridge and enumerator depend only on the `RemoteStore` trait. The
//! HTTP implementation depends only on the `HttpClient` trait and a
//! `CredentialProvider`, so every layer can be tested in isolation or wired
//! to a real server in-process through `LoopbackClient`.
//!
//! ## Key Invariants
//!
//! - A partial update carries exactly the changed fields that have a value
//! - An empty partial update never leaves the client
//! - Every record accepted from the server has a non-empty `id`
//! - Root and trash are synthesized locally and never modified
//! - Metadata and content are separate round-trips; neither rolls back the other

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod bridge;
mod client;
mod config;
mod credentials;
mod diff;
mod enumerator;
mod error;
mod item;
mod transport;

pub use bridge::{
    BridgeConfig, ContentOutcome, CreateOutcome, FetchedContents, ModifyOutcome, ReplicationBridge,
};
pub use client::{cancellable, ListPage, RemoteStore, RemoteStoreClient};
pub use config::ClientConfig;
pub use credentials::{CredentialProvider, NoCredentials, StaticCredentials};
pub use diff::{build_field_diff, present_fields};
pub use enumerator::{ChangeBatch, ItemPage, SyncAnchor, SyncEnumerator};
pub use error::{ClientError, ClientResult};
pub use item::{Capabilities, Item, ItemAttributes, ItemTemplate, ItemVersion};
pub use transport::{
    FilePart, HttpClient, HttpRequest, HttpResponse, LoopbackClient, LoopbackServer, ReqwestClient,
    RequestBody,
};
