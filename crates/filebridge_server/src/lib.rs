//! # filebridge server
//!
//! HTTP server owning the item record store and the content blob area.
//!
//! This crate provides:
//! - Item endpoints (list, get, create, update, delete)
//! - Content upload and streaming download
//! - A per-owner change feed
//! - Bearer-token authentication (HMAC-SHA256 tokens or a static table)
//!
//! # Authorization
//!
//! Every record carries the owner id of its creator. All reads and writes
//! compare it with the authenticated principal; a mismatch is answered with
//! `403` before anything is mutated.
//!
//! ```rust,ignore
//! use filebridge_server::{AuthConfig, ItemServer, ServerConfig, TokenValidator};
//!
//! let secret = b"my-secure-secret".to_vec();
//! let config = ServerConfig::default().with_auth(secret.clone());
//! let token = TokenValidator::new(AuthConfig::new(secret)).create_token("owner-1")?;
//! ItemServer::from_config(config)?.serve().await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod blobs;
mod config;
mod error;
mod handler;
mod routes;
mod server;
mod store;

pub use auth::{AuthConfig, Authenticator, Principal, StaticTokens, TokenValidator};
pub use blobs::{BlobWriter, ContentRoot};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{ItemService, ListPage, PendingUpload};
pub use routes::{router, Authenticated, ServerState};
pub use server::ItemServer;
pub use store::{ChangeSet, ContentUpdate, MemoryRecordStore, RecordStore, RecordUpdate, Updated};
