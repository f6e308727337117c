//! # filebridge testkit
//!
//! Test utilities for filebridge.
//!
//! This crate provides:
//! - An in-process server over a temporary content root
//! - Loopback clients authenticated as any owner
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use filebridge_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn lists_root() {
//!     let server = TestServer::new();
//!     let client = server.client_for("alice");
//!     let page = client.list_children(&ItemIdentifier::Root, None).await.unwrap();
//!     assert!(page.items.is_empty());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use filebridge_client::RemoteStore;
    pub use filebridge_protocol::{ItemFields, ItemIdentifier, ItemKind};
}

pub use fixtures::*;
pub use generators::*;
