//! CLI command implementations.

pub mod id;
pub mod serve;
pub mod token;
