//! Storage engine.
//!
//! `StorageEngine` is the public surface: uploads, tree operations, listings
//! and statistics over the blob, quota and tree repositories.

mod service;
mod subtree;
mod types;

pub use service::{StorageEngine, MAX_LIST_LIMIT};
pub use types::{DeleteSummary, Download, Page, UploadRequest};
