//! Cumulus - personal cloud storage engine
//!
//! Per-user file trees over content-addressed blobs. Identical content is
//! stored once and shared by reference count, every storage has a byte
//! quota, and uploads stream through a pool of chunk writers.

pub mod blob;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod logging;
pub mod object;
pub mod quota;
pub mod tree;
pub mod upload;

pub use blob::{content_hash, Blob, BlobRepository, NewBlob};
pub use config::Config;
pub use db::{Database, WriteTransaction};
pub use engine::{DeleteSummary, Download, Page, StorageEngine, UploadRequest, MAX_LIST_LIMIT};
pub use error::{CumulusError, Result};
pub use object::{LocalObjectStore, MemoryObjectStore, ObjectStore};
pub use quota::{NewStorage, QuotaLedger, Storage};
pub use tree::{FileNode, FileType, NewFileNode, TreeRepository, ROOT_FOLDER_ID};
pub use upload::UploadPipeline;
