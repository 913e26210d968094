//! Physical object backend.
//!
//! Blobs' bytes live here under `(bucket, key)`. The backend is not
//! transactional with the database; callers order writes so that a failure
//! at worst leaves unreferenced bytes behind.

mod local;
mod memory;

pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use uuid::Uuid;

use crate::tree::extension;
use crate::{CumulusError, Result};

/// Byte stream handed to and returned from a backend.
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// Key/value store for opaque objects.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Store exactly `size` bytes read from `source`.
    ///
    /// A source that ends early or runs long fails and leaves nothing behind.
    async fn put(&self, bucket: &str, key: &str, source: ObjectReader, size: i64) -> Result<()>;

    /// Open a stored object. Missing objects yield `NotFound`.
    async fn get(&self, bucket: &str, key: &str) -> Result<ObjectReader>;

    /// Remove an object. Returns `false` if it did not exist.
    async fn remove(&self, bucket: &str, key: &str) -> Result<bool>;

    /// Whether an object exists.
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool>;

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;
}

/// New random object key, keeping the original extension when there is one.
pub fn generate_object_key(original_name: &str) -> String {
    let uuid = Uuid::new_v4();
    match extension(original_name) {
        Some(ext) if ext.chars().all(|c| c.is_ascii_alphanumeric()) => format!("{uuid}.{ext}"),
        _ => format!("{uuid}.bin"),
    }
}

/// Reject bucket names and keys that could escape the backend's namespace.
pub(crate) fn validate_segment(kind: &str, value: &str) -> Result<()> {
    if value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\', '\0'])
    {
        return Err(CumulusError::ObjectStore(format!("invalid {kind}: {value:?}")));
    }
    Ok(())
}
