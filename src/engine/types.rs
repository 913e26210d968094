//! Request and response types of the storage engine.

use tokio::task::JoinHandle;

use crate::object::ObjectReader;
use crate::tree::FileNode;

/// Metadata accompanying an upload stream.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Target storage.
    pub storage_id: i64,
    /// Destination folder, or `ROOT_FOLDER_ID`.
    pub father_id: i64,
    /// Requested filename; suffixed on collision.
    pub filename: String,
    /// Declared length in bytes.
    pub size: i64,
    /// Declared SHA-256, lowercase hex.
    pub hash: String,
}

impl UploadRequest {
    /// Create a new upload request.
    pub fn new(
        storage_id: i64,
        father_id: i64,
        filename: impl Into<String>,
        size: i64,
        hash: impl Into<String>,
    ) -> Self {
        Self {
            storage_id,
            father_id,
            filename: filename.into(),
            size,
            hash: hash.into(),
        }
    }
}

/// One page of a cursor listing.
#[derive(Debug, Clone)]
pub struct Page {
    pub items: Vec<FileNode>,
    /// Whether more items follow the last one.
    pub has_more: bool,
}

impl Page {
    /// Cursor to pass for the next page.
    pub fn next_cursor(&self) -> Option<i64> {
        if self.has_more {
            self.items.last().map(|node| node.id)
        } else {
            None
        }
    }
}

/// Outcome of a recursive delete.
#[derive(Debug, Default)]
pub struct DeleteSummary {
    /// Nodes marked deleted, folders included.
    pub nodes_removed: usize,
    /// Quota released.
    pub bytes_released: i64,
    /// Blobs whose last reference went away.
    pub blobs_released: usize,
    /// Background removal of the released objects, if any were released.
    pub gc: Option<JoinHandle<()>>,
}

impl DeleteSummary {
    /// Wait for background object removal to finish.
    pub async fn wait_for_gc(&mut self) {
        if let Some(handle) = self.gc.take() {
            let _ = handle.await;
        }
    }
}

/// A file's node and an open stream of its bytes.
pub struct Download {
    pub node: FileNode,
    pub reader: ObjectReader,
}

impl std::fmt::Debug for Download {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download").field("node", &self.node).finish()
    }
}
