//! Test helpers for engine integration tests.

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;

use tempfile::TempDir;

use cumulus::{
    content_hash, Config, Database, FileNode, MemoryObjectStore, StorageEngine, UploadRequest,
};

/// Engine over an in-memory database and object store.
pub struct TestEngine {
    pub engine: StorageEngine,
    pub objects: Arc<MemoryObjectStore>,
    pub temp_dir: TempDir,
}

impl TestEngine {
    /// Create an engine with a small chunk size so uploads span several chunks.
    pub async fn new() -> Self {
        Self::build(false).await
    }

    /// Same as `new`, but the database is a WAL file with a pool of
    /// several connections.
    pub async fn on_file() -> Self {
        Self::build(true).await
    }

    async fn build(file_backed: bool) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.upload.staging_dir = temp_dir.path().join("staging").display().to_string();
        config.upload.chunk_size = 16;
        config.upload.workers = 3;
        config.tree.page_size = 2;

        let db = if file_backed {
            Database::open(&temp_dir.path().join("cumulus.db"))
                .await
                .unwrap()
        } else {
            Database::open_in_memory().await.unwrap()
        };
        let objects = Arc::new(MemoryObjectStore::new());
        let engine = StorageEngine::new(db, objects.clone(), &config);

        Self {
            engine,
            objects,
            temp_dir,
        }
    }

    pub fn db(&self) -> &Database {
        self.engine.database()
    }

    /// Register a storage and return its ID.
    pub async fn storage(&self, user_id: i64, max_size: i64) -> i64 {
        self.engine
            .create_storage(user_id, Some(max_size))
            .await
            .unwrap()
            .id
    }

    /// Upload `data` under `name`, declaring its real hash.
    pub async fn upload(
        &self,
        storage_id: i64,
        father_id: i64,
        name: &str,
        data: &[u8],
    ) -> cumulus::Result<FileNode> {
        let request = UploadRequest::new(
            storage_id,
            father_id,
            name,
            data.len() as i64,
            content_hash(data),
        );
        self.engine
            .upload_file(request, Cursor::new(data.to_vec()))
            .await
    }

    /// Current usage of a storage.
    pub async fn used(&self, storage_id: i64) -> i64 {
        self.engine
            .get_storage(storage_id)
            .await
            .unwrap()
            .current_size
    }

    /// Reference count of the blob behind a file.
    pub async fn ref_count(&self, node: &FileNode) -> Option<i64> {
        let mut conn = self.db().acquire().await.unwrap();
        cumulus::BlobRepository::get_by_id(&mut conn, node.blob_id.unwrap())
            .await
            .unwrap()
            .map(|blob| blob.ref_count)
    }

    /// Sum of blob sizes over the storage's live files.
    pub async fn live_bytes(&self, storage_id: i64) -> i64 {
        let mut conn = self.db().acquire().await.unwrap();
        cumulus::TreeRepository::live_bytes(&mut conn, storage_id)
            .await
            .unwrap()
    }

    /// Names of the live children directly under `father_id`.
    pub async fn child_names(&self, storage_id: i64, father_id: i64) -> Vec<String> {
        let page = self
            .engine
            .list_children(storage_id, father_id, 0, 1000)
            .await
            .unwrap();
        page.items.into_iter().map(|node| node.name).collect()
    }
}

/// `len` bytes derived from `seed`.
pub fn payload(seed: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}
