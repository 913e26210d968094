//! Storage engine service.
//!
//! This module ties the repositories, the object backend and the upload
//! pipeline together:
//! - Uploads with deduplication and quota enforcement
//! - Rename, move, recursive copy and recursive delete
//! - Paged listings and per-type statistics
//!
//! Every mutation runs in one database transaction. Physical objects are
//! written before the transaction opens and removed only after it commits.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sqlx::SqliteConnection;
use tokio::fs;
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::subtree::{self, DeleteTally, ReleasedObject};
use super::types::{DeleteSummary, Download, Page, UploadRequest};
use crate::blob::{hash_reader, Blob, BlobRepository, NewBlob};
use crate::config::{Config, QuotaConfig, TreeConfig};
use crate::db::Database;
use crate::object::{generate_object_key, ObjectStore};
use crate::quota::{NewStorage, QuotaLedger, Storage};
use crate::tree::{
    validate_name, FileNode, FileType, MovePatch, NewFileNode, RenamePatch, TreeRepository,
    ROOT_FOLDER_ID,
};
use crate::upload::UploadPipeline;
use crate::{CumulusError, Result};

/// Largest page a listing returns; bigger limits are capped.
pub const MAX_LIST_LIMIT: i64 = 1000;

/// File and blob storage engine.
pub struct StorageEngine {
    db: Database,
    objects: Arc<dyn ObjectStore>,
    pipeline: UploadPipeline,
    staging_root: PathBuf,
    quota: QuotaConfig,
    tree: TreeConfig,
}

impl StorageEngine {
    /// Create a new StorageEngine.
    pub fn new(db: Database, objects: Arc<dyn ObjectStore>, config: &Config) -> Self {
        Self {
            db,
            objects,
            pipeline: UploadPipeline::new(config.upload.clone()),
            staging_root: PathBuf::from(&config.upload.staging_dir),
            quota: config.quota.clone(),
            tree: config.tree.clone(),
        }
    }

    /// Replace the upload pipeline.
    pub fn with_pipeline(mut self, pipeline: UploadPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// The underlying database.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// The object backend.
    pub fn objects(&self) -> &Arc<dyn ObjectStore> {
        &self.objects
    }

    // ------------------------------------------------------------------
    // Storages
    // ------------------------------------------------------------------

    /// Register a storage for `user_id`.
    ///
    /// `max_size` defaults to the configured quota. A user owns at most one
    /// storage; a second registration yields `Conflict`.
    pub async fn create_storage(&self, user_id: i64, max_size: Option<i64>) -> Result<Storage> {
        let max_size = max_size.unwrap_or(self.quota.default_max_size);
        if max_size < 0 {
            return Err(CumulusError::Validation(format!(
                "max size must not be negative: {max_size}"
            )));
        }

        let bucket = format!("bucket-{}", Uuid::new_v4().simple());
        let mut tx = self.db.begin().await?;
        let storage =
            QuotaLedger::create(&mut tx, &NewStorage::new(user_id, bucket, max_size)).await?;
        tx.commit().await?;

        info!(storage_id = storage.id, user_id, max_size, "storage created");
        Ok(storage)
    }

    /// Get a storage by ID.
    pub async fn get_storage(&self, storage_id: i64) -> Result<Storage> {
        let mut conn = self.db.acquire().await?;
        QuotaLedger::get_by_id(&mut conn, storage_id)
            .await?
            .ok_or_else(|| CumulusError::NotFound(format!("storage {storage_id}")))
    }

    /// Get the storage owned by `user_id`.
    pub async fn get_storage_by_user(&self, user_id: i64) -> Result<Storage> {
        let mut conn = self.db.acquire().await?;
        QuotaLedger::get_by_user(&mut conn, user_id)
            .await?
            .ok_or_else(|| CumulusError::NotFound(format!("storage of user {user_id}")))
    }

    /// Delete every node of a storage, release its blobs and drop the storage.
    pub async fn close_storage(&self, storage_id: i64) -> Result<DeleteSummary> {
        let mut tally = DeleteTally::default();
        let mut tx = self.db.begin().await?;

        if QuotaLedger::get_by_id(&mut tx, storage_id).await?.is_none() {
            return Err(CumulusError::NotFound(format!("storage {storage_id}")));
        }
        for id in TreeRepository::top_level_ids(&mut tx, storage_id).await? {
            if let Some(node) = TreeRepository::get_by_id(&mut tx, id).await? {
                subtree::delete(&mut tx, &node, self.tree.page_size, &mut tally).await?;
            }
        }
        QuotaLedger::delete(&mut tx, storage_id).await?;
        tx.commit().await?;

        info!(storage_id, nodes = tally.nodes, "storage closed");
        Ok(self.finish_delete(tally))
    }

    // ------------------------------------------------------------------
    // Folders
    // ------------------------------------------------------------------

    /// Create a folder, suffixing the name if a sibling already uses it.
    pub async fn create_folder(
        &self,
        storage_id: i64,
        father_id: i64,
        name: &str,
    ) -> Result<FileNode> {
        validate_name(name)?;

        let mut tx = self.db.begin().await?;
        Self::require_storage(&mut tx, storage_id).await?;
        Self::resolve_father(&mut tx, storage_id, father_id).await?;

        let name = TreeRepository::unique_name(&mut tx, storage_id, father_id, name).await?;
        let folder =
            TreeRepository::create(&mut tx, &NewFileNode::folder(storage_id, father_id, name))
                .await?;
        tx.commit().await?;

        info!(storage_id, folder_id = folder.id, name = %folder.name, "folder created");
        Ok(folder)
    }

    /// Walk `path` below `father_id`, creating missing folders.
    ///
    /// Returns the deepest folder's ID. A segment naming an existing file
    /// yields `Conflict`.
    pub async fn ensure_folder_path(
        &self,
        storage_id: i64,
        father_id: i64,
        path: &str,
    ) -> Result<i64> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        for segment in &segments {
            validate_name(segment)?;
        }

        let mut tx = self.db.begin().await?;
        Self::require_storage(&mut tx, storage_id).await?;
        Self::resolve_father(&mut tx, storage_id, father_id).await?;

        let mut current = father_id;
        for segment in segments {
            current = match TreeRepository::find_by_name(&mut tx, storage_id, current, segment)
                .await?
            {
                Some(node) if node.is_folder() => node.id,
                Some(node) => {
                    return Err(CumulusError::Conflict(format!(
                        "{} is a file, not a folder",
                        node.name
                    )))
                }
                None => {
                    TreeRepository::create(
                        &mut tx,
                        &NewFileNode::folder(storage_id, current, segment),
                    )
                    .await?
                    .id
                }
            };
        }
        tx.commit().await?;

        debug!(storage_id, path, folder_id = current, "folder path ensured");
        Ok(current)
    }

    // ------------------------------------------------------------------
    // Uploads
    // ------------------------------------------------------------------

    /// Attach a new file to content that is already stored.
    ///
    /// No bytes move. Fails with `NotFound` when no blob matches
    /// `(hash, size)`.
    pub async fn new_file(
        &self,
        storage_id: i64,
        father_id: i64,
        name: &str,
        hash: &str,
        size: i64,
    ) -> Result<FileNode> {
        validate_name(name)?;
        Self::validate_size(size)?;

        let mut tx = self.db.begin().await?;
        let blob = BlobRepository::find_by_hash(&mut tx, hash, size)
            .await?
            .ok_or_else(|| CumulusError::NotFound(format!("blob {hash}")))?;
        let node = Self::attach(&mut tx, storage_id, father_id, name, &blob).await?;
        tx.commit().await?;

        info!(storage_id, file_id = node.id, blob_id = blob.id, "file attached to existing blob");
        Ok(node)
    }

    /// Upload a file from `source`.
    ///
    /// Content already stored under the same `(hash, size)` is reused and
    /// `source` is not read. Otherwise the bytes go through the upload
    /// pipeline into staging and then to the object backend before the
    /// metadata transaction runs.
    pub async fn upload_file<R>(&self, request: UploadRequest, source: R) -> Result<FileNode>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        validate_name(&request.filename)?;
        Self::validate_size(request.size)?;

        let existing = {
            let mut conn = self.db.acquire().await?;
            let storage =
                QuotaLedger::ensure_capacity(&mut conn, request.storage_id, request.size).await?;
            Self::resolve_father(&mut conn, storage.id, request.father_id).await?;
            BlobRepository::find_by_hash(&mut conn, &request.hash, request.size).await?
        };

        let stored = match existing {
            Some(_) => {
                debug!(hash = %request.hash, "content already stored, skipping transfer");
                None
            }
            None => Some(self.store_content(&request, source).await?),
        };

        match self.record_upload(&request, stored.as_ref()).await {
            Ok((node, orphan)) => {
                if let Some(object) = orphan {
                    self.remove_object(&object).await;
                }
                info!(
                    storage_id = request.storage_id,
                    file_id = node.id,
                    size = request.size,
                    deduplicated = stored.is_none(),
                    "file uploaded"
                );
                Ok(node)
            }
            Err(e) => {
                if let Some(object) = &stored {
                    self.remove_object(object).await;
                }
                Err(e)
            }
        }
    }

    /// Stream `source` through staging into the object backend.
    async fn store_content<R>(&self, request: &UploadRequest, source: R) -> Result<ReleasedObject>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let bucket = self.get_storage(request.storage_id).await?.bucket_name;
        let staging = self
            .staging_root
            .join(request.storage_id.to_string())
            .join(Uuid::new_v4().simple().to_string());

        let result = self.stage_and_put(request, source, &staging, &bucket).await;

        if let Err(e) = fs::remove_dir_all(&staging).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = ?staging, error = %e, "failed to clean staging directory");
            }
        }

        let key = result?;
        Ok(ReleasedObject { bucket, key })
    }

    async fn stage_and_put<R>(
        &self,
        request: &UploadRequest,
        source: R,
        staging: &Path,
        bucket: &str,
    ) -> Result<String>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let staged = self
            .pipeline
            .receive(staging, &request.filename, source, request.size as u64)
            .await?;

        if self.pipeline.config().verify_hash {
            let actual = hash_reader(fs::File::open(&staged).await?).await?;
            if !actual.eq_ignore_ascii_case(&request.hash) {
                return Err(CumulusError::Validation(format!(
                    "content hash {actual} does not match declared {}",
                    request.hash
                )));
            }
        }

        let key = generate_object_key(&request.filename);
        let file = fs::File::open(&staged).await?;
        self.objects
            .put(bucket, &key, Box::new(file), request.size)
            .await?;

        debug!(bucket, key = %key, backend = self.objects.backend_name(), "object stored");
        Ok(key)
    }

    /// Record blob and node for an upload.
    ///
    /// Returns the node, plus the freshly stored object if another upload
    /// recorded the same content first and ours is no longer needed.
    async fn record_upload(
        &self,
        request: &UploadRequest,
        stored: Option<&ReleasedObject>,
    ) -> Result<(FileNode, Option<ReleasedObject>)> {
        let mut tx = self.db.begin().await?;

        let (blob, orphan) = match BlobRepository::find_by_hash(&mut tx, &request.hash, request.size)
            .await?
        {
            Some(blob) => (blob, stored.cloned()),
            None => {
                let object = stored.ok_or_else(|| {
                    CumulusError::NotFound(format!("blob {}", request.hash))
                })?;
                let blob = BlobRepository::create(
                    &mut tx,
                    &NewBlob::new(
                        &request.hash,
                        &request.filename,
                        &object.bucket,
                        &object.key,
                        request.size,
                    ),
                )
                .await?;
                (blob, None)
            }
        };

        let node = Self::attach(
            &mut tx,
            request.storage_id,
            request.father_id,
            &request.filename,
            &blob,
        )
        .await?;
        tx.commit().await?;

        Ok((node, orphan))
    }

    /// Create a file node for `blob`, taking a reference and charging quota.
    async fn attach(
        conn: &mut SqliteConnection,
        storage_id: i64,
        father_id: i64,
        name: &str,
        blob: &Blob,
    ) -> Result<FileNode> {
        QuotaLedger::ensure_capacity(conn, storage_id, blob.size).await?;
        Self::resolve_father(conn, storage_id, father_id).await?;

        let name = TreeRepository::unique_name(conn, storage_id, father_id, name).await?;
        let node =
            TreeRepository::create(conn, &NewFileNode::file(storage_id, father_id, name, blob.id))
                .await?;
        BlobRepository::adjust_ref_count(conn, blob.id, 1).await?;
        QuotaLedger::increase_used(conn, storage_id, blob.size).await?;
        Ok(node)
    }

    // ------------------------------------------------------------------
    // Tree operations
    // ------------------------------------------------------------------

    /// Rename a node. A live sibling with `new_name` yields `Conflict`.
    pub async fn rename_file(&self, file_id: i64, new_name: &str) -> Result<FileNode> {
        validate_name(new_name)?;

        let mut tx = self.db.begin().await?;
        let node = Self::require_node(&mut tx, file_id).await?;
        if node.name == new_name {
            return Ok(node);
        }
        if TreeRepository::name_exists(&mut tx, node.storage_id, node.father_id, new_name).await? {
            return Err(CumulusError::Conflict(format!(
                "{new_name} already exists in folder {}",
                node.father_id
            )));
        }

        TreeRepository::rename(
            &mut tx,
            file_id,
            &RenamePatch {
                name: new_name.to_string(),
            },
        )
        .await?;
        let renamed = Self::require_node(&mut tx, file_id).await?;
        tx.commit().await?;

        info!(file_id, from = %node.name, to = %renamed.name, "file renamed");
        Ok(renamed)
    }

    /// Move a node under `new_father_id` within its storage.
    pub async fn move_file(&self, file_id: i64, new_father_id: i64) -> Result<FileNode> {
        let mut tx = self.db.begin().await?;
        let node = Self::require_node(&mut tx, file_id).await?;
        Self::resolve_father(&mut tx, node.storage_id, new_father_id).await?;

        if TreeRepository::is_within(&mut tx, new_father_id, file_id).await? {
            return Err(CumulusError::Validation(format!(
                "cannot move {} into itself",
                node.name
            )));
        }
        if node.father_id == new_father_id {
            return Ok(node);
        }
        if TreeRepository::name_exists(&mut tx, node.storage_id, new_father_id, &node.name).await? {
            return Err(CumulusError::Conflict(format!(
                "{} already exists in folder {new_father_id}",
                node.name
            )));
        }

        TreeRepository::move_to(
            &mut tx,
            file_id,
            &MovePatch {
                father_id: new_father_id,
            },
        )
        .await?;
        let moved = Self::require_node(&mut tx, file_id).await?;
        tx.commit().await?;

        info!(file_id, from = node.father_id, to = new_father_id, "file moved");
        Ok(moved)
    }

    /// Copy a node and its subtree under `new_father_id`.
    ///
    /// Copies share blobs with their sources; each reference is charged to
    /// the storage. Returns the new top-level node.
    pub async fn copy_file(&self, file_id: i64, new_father_id: i64) -> Result<FileNode> {
        let mut tx = self.db.begin().await?;
        let node = Self::require_node(&mut tx, file_id).await?;
        Self::resolve_father(&mut tx, node.storage_id, new_father_id).await?;

        if TreeRepository::is_within(&mut tx, new_father_id, file_id).await? {
            return Err(CumulusError::Validation(format!(
                "cannot copy {} into itself",
                node.name
            )));
        }

        let size = subtree::measure(
            &mut tx,
            &node,
            self.tree.page_size,
            self.tree.max_subtree_nodes,
        )
        .await?;
        QuotaLedger::ensure_capacity(&mut tx, node.storage_id, size.bytes).await?;

        let copy = subtree::copy(&mut tx, &node, new_father_id, self.tree.page_size).await?;
        tx.commit().await?;

        info!(
            file_id,
            copy_id = copy.id,
            nodes = size.nodes,
            bytes = size.bytes,
            "file copied"
        );
        Ok(copy)
    }

    /// Delete a node and its subtree.
    ///
    /// Objects whose last reference went away are removed in the background
    /// after commit; removal failures are logged and ignored.
    pub async fn delete_file(&self, file_id: i64) -> Result<DeleteSummary> {
        let mut tally = DeleteTally::default();
        let mut tx = self.db.begin().await?;
        let node = Self::require_node(&mut tx, file_id).await?;
        subtree::delete(&mut tx, &node, self.tree.page_size, &mut tally).await?;
        tx.commit().await?;

        info!(
            file_id,
            nodes = tally.nodes,
            bytes = tally.bytes,
            blobs = tally.released.len(),
            "file deleted"
        );
        Ok(self.finish_delete(tally))
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Get a live node by ID.
    pub async fn get_file(&self, file_id: i64) -> Result<FileNode> {
        let mut conn = self.db.acquire().await?;
        Self::require_node(&mut conn, file_id).await
    }

    /// One page of the children of `father_id`, after `cursor`.
    pub async fn list_children(
        &self,
        storage_id: i64,
        father_id: i64,
        cursor: i64,
        limit: i64,
    ) -> Result<Page> {
        let limit = Self::validate_limit(limit)?;
        let mut conn = self.db.acquire().await?;
        Self::require_storage(&mut conn, storage_id).await?;
        Self::resolve_father(&mut conn, storage_id, father_id).await?;

        let items =
            TreeRepository::list_children(&mut conn, storage_id, father_id, cursor, limit + 1)
                .await?;
        Ok(Self::page(items, limit))
    }

    /// One page of the files of one type, after `cursor`.
    pub async fn list_by_type(
        &self,
        storage_id: i64,
        file_type: FileType,
        cursor: i64,
        limit: i64,
    ) -> Result<Page> {
        let limit = Self::validate_limit(limit)?;
        let mut conn = self.db.acquire().await?;
        Self::require_storage(&mut conn, storage_id).await?;

        let items =
            TreeRepository::list_by_type(&mut conn, storage_id, file_type, cursor, limit + 1)
                .await?;
        Ok(Self::page(items, limit))
    }

    /// Live node counts per type. Types with no nodes map to zero.
    pub async fn statistics_by_type(&self, storage_id: i64) -> Result<HashMap<FileType, i64>> {
        let mut conn = self.db.acquire().await?;
        Self::require_storage(&mut conn, storage_id).await?;

        let mut stats: HashMap<FileType, i64> =
            FileType::all().into_iter().map(|t| (t, 0)).collect();
        for (file_type, count) in TreeRepository::count_by_type(&mut conn, storage_id).await? {
            stats.insert(file_type, count);
        }
        Ok(stats)
    }

    /// Open a file's content.
    pub async fn download_file(&self, file_id: i64) -> Result<Download> {
        let (node, blob) = {
            let mut conn = self.db.acquire().await?;
            let node = Self::require_node(&mut conn, file_id).await?;
            let blob_id = node.blob_id.ok_or_else(|| {
                CumulusError::Validation(format!("{} is a folder", node.name))
            })?;
            let blob = BlobRepository::get_by_id(&mut conn, blob_id)
                .await?
                .ok_or_else(|| CumulusError::NotFound(format!("blob {blob_id}")))?;
            (node, blob)
        };

        let reader = self.objects.get(&blob.bucket, &blob.object_key).await?;
        Ok(Download { node, reader })
    }

    /// Folders from the top level down to the node, the node included.
    pub async fn path_of(&self, file_id: i64) -> Result<Vec<FileNode>> {
        let mut conn = self.db.acquire().await?;
        let node = Self::require_node(&mut conn, file_id).await?;
        let mut chain = TreeRepository::ancestors(&mut conn, file_id).await?;
        chain.push(node);
        Ok(chain)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn require_storage(conn: &mut SqliteConnection, storage_id: i64) -> Result<Storage> {
        QuotaLedger::get_by_id(conn, storage_id)
            .await?
            .ok_or_else(|| CumulusError::NotFound(format!("storage {storage_id}")))
    }

    async fn require_node(conn: &mut SqliteConnection, file_id: i64) -> Result<FileNode> {
        TreeRepository::get_by_id(conn, file_id)
            .await?
            .ok_or_else(|| CumulusError::NotFound(format!("file {file_id}")))
    }

    /// Check that `father_id` is the root or a live folder of `storage_id`.
    async fn resolve_father(
        conn: &mut SqliteConnection,
        storage_id: i64,
        father_id: i64,
    ) -> Result<()> {
        if father_id == ROOT_FOLDER_ID {
            return Ok(());
        }
        let father = TreeRepository::get_by_id(conn, father_id)
            .await?
            .filter(|node| node.storage_id == storage_id)
            .ok_or_else(|| CumulusError::NotFound(format!("folder {father_id}")))?;
        if !father.is_folder() {
            return Err(CumulusError::Validation(format!(
                "{} is not a folder",
                father.name
            )));
        }
        Ok(())
    }

    fn validate_size(size: i64) -> Result<()> {
        if size < 0 {
            return Err(CumulusError::Validation(format!(
                "size must not be negative: {size}"
            )));
        }
        Ok(())
    }

    /// Reject non-positive limits and cap the rest at `MAX_LIST_LIMIT`.
    fn validate_limit(limit: i64) -> Result<i64> {
        if limit <= 0 {
            return Err(CumulusError::Validation(format!(
                "limit must be positive: {limit}"
            )));
        }
        Ok(limit.min(MAX_LIST_LIMIT))
    }

    fn page(mut items: Vec<FileNode>, limit: i64) -> Page {
        let has_more = items.len() as i64 > limit;
        items.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Page { items, has_more }
    }

    fn finish_delete(&self, tally: DeleteTally) -> DeleteSummary {
        let blobs_released = tally.released.len();
        DeleteSummary {
            nodes_removed: tally.nodes,
            bytes_released: tally.bytes,
            blobs_released,
            gc: self.spawn_gc(tally.released),
        }
    }

    /// Remove released objects in the background.
    fn spawn_gc(&self, released: Vec<ReleasedObject>) -> Option<JoinHandle<()>> {
        if released.is_empty() {
            return None;
        }
        let objects = Arc::clone(&self.objects);
        Some(tokio::spawn(async move {
            for object in released {
                match objects.remove(&object.bucket, &object.key).await {
                    Ok(_) => debug!(bucket = %object.bucket, key = %object.key, "object removed"),
                    Err(e) => warn!(
                        bucket = %object.bucket,
                        key = %object.key,
                        error = %e,
                        "failed to remove released object"
                    ),
                }
            }
        }))
    }

    async fn remove_object(&self, object: &ReleasedObject) {
        if let Err(e) = self.objects.remove(&object.bucket, &object.key).await {
            warn!(
                bucket = %object.bucket,
                key = %object.key,
                error = %e,
                "failed to remove unreferenced object"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::content_hash;
    use crate::object::MemoryObjectStore;
    use tempfile::TempDir;

    async fn setup() -> (StorageEngine, Arc<MemoryObjectStore>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.upload.staging_dir = temp_dir.path().join("staging").display().to_string();
        config.upload.chunk_size = 4;

        let db = Database::open_in_memory().await.unwrap();
        let objects = Arc::new(MemoryObjectStore::new());
        let engine = StorageEngine::new(db, objects.clone(), &config);
        (engine, objects, temp_dir)
    }

    async fn upload(engine: &StorageEngine, storage_id: i64, father_id: i64, name: &str, data: &[u8]) -> FileNode {
        let request = UploadRequest::new(storage_id, father_id, name, data.len() as i64, content_hash(data));
        engine
            .upload_file(request, std::io::Cursor::new(data.to_vec()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_storage_defaults() {
        let (engine, _objects, _temp) = setup().await;

        let storage = engine.create_storage(1, None).await.unwrap();
        assert_eq!(storage.max_size, QuotaConfig::default().default_max_size);
        assert_eq!(storage.current_size, 0);
        assert!(storage.bucket_name.starts_with("bucket-"));

        let again = engine.create_storage(1, Some(10)).await;
        assert!(matches!(again, Err(CumulusError::Conflict(_))));

        let negative = engine.create_storage(2, Some(-1)).await;
        assert!(matches!(negative, Err(CumulusError::Validation(_))));

        assert_eq!(engine.get_storage_by_user(1).await.unwrap().id, storage.id);
        assert!(matches!(
            engine.get_storage(999).await,
            Err(CumulusError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_create_folder_suffixes_name() {
        let (engine, _objects, _temp) = setup().await;
        let storage = engine.create_storage(1, None).await.unwrap();

        let first = engine.create_folder(storage.id, ROOT_FOLDER_ID, "docs").await.unwrap();
        let second = engine.create_folder(storage.id, ROOT_FOLDER_ID, "docs").await.unwrap();
        assert_eq!(first.name, "docs");
        assert_eq!(second.name, "docs(1)");
        assert_eq!(first.file_type, FileType::Folder);
    }

    #[tokio::test]
    async fn test_father_must_be_folder_in_same_storage() {
        let (engine, _objects, _temp) = setup().await;
        let a = engine.create_storage(1, None).await.unwrap();
        let b = engine.create_storage(2, None).await.unwrap();

        let folder = engine.create_folder(a.id, ROOT_FOLDER_ID, "docs").await.unwrap();
        let file = upload(&engine, a.id, ROOT_FOLDER_ID, "a.txt", b"hello").await;

        let other = engine.create_folder(b.id, folder.id, "x").await;
        assert!(matches!(other, Err(CumulusError::NotFound(_))));

        let under_file = engine.create_folder(a.id, file.id, "x").await;
        assert!(matches!(under_file, Err(CumulusError::Validation(_))));
    }

    #[tokio::test]
    async fn test_ensure_folder_path() {
        let (engine, _objects, _temp) = setup().await;
        let storage = engine.create_storage(1, None).await.unwrap();

        let deepest = engine
            .ensure_folder_path(storage.id, ROOT_FOLDER_ID, "a/b//c/")
            .await
            .unwrap();
        let again = engine
            .ensure_folder_path(storage.id, ROOT_FOLDER_ID, "a/b/c")
            .await
            .unwrap();
        assert_eq!(deepest, again);

        let names: Vec<String> = engine
            .path_of(deepest)
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.name)
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);

        let b = engine.path_of(deepest).await.unwrap()[1].id;
        upload(&engine, storage.id, b, "file", b"data").await;
        let blocked = engine.ensure_folder_path(storage.id, b, "file/d").await;
        assert!(matches!(blocked, Err(CumulusError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_rename_same_name_is_noop() {
        let (engine, _objects, _temp) = setup().await;
        let storage = engine.create_storage(1, None).await.unwrap();
        let file = upload(&engine, storage.id, ROOT_FOLDER_ID, "a.txt", b"hello").await;
        upload(&engine, storage.id, ROOT_FOLDER_ID, "b.txt", b"world").await;

        let same = engine.rename_file(file.id, "a.txt").await.unwrap();
        assert_eq!(same.updated_at, file.updated_at);

        let taken = engine.rename_file(file.id, "b.txt").await;
        assert!(matches!(taken, Err(CumulusError::Conflict(_))));

        let invalid = engine.rename_file(file.id, "a/b").await;
        assert!(matches!(invalid, Err(CumulusError::Validation(_))));

        let renamed = engine.rename_file(file.id, "c.txt").await.unwrap();
        assert_eq!(renamed.name, "c.txt");
        assert_eq!(renamed.blob_id, file.blob_id);
    }

    #[tokio::test]
    async fn test_download_file() {
        let (engine, _objects, _temp) = setup().await;
        let storage = engine.create_storage(1, None).await.unwrap();
        let file = upload(&engine, storage.id, ROOT_FOLDER_ID, "a.txt", b"hello world").await;
        let folder = engine.create_folder(storage.id, ROOT_FOLDER_ID, "docs").await.unwrap();

        let mut download = engine.download_file(file.id).await.unwrap();
        let mut content = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut download.reader, &mut content)
            .await
            .unwrap();
        assert_eq!(content, b"hello world");
        assert_eq!(download.node.id, file.id);

        let result = engine.download_file(folder.id).await;
        assert!(matches!(result, Err(CumulusError::Validation(_))));
    }

    #[tokio::test]
    async fn test_list_children_rejects_bad_limit() {
        let (engine, _objects, _temp) = setup().await;
        let storage = engine.create_storage(1, None).await.unwrap();

        let result = engine.list_children(storage.id, ROOT_FOLDER_ID, 0, 0).await;
        assert!(matches!(result, Err(CumulusError::Validation(_))));

        let empty = engine
            .list_children(storage.id, ROOT_FOLDER_ID, 0, 10)
            .await
            .unwrap();
        assert!(empty.items.is_empty());
        assert!(!empty.has_more);
        assert_eq!(empty.next_cursor(), None);
    }

    #[tokio::test]
    async fn test_listing_caps_huge_limit() {
        let (engine, _objects, _temp) = setup().await;
        let storage = engine.create_storage(1, None).await.unwrap();
        upload(&engine, storage.id, ROOT_FOLDER_ID, "a.txt", b"aaaa").await;
        upload(&engine, storage.id, ROOT_FOLDER_ID, "b.txt", b"bbbbbb").await;

        let children = engine
            .list_children(storage.id, ROOT_FOLDER_ID, 0, i64::MAX)
            .await
            .unwrap();
        assert_eq!(children.items.len(), 2);
        assert!(!children.has_more);

        let documents = engine
            .list_by_type(storage.id, FileType::Document, 0, i64::MAX)
            .await
            .unwrap();
        assert_eq!(documents.items.len(), 2);
        assert!(!documents.has_more);

        assert_eq!(StorageEngine::validate_limit(i64::MAX).unwrap(), MAX_LIST_LIMIT);
        assert_eq!(StorageEngine::validate_limit(7).unwrap(), 7);
    }
}
