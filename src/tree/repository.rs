//! Tree repository.
//!
//! Every query filters out soft-deleted rows. Functions take the caller's
//! connection so recursive operations share one transaction.

use sqlx::SqliteConnection;
use tracing::debug;

use super::naming::add_index_to_filename;
use super::{FileNode, FileType, MovePatch, NewFileNode, RenamePatch, ROOT_FOLDER_ID};
use crate::{CumulusError, Result};

const NODE_SELECT: &str = "SELECT f.id, f.storage_id, f.father_id, f.name, f.file_type, f.blob_id,
            COALESCE(b.size, 0) AS size, f.created_at, f.updated_at
     FROM files f LEFT JOIN blobs b ON b.id = f.blob_id";

/// Upper bound on `name(n)` candidates before giving up.
const MAX_SUFFIX_PROBES: u32 = 10_000;

/// Upper bound on ancestor hops; deeper chains are treated as corrupt.
const MAX_DEPTH: usize = 4096;

/// Repository for file tree nodes.
pub struct TreeRepository;

impl TreeRepository {
    /// Insert a node. A live sibling with the same name yields `Conflict`.
    pub async fn create(conn: &mut SqliteConnection, node: &NewFileNode) -> Result<FileNode> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO files (storage_id, father_id, name, file_type, blob_id)
             VALUES (?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(node.storage_id)
        .bind(node.father_id)
        .bind(&node.name)
        .bind(node.file_type.as_i64())
        .bind(node.blob_id)
        .fetch_one(&mut *conn)
        .await?;

        debug!(id, storage_id = node.storage_id, name = %node.name, "node created");
        Self::get_by_id(conn, id)
            .await?
            .ok_or_else(|| CumulusError::NotFound(format!("file {id}")))
    }

    /// Get a live node by ID.
    pub async fn get_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<FileNode>> {
        let row: Option<FileRow> = sqlx::query_as(&format!(
            "{NODE_SELECT} WHERE f.id = ? AND f.deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(conn)
        .await?;
        row.map(FileRow::into_node).transpose()
    }

    /// Find a live child of `father_id` by exact name.
    pub async fn find_by_name(
        conn: &mut SqliteConnection,
        storage_id: i64,
        father_id: i64,
        name: &str,
    ) -> Result<Option<FileNode>> {
        let row: Option<FileRow> = sqlx::query_as(&format!(
            "{NODE_SELECT}
             WHERE f.storage_id = ? AND f.father_id = ? AND f.name = ? AND f.deleted_at IS NULL"
        ))
        .bind(storage_id)
        .bind(father_id)
        .bind(name)
        .fetch_optional(conn)
        .await?;
        row.map(FileRow::into_node).transpose()
    }

    /// Whether a live sibling already uses `name`.
    pub async fn name_exists(
        conn: &mut SqliteConnection,
        storage_id: i64,
        father_id: i64,
        name: &str,
    ) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM files
             WHERE storage_id = ? AND father_id = ? AND name = ? AND deleted_at IS NULL)",
        )
        .bind(storage_id)
        .bind(father_id)
        .bind(name)
        .fetch_one(conn)
        .await?;
        Ok(exists)
    }

    /// First free name among `name`, `name(1)`, `name(2)`, ...
    pub async fn unique_name(
        conn: &mut SqliteConnection,
        storage_id: i64,
        father_id: i64,
        name: &str,
    ) -> Result<String> {
        if !Self::name_exists(conn, storage_id, father_id, name).await? {
            return Ok(name.to_string());
        }
        for index in 1..=MAX_SUFFIX_PROBES {
            let candidate = add_index_to_filename(name, index);
            if !Self::name_exists(conn, storage_id, father_id, &candidate).await? {
                return Ok(candidate);
            }
        }
        Err(CumulusError::Conflict(format!(
            "no free name for {name} after {MAX_SUFFIX_PROBES} attempts"
        )))
    }

    /// One page of live children with `id > cursor`, in creation order.
    pub async fn list_children(
        conn: &mut SqliteConnection,
        storage_id: i64,
        father_id: i64,
        cursor: i64,
        limit: i64,
    ) -> Result<Vec<FileNode>> {
        let rows: Vec<FileRow> = sqlx::query_as(&format!(
            "{NODE_SELECT}
             WHERE f.storage_id = ? AND f.father_id = ? AND f.id > ? AND f.deleted_at IS NULL
             ORDER BY f.id LIMIT ?"
        ))
        .bind(storage_id)
        .bind(father_id)
        .bind(cursor)
        .bind(limit)
        .fetch_all(conn)
        .await?;
        rows.into_iter().map(FileRow::into_node).collect()
    }

    /// One page of live nodes of a given type across the whole storage.
    pub async fn list_by_type(
        conn: &mut SqliteConnection,
        storage_id: i64,
        file_type: FileType,
        cursor: i64,
        limit: i64,
    ) -> Result<Vec<FileNode>> {
        let rows: Vec<FileRow> = sqlx::query_as(&format!(
            "{NODE_SELECT}
             WHERE f.storage_id = ? AND f.file_type = ? AND f.id > ? AND f.deleted_at IS NULL
             ORDER BY f.id LIMIT ?"
        ))
        .bind(storage_id)
        .bind(file_type.as_i64())
        .bind(cursor)
        .bind(limit)
        .fetch_all(conn)
        .await?;
        rows.into_iter().map(FileRow::into_node).collect()
    }

    /// Change the name of a live node. Returns whether a row changed.
    pub async fn rename(
        conn: &mut SqliteConnection,
        id: i64,
        patch: &RenamePatch,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE files SET name = ?, updated_at = datetime('now')
             WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(&patch.name)
        .bind(id)
        .execute(conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Reparent a live node. Returns whether a row changed.
    pub async fn move_to(conn: &mut SqliteConnection, id: i64, patch: &MovePatch) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE files SET father_id = ?, updated_at = datetime('now')
             WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(patch.father_id)
        .bind(id)
        .execute(conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a live node deleted. Returns whether a row changed.
    pub async fn soft_delete(conn: &mut SqliteConnection, id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE files SET deleted_at = datetime('now') WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Live node counts per type. Types without nodes are absent.
    pub async fn count_by_type(
        conn: &mut SqliteConnection,
        storage_id: i64,
    ) -> Result<Vec<(FileType, i64)>> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT file_type, COUNT(*) FROM files
             WHERE storage_id = ? AND deleted_at IS NULL
             GROUP BY file_type ORDER BY file_type",
        )
        .bind(storage_id)
        .fetch_all(conn)
        .await?;

        rows.into_iter()
            .map(|(t, count)| Ok((decode_type(t)?, count)))
            .collect()
    }

    /// Sum of blob sizes over live file nodes, counted per reference.
    pub async fn live_bytes(conn: &mut SqliteConnection, storage_id: i64) -> Result<i64> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(b.size), 0) FROM files f JOIN blobs b ON b.id = f.blob_id
             WHERE f.storage_id = ? AND f.deleted_at IS NULL",
        )
        .bind(storage_id)
        .fetch_one(conn)
        .await?;
        Ok(total)
    }

    /// IDs of live top-level nodes, in creation order.
    pub async fn top_level_ids(conn: &mut SqliteConnection, storage_id: i64) -> Result<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM files WHERE storage_id = ? AND father_id = ? AND deleted_at IS NULL
             ORDER BY id",
        )
        .bind(storage_id)
        .bind(ROOT_FOLDER_ID)
        .fetch_all(conn)
        .await?;
        Ok(ids)
    }

    /// Chain of folders from the top level down to `id`'s parent.
    pub async fn ancestors(conn: &mut SqliteConnection, id: i64) -> Result<Vec<FileNode>> {
        let node = Self::get_by_id(conn, id)
            .await?
            .ok_or_else(|| CumulusError::NotFound(format!("file {id}")))?;

        let mut chain = Vec::new();
        let mut father_id = node.father_id;
        while father_id != ROOT_FOLDER_ID {
            if chain.len() >= MAX_DEPTH {
                return Err(CumulusError::Database(format!(
                    "ancestor chain of file {id} exceeds {MAX_DEPTH} levels"
                )));
            }
            let father = Self::get_by_id(conn, father_id)
                .await?
                .ok_or_else(|| CumulusError::NotFound(format!("folder {father_id}")))?;
            father_id = father.father_id;
            chain.push(father);
        }
        chain.reverse();
        Ok(chain)
    }

    /// Whether `candidate` is `ancestor` itself or lies below it.
    pub async fn is_within(
        conn: &mut SqliteConnection,
        candidate: i64,
        ancestor: i64,
    ) -> Result<bool> {
        let mut current = candidate;
        for _ in 0..MAX_DEPTH {
            if current == ancestor {
                return Ok(true);
            }
            if current == ROOT_FOLDER_ID {
                return Ok(false);
            }
            let father: Option<i64> =
                sqlx::query_scalar("SELECT father_id FROM files WHERE id = ? AND deleted_at IS NULL")
                    .bind(current)
                    .fetch_optional(&mut *conn)
                    .await?;
            match father {
                Some(f) => current = f,
                None => return Ok(false),
            }
        }
        Err(CumulusError::Database(format!(
            "ancestor chain of file {candidate} exceeds {MAX_DEPTH} levels"
        )))
    }
}

fn decode_type(value: i64) -> Result<FileType> {
    FileType::from_i64(value)
        .ok_or_else(|| CumulusError::Database(format!("unknown file type {value}")))
}

/// Internal struct for mapping database rows to FileNode.
#[derive(sqlx::FromRow)]
struct FileRow {
    id: i64,
    storage_id: i64,
    father_id: i64,
    name: String,
    file_type: i64,
    blob_id: Option<i64>,
    size: i64,
    created_at: String,
    updated_at: String,
}

impl FileRow {
    fn into_node(self) -> Result<FileNode> {
        Ok(FileNode {
            id: self.id,
            storage_id: self.storage_id,
            father_id: self.father_id,
            name: self.name,
            file_type: decode_type(self.file_type)?,
            blob_id: self.blob_id,
            size: self.size,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
