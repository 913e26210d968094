//! Blob repository.
//!
//! Every function takes the caller's connection so it can run inside the
//! orchestrator's transaction.

use sqlx::SqliteConnection;
use tracing::debug;

use super::{Blob, NewBlob};
use crate::{CumulusError, Result};

const BLOB_COLUMNS: &str = "id, hash, name, bucket, object_key, size, ref_count, created_at";

/// Repository for blob records.
pub struct BlobRepository;

impl BlobRepository {
    /// Find the blob for a `(hash, size)` pair.
    pub async fn find_by_hash(
        conn: &mut SqliteConnection,
        hash: &str,
        size: i64,
    ) -> Result<Option<Blob>> {
        let blob = sqlx::query_as::<_, Blob>(&format!(
            "SELECT {BLOB_COLUMNS} FROM blobs WHERE hash = ? AND size = ?"
        ))
        .bind(hash)
        .bind(size)
        .fetch_optional(conn)
        .await?;
        Ok(blob)
    }

    /// Get a blob by ID.
    pub async fn get_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<Blob>> {
        let blob = sqlx::query_as::<_, Blob>(&format!(
            "SELECT {BLOB_COLUMNS} FROM blobs WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(conn)
        .await?;
        Ok(blob)
    }

    /// Record a new blob with `ref_count = 0`.
    ///
    /// A `(hash, size)` pair that is already recorded yields `Conflict`.
    pub async fn create(conn: &mut SqliteConnection, blob: &NewBlob) -> Result<Blob> {
        let created = sqlx::query_as::<_, Blob>(&format!(
            "INSERT INTO blobs (hash, name, bucket, object_key, size, ref_count)
             VALUES (?, ?, ?, ?, ?, 0) RETURNING {BLOB_COLUMNS}"
        ))
        .bind(&blob.hash)
        .bind(&blob.name)
        .bind(&blob.bucket)
        .bind(&blob.object_key)
        .bind(blob.size)
        .fetch_one(conn)
        .await?;

        debug!(blob_id = created.id, hash = %created.hash, "blob recorded");
        Ok(created)
    }

    /// Add `delta` to the reference count and return the new count.
    pub async fn adjust_ref_count(conn: &mut SqliteConnection, id: i64, delta: i64) -> Result<i64> {
        let count: Option<i64> = sqlx::query_scalar(
            "UPDATE blobs SET ref_count = ref_count + ? WHERE id = ? RETURNING ref_count",
        )
        .bind(delta)
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(|e| CumulusError::Database(e.to_string()))?;

        count.ok_or_else(|| CumulusError::NotFound(format!("blob {id}")))
    }

    /// Remove the blob record. Returns whether a row was deleted.
    pub async fn delete(conn: &mut SqliteConnection, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM blobs WHERE id = ?")
            .bind(id)
            .execute(conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Count recorded blobs.
    pub async fn count(conn: &mut SqliteConnection) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM blobs")
            .fetch_one(conn)
            .await?;
        Ok(count)
    }
}
