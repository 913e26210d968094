//! Quota ledger: storage rows and their `current_size` counter.

use sqlx::SqliteConnection;
use tracing::{debug, warn};

use super::{NewStorage, Storage};
use crate::{CumulusError, Result};

const STORAGE_COLUMNS: &str = "id, user_id, bucket_name, max_size, current_size, created_at";

/// Repository for storage containers and capacity accounting.
pub struct QuotaLedger;

impl QuotaLedger {
    /// Register a storage. A user owns at most one.
    pub async fn create(conn: &mut SqliteConnection, storage: &NewStorage) -> Result<Storage> {
        let created = sqlx::query_as::<_, Storage>(&format!(
            "INSERT INTO storages (user_id, bucket_name, max_size, current_size)
             VALUES (?, ?, ?, 0) RETURNING {STORAGE_COLUMNS}"
        ))
        .bind(storage.user_id)
        .bind(&storage.bucket_name)
        .bind(storage.max_size)
        .fetch_one(conn)
        .await?;
        Ok(created)
    }

    /// Get a storage by ID.
    pub async fn get_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<Storage>> {
        let storage = sqlx::query_as::<_, Storage>(&format!(
            "SELECT {STORAGE_COLUMNS} FROM storages WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(conn)
        .await?;
        Ok(storage)
    }

    /// Get the storage owned by a user.
    pub async fn get_by_user(conn: &mut SqliteConnection, user_id: i64) -> Result<Option<Storage>> {
        let storage = sqlx::query_as::<_, Storage>(&format!(
            "SELECT {STORAGE_COLUMNS} FROM storages WHERE user_id = ?"
        ))
        .bind(user_id)
        .fetch_optional(conn)
        .await?;
        Ok(storage)
    }

    /// Fail with `QuotaExceeded` unless `delta` more bytes fit.
    pub async fn ensure_capacity(
        conn: &mut SqliteConnection,
        storage_id: i64,
        delta: i64,
    ) -> Result<Storage> {
        let storage = Self::get_by_id(conn, storage_id)
            .await?
            .ok_or_else(|| CumulusError::NotFound(format!("storage {storage_id}")))?;

        if !storage.can_hold(delta) {
            return Err(CumulusError::QuotaExceeded {
                requested: delta,
                available: storage.available(),
            });
        }
        Ok(storage)
    }

    /// Charge `delta` bytes. The cap is enforced by `ensure_capacity`.
    pub async fn increase_used(
        conn: &mut SqliteConnection,
        storage_id: i64,
        delta: i64,
    ) -> Result<()> {
        if delta == 0 {
            return Ok(());
        }
        Self::apply(conn, storage_id, delta).await
    }

    /// Release up to `delta` bytes and return how many were released.
    ///
    /// Usage never goes below zero. A release larger than the recorded usage
    /// means the ledger drifted from the tree; it is logged and clamped so
    /// the file can still be removed.
    pub async fn decrease_used(
        conn: &mut SqliteConnection,
        storage_id: i64,
        delta: i64,
    ) -> Result<i64> {
        if delta == 0 {
            return Ok(0);
        }
        let current: i64 = sqlx::query_scalar("SELECT current_size FROM storages WHERE id = ?")
            .bind(storage_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| CumulusError::NotFound(format!("storage {storage_id}")))?;

        let released = delta.min(current);
        if released < delta {
            warn!(
                storage_id,
                requested = delta,
                current_size = current,
                "quota release exceeds recorded usage"
            );
        }
        Self::apply(conn, storage_id, -released).await?;
        Ok(released)
    }

    async fn apply(conn: &mut SqliteConnection, storage_id: i64, delta: i64) -> Result<()> {
        let result = sqlx::query("UPDATE storages SET current_size = current_size + ? WHERE id = ?")
            .bind(delta)
            .bind(storage_id)
            .execute(conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CumulusError::NotFound(format!("storage {storage_id}")));
        }
        debug!(storage_id, delta, "quota adjusted");
        Ok(())
    }

    /// Remove the storage row; its file rows cascade.
    pub async fn delete(conn: &mut SqliteConnection, storage_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM storages WHERE id = ?")
            .bind(storage_id)
            .execute(conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
