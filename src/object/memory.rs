//! In-memory object backend for tests and embedded use.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::AsyncReadExt;

use super::{validate_segment, ObjectReader, ObjectStore};
use crate::{CumulusError, Result};

/// Objects held in a `DashMap` keyed by `bucket/key`.
///
/// Counts successful puts so callers can observe skipped writes, and can be
/// told to fail puts or removals to exercise error paths.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: DashMap<String, Vec<u8>>,
    puts: AtomicUsize,
    fail_puts: AtomicBool,
    fail_removes: AtomicBool,
}

impl MemoryObjectStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Number of successful puts since creation.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Make subsequent puts fail.
    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent removals fail.
    pub fn set_fail_removes(&self, fail: bool) {
        self.fail_removes.store(fail, Ordering::SeqCst);
    }

    /// Copy of a stored object's bytes.
    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .get(&Self::path(bucket, key))
            .map(|entry| entry.value().clone())
    }

    fn path(bucket: &str, key: &str) -> String {
        format!("{bucket}/{key}")
    }

    fn checked_path(bucket: &str, key: &str) -> Result<String> {
        validate_segment("bucket", bucket)?;
        validate_segment("key", key)?;
        Ok(Self::path(bucket, key))
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, bucket: &str, key: &str, source: ObjectReader, size: i64) -> Result<()> {
        let path = Self::checked_path(bucket, key)?;
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(CumulusError::ObjectStore(format!("put rejected: {path}")));
        }

        let expected = u64::try_from(size)
            .map_err(|_| CumulusError::ObjectStore(format!("negative size {size}")))?;
        let mut data = Vec::new();
        source.take(expected + 1).read_to_end(&mut data).await?;
        if data.len() as u64 != expected {
            return Err(CumulusError::ObjectStore(format!(
                "size mismatch for {key}: expected {expected} bytes, got {}",
                data.len()
            )));
        }

        self.objects.insert(path, data);
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<ObjectReader> {
        let path = Self::checked_path(bucket, key)?;
        match self.objects.get(&path) {
            Some(entry) => Ok(Box::new(Cursor::new(entry.value().clone()))),
            None => Err(CumulusError::NotFound(format!("object {path}"))),
        }
    }

    async fn remove(&self, bucket: &str, key: &str) -> Result<bool> {
        let path = Self::checked_path(bucket, key)?;
        if self.fail_removes.load(Ordering::SeqCst) {
            return Err(CumulusError::ObjectStore(format!("remove rejected: {path}")));
        }
        Ok(self.objects.remove(&path).is_some())
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        let path = Self::checked_path(bucket, key)?;
        Ok(self.objects.contains_key(&path))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(data: &[u8]) -> ObjectReader {
        Box::new(Cursor::new(data.to_vec()))
    }

    #[tokio::test]
    async fn test_put_get_remove() {
        let store = MemoryObjectStore::new();
        assert!(store.is_empty());

        store.put("b", "k", reader(b"data"), 4).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.put_count(), 1);
        assert_eq!(store.object("b", "k").unwrap(), b"data");

        let mut out = Vec::new();
        store.get("b", "k").await.unwrap().read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"data");

        assert!(store.remove("b", "k").await.unwrap());
        assert!(!store.exists("b", "k").await.unwrap());
        assert!(!store.remove("b", "k").await.unwrap());
    }

    #[tokio::test]
    async fn test_put_size_mismatch() {
        let store = MemoryObjectStore::new();

        assert!(store.put("b", "k", reader(b"abc"), 4).await.is_err());
        assert!(store.put("b", "k", reader(b"abcde"), 4).await.is_err());
        assert!(store.is_empty());
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryObjectStore::new();

        store.set_fail_puts(true);
        assert!(matches!(
            store.put("b", "k", reader(b"x"), 1).await,
            Err(CumulusError::ObjectStore(_))
        ));
        store.set_fail_puts(false);
        store.put("b", "k", reader(b"x"), 1).await.unwrap();

        store.set_fail_removes(true);
        assert!(store.remove("b", "k").await.is_err());
        assert!(store.exists("b", "k").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = MemoryObjectStore::new();
        assert!(matches!(
            store.get("b", "nope").await,
            Err(CumulusError::NotFound(_))
        ));
    }
}
