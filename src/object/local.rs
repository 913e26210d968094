//! Filesystem object backend.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use super::{validate_segment, ObjectReader, ObjectStore};
use crate::{CumulusError, Result};

/// Objects stored as plain files, sharded by key prefix:
///
/// ```text
/// {root}/
/// └── {bucket}/
///     ├── ab/
///     │   └── ab12cd34-5678-90ab-cdef-123456789012.txt
///     └── ...
/// ```
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    /// Create a store rooted at `root`, creating the directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Full path of an object: `{root}/{bucket}/{shard}/{key}`.
    pub fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        validate_segment("bucket", bucket)?;
        validate_segment("key", key)?;
        Ok(self.root.join(bucket).join(Self::shard(key)).join(key))
    }

    fn shard(key: &str) -> &str {
        match key.char_indices().nth(2) {
            Some((end, _)) => &key[..end],
            None => key,
        }
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, bucket: &str, key: &str, source: ObjectReader, size: i64) -> Result<()> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Written beside the target and renamed so readers never see a partial object
        let partial = partial_path(&path);
        let expected = u64::try_from(size)
            .map_err(|_| CumulusError::ObjectStore(format!("negative size {size}")))?;

        let written = async {
            let mut file = fs::File::create(&partial).await?;
            // One extra byte lets an overlong source be detected
            let mut limited = source.take(expected + 1);
            let n = tokio::io::copy(&mut limited, &mut file).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok::<u64, io::Error>(n)
        }
        .await;

        match written {
            Ok(n) if n == expected => {
                fs::rename(&partial, &path).await?;
                debug!(bucket, key, size, "object stored");
                Ok(())
            }
            Ok(n) => {
                let _ = fs::remove_file(&partial).await;
                Err(CumulusError::ObjectStore(format!(
                    "size mismatch for {key}: expected {expected} bytes, got {n}"
                )))
            }
            Err(e) => {
                let _ = fs::remove_file(&partial).await;
                Err(e.into())
            }
        }
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<ObjectReader> {
        let path = self.object_path(bucket, key)?;
        match fs::File::open(&path).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(CumulusError::NotFound(format!("object {bucket}/{key}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, bucket: &str, key: &str) -> Result<bool> {
        let path = self.object_path(bucket, key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                // Drop the shard directory once empty; a concurrent put may refill it
                if let Some(parent) = path.parent() {
                    let _ = fs::remove_dir(parent).await;
                }
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        let path = self.object_path(bucket, key)?;
        Ok(fs::try_exists(&path).await?)
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}
