//! Content-addressed blob records.
//!
//! A blob is one physical object shared by every file node whose content has
//! the same `(hash, size)`. Its `ref_count` tracks the live nodes pointing at
//! it; the engine removes the record and the object once it drops to zero.

mod repository;

pub use repository::BlobRepository;

use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::Result;

/// A stored piece of content.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Blob {
    /// Unique blob ID.
    pub id: i64,
    /// Lowercase hex SHA-256 of the content.
    pub hash: String,
    /// Filename the content was first uploaded under.
    pub name: String,
    /// Bucket the physical object was written to.
    pub bucket: String,
    /// Key of the physical object within `bucket`.
    pub object_key: String,
    /// Size in bytes.
    pub size: i64,
    /// Number of live file nodes referencing this blob.
    pub ref_count: i64,
    /// When the blob was recorded.
    pub created_at: String,
}

/// Data for recording a new blob.
#[derive(Debug, Clone)]
pub struct NewBlob {
    pub hash: String,
    pub name: String,
    pub bucket: String,
    pub object_key: String,
    pub size: i64,
}

impl NewBlob {
    /// Create a new NewBlob.
    pub fn new(
        hash: impl Into<String>,
        name: impl Into<String>,
        bucket: impl Into<String>,
        object_key: impl Into<String>,
        size: i64,
    ) -> Self {
        Self {
            hash: hash.into(),
            name: name.into(),
            bucket: bucket.into(),
            object_key: object_key.into(),
            size,
        }
    }
}

/// SHA-256 of an in-memory buffer as lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// SHA-256 of everything readable from `reader`, as lowercase hex.
pub async fn hash_reader<R>(mut reader: R) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_known_value() {
        assert_eq!(
            content_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(content_hash(b"").len(), 64);
    }

    #[tokio::test]
    async fn test_hash_reader_matches_content_hash() {
        let data = vec![7u8; 200 * 1024];
        let hashed = hash_reader(std::io::Cursor::new(data.clone())).await.unwrap();
        assert_eq!(hashed, content_hash(&data));
    }
}
