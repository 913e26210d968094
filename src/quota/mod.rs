//! Per-user storage containers and their capacity counters.

mod ledger;

pub use ledger::QuotaLedger;

/// A user's quota-bounded storage container.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Storage {
    /// Unique storage ID.
    pub id: i64,
    /// Owning user.
    pub user_id: i64,
    /// Physical namespace in the object backend.
    pub bucket_name: String,
    /// Capacity in bytes.
    pub max_size: i64,
    /// Bytes charged to live file nodes.
    pub current_size: i64,
    /// When the storage was registered.
    pub created_at: String,
}

impl Storage {
    /// Bytes still free.
    pub fn available(&self) -> i64 {
        (self.max_size - self.current_size).max(0)
    }

    /// Whether `delta` more bytes would fit.
    pub fn can_hold(&self, delta: i64) -> bool {
        delta <= self.available()
    }
}

/// Data for registering a new storage.
#[derive(Debug, Clone)]
pub struct NewStorage {
    pub user_id: i64,
    pub bucket_name: String,
    pub max_size: i64,
}

impl NewStorage {
    /// Create a new NewStorage.
    pub fn new(user_id: i64, bucket_name: impl Into<String>, max_size: i64) -> Self {
        Self {
            user_id,
            bucket_name: bucket_name.into(),
            max_size,
        }
    }
}
