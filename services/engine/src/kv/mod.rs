//! Client interface to the consistent key-value store.
//!
//! The registry is written against this trait rather than a concrete
//! client, so tests can substitute an in-memory or recording backend for
//! the real store.

mod etcd;
mod mem;

pub use etcd::EtcdClient;
pub use mem::MemKv;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from key-value store operations.
#[derive(Debug, Error)]
pub enum KvError {
    /// The key does not exist. Recoverable: readers treat it as "absent".
    #[error("key not found: {0}")]
    NotFound(String),

    /// A create-only write hit an existing key.
    #[error("key already exists: {0}")]
    AlreadyExists(String),

    /// A compare-and-swap or compare-and-delete precondition failed.
    #[error("compare failed for {key}: {message}")]
    CompareFailed { key: String, message: String },

    /// Transport failure or deadline exceeded talking to the store.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with something we could not interpret.
    #[error("unexpected store response: {0}")]
    Response(String),
}

impl KvError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, KvError::NotFound(_))
    }
}

/// A leaf entry in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    pub key: String,
    pub value: String,
}

/// Options for write operations.
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Expire the key after this duration.
    pub ttl: Option<Duration>,

    /// `Some(false)` makes the write create-only, `Some(true)` update-only.
    pub prev_exist: Option<bool>,

    /// Compare-and-swap: the write only succeeds if the current value
    /// matches.
    pub prev_value: Option<String>,
}

impl SetOptions {
    pub fn create_only() -> Self {
        Self {
            prev_exist: Some(false),
            ..Default::default()
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Options for delete operations.
#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    /// Delete an entire subtree.
    pub recursive: bool,

    /// Compare-and-delete: only succeeds if the current value matches.
    /// Ignored for recursive deletes.
    pub prev_value: Option<String>,
}

/// Minimal hierarchical key-value store client.
///
/// Keys are `/`-separated paths. Every operation observes the client's
/// configured deadline and surfaces timeouts as [`KvError::Unavailable`].
#[async_trait]
pub trait KvClient: Send + Sync {
    /// Fetch a single leaf.
    async fn get(&self, key: &str) -> Result<KvPair, KvError>;

    /// Recursively fetch every leaf under `key`, sorted by full key.
    async fn list(&self, key: &str) -> Result<Vec<KvPair>, KvError>;

    /// Write a leaf.
    async fn set(&self, key: &str, value: &str, opts: SetOptions) -> Result<(), KvError>;

    /// Delete a leaf or (recursively) a subtree.
    async fn delete(&self, key: &str, opts: DeleteOptions) -> Result<(), KvError>;
}
