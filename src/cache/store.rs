use std::time::Duration;

use async_trait::async_trait;

use crate::cache::error::CacheError;

/// Byte-level key/value store with per-entry expiry
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Value for `key`, `None` when absent or expired
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store `value` under `key`, replacing any previous entry, expiring after `ttl`
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Remove `key`. Removing an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}
