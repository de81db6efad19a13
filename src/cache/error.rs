//! Error types for the cache layer

use thiserror::Error;

/// Errors raised by cache stores and codecs
///
/// These never reach callers of [`Cache`](super::Cache): they are logged and
/// the operation is reported as a miss or a skipped write.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Store cannot be reached
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    /// Store rejected a command
    #[error("Cache command failed: {0}")]
    Command(String),

    /// Value could not be encoded or a stored entry could not be decoded
    #[error("Cache codec error: {0}")]
    Codec(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Codec(err.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_refusal() || err.is_timeout() {
            CacheError::Unavailable(err.to_string())
        } else {
            CacheError::Command(err.to_string())
        }
    }
}
