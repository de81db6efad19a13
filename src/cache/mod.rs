//! Cache-aside layer
//!
//! [`Cache<T>`] wraps a [`CacheStore`] with typed values, namespaced keys and
//! a default TTL. Absence of an entry is always safe: callers fall back to
//! the primary store and may repopulate.
//!
//! Stores:
//! - [`MemoryStore`]: in-process map with expiry checked on read
//! - [`RedisStore`]: Redis via `SET PX` / `GET` / `DEL` (feature `redis`)

pub mod codec;
pub mod error;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;
pub mod store;
pub mod typed;

pub use codec::{CacheCodec, JsonCodec};
pub use error::CacheError;
pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;
pub use store::CacheStore;
pub use typed::{Cache, DEFAULT_TTL};
