use std::fmt::Display;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::cache::codec::{CacheCodec, JsonCodec};
use crate::cache::store::CacheStore;

/// Default time-to-live for cache entries (1 hour)
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Typed cache-aside layer over a [`CacheStore`]
///
/// Keys are namespaced as `<prefix>:<id>`. The cache is never the source of
/// truth: every store or codec failure is logged at `warn` and reported as a
/// miss (`get`) or a skipped write (`false`), so callers fall back to the
/// primary store.
///
/// Writers to the primary record must call [`delete`](Cache::delete), never
/// `set`, to invalidate.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use chatq::cache::{Cache, MemoryStore};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// struct Profile { name: String }
///
/// # tokio_test::block_on(async {
/// let cache: Cache<Profile> = Cache::new(Arc::new(MemoryStore::new()), "profile");
/// let profile = Profile { name: "ada".to_string() };
///
/// assert!(cache.set("u1", &profile).await);
/// assert_eq!(cache.get("u1").await, Some(profile));
///
/// assert!(cache.delete("u1").await);
/// assert_eq!(cache.get("u1").await, None);
/// # });
/// ```
pub struct Cache<T, C = JsonCodec> {
    store: Arc<dyn CacheStore>,
    prefix: String,
    default_ttl: Duration,
    codec: C,
    _value: PhantomData<fn() -> T>,
}

impl<T> Cache<T, JsonCodec>
where
    JsonCodec: CacheCodec<T>,
{
    /// JSON-encoded cache under `prefix` with the default 1 hour TTL
    pub fn new(store: Arc<dyn CacheStore>, prefix: impl Into<String>) -> Self {
        Self::with_codec(store, prefix, JsonCodec)
    }
}

impl<T, C> Cache<T, C>
where
    C: CacheCodec<T>,
{
    pub fn with_codec(store: Arc<dyn CacheStore>, prefix: impl Into<String>, codec: C) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            default_ttl: DEFAULT_TTL,
            codec,
            _value: PhantomData,
        }
    }

    /// Set the TTL used by `set` and `set_many` (builder pattern)
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Namespaced store key for an entity id
    pub fn key(&self, id: impl Display) -> String {
        format!("{}:{}", self.prefix, id)
    }

    /// Cached value, or `None` on miss, expiry, store failure or corrupt entry
    pub async fn get(&self, id: impl Display) -> Option<T> {
        let key = self.key(id);

        let bytes = match self.store.get(&key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!(key = %key, "Cache miss");
                return None;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed");
                return None;
            }
        };

        match self.codec.decode(&bytes) {
            Ok(value) => {
                debug!(key = %key, "Cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                None
            }
        }
    }

    /// Store with the default TTL. Returns whether the value was cached.
    pub async fn set(&self, id: impl Display, value: &T) -> bool {
        self.set_with_ttl(id, value, self.default_ttl).await
    }

    /// Store with an explicit TTL. A zero TTL caches nothing.
    pub async fn set_with_ttl(&self, id: impl Display, value: &T, ttl: Duration) -> bool {
        let key = self.key(id);
        if ttl.is_zero() {
            debug!(key = %key, "Zero TTL, not caching");
            return false;
        }

        let bytes = match self.codec.encode(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache encode failed");
                return false;
            }
        };

        match self.store.set(&key, bytes, ttl).await {
            Ok(()) => true,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache write failed");
                false
            }
        }
    }

    /// Invalidate an entry. Returns whether the store confirmed the delete.
    pub async fn delete(&self, id: impl Display) -> bool {
        let key = self.key(id);
        match self.store.delete(&key).await {
            Ok(()) => {
                debug!(key = %key, "Cache invalidated");
                true
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache invalidation failed");
                false
            }
        }
    }

    /// Best-effort batch set with the default TTL
    ///
    /// Returns how many entries were cached. Entries that fail are skipped;
    /// the ones that succeeded stay cached.
    pub async fn set_many<'a, K, I>(&self, entries: I) -> usize
    where
        K: Display,
        I: IntoIterator<Item = (K, &'a T)>,
        T: 'a,
    {
        let writes = entries
            .into_iter()
            .map(|(id, value)| self.set(id, value));

        join_all(writes).await.into_iter().filter(|cached| *cached).count()
    }

    /// Read-through lookup: cached value if present, otherwise `loader`'s
    /// result, which is cached when it is `Some`
    ///
    /// Loader errors propagate; cache errors never do.
    pub async fn get_or_load<F, Fut, E>(&self, id: impl Display, loader: F) -> Result<Option<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        let id = id.to_string();
        if let Some(value) = self.get(&id).await {
            return Ok(Some(value));
        }

        let loaded = loader().await?;
        if let Some(value) = &loaded {
            self.set(&id, value).await;
        }
        Ok(loaded)
    }
}

impl<T, C> std::fmt::Debug for Cache<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("prefix", &self.prefix)
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}
