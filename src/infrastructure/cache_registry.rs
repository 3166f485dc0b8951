// Read-through cache wrapper for reference data

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::AppResult;
use crate::infrastructure::fast_cache::FastCache;

/// Cache-aside access to slow-changing aggregates: reads go through the
/// cache, writers invalidate. Consistency is eventual by contract; the only
/// guarantee is that a load after an invalidation observes the store.
///
/// Cache failures never fail a read. A broken cache turns every call into a
/// loader call, nothing more.
pub struct CacheAsideRegistry {
    cache: Arc<dyn FastCache>,
}

impl CacheAsideRegistry {
    pub fn new(cache: Arc<dyn FastCache>) -> Self {
        CacheAsideRegistry { cache }
    }

    /// Return the cached value under `key`, or run `loader`, cache its result
    /// for `ttl`, and return it. Entries that no longer decode are discarded
    /// and reloaded.
    pub async fn get_or_load<T, F, Fut>(&self, key: &str, ttl: Duration, loader: F) -> AppResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        match self.cache.get(key).await {
            Ok(Some(bytes)) => match bincode::deserialize(&bytes) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!("Dropping undecodable cache entry '{}': {}", key, e);
                    if let Err(e) = self.cache.delete(key).await {
                        warn!("Failed to drop cache entry '{}': {}", key, e);
                    }
                }
            },
            Ok(None) => {}
            Err(e) => {
                warn!("Cache read for '{}' failed, loading from store: {}", key, e);
            }
        }

        let value = loader().await?;

        match bincode::serialize(&value) {
            Ok(bytes) => {
                if let Err(e) = self.cache.set(key, bytes, Some(ttl)).await {
                    warn!("Failed to cache '{}': {}", key, e);
                }
            }
            Err(e) => warn!("Failed to encode '{}' for caching: {}", key, e),
        }

        Ok(value)
    }

    /// Drop `key` so the next read reloads. Deleting an absent key succeeds,
    /// so repeated invalidations are harmless.
    pub async fn invalidate(&self, key: &str) -> AppResult<()> {
        self.cache.delete(key).await
    }
}
