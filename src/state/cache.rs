use super::StateHandler;
use crate::core::{DbError, Result};
use crate::definition::DefinitionId;
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Key/value cache service shared between processes.
///
/// Entries may vanish at any time (eviction, expiry, restarts).
#[async_trait]
pub trait SharedCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Bounded in-process cache with per-entry expiry. Share one instance
/// through an `Arc` to let several handlers see the same entries.
pub struct LruSharedCache {
    entries: Mutex<LruCache<String, (String, Option<Instant>)>>,
}

impl LruSharedCache {
    pub fn new(capacity: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or_else(|| {
            DbError::Configuration("Shared cache capacity must be greater than zero".into())
        })?;
        Ok(Self {
            entries: Mutex::new(LruCache::new(capacity)),
        })
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[async_trait]
impl SharedCache for LruSharedCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().await;
        let expired = match entries.get(key) {
            None => return Ok(None),
            Some((_, Some(deadline))) => Instant::now() >= *deadline,
            Some((_, None)) => false,
        };
        if expired {
            entries.pop(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let deadline = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .lock()
            .await
            .put(key.to_string(), (value.to_string(), deadline));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().await.pop(key);
        Ok(())
    }
}

/// Checksums kept in a [`SharedCache`] under `{prefix}{definition id}`.
pub struct CacheStateHandler {
    cache: Arc<dyn SharedCache>,
    key_prefix: String,
    ttl: Option<Duration>,
}

impl CacheStateHandler {
    pub fn new(cache: Arc<dyn SharedCache>, key_prefix: impl Into<String>, ttl: Option<Duration>) -> Self {
        Self {
            cache,
            key_prefix: key_prefix.into(),
            ttl,
        }
    }

    fn key(&self, id: DefinitionId) -> String {
        format!("{}{}", self.key_prefix, id)
    }
}

#[async_trait]
impl StateHandler for CacheStateHandler {
    async fn get_checksum(&self, id: DefinitionId) -> Result<Option<String>> {
        self.cache.get(&self.key(id)).await
    }

    async fn set_checksum(&self, id: DefinitionId, checksum: &str) -> Result<()> {
        self.cache.set(&self.key(id), checksum, self.ttl).await
    }

    async fn clear_checksum(&self, id: DefinitionId) -> Result<()> {
        self.cache.delete(&self.key(id)).await
    }

    fn backend(&self) -> &'static str {
        "cache"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shared_between_handlers() {
        let cache: Arc<dyn SharedCache> = Arc::new(LruSharedCache::new(16).unwrap());
        let first = CacheStateHandler::new(Arc::clone(&cache), "t:", None);
        let second = CacheStateHandler::new(cache, "t:", None);

        first.set_checksum(DefinitionId(1), "abc").await.unwrap();
        assert_eq!(second.get_checksum(DefinitionId(1)).await.unwrap().as_deref(), Some("abc"));
        second.clear_checksum(DefinitionId(1)).await.unwrap();
        assert_eq!(first.get_checksum(DefinitionId(1)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_eviction_and_expiry() {
        let cache = LruSharedCache::new(1).unwrap();
        cache.set("a", "1", None).await.unwrap();
        cache.set("b", "2", None).await.unwrap();
        assert_eq!(cache.get("a").await.unwrap(), None);
        assert_eq!(cache.len().await, 1);

        cache.set("c", "3", Some(Duration::from_millis(0))).await.unwrap();
        assert_eq!(cache.get("c").await.unwrap(), None);
        assert_eq!(cache.len().await, 0);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(LruSharedCache::new(0).is_err());
    }
}
