//! Read-through cache over fetch primitives.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::codec::{decode, encode, CachedResult};
use super::key::{database_prefix, derive_key, model_prefix};
use super::store::CacheStore;
use crate::error::DataResult;

/// Cache facade used by the adapter hooks.
///
/// Backend failures never fail an operation: a failed read is a miss, a
/// failed write is dropped. Corrupt entries are dropped and treated as misses.
#[derive(Clone)]
pub struct CacheLayer {
    store: Arc<dyn CacheStore>,
    enabled: bool,
}

impl CacheLayer {
    pub fn new(store: Arc<dyn CacheStore>, enabled: bool) -> Self {
        Self { store, enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn key(
        &self,
        model_key: &str,
        operation: &str,
        filter: &Value,
        options: &Map<String, Value>,
    ) -> String {
        derive_key(model_key, operation, filter, options)
    }

    pub async fn get(&self, key: &str) -> Option<CachedResult> {
        if !self.enabled {
            return None;
        }
        match self.store.get(key).await {
            Ok(Some(bytes)) => match decode(&bytes) {
                Ok(result) => Some(result),
                Err(err) => {
                    warn!(target: "vaultbase::cache", key, error = %err, "dropping corrupt entry");
                    let _ = self.store.delete_prefix(key).await;
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(target: "vaultbase::cache", key, error = %err, "cache read failed");
                None
            }
        }
    }

    pub async fn put(&self, key: &str, result: &CachedResult) {
        if !self.enabled {
            return;
        }
        let written = match encode(result) {
            Ok(bytes) => self.store.set(key, bytes).await,
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            warn!(target: "vaultbase::cache", key, error = %err, "cache write failed");
        }
    }

    /// Drop every entry of one model
    pub async fn invalidate_model(&self, model_key: &str) -> DataResult<u64> {
        self.invalidate_scope(&model_prefix(model_key)).await
    }

    /// Drop every entry of one physical database
    pub async fn invalidate_database(&self, database: &str) -> DataResult<u64> {
        self.invalidate_scope(&database_prefix(database)).await
    }

    /// Drop every entry under an arbitrary prefix
    pub async fn invalidate_scope(&self, prefix: &str) -> DataResult<u64> {
        if !self.enabled {
            return Ok(0);
        }
        let deleted = self.store.delete_prefix(prefix).await?;
        debug!(target: "vaultbase::cache", prefix, deleted, "cache invalidated");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use serde_json::json;

    fn layer(enabled: bool) -> (Arc<InMemoryCache>, CacheLayer) {
        let store = Arc::new(InMemoryCache::new());
        (store.clone(), CacheLayer::new(store, enabled))
    }

    #[tokio::test]
    async fn test_miss_differs_from_cached_empty() {
        let (_, cache) = layer(true);
        let key = cache.key("app:posts", "get", &json!({"title": "x"}), &Map::new());
        assert_eq!(cache.get(&key).await, None);

        cache.put(&key, &CachedResult::Empty).await;
        assert_eq!(cache.get(&key).await, Some(CachedResult::Empty));
    }

    #[tokio::test]
    async fn test_invalidation_scopes() {
        let (store, cache) = layer(true);
        let posts = cache.key("app:posts", "getList", &json!({}), &Map::new());
        let tags = cache.key("app:tags", "getList", &json!({}), &Map::new());
        let staged = cache.key("app-staging:posts", "getList", &json!({}), &Map::new());
        for key in [&posts, &tags, &staged] {
            cache.put(key, &CachedResult::List(vec![])).await;
        }

        assert_eq!(cache.invalidate_model("app:posts").await.unwrap(), 1);
        assert_eq!(cache.invalidate_database("app").await.unwrap(), 1);
        assert_eq!(store.keys(), vec![staged]);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_miss() {
        let (store, cache) = layer(true);
        store.set("app:posts:bad", vec![9, 9, 9, 9, 9, 9]).await.unwrap();
        assert_eq!(cache.get("app:posts:bad").await, None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_layer_is_inert() {
        let (store, cache) = layer(false);
        cache.put("app:posts:1", &CachedResult::Empty).await;
        assert!(store.is_empty());
        assert_eq!(cache.get("app:posts:1").await, None);
    }
}
