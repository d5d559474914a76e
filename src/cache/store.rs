//! Cache backends.
//!
//! The cache is shared without locking across processes: writes are
//! idempotent overwrites, reads tolerate staleness, invalidation deletes by
//! key prefix.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crc32fast::Hasher;
use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;

use crate::error::{DataError, DataResult};

/// Key/value cache backend
pub trait CacheStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, DataResult<Option<Vec<u8>>>>;

    fn set<'a>(&'a self, key: &'a str, value: Vec<u8>) -> BoxFuture<'a, DataResult<()>>;

    /// Delete every key starting with `prefix`, returning how many were removed
    fn delete_prefix<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, DataResult<u64>>;
}

/// Process-local cache ordered by key, so prefix deletion is a range scan.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every key currently held
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .lock()
            .map(|e| e.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl CacheStore for InMemoryCache {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, DataResult<Option<Vec<u8>>>> {
        async move {
            let entries = self
                .entries
                .lock()
                .map_err(|_| DataError::internal("Lock poisoned"))?;
            Ok(entries.get(key).cloned())
        }
        .boxed()
    }

    fn set<'a>(&'a self, key: &'a str, value: Vec<u8>) -> BoxFuture<'a, DataResult<()>> {
        async move {
            self.entries
                .lock()
                .map_err(|_| DataError::internal("Lock poisoned"))?
                .insert(key.to_string(), value);
            Ok(())
        }
        .boxed()
    }

    fn delete_prefix<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, DataResult<u64>> {
        async move {
            let mut entries = self
                .entries
                .lock()
                .map_err(|_| DataError::internal("Lock poisoned"))?;
            let doomed: Vec<String> = entries
                .range(prefix.to_string()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(k, _)| k.clone())
                .collect();
            for key in &doomed {
                entries.remove(key);
            }
            Ok(doomed.len() as u64)
        }
        .boxed()
    }
}

/// A cache spread over several nodes.
///
/// Reads and writes go to the node chosen by key hash; prefix deletions fan
/// out to every node.
pub struct ClusterCache {
    nodes: Vec<Arc<dyn CacheStore>>,
}

impl ClusterCache {
    pub fn new(nodes: Vec<Arc<dyn CacheStore>>) -> DataResult<Self> {
        if nodes.is_empty() {
            return Err(DataError::Config("cache cluster needs at least one node".into()));
        }
        Ok(Self { nodes })
    }

    /// Index of the node owning `key`
    pub fn node_for(&self, key: &str) -> usize {
        let mut hasher = Hasher::new();
        hasher.update(key.as_bytes());
        hasher.finalize() as usize % self.nodes.len()
    }
}

impl CacheStore for ClusterCache {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, DataResult<Option<Vec<u8>>>> {
        self.nodes[self.node_for(key)].get(key)
    }

    fn set<'a>(&'a self, key: &'a str, value: Vec<u8>) -> BoxFuture<'a, DataResult<()>> {
        self.nodes[self.node_for(key)].set(key, value)
    }

    fn delete_prefix<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, DataResult<u64>> {
        async move {
            let results = join_all(self.nodes.iter().map(|node| node.delete_prefix(prefix))).await;
            let mut deleted = 0;
            for result in results {
                deleted += result?;
            }
            Ok(deleted)
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_prefix_delete_is_scoped() {
        let cache = InMemoryCache::new();
        cache.set("app:posts:1", vec![1]).await.unwrap();
        cache.set("app:posts:2", vec![2]).await.unwrap();
        cache.set("app:postsx:1", vec![3]).await.unwrap();
        cache.set("app-staging:posts:1", vec![4]).await.unwrap();

        assert_eq!(cache.delete_prefix("app:posts:").await.unwrap(), 2);
        assert_eq!(cache.keys(), vec!["app-staging:posts:1", "app:postsx:1"]);
    }

    #[tokio::test]
    async fn test_cluster_routes_and_fans_out() {
        let nodes: Vec<Arc<InMemoryCache>> =
            (0..3).map(|_| Arc::new(InMemoryCache::new())).collect();
        let cluster = ClusterCache::new(
            nodes
                .iter()
                .map(|n| Arc::clone(n) as Arc<dyn CacheStore>)
                .collect(),
        )
        .unwrap();

        for i in 0..12 {
            let key = format!("app:posts:{}", i);
            cluster.set(&key, vec![i as u8]).await.unwrap();
            assert_eq!(nodes[cluster.node_for(&key)].get(&key).await.unwrap(), Some(vec![i as u8]));
            assert_eq!(cluster.get(&key).await.unwrap(), Some(vec![i as u8]));
        }
        assert_eq!(nodes.iter().map(|n| n.len()).sum::<usize>(), 12);

        assert_eq!(cluster.delete_prefix("app:").await.unwrap(), 12);
        assert!(nodes.iter().all(|n| n.is_empty()));
    }

    #[test]
    fn test_empty_cluster_is_rejected() {
        assert!(ClusterCache::new(Vec::new()).is_err());
    }
}
