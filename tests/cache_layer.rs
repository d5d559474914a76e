//! Result caching around the read primitives

use std::sync::Arc;

use serde_json::{json, Map};
use vaultbase::cache::{derive_key, CacheStore, ClusterCache, InMemoryCache};
use vaultbase::{
    Adapter, DataConfig, InMemoryStore, ModelConfig, PropertyDef, Query, RequestContext,
};

fn adapter(config: DataConfig) -> (Adapter, Arc<InMemoryCache>) {
    let cache = Arc::new(InMemoryCache::new());
    let adapter = Adapter::new(Arc::new(InMemoryStore::new()), config).with_cache(cache.clone());
    adapter
        .define(
            ModelConfig::new("products")
                .property("sku", PropertyDef::text())
                .property("price", PropertyDef::number()),
        )
        .unwrap();
    (adapter, cache)
}

#[test]
fn key_ignores_object_key_order() {
    let options: Map<String, serde_json::Value> = json!({"limit": 10, "skip": 0})
        .as_object()
        .unwrap()
        .clone();
    let reordered: Map<String, serde_json::Value> = json!({"skip": 0, "limit": 10})
        .as_object()
        .unwrap()
        .clone();

    let a = derive_key(
        "db:products",
        "getList",
        &json!({"sku": "a", "price": {"$gt": 1}}),
        &options,
    );
    let b = derive_key(
        "db:products",
        "getList",
        &json!({"price": {"$gt": 1}, "sku": "a"}),
        &reordered,
    );
    assert_eq!(a, b);
    assert!(a.starts_with("db:products:"));

    let c = derive_key("db:products", "get", &json!({"sku": "a", "price": {"$gt": 1}}), &options);
    assert_ne!(a, c);
}

#[tokio::test]
async fn equivalent_reads_share_one_entry() {
    let (adapter, cache) = adapter(DataConfig::default());
    let ctx = RequestContext::new();
    adapter
        .create_one(&ctx, "products", json!({"sku": "a", "price": 5}))
        .await
        .unwrap();

    let first = adapter
        .get_list(&ctx, "products", Query::filter(json!({"sku": "a", "price": 5})))
        .await
        .unwrap();
    let second = adapter
        .get_list(&ctx, "products", Query::filter(json!({"price": 5, "sku": "a"})))
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(cache.len(), 1);

    let snapshot = adapter.metrics().snapshot();
    assert_eq!(snapshot.cache_misses, 1);
    assert_eq!(snapshot.cache_hits, 1);
}

#[tokio::test]
async fn missing_records_are_cached_as_empty() {
    let (adapter, cache) = adapter(DataConfig::default());
    let ctx = RequestContext::new();
    let query = Query::filter(json!({"sku": "ghost"}));

    assert_eq!(adapter.get(&ctx, "products", query.clone()).await.unwrap(), None);
    assert_eq!(adapter.get(&ctx, "products", query).await.unwrap(), None);
    assert_eq!(cache.len(), 1);
    assert_eq!(adapter.metrics().snapshot().cache_hits, 1);
}

#[tokio::test]
async fn writes_invalidate_the_model() {
    let (adapter, cache) = adapter(DataConfig::default());
    let ctx = RequestContext::new();
    adapter
        .create_one(&ctx, "products", json!({"sku": "a", "price": 5}))
        .await
        .unwrap();
    assert_eq!(adapter.count(&ctx, "products", Query::new()).await.unwrap(), 1);
    assert!(!cache.is_empty());

    adapter
        .update_multiple(&ctx, "products", Query::new(), json!({"price": 6}))
        .await
        .unwrap();
    assert!(cache.is_empty());

    let product = adapter.get(&ctx, "products", Query::new()).await.unwrap().unwrap();
    assert_eq!(product["price"], 6);
}

#[tokio::test]
async fn transactional_reads_bypass_the_cache() {
    let (adapter, cache) = adapter(DataConfig::default());
    let ctx = RequestContext::transactional();
    adapter
        .create_one(&ctx, "products", json!({"sku": "a"}))
        .await
        .unwrap();
    assert_eq!(adapter.count(&ctx, "products", Query::new()).await.unwrap(), 1);
    assert!(cache.is_empty());

    ctx.finish().await.unwrap();
    assert!(cache.is_empty());
}

#[tokio::test]
async fn disabled_cache_stores_nothing() {
    let config = DataConfig::from_json_str(r#"{"cache": {"enabled": false}}"#).unwrap();
    let (adapter, cache) = adapter(config);
    let ctx = RequestContext::new();
    adapter.count(&ctx, "products", Query::new()).await.unwrap();
    adapter.count(&ctx, "products", Query::new()).await.unwrap();
    assert!(cache.is_empty());
    assert_eq!(adapter.metrics().snapshot().cache_hits, 0);
}

#[tokio::test]
async fn cluster_cache_spreads_and_invalidates_across_nodes() {
    let nodes: Vec<Arc<InMemoryCache>> = (0..3).map(|_| Arc::new(InMemoryCache::new())).collect();
    let cluster = ClusterCache::new(
        nodes
            .iter()
            .map(|n| n.clone() as Arc<dyn CacheStore>)
            .collect(),
    )
    .unwrap();

    for i in 0..20 {
        cluster
            .set(&format!("db:products:{}", i), vec![1])
            .await
            .unwrap();
    }
    let total: usize = nodes.iter().map(|n| n.len()).sum();
    assert_eq!(total, 20);

    let key = "db:products:7";
    let owner = cluster.node_for(key);
    assert_eq!(nodes[owner].get(key).await.unwrap(), Some(vec![1]));

    assert_eq!(cluster.delete_prefix("db:products:").await.unwrap(), 20);
    assert!(nodes.iter().all(|n| n.is_empty()));
}

#[test]
fn empty_cluster_is_rejected() {
    assert!(ClusterCache::new(Vec::new()).is_err());
}
