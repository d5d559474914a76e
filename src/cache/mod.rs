//! # Cache Layer
//!
//! Read-through caching of fetch primitive results.
//!
//! - Keys: model cache key + hash of the sorted operation signature
//! - Values: tagged binary payloads (empty / one / list) with a checksum
//! - Invalidation: prefix deletion by model, database or arbitrary scope;
//!   cluster backends fan deletions out to every node

mod codec;
mod key;
mod layer;
mod store;

pub use codec::{decode, encode, CachedResult};
pub use key::{canonical_json, database_prefix, derive_key, model_prefix, signature};
pub use layer::CacheLayer;
pub use store::{CacheStore, ClusterCache, InMemoryCache};
