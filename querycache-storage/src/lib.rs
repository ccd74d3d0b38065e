//! QueryCache Storage - read-through query result cache
//!
//! Sits between a host's query pipeline and its database. Cacheable read
//! queries are served from an external TTL store, partitioned per tenant;
//! everything else passes straight through to the executor.

pub mod cache;

// Re-export cache types for host integration
pub use cache::{
    BypassReason, CacheOutcome, CachePolicy, CacheRead, CacheStats, CacheStore, CacheValue,
    DefaultPolicy, InMemoryCacheStore, Lifetime, LmdbCacheError, LmdbCacheStore, Namespace,
    QueryCache, QueryExecutor, StoredEntry, TenantScopedKey,
};
