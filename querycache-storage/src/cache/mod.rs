//! Query result cache with tenant isolation.
//!
//! This module provides a read-through cache for the results of read-only
//! queries, plus a shadow cache for the "how many rows matched in total"
//! count that paginated listings ask for right after.
//!
//! # Tenant Isolation
//!
//! The [`TenantScopedKey`] type ensures that cache keys CANNOT be constructed
//! without providing a tenant. Each tenant gets its own results group and its
//! own row-count group, so one site can never read another site's rows.
//!
//! # Example
//!
//! ```ignore
//! let store = Arc::new(LmdbCacheStore::new("/var/cache/querycache", 256)?);
//! let cache = QueryCache::new(store, Arc::new(DefaultPolicy), QueryCacheConfig::from_env());
//!
//! let ctx = RequestContext::resolve(&FixedTenant(TenantId::new(1)));
//! let read = cache.materialize(&descriptor, &ctx, &executor).await?;
//!
//! if read.was_cache_hit() {
//!     tracing::debug!(staleness = ?read.staleness(), "served from cache");
//! }
//! ```

pub mod eligibility;
pub mod found_rows;
pub mod lmdb_backend;
pub mod memory_backend;
pub mod policy;
pub mod query_cache;
pub mod read;
pub mod tenant_key;
pub mod traits;

pub use eligibility::BypassReason;
pub use found_rows::{count_literal_query, has_limit_clause, need_found_rows};
pub use lmdb_backend::{LmdbCacheError, LmdbCacheStore};
pub use memory_backend::InMemoryCacheStore;
pub use policy::{resolve_lifetime, CachePolicy, DefaultPolicy, Lifetime};
pub use query_cache::QueryCache;
pub use read::{CacheOutcome, CacheRead};
pub use tenant_key::{cache_namespace, row_count_namespace, Namespace, TenantScopedKey};
pub use traits::{CacheStats, CacheStore, CacheValue, QueryExecutor, StoredEntry};
