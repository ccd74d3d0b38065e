//! querycache Core - Data Types
//!
//! Pure data structures shared by the cache layer and its hosts: query
//! descriptors, materialized payloads, request context, identities and
//! configuration. No I/O lives here.

pub mod config;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod identity;
pub mod payload;

pub use config::{
    QueryCacheConfig, DEFAULT_GROUP_BASE, DEFAULT_MAIN_QUERY_TTL_SECS,
    DEFAULT_SECONDARY_QUERY_TTL_SECS,
};
pub use context::{FixedTenant, RequestContext, TenantScopeResolver};
pub use descriptor::{OutputShape, QueryDescriptor};
pub use error::{CacheError, CacheResult, ConfigError};
pub use identity::{build_key, CacheKey, TenantId, Timestamp};
pub use payload::{QueryPayload, Row, RowId};
