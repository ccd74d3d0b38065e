//! Store, executor and cached-value traits.
//!
//! This module defines the two collaborators the cache sits between: the
//! external key-value store results are kept in, and the executor that
//! produces them on a miss.

use std::time::Duration;

use async_trait::async_trait;
use querycache_core::{CacheResult, Row, RowId, Timestamp};
use serde::{de::DeserializeOwned, Serialize};

use super::tenant_key::TenantScopedKey;

/// Marker trait for values that can be written to a cache store.
///
/// Implemented for every `Clone + Serialize + DeserializeOwned` type that is
/// `Send + Sync + 'static`. The cache stores two of them: a `QueryPayload`
/// in the results namespace and a `u64` in the row-count namespace.
pub trait CacheValue: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// A value read back from a store, with the metadata it was written with.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry<T> {
    pub value: T,
    pub stored_at: Timestamp,
    pub ttl: Duration,
}

impl<T> StoredEntry<T> {
    pub fn new(value: T, stored_at: Timestamp, ttl: Duration) -> Self {
        Self {
            value,
            stored_at,
            ttl,
        }
    }

    /// Instant after which the entry is no longer served.
    pub fn expires_at(&self) -> Timestamp {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        self.stored_at
            .checked_add_signed(ttl)
            .unwrap_or(Timestamp::MAX_UTC)
    }

    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        now >= self.expires_at()
    }
}

/// TTL key-value store the cache keeps its entries in.
///
/// Implementations must give atomic get/set per key and be safe to share
/// between concurrent requests. Expiry is the store's job: an entry whose TTL
/// has elapsed must read back as `None`.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Read a value. `None` if absent or expired.
    async fn get<T: CacheValue>(&self, key: &TenantScopedKey) -> CacheResult<Option<StoredEntry<T>>>;

    /// Write a value, replacing whatever the key held.
    async fn set<T: CacheValue>(
        &self,
        key: &TenantScopedKey,
        value: &T,
        ttl: Duration,
    ) -> CacheResult<()>;

    /// Get store statistics.
    async fn stats(&self) -> CacheResult<CacheStats>;

    /// Whether entries outlive the current process, so other request
    /// workers can read them.
    fn is_persistent(&self) -> bool {
        true
    }
}

/// The real data source, consulted on a cache miss.
///
/// Errors are handed back to the caller of
/// [`QueryCache::materialize`](super::QueryCache::materialize) untouched.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Run `sql` and return full row objects.
    async fn execute_for_rows(&self, sql: &str) -> Result<Vec<Row>, Self::Error>;

    /// Run `sql` and return only the identifier column.
    async fn execute_for_ids(&self, sql: &str) -> Result<Vec<RowId>, Self::Error>;

    /// Total rows the previous query would have matched without its LIMIT.
    async fn execute_scalar_count(&self) -> Result<u64, Self::Error>;
}

/// Statistics about store usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of reads that found a live entry.
    pub hits: u64,
    /// Number of reads that found nothing (or an expired entry).
    pub misses: u64,
    /// Number of entries currently held, expired ones included until swept.
    pub entry_count: u64,
    /// Approximate stored size in bytes.
    pub memory_bytes: u64,
    /// Number of entries dropped because their TTL elapsed.
    pub expirations: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
