//! LMDB-backed cache store with tenant isolation.
//!
//! Uses the heed crate (Rust bindings for LMDB) to keep query results in a
//! memory-mapped file shared by every worker process on the host, which is
//! what makes a query cache worth having.
//!
//! # Layout
//!
//! Keys are [`TenantScopedKey::encode`] bytes, so one tenant's entries are a
//! contiguous prefix range. Values are framed as:
//!
//! ```text
//! [stored_at: i64 LE millis][ttl: u64 LE seconds][json value]
//! ```
//!
//! Expired entries read back as absent and are deleted on the spot;
//! [`LmdbCacheStore::purge_expired`] sweeps the rest.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use querycache_core::{CacheError, CacheResult, TenantId, Timestamp};
use tracing::debug;

use super::tenant_key::TenantScopedKey;
use super::traits::{CacheStats, CacheStore, CacheValue, StoredEntry};

const HEADER_LEN: usize = 16;

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for CacheError {
    fn from(e: LmdbCacheError) -> Self {
        match e {
            LmdbCacheError::Serialization(reason) => CacheError::Serialization { reason },
            LmdbCacheError::Deserialization(reason) => CacheError::Deserialization { reason },
            other => CacheError::Unavailable {
                reason: other.to_string(),
            },
        }
    }
}

fn txn_err(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

/// Decoded value frame.
struct Frame<'a> {
    stored_at: Timestamp,
    ttl: Duration,
    body: &'a [u8],
}

impl<'a> Frame<'a> {
    fn encode(stored_at: Timestamp, ttl: Duration, body: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + body.len());
        bytes.extend_from_slice(&stored_at.timestamp_millis().to_le_bytes());
        bytes.extend_from_slice(&ttl.as_secs().to_le_bytes());
        bytes.extend_from_slice(body);
        bytes
    }

    fn decode(bytes: &'a [u8]) -> Result<Self, LmdbCacheError> {
        if bytes.len() < HEADER_LEN {
            return Err(LmdbCacheError::Deserialization(format!(
                "Value frame too short: {} bytes",
                bytes.len()
            )));
        }

        let mut millis = [0u8; 8];
        millis.copy_from_slice(&bytes[0..8]);
        let mut ttl = [0u8; 8];
        ttl.copy_from_slice(&bytes[8..16]);

        let stored_at = DateTime::from_timestamp_millis(i64::from_le_bytes(millis))
            .ok_or_else(|| LmdbCacheError::Deserialization("Invalid timestamp".into()))?;

        Ok(Self {
            stored_at,
            ttl: Duration::from_secs(u64::from_le_bytes(ttl)),
            body: &bytes[HEADER_LEN..],
        })
    }

    fn is_expired_at(&self, now: Timestamp) -> bool {
        StoredEntry::new((), self.stored_at, self.ttl).is_expired_at(now)
    }
}

/// Per-tenant statistics tracking.
#[derive(Debug, Default)]
struct TenantStatsInner {
    hits: u64,
    misses: u64,
    entries: u64,
    size_bytes: u64,
    expirations: u64,
}

/// LMDB-backed cache store with tenant isolation.
///
/// # Example
///
/// ```ignore
/// use querycache_storage::cache::{LmdbCacheStore, QueryCache};
///
/// let store = Arc::new(LmdbCacheStore::new("/var/cache/querycache", 256)?);
/// let cache = QueryCache::with_defaults(store);
/// ```
pub struct LmdbCacheStore {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
    /// Per-tenant statistics.
    tenant_stats: Arc<RwLock<HashMap<TenantId, TenantStatsInner>>>,
    /// Global statistics.
    global_stats: Arc<RwLock<CacheStats>>,
}

impl LmdbCacheStore {
    /// Open (or create) a store.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the LMDB
    /// environment or database cannot be opened.
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        let store = Self {
            env,
            db,
            tenant_stats: Arc::new(RwLock::new(HashMap::new())),
            global_stats: Arc::new(RwLock::new(CacheStats::default())),
        };
        store.seed_entry_stats()?;

        debug!(path = %path.as_ref().display(), "Opened LMDB cache store");
        Ok(store)
    }

    /// Count entries already on disk so stats survive a restart.
    fn seed_entry_stats(&self) -> Result<(), LmdbCacheError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let mut per_tenant: HashMap<TenantId, (u64, u64)> = HashMap::new();

        for result in self.db.iter(&rtxn).map_err(txn_err)? {
            let (key, value) = result.map_err(txn_err)?;
            if let Some(decoded) = TenantScopedKey::decode(key) {
                let slot = per_tenant.entry(decoded.tenant()).or_default();
                slot.0 += 1;
                slot.1 += value.len() as u64;
            }
        }
        drop(rtxn);

        if let Ok(mut global) = self.global_stats.write() {
            global.entry_count = per_tenant.values().map(|(n, _)| n).sum();
            global.memory_bytes = per_tenant.values().map(|(_, b)| b).sum();
        }
        if let Ok(mut stats) = self.tenant_stats.write() {
            for (tenant, (entries, size_bytes)) in per_tenant {
                let slot = stats.entry(tenant).or_default();
                slot.entries = entries;
                slot.size_bytes = size_bytes;
            }
        }
        Ok(())
    }

    /// Record a cache hit for a tenant.
    fn record_hit(&self, tenant: TenantId) {
        if let Ok(mut stats) = self.tenant_stats.write() {
            stats.entry(tenant).or_default().hits += 1;
        }
        if let Ok(mut stats) = self.global_stats.write() {
            stats.hits += 1;
        }
    }

    /// Record a cache miss for a tenant.
    fn record_miss(&self, tenant: TenantId) {
        if let Ok(mut stats) = self.tenant_stats.write() {
            stats.entry(tenant).or_default().misses += 1;
        }
        if let Ok(mut stats) = self.global_stats.write() {
            stats.misses += 1;
        }
    }

    /// Update entry statistics after a successful write.
    fn record_write(&self, tenant: TenantId, size_bytes: u64, replaced: Option<u64>) {
        if let Ok(mut stats) = self.tenant_stats.write() {
            let tenant_stats = stats.entry(tenant).or_default();
            match replaced {
                Some(old) => tenant_stats.size_bytes = tenant_stats.size_bytes.saturating_sub(old),
                None => tenant_stats.entries += 1,
            }
            tenant_stats.size_bytes += size_bytes;
        }
        if let Ok(mut stats) = self.global_stats.write() {
            match replaced {
                Some(old) => stats.memory_bytes = stats.memory_bytes.saturating_sub(old),
                None => stats.entry_count += 1,
            }
            stats.memory_bytes += size_bytes;
        }
    }

    /// Update entry statistics after expired entries were deleted.
    fn record_expired(&self, tenant: TenantId, count: u64, size_bytes: u64) {
        if let Ok(mut stats) = self.tenant_stats.write() {
            if let Some(tenant_stats) = stats.get_mut(&tenant) {
                tenant_stats.entries = tenant_stats.entries.saturating_sub(count);
                tenant_stats.size_bytes = tenant_stats.size_bytes.saturating_sub(size_bytes);
                tenant_stats.expirations += count;
            }
        }
        if let Ok(mut stats) = self.global_stats.write() {
            stats.entry_count = stats.entry_count.saturating_sub(count);
            stats.memory_bytes = stats.memory_bytes.saturating_sub(size_bytes);
            stats.expirations += count;
        }
    }

    /// Get statistics for a specific tenant.
    pub fn tenant_stats(&self, tenant: TenantId) -> CacheStats {
        if let Ok(stats) = self.tenant_stats.read() {
            if let Some(tenant_stats) = stats.get(&tenant) {
                return CacheStats {
                    hits: tenant_stats.hits,
                    misses: tenant_stats.misses,
                    entry_count: tenant_stats.entries,
                    memory_bytes: tenant_stats.size_bytes,
                    expirations: tenant_stats.expirations,
                };
            }
        }
        CacheStats::default()
    }

    /// Number of entries on disk belonging to `tenant`, expired ones included.
    pub fn tenant_entry_count(&self, tenant: TenantId) -> Result<u64, LmdbCacheError> {
        let prefix = TenantScopedKey::tenant_prefix(tenant);
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let mut count = 0u64;
        for result in self.db.prefix_iter(&rtxn, &prefix[..]).map_err(txn_err)? {
            result.map_err(txn_err)?;
            count += 1;
        }
        Ok(count)
    }

    /// Delete every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<u64, LmdbCacheError> {
        let now = Utc::now();
        let candidates = self.expired_candidates(now)?;
        if candidates.is_empty() {
            return Ok(0);
        }
        self.delete_expired(&candidates, now)
    }

    /// Keys holding an expired or undecodable frame, with the frame's write time.
    fn expired_candidates(
        &self,
        now: Timestamp,
    ) -> Result<Vec<(Vec<u8>, Option<Timestamp>)>, LmdbCacheError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let mut expired = Vec::new();
        for result in self.db.iter(&rtxn).map_err(txn_err)? {
            let (key, value) = result.map_err(txn_err)?;
            match Frame::decode(value) {
                Ok(frame) if frame.is_expired_at(now) => {
                    expired.push((key.to_vec(), Some(frame.stored_at)))
                }
                Ok(_) => {}
                // Undecodable frames are dropped along with expired ones.
                Err(_) => expired.push((key.to_vec(), None)),
            }
        }
        Ok(expired)
    }

    /// Delete the candidates that still hold the frame seen by the scan.
    ///
    /// A key rewritten since the scan keeps its new entry.
    fn delete_expired(
        &self,
        candidates: &[(Vec<u8>, Option<Timestamp>)],
        now: Timestamp,
    ) -> Result<u64, LmdbCacheError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let mut removed: HashMap<TenantId, (u64, u64)> = HashMap::new();
        let mut total = 0u64;

        for (key, seen_at) in candidates {
            let size = match self.db.get(&wtxn, key.as_slice()).map_err(txn_err)? {
                Some(bytes) => {
                    let unchanged = match (Frame::decode(bytes), seen_at) {
                        (Ok(frame), Some(seen_at)) => {
                            frame.stored_at == *seen_at && frame.is_expired_at(now)
                        }
                        (Err(_), None) => true,
                        _ => false,
                    };
                    if !unchanged {
                        continue;
                    }
                    bytes.len() as u64
                }
                None => continue,
            };

            if self.db.delete(&mut wtxn, key.as_slice()).map_err(txn_err)? {
                total += 1;
                if let Some(decoded) = TenantScopedKey::decode(key) {
                    let slot = removed.entry(decoded.tenant()).or_default();
                    slot.0 += 1;
                    slot.1 += size;
                }
            }
        }
        wtxn.commit().map_err(txn_err)?;

        for (tenant, (count, size_bytes)) in removed {
            self.record_expired(tenant, count, size_bytes);
        }

        debug!(removed = total, "Purged expired cache entries");
        Ok(total)
    }

    /// Delete `encoded` if it still holds the frame written at `stored_at`.
    fn delete_if_unchanged(
        &self,
        encoded: &[u8],
        stored_at: Timestamp,
    ) -> Result<Option<u64>, LmdbCacheError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        let current = match self.db.get(&wtxn, encoded).map_err(txn_err)? {
            Some(bytes) => Frame::decode(bytes)
                .ok()
                .filter(|f| f.stored_at == stored_at)
                .map(|_| bytes.len() as u64),
            None => None,
        };

        let Some(size) = current else {
            return Ok(None);
        };

        self.db.delete(&mut wtxn, encoded).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(Some(size))
    }
}

#[async_trait]
impl CacheStore for LmdbCacheStore {
    async fn get<T: CacheValue>(&self, key: &TenantScopedKey) -> CacheResult<Option<StoredEntry<T>>> {
        let encoded = key.encode();
        let tenant = key.tenant();

        let bytes = {
            let rtxn = self.env.read_txn().map_err(txn_err)?;
            match self.db.get(&rtxn, encoded.as_slice()) {
                Ok(found) => found.map(|b| b.to_vec()),
                Err(e) => {
                    self.record_miss(tenant);
                    return Err(txn_err(e).into());
                }
            }
        };

        let Some(bytes) = bytes else {
            self.record_miss(tenant);
            return Ok(None);
        };

        let frame = Frame::decode(&bytes)?;

        if frame.is_expired_at(Utc::now()) {
            self.record_miss(tenant);
            if let Some(size) = self.delete_if_unchanged(&encoded, frame.stored_at)? {
                self.record_expired(tenant, 1, size);
            }
            return Ok(None);
        }

        let value: T = serde_json::from_slice(frame.body)
            .map_err(|e| LmdbCacheError::Deserialization(e.to_string()))?;
        self.record_hit(tenant);

        Ok(Some(StoredEntry::new(value, frame.stored_at, frame.ttl)))
    }

    async fn set<T: CacheValue>(
        &self,
        key: &TenantScopedKey,
        value: &T,
        ttl: Duration,
    ) -> CacheResult<()> {
        let encoded = key.encode();
        let body =
            serde_json::to_vec(value).map_err(|e| LmdbCacheError::Serialization(e.to_string()))?;
        let framed = Frame::encode(Utc::now(), ttl, &body);

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let replaced = self
            .db
            .get(&wtxn, encoded.as_slice())
            .map_err(txn_err)?
            .map(|old| old.len() as u64);
        self.db
            .put(&mut wtxn, encoded.as_slice(), framed.as_slice())
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;

        self.record_write(key.tenant(), framed.len() as u64, replaced);

        Ok(())
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        Ok(self
            .global_stats
            .read()
            .map(|s| s.clone())
            .unwrap_or_default())
    }
}
