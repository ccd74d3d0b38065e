//! Process-local cache store.
//!
//! Entries live in a `HashMap` behind a lock and vanish with the process,
//! so [`InMemoryCacheStore::is_persistent`] is false and a [`QueryCache`]
//! over it stays inactive unless ephemeral stores are explicitly allowed.
//! Useful for tests and single-worker deployments.
//!
//! [`QueryCache`]: super::QueryCache

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use querycache_core::{CacheError, CacheResult, Timestamp};

use super::tenant_key::TenantScopedKey;
use super::traits::{CacheStats, CacheStore, CacheValue, StoredEntry};

#[derive(Debug, Clone)]
struct Slot {
    bytes: Vec<u8>,
    stored_at: Timestamp,
    ttl: Duration,
}

impl Slot {
    fn is_expired_at(&self, now: Timestamp) -> bool {
        StoredEntry::new((), self.stored_at, self.ttl).is_expired_at(now)
    }
}

/// In-memory TTL store keyed by encoded [`TenantScopedKey`]s.
///
/// Expired entries are dropped lazily on read, or in bulk by
/// [`purge_expired`](Self::purge_expired).
#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    entries: RwLock<HashMap<Vec<u8>, Slot>>,
    stats: RwLock<CacheStats>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries held, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> CacheResult<u64> {
        let now = Utc::now();
        let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;

        let before = entries.len();
        entries.retain(|_, slot| !slot.is_expired_at(now));
        let removed = (before - entries.len()) as u64;
        let bytes: usize = entries.values().map(|s| s.bytes.len()).sum();
        drop(entries);

        let mut stats = self.stats.write().map_err(|_| CacheError::LockPoisoned)?;
        stats.expirations += removed;
        stats.entry_count = before as u64 - removed;
        stats.memory_bytes = bytes as u64;
        Ok(removed)
    }

    fn record(&self, f: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.write() {
            f(&mut stats);
        }
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get<T: CacheValue>(&self, key: &TenantScopedKey) -> CacheResult<Option<StoredEntry<T>>> {
        let encoded = key.encode();
        let now = Utc::now();

        let slot = {
            let entries = self.entries.read().map_err(|_| CacheError::LockPoisoned)?;
            entries.get(&encoded).cloned()
        };

        let slot = match slot {
            Some(slot) if slot.is_expired_at(now) => {
                let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
                // Only drop it if a concurrent writer has not replaced it.
                if entries
                    .get(&encoded)
                    .is_some_and(|current| current.stored_at == slot.stored_at)
                {
                    entries.remove(&encoded);
                    drop(entries);
                    self.record(|s| {
                        s.expirations += 1;
                        s.entry_count = s.entry_count.saturating_sub(1);
                        s.memory_bytes = s.memory_bytes.saturating_sub(slot.bytes.len() as u64);
                    });
                }
                None
            }
            other => other,
        };

        let Some(slot) = slot else {
            self.record(|s| s.misses += 1);
            return Ok(None);
        };

        let value: T = serde_json::from_slice(&slot.bytes).map_err(|e| CacheError::Deserialization {
            reason: e.to_string(),
        })?;
        self.record(|s| s.hits += 1);

        Ok(Some(StoredEntry::new(value, slot.stored_at, slot.ttl)))
    }

    async fn set<T: CacheValue>(
        &self,
        key: &TenantScopedKey,
        value: &T,
        ttl: Duration,
    ) -> CacheResult<()> {
        let bytes = serde_json::to_vec(value).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;
        let size = bytes.len() as u64;

        let previous = {
            let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
            entries.insert(
                key.encode(),
                Slot {
                    bytes,
                    stored_at: Utc::now(),
                    ttl,
                },
            )
        };

        self.record(|s| match previous {
            Some(old) => {
                s.memory_bytes = s.memory_bytes.saturating_sub(old.bytes.len() as u64) + size;
            }
            None => {
                s.entry_count += 1;
                s.memory_bytes += size;
            }
        });

        Ok(())
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        self.stats
            .read()
            .map(|s| s.clone())
            .map_err(|_| CacheError::LockPoisoned)
    }

    fn is_persistent(&self) -> bool {
        false
    }
}
