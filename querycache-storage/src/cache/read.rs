//! Result of a materialization, carrying how it was served.

use chrono::Utc;
use querycache_core::Timestamp;
use std::time::Duration;

use super::eligibility::BypassReason;

/// How a [`CacheRead`] was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Served from the results cache; the executor was not called.
    Hit,
    /// Executed on a miss and written to the cache.
    Stored,
    /// Executed without touching the cache, or the write was skipped.
    Bypassed(BypassReason),
}

/// Result of a cache read, carrying staleness metadata.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    /// The materialized value.
    value: T,
    /// When this value was cached (or produced by the executor).
    cached_at: Timestamp,
    outcome: CacheOutcome,
}

impl<T> CacheRead<T> {
    /// Create a new cache read from a cache hit.
    pub fn from_cache(value: T, cached_at: Timestamp) -> Self {
        Self {
            value,
            cached_at,
            outcome: CacheOutcome::Hit,
        }
    }

    /// Create a new cache read from an executor call.
    pub fn from_executor(value: T, outcome: CacheOutcome) -> Self {
        Self {
            value,
            cached_at: Utc::now(),
            outcome,
        }
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    /// Duration since the value was produced.
    pub fn staleness(&self) -> Duration {
        let now = Utc::now();
        if now > self.cached_at {
            (now - self.cached_at).to_std().unwrap_or(Duration::ZERO)
        } else {
            Duration::ZERO
        }
    }

    pub fn cached_at(&self) -> Timestamp {
        self.cached_at
    }

    pub fn outcome(&self) -> CacheOutcome {
        self.outcome
    }

    pub fn was_cache_hit(&self) -> bool {
        self.outcome == CacheOutcome::Hit
    }

    pub fn was_cache_miss(&self) -> bool {
        !self.was_cache_hit()
    }

    /// Why the cache was not used, if it was not.
    pub fn bypass_reason(&self) -> Option<BypassReason> {
        match self.outcome {
            CacheOutcome::Bypassed(reason) => Some(reason),
            _ => None,
        }
    }

    /// Map the inner value to a new type.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            cached_at: self.cached_at,
            outcome: self.outcome,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_read_from_cache() {
        let cached_at = Utc::now();
        let read = CacheRead::from_cache("rows".to_string(), cached_at);

        assert!(read.was_cache_hit());
        assert!(!read.was_cache_miss());
        assert_eq!(read.value(), "rows");
        assert_eq!(read.cached_at(), cached_at);
        assert_eq!(read.bypass_reason(), None);
    }

    #[test]
    fn test_cache_read_from_executor() {
        let read = CacheRead::from_executor(42i32, CacheOutcome::Stored);
        assert!(read.was_cache_miss());
        assert_eq!(read.outcome(), CacheOutcome::Stored);
        assert_eq!(read.into_value(), 42);
    }

    #[test]
    fn test_cache_read_bypass_reason() {
        let read = CacheRead::from_executor((), CacheOutcome::Bypassed(BypassReason::Search));
        assert_eq!(read.bypass_reason(), Some(BypassReason::Search));
    }

    #[test]
    fn test_cache_read_staleness() {
        let past = Utc::now() - chrono::Duration::seconds(5);
        let read = CacheRead::from_cache("test", past);

        let staleness = read.staleness();
        assert!(staleness >= Duration::from_secs(4));
        assert!(staleness <= Duration::from_secs(10));
    }

    #[test]
    fn test_cache_read_map() {
        let read = CacheRead::from_cache(vec![1u64, 2, 3], Utc::now());
        let mapped = read.map(|ids| ids.len());
        assert!(mapped.was_cache_hit());
        assert_eq!(mapped.into_value(), 3);
    }
}
