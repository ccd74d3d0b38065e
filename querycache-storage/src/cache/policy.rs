//! Policy hooks the host can inject to override cache decisions.
//!
//! Every hook receives the value the cache computed and returns the value to
//! use. The default implementation returns its input unchanged.

use std::time::Duration;

use querycache_core::{ConfigError, QueryCacheConfig, QueryDescriptor};

/// Strategy for overriding the cache's built-in decisions.
pub trait CachePolicy: Send + Sync {
    /// Final say on whether `descriptor` is cacheable.
    fn should_cache(&self, computed: bool, descriptor: &QueryDescriptor) -> bool {
        let _ = descriptor;
        computed
    }

    /// Final say on the lifetime, in seconds. Zero disables caching for the
    /// call; a negative value is a configuration error and does the same.
    fn cache_lifetime(&self, computed_secs: i64, descriptor: &QueryDescriptor) -> i64 {
        let _ = descriptor;
        computed_secs
    }

    /// Resource types whose queries must not be cached.
    fn excluded_resource_types(&self, configured: &[String]) -> Vec<String> {
        configured.to_vec()
    }
}

/// Policy that keeps every computed decision.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPolicy;

impl CachePolicy for DefaultPolicy {}

/// Lifetime resolved for one descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifetime {
    Enabled(Duration),
    /// Resolved to zero: caching is off for this call.
    Disabled,
    /// Resolved to a negative value.
    Invalid(ConfigError),
}

/// Resolve the lifetime for `descriptor`: the configured main or secondary
/// lifetime, passed through the policy.
pub fn resolve_lifetime<P: CachePolicy + ?Sized>(
    config: &QueryCacheConfig,
    policy: &P,
    descriptor: &QueryDescriptor,
) -> Lifetime {
    let computed = config.lifetime_secs(descriptor.is_main_query());
    let secs = policy.cache_lifetime(computed, descriptor);
    match secs {
        0 => Lifetime::Disabled,
        s if s < 0 => Lifetime::Invalid(ConfigError::InvalidValue {
            field: "cache_lifetime".to_string(),
            value: s.to_string(),
            reason: "lifetime must not be negative".to_string(),
        }),
        s => Lifetime::Enabled(Duration::from_secs(s as u64)),
    }
}
