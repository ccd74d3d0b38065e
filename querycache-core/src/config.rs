//! Cache configuration
//!
//! Loaded from environment variables with defaults matching the stock
//! lifetimes: five minutes for a request's main query, ten for everything
//! else.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default cache group prefix.
pub const DEFAULT_GROUP_BASE: &str = "query_cache";

/// Default lifetime of a main query's results, in seconds.
pub const DEFAULT_MAIN_QUERY_TTL_SECS: i64 = 300;

/// Default lifetime of a secondary query's results, in seconds.
pub const DEFAULT_SECONDARY_QUERY_TTL_SECS: i64 = 600;

/// Query cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryCacheConfig {
    /// Master switch. When false every query goes straight to the executor.
    pub enabled: bool,

    /// Prefix of the per-tenant cache groups.
    pub group_base: String,

    /// Lifetime for main queries. Zero disables caching for them.
    pub main_query_ttl_secs: i64,

    /// Lifetime for secondary queries. Zero disables caching for them.
    pub secondary_query_ttl_secs: i64,

    /// Resource types whose queries are never cached.
    pub excluded_resource_types: Vec<String>,

    /// Cache even when the store does not outlive the process.
    pub allow_ephemeral_store: bool,
}

impl Default for QueryCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            group_base: DEFAULT_GROUP_BASE.to_string(),
            main_query_ttl_secs: DEFAULT_MAIN_QUERY_TTL_SECS,
            secondary_query_ttl_secs: DEFAULT_SECONDARY_QUERY_TTL_SECS,
            excluded_resource_types: Vec::new(),
            allow_ephemeral_store: false,
        }
    }
}

impl QueryCacheConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_group_base(mut self, base: impl Into<String>) -> Self {
        self.group_base = base.into();
        self
    }

    pub fn with_main_query_ttl(mut self, secs: i64) -> Self {
        self.main_query_ttl_secs = secs;
        self
    }

    pub fn with_secondary_query_ttl(mut self, secs: i64) -> Self {
        self.secondary_query_ttl_secs = secs;
        self
    }

    pub fn with_excluded_resource_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_resource_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_ephemeral_store_allowed(mut self, allowed: bool) -> Self {
        self.allow_ephemeral_store = allowed;
        self
    }

    /// Create a config from environment variables.
    ///
    /// Environment variables:
    /// - `QUERYCACHE_ENABLED`: "true" or "false" (default: true)
    /// - `QUERYCACHE_GROUP_BASE`: cache group prefix (default: "query_cache")
    /// - `QUERYCACHE_MAIN_QUERY_TTL_SECS`: main query lifetime (default: 300)
    /// - `QUERYCACHE_SECONDARY_QUERY_TTL_SECS`: secondary query lifetime (default: 600)
    /// - `QUERYCACHE_EXCLUDED_RESOURCE_TYPES`: comma-separated resource types
    /// - `QUERYCACHE_ALLOW_EPHEMERAL_STORE`: "true" or "false" (default: false)
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading through `lookup`.
    ///
    /// Unparseable values fall back to the default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let enabled = lookup("QUERYCACHE_ENABLED")
            .map(|s| s.trim().to_lowercase() != "false")
            .unwrap_or(defaults.enabled);

        let group_base = lookup("QUERYCACHE_GROUP_BASE")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.group_base);

        let main_query_ttl_secs = lookup("QUERYCACHE_MAIN_QUERY_TTL_SECS")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(defaults.main_query_ttl_secs);

        let secondary_query_ttl_secs = lookup("QUERYCACHE_SECONDARY_QUERY_TTL_SECS")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(defaults.secondary_query_ttl_secs);

        let excluded_resource_types = lookup("QUERYCACHE_EXCLUDED_RESOURCE_TYPES")
            .map(|s| {
                s.split(',')
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let allow_ephemeral_store = lookup("QUERYCACHE_ALLOW_EPHEMERAL_STORE")
            .map(|s| s.trim().to_lowercase() == "true")
            .unwrap_or(defaults.allow_ephemeral_store);

        Self {
            enabled,
            group_base,
            main_query_ttl_secs,
            secondary_query_ttl_secs,
            excluded_resource_types,
            allow_ephemeral_store,
        }
    }

    /// Check the settings the whole cache depends on.
    ///
    /// Lifetimes are checked separately by
    /// [`validate_lifetimes`](Self::validate_lifetimes): a bad lifetime only
    /// disables caching for the queries that use it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.group_base.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "group_base".to_string(),
            });
        }
        Ok(())
    }

    /// Check the configured lifetimes.
    pub fn validate_lifetimes(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("main_query_ttl_secs", self.main_query_ttl_secs),
            ("secondary_query_ttl_secs", self.secondary_query_ttl_secs),
        ] {
            if value < 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: value.to_string(),
                    reason: "lifetime must not be negative".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Configured lifetime for a main or secondary query.
    pub fn lifetime_secs(&self, is_main_query: bool) -> i64 {
        if is_main_query {
            self.main_query_ttl_secs
        } else {
            self.secondary_query_ttl_secs
        }
    }
}
