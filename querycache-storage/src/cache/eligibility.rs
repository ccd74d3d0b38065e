//! Decides whether a query may be served from or written to the cache.

use std::fmt;

use querycache_core::{QueryDescriptor, RequestContext};

/// Why a query was executed without the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BypassReason {
    /// The cache is switched off or its store is process-local.
    Inactive,
    /// Administrative requests always see live data.
    Administrative,
    /// The caller opted this query out.
    OptedOut,
    /// Search results are never cached.
    Search,
    /// Host extension points are bypassed, so caching is unsafe.
    FiltersSuppressed,
    /// The query touches an excluded resource type.
    ExcludedResourceType,
    /// The injected policy vetoed caching.
    Policy,
    /// The lifetime resolved to zero or an invalid value.
    LifetimeDisabled,
    /// The store failed and the query fell through to the executor.
    StoreUnavailable,
}

impl BypassReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BypassReason::Inactive => "inactive",
            BypassReason::Administrative => "administrative",
            BypassReason::OptedOut => "opted_out",
            BypassReason::Search => "search",
            BypassReason::FiltersSuppressed => "filters_suppressed",
            BypassReason::ExcludedResourceType => "excluded_resource_type",
            BypassReason::Policy => "policy",
            BypassReason::LifetimeDisabled => "lifetime_disabled",
            BypassReason::StoreUnavailable => "store_unavailable",
        }
    }
}

impl fmt::Display for BypassReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Apply the built-in rules, in order, stopping at the first failure.
///
/// `excluded` is the exclusion list after the policy has had its say. The
/// policy's final override is applied by the caller.
pub fn check(
    descriptor: &QueryDescriptor,
    ctx: &RequestContext,
    excluded: &[String],
) -> Result<(), BypassReason> {
    if ctx.is_administrative {
        return Err(BypassReason::Administrative);
    }
    if descriptor.opt_out() {
        return Err(BypassReason::OptedOut);
    }
    if descriptor.is_search() {
        return Err(BypassReason::Search);
    }
    if ctx.filters_suppressed {
        return Err(BypassReason::FiltersSuppressed);
    }
    if descriptor
        .resource_types()
        .iter()
        .any(|t| excluded.iter().any(|e| e == t))
    {
        return Err(BypassReason::ExcludedResourceType);
    }
    Ok(())
}
