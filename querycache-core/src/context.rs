//! Per-request context the eligibility filter inspects.

use crate::identity::TenantId;

/// Resolves the tenant the current request runs under.
pub trait TenantScopeResolver {
    fn current_tenant_id(&self) -> TenantId;
}

/// Resolver that always answers with the same tenant (single-site installs).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedTenant(pub TenantId);

impl TenantScopeResolver for FixedTenant {
    fn current_tenant_id(&self) -> TenantId {
        self.0
    }
}

/// Facts about the request a query is executed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    /// Tenant whose cache groups this request reads and writes.
    pub tenant: TenantId,
    /// Request comes from the administrative interface.
    pub is_administrative: bool,
    /// Host extension points are bypassed for this query.
    pub filters_suppressed: bool,
}

impl RequestContext {
    /// Public, filter-enabled context for the given tenant.
    pub fn new(tenant: TenantId) -> Self {
        Self {
            tenant,
            is_administrative: false,
            filters_suppressed: false,
        }
    }

    /// Build a context for whichever tenant the resolver reports.
    pub fn resolve<R: TenantScopeResolver + ?Sized>(resolver: &R) -> Self {
        Self::new(resolver.current_tenant_id())
    }

    pub fn with_administrative(mut self, is_administrative: bool) -> Self {
        self.is_administrative = is_administrative;
        self
    }

    pub fn with_filters_suppressed(mut self, filters_suppressed: bool) -> Self {
        self.filters_suppressed = filters_suppressed;
        self
    }
}
