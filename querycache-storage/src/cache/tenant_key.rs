//! Tenant-scoped cache keys.
//!
//! A `TenantScopedKey` cannot be built without a tenant id and a namespace
//! kind, so a results lookup can never read another tenant's entries or a
//! row-count entry.

use querycache_core::{CacheKey, TenantId};

/// Separator byte between the tenant id and the rest of the key.
const SEPARATOR: u8 = 0xFF;

/// Fixed-size part of an encoded key: tenant, separator, kind, digest.
const FIXED_LEN: usize = 8 + 1 + 1 + CacheKey::LEN;

/// The two independent namespaces every tenant has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Materialized result sets.
    Results,
    /// Found-rows counts.
    RowCounts,
}

impl Namespace {
    fn to_byte(self) -> u8 {
        match self {
            Namespace::Results => 0,
            Namespace::RowCounts => 1,
        }
    }

    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Namespace::Results),
            1 => Some(Namespace::RowCounts),
            _ => None,
        }
    }
}

/// Name of a tenant's results group, e.g. `query_cache_3`.
pub fn cache_namespace(group_base: &str, tenant: TenantId) -> String {
    format!("{}_{}", group_base, tenant)
}

/// Name of a tenant's row-count group, e.g. `query_cache_3_rows`.
pub fn row_count_namespace(group_base: &str, tenant: TenantId) -> String {
    format!("{}_rows", cache_namespace(group_base, tenant))
}

/// A cache key that is scoped to a specific tenant and namespace.
///
/// # Binary Format
///
/// [`encode`](Self::encode) produces:
/// - Bytes 0-7: tenant id (big endian)
/// - Byte 8: separator (0xFF)
/// - Byte 9: namespace kind
/// - Bytes 10-41: query digest
/// - Bytes 42..: group name (UTF-8)
///
/// Keys sort by tenant first, so a tenant's entries form one contiguous
/// range in ordered stores.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TenantScopedKey {
    /// Private inner data - cannot be constructed externally
    inner: TenantKeyInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TenantKeyInner {
    tenant: TenantId,
    kind: Namespace,
    group: String,
    key: CacheKey,
}

impl TenantScopedKey {
    /// Create a key in `kind`'s group for `tenant`.
    pub fn new(group_base: &str, tenant: TenantId, kind: Namespace, key: CacheKey) -> Self {
        let group = match kind {
            Namespace::Results => cache_namespace(group_base, tenant),
            Namespace::RowCounts => row_count_namespace(group_base, tenant),
        };
        Self {
            inner: TenantKeyInner {
                tenant,
                kind,
                group,
                key,
            },
        }
    }

    /// Key in the tenant's results group.
    pub fn results(group_base: &str, tenant: TenantId, key: CacheKey) -> Self {
        Self::new(group_base, tenant, Namespace::Results, key)
    }

    /// Key in the tenant's row-count group.
    pub fn row_counts(group_base: &str, tenant: TenantId, key: CacheKey) -> Self {
        Self::new(group_base, tenant, Namespace::RowCounts, key)
    }

    pub fn tenant(&self) -> TenantId {
        self.inner.tenant
    }

    pub fn kind(&self) -> Namespace {
        self.inner.kind
    }

    /// Group name, for stores that partition by group.
    pub fn namespace(&self) -> &str {
        &self.inner.group
    }

    pub fn key(&self) -> &CacheKey {
        &self.inner.key
    }

    /// Encode this key for ordered byte-keyed stores.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(FIXED_LEN + self.inner.group.len());
        bytes.extend_from_slice(&self.inner.tenant.get().to_be_bytes());
        bytes.push(SEPARATOR);
        bytes.push(self.inner.kind.to_byte());
        bytes.extend_from_slice(self.inner.key.as_bytes());
        bytes.extend_from_slice(self.inner.group.as_bytes());
        bytes
    }

    /// Decode a key from bytes.
    ///
    /// Returns `None` if the slice is too short, the separator is wrong, the
    /// namespace byte is unknown or the group name is not UTF-8.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < FIXED_LEN || bytes[8] != SEPARATOR {
            return None;
        }

        let tenant_bytes: [u8; 8] = bytes[0..8].try_into().ok()?;
        let tenant = TenantId::new(u64::from_be_bytes(tenant_bytes));
        let kind = Namespace::from_byte(bytes[9])?;
        let key_bytes: [u8; CacheKey::LEN] = bytes[10..FIXED_LEN].try_into().ok()?;
        let group = std::str::from_utf8(&bytes[FIXED_LEN..]).ok()?.to_string();

        Some(Self {
            inner: TenantKeyInner {
                tenant,
                kind,
                group,
                key: CacheKey::from_bytes(key_bytes),
            },
        })
    }

    /// Prefix shared by every encoded key of `tenant`.
    pub fn tenant_prefix(tenant: TenantId) -> [u8; 9] {
        let mut prefix = [0u8; 9];
        prefix[0..8].copy_from_slice(&tenant.get().to_be_bytes());
        prefix[8] = SEPARATOR;
        prefix
    }
}
