//! QueryCache Test Utilities
//!
//! Centralized test infrastructure for the QueryCache workspace:
//! - Stub executors and stores for driving the cache
//! - Proptest generators for descriptors, contexts and payloads
//! - Test fixtures for common scenarios
//! - Custom assertions for cache outcomes

// Re-export core types for convenience
pub use querycache_core::{
    build_key, CacheError, CacheKey, CacheResult, OutputShape, QueryCacheConfig, QueryDescriptor,
    QueryPayload, RequestContext, Row, RowId, TenantId,
};
pub use querycache_storage::{
    BypassReason, CacheOutcome, CacheRead, CacheStats, CacheStore, CacheValue, DefaultPolicy,
    InMemoryCacheStore, QueryCache, QueryExecutor, StoredEntry, TenantScopedKey,
};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// ============================================================================
// STUB EXECUTOR
// ============================================================================

/// Error returned by [`CountingExecutor`] when told to fail.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("stub execution failed: {0}")]
pub struct StubExecutionError(pub String);

/// Executor that returns canned results and counts every call.
#[derive(Debug, Default)]
pub struct CountingExecutor {
    rows: Vec<Row>,
    ids: Vec<RowId>,
    count: u64,
    fail_queries: AtomicBool,
    fail_count: AtomicBool,
    row_calls: AtomicUsize,
    id_calls: AtomicUsize,
    count_calls: AtomicUsize,
    executed: Mutex<Vec<String>>,
}

impl CountingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(mut self, rows: Vec<Row>) -> Self {
        self.rows = rows;
        self
    }

    pub fn with_ids(mut self, ids: Vec<RowId>) -> Self {
        self.ids = ids;
        self
    }

    /// Value returned by the found-rows count.
    pub fn with_count(mut self, count: u64) -> Self {
        self.count = count;
        self
    }

    /// Make row and id queries fail from now on.
    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// Make the found-rows count fail from now on.
    pub fn fail_count(&self, fail: bool) {
        self.fail_count.store(fail, Ordering::SeqCst);
    }

    pub fn row_calls(&self) -> usize {
        self.row_calls.load(Ordering::SeqCst)
    }

    pub fn id_calls(&self) -> usize {
        self.id_calls.load(Ordering::SeqCst)
    }

    pub fn count_calls(&self) -> usize {
        self.count_calls.load(Ordering::SeqCst)
    }

    /// Row and id queries executed so far.
    pub fn query_calls(&self) -> usize {
        self.row_calls() + self.id_calls()
    }

    /// Every call, in order. Count queries are recorded as `FOUND_ROWS`.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().map(|e| e.clone()).unwrap_or_default()
    }

    fn record(&self, sql: &str) {
        if let Ok(mut executed) = self.executed.lock() {
            executed.push(sql.to_string());
        }
    }

    fn check_queries(&self, sql: &str) -> Result<(), StubExecutionError> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(StubExecutionError(sql.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl QueryExecutor for CountingExecutor {
    type Error = StubExecutionError;

    async fn execute_for_rows(&self, sql: &str) -> Result<Vec<Row>, StubExecutionError> {
        self.row_calls.fetch_add(1, Ordering::SeqCst);
        self.record(sql);
        self.check_queries(sql)?;
        Ok(self.rows.clone())
    }

    async fn execute_for_ids(&self, sql: &str) -> Result<Vec<RowId>, StubExecutionError> {
        self.id_calls.fetch_add(1, Ordering::SeqCst);
        self.record(sql);
        self.check_queries(sql)?;
        Ok(self.ids.clone())
    }

    async fn execute_scalar_count(&self) -> Result<u64, StubExecutionError> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        self.record("FOUND_ROWS");
        if self.fail_count.load(Ordering::SeqCst) {
            return Err(StubExecutionError("FOUND_ROWS".to_string()));
        }
        Ok(self.count)
    }
}

// ============================================================================
// FAILING STORE
// ============================================================================

/// Store whose every operation fails. Claims to be persistent so the cache
/// stays active and the failure paths are exercised.
#[derive(Debug, Default)]
pub struct FailingStore {
    attempts: AtomicUsize,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of get/set calls made against the store.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheStore for FailingStore {
    async fn get<T: CacheValue>(&self, _key: &TenantScopedKey) -> CacheResult<Option<StoredEntry<T>>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::unavailable("store offline"))
    }

    async fn set<T: CacheValue>(
        &self,
        _key: &TenantScopedKey,
        _value: &T,
        _ttl: Duration,
    ) -> CacheResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::unavailable("store offline"))
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        Err(CacheError::unavailable("store offline"))
    }
}

// ============================================================================
// TRACING
// ============================================================================

/// Install a test subscriber honouring `RUST_LOG`. Safe to call from every
/// test; only the first call installs anything.
pub fn init_test_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("querycache_storage=debug,warn"));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating cache inputs.

    use super::*;
    use proptest::prelude::*;

    /// Generate a tenant id.
    pub fn arb_tenant_id() -> impl Strategy<Value = TenantId> {
        (1u64..10_000).prop_map(TenantId::new)
    }

    /// Generate a pair of distinct tenant ids.
    pub fn arb_distinct_tenants() -> impl Strategy<Value = (TenantId, TenantId)> {
        (1u64..10_000, 1u64..10_000)
            .prop_filter("tenants must differ", |(a, b)| a != b)
            .prop_map(|(a, b)| (TenantId::new(a), TenantId::new(b)))
    }

    /// Generate a prefixed table or column identifier. The prefix keeps
    /// generated names from ever reading as a bare SQL keyword.
    pub fn arb_identifier() -> impl Strategy<Value = String> {
        "[a-z][a-z_]{0,15}".prop_map(|name| format!("wp_{}", name))
    }

    /// Generate a query with no LIMIT clause.
    pub fn arb_unbounded_sql() -> impl Strategy<Value = String> {
        (arb_identifier(), arb_identifier(), 0u32..1000).prop_map(|(table, column, value)| {
            format!("SELECT * FROM {} WHERE {} = {}", table, column, value)
        })
    }

    /// Generate a paginated query.
    pub fn arb_paged_sql() -> impl Strategy<Value = String> {
        (arb_unbounded_sql(), 0u32..500, 1u32..100)
            .prop_map(|(base, offset, count)| format!("{} LIMIT {}, {}", base, offset, count))
    }

    pub fn arb_output_shape() -> impl Strategy<Value = OutputShape> {
        prop_oneof![Just(OutputShape::FullRows), Just(OutputShape::IdsOnly)]
    }

    /// Generate a descriptor with every eligibility flag clear.
    pub fn arb_cacheable_descriptor() -> impl Strategy<Value = QueryDescriptor> {
        (
            prop_oneof![arb_paged_sql(), arb_unbounded_sql()],
            any::<bool>(),
            arb_output_shape(),
        )
            .prop_map(|(sql, is_main, shape)| {
                QueryDescriptor::new(sql)
                    .with_main_query(is_main)
                    .with_output_shape(shape)
                    .with_resource_types(["post"])
            })
    }

    /// Generate a descriptor or context that fails exactly one eligibility
    /// rule.
    pub fn arb_ineligible_request(
    ) -> impl Strategy<Value = (QueryDescriptor, RequestContext, BypassReason)> {
        (arb_paged_sql(), arb_tenant_id(), 0u8..4).prop_map(|(sql, tenant, rule)| {
            let descriptor = QueryDescriptor::new(sql);
            let ctx = RequestContext::new(tenant);
            match rule {
                0 => (descriptor, ctx.with_administrative(true), BypassReason::Administrative),
                1 => (descriptor.with_opt_out(true), ctx, BypassReason::OptedOut),
                2 => (descriptor.with_search(true), ctx, BypassReason::Search),
                _ => (descriptor, ctx.with_filters_suppressed(true), BypassReason::FiltersSuppressed),
            }
        })
    }

    /// Generate a public request context.
    pub fn arb_public_context() -> impl Strategy<Value = RequestContext> {
        arb_tenant_id().prop_map(RequestContext::new)
    }

    /// Generate a non-empty id list.
    pub fn arb_ids() -> impl Strategy<Value = Vec<RowId>> {
        prop::collection::vec(1u64..1_000_000, 1..20)
    }

    /// Generate a found-rows count.
    pub fn arb_count() -> impl Strategy<Value = u64> {
        0u64..100_000
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built inputs for common scenarios.

    use super::*;
    use std::sync::Arc;

    /// Configuration that keeps the cache active over the in-memory store.
    pub fn active_config() -> QueryCacheConfig {
        QueryCacheConfig::default().with_ephemeral_store_allowed(true)
    }

    /// An active cache over a fresh in-memory store.
    pub fn memory_cache() -> QueryCache<InMemoryCacheStore> {
        QueryCache::new(
            Arc::new(InMemoryCacheStore::new()),
            Arc::new(DefaultPolicy),
            active_config(),
        )
    }

    /// The first page of a post listing.
    pub fn paged_listing() -> QueryDescriptor {
        QueryDescriptor::new(
            "SELECT posts.* FROM posts WHERE post_type = 'post' AND post_status = 'publish' \
             ORDER BY post_date DESC LIMIT 0, 10",
        )
        .with_main_query(true)
        .with_resource_types(["post"])
    }

    /// The same listing without pagination.
    pub fn unbounded_listing() -> QueryDescriptor {
        QueryDescriptor::new(
            "SELECT posts.* FROM posts WHERE post_type = 'post' AND post_status = 'publish' \
             ORDER BY post_date DESC",
        )
        .with_resource_types(["post"])
    }

    pub fn public_context(tenant: u64) -> RequestContext {
        RequestContext::new(TenantId::new(tenant))
    }

    pub fn admin_context(tenant: u64) -> RequestContext {
        public_context(tenant).with_administrative(true)
    }

    /// `n` rows shaped like post records.
    pub fn sample_rows(n: u64) -> Vec<Row> {
        (1..=n)
            .map(|id| {
                let mut row = Row::new();
                row.insert("ID".into(), serde_json::json!(id));
                row.insert("post_title".into(), serde_json::json!(format!("Post {}", id)));
                row.insert("post_type".into(), serde_json::json!("post"));
                row
            })
            .collect()
    }

    /// Executor serving `n` rows, ids `1..=n`, and a total of `total`.
    pub fn listing_executor(n: u64, total: u64) -> CountingExecutor {
        CountingExecutor::new()
            .with_rows(sample_rows(n))
            .with_ids((1..=n).collect())
            .with_count(total)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on how a read was served.

    use super::*;

    /// Assert that a read was served from the cache.
    #[track_caller]
    pub fn assert_cache_hit<T: std::fmt::Debug>(read: &CacheRead<T>) {
        assert!(
            read.was_cache_hit(),
            "Expected cache hit, got {:?}",
            read.outcome()
        );
    }

    /// Assert that a read was executed and written to the cache.
    #[track_caller]
    pub fn assert_stored<T: std::fmt::Debug>(read: &CacheRead<T>) {
        assert_eq!(read.outcome(), CacheOutcome::Stored, "Expected stored miss");
    }

    /// Assert that a read bypassed the cache for `reason`.
    #[track_caller]
    pub fn assert_bypassed<T: std::fmt::Debug>(read: &CacheRead<T>, reason: BypassReason) {
        assert_eq!(
            read.bypass_reason(),
            Some(reason),
            "Expected bypass for {}, got {:?}",
            reason,
            read.outcome()
        );
    }

    /// Assert that a CacheResult is an unavailable-store error.
    #[track_caller]
    pub fn assert_unavailable<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(CacheError::Unavailable { .. }) => {}
            other => panic!("Expected Unavailable error, got: {:?}", other),
        }
    }
}
