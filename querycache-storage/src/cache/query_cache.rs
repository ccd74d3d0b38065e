//! Read-through query result cache.
//!
//! [`QueryCache`] wraps the host's query execution. A cacheable query is
//! looked up in the tenant's results group; on a hit the stored payload is
//! returned without touching the executor, on a miss the query is executed,
//! persisted, and its found-rows count stored alongside.

use std::borrow::Cow;
use std::sync::Arc;

use querycache_core::{
    OutputShape, QueryCacheConfig, QueryDescriptor, QueryPayload, RequestContext,
};
use tracing::{debug, info, warn};

use super::eligibility::{self, BypassReason};
use super::found_rows::{count_literal_query, need_found_rows, row_count_key};
use super::policy::{resolve_lifetime, CachePolicy, DefaultPolicy, Lifetime};
use super::read::{CacheOutcome, CacheRead};
use super::tenant_key::TenantScopedKey;
use super::traits::{CacheStore, QueryExecutor};

/// Query result cache in front of a [`QueryExecutor`].
///
/// Construct once at startup and hand clones to the query pipeline; clones
/// share the store and policy.
///
/// # Type Parameters
///
/// - `S`: The store results and counts are kept in
/// - `P`: The policy overriding eligibility, lifetimes and exclusions
///
/// # Example
///
/// ```ignore
/// let cache = QueryCache::new(store, Arc::new(DefaultPolicy), QueryCacheConfig::from_env());
///
/// let read = cache.materialize(&descriptor, &ctx, &executor).await?;
/// let posts = read.into_value();
///
/// // Later, when the pipeline asks for the total
/// let sql = cache.found_rows_query("SELECT FOUND_ROWS()", &descriptor, &ctx).await;
/// ```
pub struct QueryCache<S, P = DefaultPolicy>
where
    S: CacheStore,
    P: CachePolicy,
{
    store: Arc<S>,
    policy: Arc<P>,
    config: QueryCacheConfig,
    /// False when caching is switched off or the store is process-local.
    active: bool,
}

impl<S> QueryCache<S, DefaultPolicy>
where
    S: CacheStore,
{
    /// Create a cache with the default policy and configuration.
    pub fn with_defaults(store: Arc<S>) -> Self {
        Self::new(store, Arc::new(DefaultPolicy), QueryCacheConfig::default())
    }
}

impl<S, P> QueryCache<S, P>
where
    S: CacheStore,
    P: CachePolicy,
{
    /// Create a new query cache.
    ///
    /// Never fails: a missing group base or a store that does not outlive
    /// the process leaves the cache inactive, and every query then goes
    /// straight to the executor. A negative lifetime is logged here and
    /// only bypasses the queries it applies to.
    pub fn new(store: Arc<S>, policy: Arc<P>, config: QueryCacheConfig) -> Self {
        if let Err(e) = config.validate_lifetimes() {
            warn!(error = %e, "Invalid cache lifetime, affected queries will not be cached");
        }

        let active = match config.validate() {
            Err(e) => {
                warn!(error = %e, "Invalid query cache configuration, caching disabled");
                false
            }
            Ok(()) if !config.enabled => false,
            Ok(()) if !store.is_persistent() && !config.allow_ephemeral_store => {
                warn!("Cache store is not persistent, caching disabled");
                false
            }
            Ok(()) => true,
        };

        info!(
            active,
            group_base = %config.group_base,
            main_query_ttl_secs = config.main_query_ttl_secs,
            secondary_query_ttl_secs = config.secondary_query_ttl_secs,
            "Query cache initialized"
        );

        Self {
            store,
            policy,
            config,
            active,
        }
    }

    /// Whether queries are served through the cache at all.
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn config(&self) -> &QueryCacheConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Run the eligibility rules and the policy override.
    ///
    /// `Err` names the first rule that failed, or [`BypassReason::Policy`]
    /// when the policy vetoed an otherwise cacheable query.
    pub fn eligibility(
        &self,
        descriptor: &QueryDescriptor,
        ctx: &RequestContext,
    ) -> Result<(), BypassReason> {
        if !self.active {
            return Err(BypassReason::Inactive);
        }

        let excluded = self
            .policy
            .excluded_resource_types(&self.config.excluded_resource_types);
        let computed = eligibility::check(descriptor, ctx, &excluded);

        match (computed, self.policy.should_cache(computed.is_ok(), descriptor)) {
            (_, true) => Ok(()),
            (Err(reason), false) => Err(reason),
            (Ok(()), false) => Err(BypassReason::Policy),
        }
    }

    /// Whether `descriptor` may be cached in this request.
    pub fn should_cache(&self, descriptor: &QueryDescriptor, ctx: &RequestContext) -> bool {
        self.eligibility(descriptor, ctx).is_ok()
    }

    /// Lifetime of `descriptor`'s entries.
    pub fn cache_time(&self, descriptor: &QueryDescriptor) -> Lifetime {
        resolve_lifetime(&self.config, self.policy.as_ref(), descriptor)
    }

    /// Key of `descriptor`'s results entry for this request's tenant.
    pub fn results_key(&self, descriptor: &QueryDescriptor, ctx: &RequestContext) -> TenantScopedKey {
        TenantScopedKey::results(
            &self.config.group_base,
            ctx.tenant,
            querycache_core::build_key(descriptor.text()),
        )
    }

    /// Key of `descriptor`'s row-count entry for this request's tenant.
    pub fn row_count_key(
        &self,
        descriptor: &QueryDescriptor,
        ctx: &RequestContext,
    ) -> TenantScopedKey {
        TenantScopedKey::row_counts(&self.config.group_base, ctx.tenant, row_count_key(descriptor))
    }

    /// Materialize `descriptor`'s results, from the cache when possible.
    ///
    /// On a hit the stored payload is returned as-is and `executor` is not
    /// called. The output shape is not part of the key, so a hit may carry
    /// a different shape than requested; that is logged and returned
    /// unchanged.
    ///
    /// On a miss the query runs and, when the query needs one, the
    /// found-rows count is fetched right after it. Both are then stored for
    /// the resolved lifetime. A failed count query stores nothing.
    ///
    /// Cache failures never fail the call. Executor errors are returned
    /// untouched.
    pub async fn materialize<E>(
        &self,
        descriptor: &QueryDescriptor,
        ctx: &RequestContext,
        executor: &E,
    ) -> Result<CacheRead<QueryPayload>, E::Error>
    where
        E: QueryExecutor,
    {
        if let Err(reason) = self.eligibility(descriptor, ctx) {
            debug!(tenant = %ctx.tenant, reason = %reason, "Query not cacheable");
            return self.execute_uncached(descriptor, executor, reason).await;
        }

        let key = self.results_key(descriptor, ctx);

        match self.store.get::<QueryPayload>(&key).await {
            Ok(Some(entry)) => {
                if entry.value.shape() != descriptor.output_shape() {
                    warn!(
                        tenant = %ctx.tenant,
                        key = %key.key(),
                        cached = ?entry.value.shape(),
                        requested = ?descriptor.output_shape(),
                        "Cached payload shape differs from requested shape"
                    );
                }
                debug!(tenant = %ctx.tenant, key = %key.key(), "Query cache hit");
                return Ok(CacheRead::from_cache(entry.value, entry.stored_at));
            }
            Ok(None) => {
                debug!(tenant = %ctx.tenant, key = %key.key(), "Query cache miss");
            }
            Err(e) => {
                warn!(
                    tenant = %ctx.tenant,
                    key = %key.key(),
                    error = %e,
                    "Cache read failed, falling through to executor"
                );
            }
        }

        let ttl = match self.cache_time(descriptor) {
            Lifetime::Enabled(ttl) => ttl,
            Lifetime::Disabled => {
                debug!(tenant = %ctx.tenant, "Cache lifetime is zero, not persisting");
                return self
                    .execute_uncached(descriptor, executor, BypassReason::LifetimeDisabled)
                    .await;
            }
            Lifetime::Invalid(e) => {
                warn!(tenant = %ctx.tenant, error = %e, "Invalid cache lifetime, not persisting");
                return self
                    .execute_uncached(descriptor, executor, BypassReason::LifetimeDisabled)
                    .await;
            }
        };

        let payload = execute(descriptor, executor).await?;

        // The count must directly follow the query it counts. Nothing is
        // persisted until both are in hand.
        let count = if need_found_rows(descriptor, Some(&payload)) {
            Some(executor.execute_scalar_count().await?)
        } else {
            None
        };

        if let Err(e) = self.store.set(&key, &payload, ttl).await {
            warn!(
                tenant = %ctx.tenant,
                key = %key.key(),
                error = %e,
                "Cache write failed, returning uncached results"
            );
            return Ok(CacheRead::from_executor(
                payload,
                CacheOutcome::Bypassed(BypassReason::StoreUnavailable),
            ));
        }

        if let Some(count) = count {
            let count_key = self.row_count_key(descriptor, ctx);
            if let Err(e) = self.store.set(&count_key, &count, ttl).await {
                warn!(tenant = %ctx.tenant, key = %count_key.key(), error = %e, "Row count write failed");
            }
        }

        Ok(CacheRead::from_executor(payload, CacheOutcome::Stored))
    }

    /// Cached found-rows count for `descriptor`, if any.
    pub async fn get_found_rows(
        &self,
        descriptor: &QueryDescriptor,
        ctx: &RequestContext,
    ) -> Option<u64> {
        if !self.active {
            return None;
        }

        let key = self.row_count_key(descriptor, ctx);
        match self.store.get::<u64>(&key).await {
            Ok(entry) => entry.map(|e| e.value),
            Err(e) => {
                warn!(tenant = %ctx.tenant, key = %key.key(), error = %e, "Row count read failed");
                None
            }
        }
    }

    /// Store a found-rows count for `descriptor`.
    ///
    /// A no-op when the descriptor does not need one or its lifetime is
    /// disabled.
    pub async fn save_found_rows(&self, count: u64, descriptor: &QueryDescriptor, ctx: &RequestContext) {
        if !self.active || !need_found_rows(descriptor, None) {
            return;
        }

        let ttl = match self.cache_time(descriptor) {
            Lifetime::Enabled(ttl) => ttl,
            Lifetime::Disabled | Lifetime::Invalid(_) => return,
        };

        let key = self.row_count_key(descriptor, ctx);
        if let Err(e) = self.store.set(&key, &count, ttl).await {
            warn!(tenant = %ctx.tenant, key = %key.key(), error = %e, "Row count write failed");
        }
    }

    /// Rewrite the pipeline's found-rows query.
    ///
    /// Returns `SELECT <count>` when a count is cached for `descriptor`,
    /// otherwise `sql` unchanged.
    pub async fn found_rows_query<'a>(
        &self,
        sql: &'a str,
        descriptor: &QueryDescriptor,
        ctx: &RequestContext,
    ) -> Cow<'a, str> {
        if !need_found_rows(descriptor, None) || self.eligibility(descriptor, ctx).is_err() {
            return Cow::Borrowed(sql);
        }

        match self.get_found_rows(descriptor, ctx).await {
            Some(count) => {
                debug!(tenant = %ctx.tenant, count, "Serving found rows from cache");
                Cow::Owned(count_literal_query(count))
            }
            None => Cow::Borrowed(sql),
        }
    }

    async fn execute_uncached<E>(
        &self,
        descriptor: &QueryDescriptor,
        executor: &E,
        reason: BypassReason,
    ) -> Result<CacheRead<QueryPayload>, E::Error>
    where
        E: QueryExecutor,
    {
        let payload = execute(descriptor, executor).await?;
        Ok(CacheRead::from_executor(payload, CacheOutcome::Bypassed(reason)))
    }
}

impl<S, P> Clone for QueryCache<S, P>
where
    S: CacheStore,
    P: CachePolicy,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            policy: Arc::clone(&self.policy),
            config: self.config.clone(),
            active: self.active,
        }
    }
}

/// Run `descriptor` in the shape it asks for.
async fn execute<E>(descriptor: &QueryDescriptor, executor: &E) -> Result<QueryPayload, E::Error>
where
    E: QueryExecutor,
{
    match descriptor.output_shape() {
        OutputShape::IdsOnly => executor
            .execute_for_ids(descriptor.text())
            .await
            .map(QueryPayload::Ids),
        OutputShape::FullRows => executor
            .execute_for_rows(descriptor.text())
            .await
            .map(QueryPayload::Rows),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory_backend::InMemoryCacheStore;
    use crate::cache::traits::CacheStore;
    use async_trait::async_trait;
    use querycache_core::{Row, RowId, TenantId};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, thiserror::Error)]
    #[error("executor failed")]
    struct ExecError;

    #[derive(Default)]
    struct TestExecutor {
        rows: AtomicUsize,
        ids: AtomicUsize,
        counts: AtomicUsize,
    }

    impl TestExecutor {
        fn calls(&self) -> (usize, usize, usize) {
            (
                self.rows.load(Ordering::SeqCst),
                self.ids.load(Ordering::SeqCst),
                self.counts.load(Ordering::SeqCst),
            )
        }
    }

    #[async_trait]
    impl QueryExecutor for TestExecutor {
        type Error = ExecError;

        async fn execute_for_rows(&self, _sql: &str) -> Result<Vec<Row>, ExecError> {
            self.rows.fetch_add(1, Ordering::SeqCst);
            let mut row = Row::new();
            row.insert("ID".into(), serde_json::json!(1));
            Ok(vec![row])
        }

        async fn execute_for_ids(&self, _sql: &str) -> Result<Vec<RowId>, ExecError> {
            self.ids.fetch_add(1, Ordering::SeqCst);
            Ok(vec![1, 2, 3])
        }

        async fn execute_scalar_count(&self) -> Result<u64, ExecError> {
            self.counts.fetch_add(1, Ordering::SeqCst);
            Ok(57)
        }
    }

    struct NeverCache;

    impl CachePolicy for NeverCache {
        fn should_cache(&self, _computed: bool, _descriptor: &QueryDescriptor) -> bool {
            false
        }
    }

    struct AlwaysCache;

    impl CachePolicy for AlwaysCache {
        fn should_cache(&self, _computed: bool, _descriptor: &QueryDescriptor) -> bool {
            true
        }
    }

    fn config() -> QueryCacheConfig {
        QueryCacheConfig::default().with_ephemeral_store_allowed(true)
    }

    fn cache() -> QueryCache<InMemoryCacheStore> {
        QueryCache::new(Arc::new(InMemoryCacheStore::new()), Arc::new(DefaultPolicy), config())
    }

    fn ctx() -> RequestContext {
        RequestContext::new(TenantId::new(1))
    }

    fn paged() -> QueryDescriptor {
        QueryDescriptor::new("SELECT * FROM posts WHERE type = 'post' LIMIT 0, 10")
    }

    #[test]
    fn test_ephemeral_store_inactive_by_default() {
        let cache = QueryCache::with_defaults(Arc::new(InMemoryCacheStore::new()));
        assert!(!cache.is_active());
        assert_eq!(cache.eligibility(&paged(), &ctx()), Err(BypassReason::Inactive));
    }

    #[test]
    fn test_invalid_config_inactive() {
        let config = config().with_group_base("");
        let cache = QueryCache::new(Arc::new(InMemoryCacheStore::new()), Arc::new(DefaultPolicy), config);
        assert!(!cache.is_active());
    }

    #[test]
    fn test_disabled_config_inactive() {
        let config = config().with_enabled(false);
        let cache = QueryCache::new(Arc::new(InMemoryCacheStore::new()), Arc::new(DefaultPolicy), config);
        assert!(!cache.is_active());
    }

    #[test]
    fn test_policy_overrides_eligibility() {
        let store = Arc::new(InMemoryCacheStore::new());
        let never = QueryCache::new(Arc::clone(&store), Arc::new(NeverCache), config());
        assert_eq!(never.eligibility(&paged(), &ctx()), Err(BypassReason::Policy));

        let always = QueryCache::new(store, Arc::new(AlwaysCache), config());
        let search = paged().with_search(true);
        assert!(always.should_cache(&search, &ctx()));
    }

    #[test]
    fn test_policy_cannot_revive_inactive_cache() {
        let always = QueryCache::new(
            Arc::new(InMemoryCacheStore::new()),
            Arc::new(AlwaysCache),
            QueryCacheConfig::default(),
        );
        assert_eq!(always.eligibility(&paged(), &ctx()), Err(BypassReason::Inactive));
    }

    #[test]
    fn test_cache_time_by_query_kind() {
        let cache = cache();
        assert_eq!(
            cache.cache_time(&paged().with_main_query(true)),
            Lifetime::Enabled(Duration::from_secs(300))
        );
        assert_eq!(cache.cache_time(&paged()), Lifetime::Enabled(Duration::from_secs(600)));
    }

    #[tokio::test]
    async fn test_negative_main_lifetime_keeps_secondary_caching() {
        let config = config().with_main_query_ttl(-1);
        let cache = QueryCache::new(Arc::new(InMemoryCacheStore::new()), Arc::new(DefaultPolicy), config);
        assert!(cache.is_active());

        let executor = TestExecutor::default();
        let main = paged().with_main_query(true);
        let read = cache
            .materialize(&main, &ctx(), &executor)
            .await
            .expect("materialize should succeed");
        assert_eq!(read.bypass_reason(), Some(BypassReason::LifetimeDisabled));

        for _ in 0..2 {
            cache
                .materialize(&paged(), &ctx(), &executor)
                .await
                .expect("materialize should succeed");
        }
        assert_eq!(executor.calls(), (2, 0, 1));
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let cache = cache();
        let executor = TestExecutor::default();

        let first = cache
            .materialize(&paged(), &ctx(), &executor)
            .await
            .expect("materialize should succeed");
        assert_eq!(first.outcome(), CacheOutcome::Stored);
        assert_eq!(executor.calls(), (1, 0, 1));

        let second = cache
            .materialize(&paged(), &ctx(), &executor)
            .await
            .expect("materialize should succeed");
        assert!(second.was_cache_hit());
        assert_eq!(second.value(), first.value());
        assert_eq!(executor.calls(), (1, 0, 1));
    }

    #[tokio::test]
    async fn test_ids_shape_uses_id_executor() {
        let cache = cache();
        let executor = TestExecutor::default();
        let d = paged().with_output_shape(OutputShape::IdsOnly);

        let read = cache
            .materialize(&d, &ctx(), &executor)
            .await
            .expect("materialize should succeed");
        assert_eq!(read.value(), &QueryPayload::Ids(vec![1, 2, 3]));
        assert_eq!(executor.calls(), (0, 1, 1));
    }

    #[tokio::test]
    async fn test_found_rows_rewritten_after_miss() {
        let cache = cache();
        let executor = TestExecutor::default();
        let d = paged();

        assert_eq!(
            cache.found_rows_query("SELECT FOUND_ROWS()", &d, &ctx()).await,
            "SELECT FOUND_ROWS()"
        );

        cache
            .materialize(&d, &ctx(), &executor)
            .await
            .expect("materialize should succeed");

        assert_eq!(cache.get_found_rows(&d, &ctx()).await, Some(57));
        assert_eq!(
            cache.found_rows_query("SELECT FOUND_ROWS()", &d, &ctx()).await,
            "SELECT 57"
        );
    }

    #[tokio::test]
    async fn test_unbounded_query_skips_count() {
        let cache = cache();
        let executor = TestExecutor::default();
        let d = QueryDescriptor::new("SELECT * FROM posts");

        cache
            .materialize(&d, &ctx(), &executor)
            .await
            .expect("materialize should succeed");
        assert_eq!(executor.calls(), (1, 0, 0));
        assert_eq!(cache.get_found_rows(&d, &ctx()).await, None);
    }

    #[tokio::test]
    async fn test_bypassed_query_never_stored() {
        let cache = cache();
        let executor = TestExecutor::default();
        let d = paged().with_opt_out(true);

        for _ in 0..2 {
            let read = cache
                .materialize(&d, &ctx(), &executor)
                .await
                .expect("materialize should succeed");
            assert_eq!(read.bypass_reason(), Some(BypassReason::OptedOut));
        }
        assert_eq!(executor.calls(), (2, 0, 0));
        assert!(cache.store().is_empty());
    }

    #[tokio::test]
    async fn test_zero_lifetime_executes_without_storing() {
        let config = config().with_secondary_query_ttl(0);
        let cache = QueryCache::new(Arc::new(InMemoryCacheStore::new()), Arc::new(DefaultPolicy), config);
        let executor = TestExecutor::default();

        let read = cache
            .materialize(&paged(), &ctx(), &executor)
            .await
            .expect("materialize should succeed");
        assert_eq!(read.bypass_reason(), Some(BypassReason::LifetimeDisabled));
        assert_eq!(executor.calls(), (1, 0, 0));
        assert!(cache.store().is_empty());
    }

    #[tokio::test]
    async fn test_save_found_rows_noop_without_limit() {
        let cache = cache();
        let d = QueryDescriptor::new("SELECT * FROM posts");
        cache.save_found_rows(10, &d, &ctx()).await;
        assert!(cache.store().is_empty());

        cache.save_found_rows(10, &paged(), &ctx()).await;
        assert_eq!(cache.get_found_rows(&paged(), &ctx()).await, Some(10));
    }

    #[tokio::test]
    async fn test_administrative_request_sees_no_cached_count() {
        let cache = cache();
        cache.save_found_rows(10, &paged(), &ctx()).await;

        let admin = ctx().with_administrative(true);
        assert_eq!(
            cache.found_rows_query("SELECT FOUND_ROWS()", &paged(), &admin).await,
            "SELECT FOUND_ROWS()"
        );
    }

    #[tokio::test]
    async fn test_clones_share_store() {
        let cache = cache();
        let clone = cache.clone();
        let executor = TestExecutor::default();

        cache
            .materialize(&paged(), &ctx(), &executor)
            .await
            .expect("materialize should succeed");
        let read = clone
            .materialize(&paged(), &ctx(), &executor)
            .await
            .expect("materialize should succeed");
        assert!(read.was_cache_hit());

        let stats = clone.store().stats().await.expect("stats should succeed");
        assert_eq!(stats.hits, 1);
    }
}
