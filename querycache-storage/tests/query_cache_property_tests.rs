//! Property-Based Tests for the Query Cache
//!
//! **Property 1: Hits never reach the executor**
//! **Property 2: Ineligible requests always execute and never write**
//! **Property 3: Tenants never share entries**
//! **Property 4: Found-rows counts follow the LIMIT rule**
//! **Property 5: Entries carry the lifetime of their query kind**
//! **Property 6: Id listings are served back verbatim**

use querycache_storage::cache::{BypassReason, CacheStore, Lifetime};
use querycache_test_utils::generators::*;
use querycache_test_utils::{fixtures, CountingExecutor, OutputShape, QueryDescriptor, QueryPayload, RequestContext};
use proptest::prelude::*;
use std::time::Duration;
use tokio::runtime::Runtime;

fn test_runtime() -> Result<Runtime, TestCaseError> {
    Runtime::new().map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

fn fail<E: std::fmt::Display>(e: E) -> TestCaseError {
    TestCaseError::fail(e.to_string())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// **Property 1: Hits never reach the executor**
    ///
    /// For any cacheable descriptor, a second identical request is served
    /// from the cache with the exact payload of the first, and the executor
    /// sees only the first request.
    #[test]
    fn prop_hit_avoids_executor(
        descriptor in arb_cacheable_descriptor(),
        ctx in arb_public_context(),
        rows in 1u64..20,
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let cache = fixtures::memory_cache();
            let executor = fixtures::listing_executor(rows, 500);

            let first = cache.materialize(&descriptor, &ctx, &executor).await.map_err(fail)?;
            prop_assert!(!first.was_cache_hit());
            prop_assert_eq!(executor.query_calls(), 1);
            let count_calls = executor.count_calls();

            let second = cache.materialize(&descriptor, &ctx, &executor).await.map_err(fail)?;
            prop_assert!(second.was_cache_hit());
            prop_assert_eq!(second.value(), first.value());
            prop_assert_eq!(executor.query_calls(), 1);
            prop_assert_eq!(executor.count_calls(), count_calls);

            let expected_shape = descriptor.output_shape();
            prop_assert_eq!(second.value().shape(), expected_shape);

            Ok(())
        })?;
    }

    /// **Property 2: Ineligible requests always execute and never write**
    #[test]
    fn prop_ineligible_always_executes(
        (descriptor, ctx, reason) in arb_ineligible_request(),
        repeats in 1usize..4,
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let cache = fixtures::memory_cache();
            let executor = fixtures::listing_executor(5, 50);

            for _ in 0..repeats {
                let read = cache.materialize(&descriptor, &ctx, &executor).await.map_err(fail)?;
                prop_assert_eq!(read.bypass_reason(), Some(reason));
            }

            prop_assert_eq!(executor.query_calls(), repeats);
            prop_assert_eq!(executor.count_calls(), 0);
            prop_assert!(cache.store().is_empty());

            let sql = cache.found_rows_query("SELECT FOUND_ROWS()", &descriptor, &ctx).await;
            prop_assert_eq!(sql, "SELECT FOUND_ROWS()");

            Ok(())
        })?;
    }

    /// **Property 3: Tenants never share entries**
    ///
    /// The same query under two tenants executes once per tenant, and each
    /// tenant's found-rows count is its own.
    #[test]
    fn prop_tenant_isolation(
        sql in arb_paged_sql(),
        (a, b) in arb_distinct_tenants(),
        count_a in arb_count(),
        count_b in arb_count(),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let cache = fixtures::memory_cache();
            let descriptor = QueryDescriptor::new(sql);
            let ctx_a = RequestContext::new(a);
            let ctx_b = RequestContext::new(b);

            let exec_a = fixtures::listing_executor(3, count_a);
            let exec_b = fixtures::listing_executor(3, count_b);

            cache.materialize(&descriptor, &ctx_a, &exec_a).await.map_err(fail)?;
            let read_b = cache.materialize(&descriptor, &ctx_b, &exec_b).await.map_err(fail)?;

            prop_assert!(!read_b.was_cache_hit(), "Tenant B must not hit tenant A's entry");
            prop_assert_eq!(exec_a.query_calls(), 1);
            prop_assert_eq!(exec_b.query_calls(), 1);

            prop_assert_eq!(cache.get_found_rows(&descriptor, &ctx_a).await, Some(count_a));
            prop_assert_eq!(cache.get_found_rows(&descriptor, &ctx_b).await, Some(count_b));

            let key_a = cache.results_key(&descriptor, &ctx_a);
            let key_b = cache.results_key(&descriptor, &ctx_b);
            prop_assert_ne!(key_a.namespace(), key_b.namespace());
            prop_assert_eq!(key_a.key(), key_b.key());

            Ok(())
        })?;
    }

    /// **Property 4: Found-rows counts follow the LIMIT rule**
    ///
    /// Bounded queries cache their count on the miss and the follow-up
    /// count query is rewritten to a literal; unbounded queries never issue
    /// a count query and are never rewritten.
    #[test]
    fn prop_found_rows_follow_limit(
        paged in arb_paged_sql(),
        unbounded in arb_unbounded_sql(),
        ctx in arb_public_context(),
        total in arb_count(),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let cache = fixtures::memory_cache();

            let bounded = QueryDescriptor::new(paged);
            let executor = fixtures::listing_executor(2, total);
            cache.materialize(&bounded, &ctx, &executor).await.map_err(fail)?;
            prop_assert_eq!(executor.count_calls(), 1);
            let rewritten = cache.found_rows_query("SELECT FOUND_ROWS()", &bounded, &ctx).await;
            prop_assert_eq!(rewritten.into_owned(), format!("SELECT {}", total));

            let open = QueryDescriptor::new(unbounded);
            let executor = fixtures::listing_executor(2, total);
            cache.materialize(&open, &ctx, &executor).await.map_err(fail)?;
            prop_assert_eq!(executor.count_calls(), 0);
            let untouched = cache.found_rows_query("SELECT FOUND_ROWS()", &open, &ctx).await;
            prop_assert_eq!(untouched, "SELECT FOUND_ROWS()");

            Ok(())
        })?;
    }

    /// **Property 5: Entries carry the lifetime of their query kind**
    #[test]
    fn prop_lifetime_by_query_kind(
        sql in arb_paged_sql(),
        is_main in any::<bool>(),
        shape in arb_output_shape(),
        ctx in arb_public_context(),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let cache = fixtures::memory_cache();
            let descriptor = QueryDescriptor::new(sql)
                .with_main_query(is_main)
                .with_output_shape(shape);
            let executor = fixtures::listing_executor(4, 40);

            cache.materialize(&descriptor, &ctx, &executor).await.map_err(fail)?;

            let expected = Duration::from_secs(if is_main { 300 } else { 600 });
            prop_assert_eq!(cache.cache_time(&descriptor), Lifetime::Enabled(expected));

            let stored = cache
                .store()
                .get::<QueryPayload>(&cache.results_key(&descriptor, &ctx))
                .await
                .map_err(fail)?;
            let stored = stored.ok_or_else(|| TestCaseError::fail("results entry missing"))?;
            prop_assert_eq!(stored.ttl, expected);

            let count = cache
                .store()
                .get::<u64>(&cache.row_count_key(&descriptor, &ctx))
                .await
                .map_err(fail)?;
            let count = count.ok_or_else(|| TestCaseError::fail("row-count entry missing"))?;
            prop_assert_eq!(count.ttl, expected);
            prop_assert_eq!(count.value, 40);

            let served_ids = shape == OutputShape::IdsOnly;
            prop_assert_eq!(executor.id_calls() == 1, served_ids);

            Ok(())
        })?;
    }

    /// **Property 6: Id listings are served back verbatim**
    ///
    /// An ids-only query caches exactly the ids the executor produced, in
    /// order, and serves them back on the next request.
    #[test]
    fn prop_id_listing_served_verbatim(
        sql in arb_paged_sql(),
        ids in arb_ids(),
        ctx in arb_public_context(),
        total in arb_count(),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let cache = fixtures::memory_cache();
            let descriptor = QueryDescriptor::new(sql).with_output_shape(OutputShape::IdsOnly);
            let executor = CountingExecutor::new().with_ids(ids.clone()).with_count(total);

            cache.materialize(&descriptor, &ctx, &executor).await.map_err(fail)?;
            let read = cache.materialize(&descriptor, &ctx, &executor).await.map_err(fail)?;

            prop_assert!(read.was_cache_hit());
            prop_assert_eq!(read.value().as_ids(), Some(ids.as_slice()));
            prop_assert_eq!(executor.id_calls(), 1);
            prop_assert_eq!(cache.get_found_rows(&descriptor, &ctx).await, Some(total));

            Ok(())
        })?;
    }

    /// Two pages of one listing keep separate counts.
    #[test]
    fn prop_pages_keep_separate_counts(
        base in arb_unbounded_sql(),
        ctx in arb_public_context(),
        first_total in arb_count(),
        second_total in arb_count(),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let cache = fixtures::memory_cache();
            let page1 = QueryDescriptor::new(format!("{} LIMIT 0, 10", base));
            let page2 = QueryDescriptor::new(format!("{} LIMIT 10, 10", base));

            cache.save_found_rows(first_total, &page1, &ctx).await;
            cache.save_found_rows(second_total, &page2, &ctx).await;

            prop_assert_eq!(cache.get_found_rows(&page1, &ctx).await, Some(first_total));
            prop_assert_eq!(cache.get_found_rows(&page2, &ctx).await, Some(second_total));

            Ok(())
        })?;
    }
}

#[test]
fn test_bypass_reasons_are_distinct() {
    let reasons = [
        BypassReason::Inactive,
        BypassReason::Administrative,
        BypassReason::OptedOut,
        BypassReason::Search,
        BypassReason::FiltersSuppressed,
        BypassReason::ExcludedResourceType,
        BypassReason::Policy,
        BypassReason::LifetimeDisabled,
        BypassReason::StoreUnavailable,
    ];
    let names: std::collections::HashSet<_> = reasons.iter().map(|r| r.as_str()).collect();
    assert_eq!(names.len(), reasons.len());
}
