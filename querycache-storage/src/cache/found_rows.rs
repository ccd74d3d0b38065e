//! Row-count shadow cache rules.
//!
//! A paginated query is usually followed by a second query asking how many
//! rows would have matched without the LIMIT. The count is cached next to the
//! results and the follow-up query is swapped for a literal.

use once_cell::sync::Lazy;
use querycache_core::{build_key, CacheKey, QueryDescriptor, QueryPayload};
use regex::Regex;

/// A whitespace-delimited `LIMIT` keyword.
static LIMIT_CLAUSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[ \t\n\r]LIMIT[ \t\n\r]").expect("Invalid LIMIT regex"));

/// Whether `descriptor` needs a found-rows count.
///
/// False when counting is disabled on the descriptor or `results` is known to
/// be empty. Otherwise true only for queries with a LIMIT clause: an
/// unbounded query already returned every matching row.
pub fn need_found_rows(descriptor: &QueryDescriptor, results: Option<&QueryPayload>) -> bool {
    if descriptor.no_found_rows() {
        return false;
    }
    if results.is_some_and(QueryPayload::is_empty) {
        return false;
    }
    has_limit_clause(descriptor.text())
}

/// Whether `sql` contains a row-limiting clause.
pub fn has_limit_clause(sql: &str) -> bool {
    LIMIT_CLAUSE.is_match(sql)
}

/// Key of `descriptor`'s row-count entry.
///
/// Hashed from the full query text, bounding clauses included, so two pages
/// of the same listing keep separate counts. It lives in the row-count
/// namespace and never collides with the results entry.
pub fn row_count_key(descriptor: &QueryDescriptor) -> CacheKey {
    build_key(descriptor.text())
}

/// The statement that replaces a found-rows query when the count is cached.
pub fn count_literal_query(count: u64) -> String {
    format!("SELECT {}", count)
}
