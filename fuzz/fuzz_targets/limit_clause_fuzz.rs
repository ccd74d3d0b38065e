//! Fuzz test for LIMIT detection and key building
//!
//! Query text comes straight from the host's query builder, so both the
//! LIMIT scan and the key hash must accept any UTF-8 without panicking.
//!
//! Run with: cargo +nightly fuzz run limit_clause_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use querycache_core::{build_key, QueryDescriptor};
use querycache_storage::cache::{has_limit_clause, need_found_rows};

fuzz_target!(|data: &[u8]| {
    if let Ok(sql) = std::str::from_utf8(data) {
        let bounded = has_limit_clause(sql);

        let descriptor = QueryDescriptor::new(sql);
        assert_eq!(need_found_rows(&descriptor, None), bounded);
        assert!(!need_found_rows(&descriptor.clone().with_no_found_rows(true), None));

        // Key building is deterministic.
        assert_eq!(build_key(sql), build_key(sql));
    }
});
