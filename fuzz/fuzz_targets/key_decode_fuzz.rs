//! Fuzz test for encoded tenant-scoped keys
//!
//! Feeds arbitrary bytes to `TenantScopedKey::decode`, as read back from a
//! store that may hold foreign or corrupted keys. Decoding must never panic,
//! and anything it accepts must re-encode to the exact same bytes.
//!
//! Run with: cargo +nightly fuzz run key_decode_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use querycache_storage::TenantScopedKey;

fuzz_target!(|data: &[u8]| {
    if let Some(key) = TenantScopedKey::decode(data) {
        assert_eq!(key.encode(), data, "Decoded key must re-encode losslessly");

        // The tenant prefix is a true prefix of every key of that tenant.
        let prefix = TenantScopedKey::tenant_prefix(key.tenant());
        assert!(data.starts_with(&prefix));
    }
});
