//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check store bookkeeping and the Bind/Search coherency
//! rules of the session cache.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use crate::cache::{CacheStore, KvStore, SessionCache, SharedStore};
use crate::protocol::codec::{encode_element, encode_message, TAG_OCTET_STRING};
use crate::protocol::{Fingerprint, LdapMessage, ProtocolOp};

// == Test Configuration ==
const TEST_MAX_ENTRIES: usize = 100;

// == Strategies ==
fn valid_key_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_:]{1,64}".prop_map(|s| s)
}

fn dn_strategy() -> impl Strategy<Value = String> {
    "(cn|uid)=[a-z]{1,12},dc=[a-z]{1,8}".prop_map(|s| s)
}

fn response_strategy() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 1..64), 1..6)
}

#[derive(Debug, Clone)]
enum StoreOp {
    Set { key: String, value: Vec<u8> },
    Get { key: String },
}

fn store_op_strategy() -> impl Strategy<Value = StoreOp> {
    prop_oneof![
        (valid_key_strategy(), prop::collection::vec(any::<u8>(), 0..32))
            .prop_map(|(key, value)| StoreOp::Set { key, value }),
        valid_key_strategy().prop_map(|key| StoreOp::Get { key }),
    ]
}

fn fingerprint(op: ProtocolOp, text: &str) -> Fingerprint {
    let body = encode_element(TAG_OCTET_STRING, text.as_bytes());
    let raw = encode_message(1, op, true, &body);
    Fingerprint::of(&LdapMessage::decode(&raw).unwrap())
}

fn session_cache(store: Arc<SharedStore>, ttl_secs: u64) -> SessionCache {
    SessionCache::new(store, Duration::from_secs(ttl_secs))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // Hit and miss counters reflect every read, and the store never grows
    // past its capacity.
    #[test]
    fn prop_statistics_accuracy(ops in prop::collection::vec(store_op_strategy(), 1..60)) {
        let mut store = CacheStore::new(TEST_MAX_ENTRIES);
        let mut expected_hits: u64 = 0;
        let mut expected_misses: u64 = 0;

        for op in ops {
            match op {
                StoreOp::Set { key, value } => {
                    store.set(key, value).unwrap();
                }
                StoreOp::Get { key } => match store.get(&key) {
                    Some(_) => expected_hits += 1,
                    None => expected_misses += 1,
                },
            }
            prop_assert!(store.len() <= TEST_MAX_ENTRIES);
        }

        let stats = store.stats();
        prop_assert_eq!(stats.hits, expected_hits);
        prop_assert_eq!(stats.misses, expected_misses);
        prop_assert_eq!(stats.total_entries, store.len());
    }

    // A Search cached under one Bind never answers a session holding a
    // different Bind, whatever the upstream state.
    #[test]
    fn prop_coherency_invariant(
        dn1 in dn_strategy(),
        dn2 in dn_strategy(),
        base in dn_strategy(),
        response in response_strategy(),
        upstream_available in any::<bool>(),
        ttl_secs in 0u64..600,
    ) {
        prop_assume!(dn1 != dn2);
        let cache = session_cache(Arc::new(SharedStore::new(TEST_MAX_ENTRIES)), ttl_secs);
        let bind1 = fingerprint(ProtocolOp::BindRequest, &dn1);
        let bind2 = fingerprint(ProtocolOp::BindRequest, &dn2);
        let search = fingerprint(ProtocolOp::SearchRequest, &base);

        cache.cache_result(&search, Some(&bind1), &response).unwrap();

        prop_assert_eq!(cache.get_result(&search, Some(&bind2), upstream_available).unwrap(), None);
        prop_assert_eq!(cache.get_result(&search, None, upstream_available).unwrap(), None);
        prop_assert_eq!(
            cache.get_result(&search, Some(&bind1), false).unwrap(),
            Some(response)
        );
    }

    // Caching the same Bind and Search twice changes nothing observable.
    #[test]
    fn prop_cache_idempotence(
        dn in dn_strategy(),
        base in dn_strategy(),
        bind_response in response_strategy(),
        search_response in response_strategy(),
        request in prop::collection::vec(any::<u8>(), 1..64),
    ) {
        let store = Arc::new(SharedStore::new(TEST_MAX_ENTRIES));
        let cache = session_cache(store.clone(), 300);
        let bind = fingerprint(ProtocolOp::BindRequest, &dn);
        let search = fingerprint(ProtocolOp::SearchRequest, &base);

        cache.cache_bind(&bind, &bind_response, &request).unwrap();
        cache.cache_result(&search, Some(&bind), &search_response).unwrap();
        let entries = store.stats().total_entries;
        let first_bind = cache.get_bind(&bind, true).unwrap();
        let first_result = cache.get_result(&search, Some(&bind), true).unwrap();

        cache.cache_bind(&bind, &bind_response, &request).unwrap();
        cache.cache_result(&search, Some(&bind), &search_response).unwrap();

        prop_assert_eq!(store.stats().total_entries, entries);
        prop_assert_eq!(cache.get_bind(&bind, true).unwrap(), first_bind);
        prop_assert_eq!(cache.get_result(&search, Some(&bind), true).unwrap(), first_result);
        prop_assert_eq!(cache.get_bind_request(&bind).unwrap(), Some(request));
    }
}
