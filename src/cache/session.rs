//! Session Cache Module
//!
//! Bind and Search responses keyed by request fingerprint. Every Search
//! record remembers the Bind fingerprint it was answered under, and a Search
//! is only served back to a session presenting that same Bind. This
//! cross-reference stands in for a live upstream session, which the proxy
//! does not keep between client connections.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::cache::entry::{current_timestamp_ms, BindRecord, SearchRecord};
use crate::cache::KvStore;
use crate::error::Result;
use crate::protocol::Fingerprint;

const BIND_PREFIX: &str = "bind:";
const SEARCH_PREFIX: &str = "search:";

/// Response messages in wire order.
pub type Response = Vec<Vec<u8>>;

// == Session Cache ==
#[derive(Clone)]
pub struct SessionCache {
    store: Arc<dyn KvStore>,
    /// Freshness window for Bind and Search records
    ttl_ms: i64,
}

impl SessionCache {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl_ms: i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX),
        }
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    // == Bind ==
    /// Stores a Bind response with its raw request; repeats overwrite.
    pub fn cache_bind(&self, bind: &Fingerprint, response: &[Vec<u8>], request: &[u8]) -> Result<()> {
        let record = BindRecord::new(response.to_vec(), request.to_vec());
        self.store
            .set(&bind_key(bind), serde_json::to_vec(&record)?)?;
        debug!("CACHED bind response with bind hash {}", bind);
        Ok(())
    }

    /// Returns the cached Bind response if present and fresh.
    ///
    /// Without an upstream any cached Bind is served regardless of age.
    pub fn get_bind(&self, bind: &Fingerprint, upstream_available: bool) -> Result<Option<Response>> {
        self.get_bind_at(bind, upstream_available, current_timestamp_ms())
    }

    fn get_bind_at(
        &self,
        bind: &Fingerprint,
        upstream_available: bool,
        now_ms: i64,
    ) -> Result<Option<Response>> {
        let Some(record) = self.load_bind(bind)? else {
            return Ok(None);
        };
        debug!("FOUND cached response for bind hash {}", bind);

        if upstream_available && !record.is_fresh(self.ttl_ms, now_ms) {
            debug!("Cached bind {} is stale", bind);
            return Ok(None);
        }
        Ok(Some(record.response))
    }

    /// Returns the raw Bind request cached for a fingerprint.
    pub fn get_bind_request(&self, bind: &Fingerprint) -> Result<Option<Vec<u8>>> {
        Ok(self.load_bind(bind)?.map(|record| record.request))
    }

    // == Search ==
    /// Stores a complete Search result under the Bind it was answered for.
    pub fn cache_result(
        &self,
        search: &Fingerprint,
        bind: Option<&Fingerprint>,
        response: &[Vec<u8>],
    ) -> Result<()> {
        let record = SearchRecord::new(response.to_vec(), bind.cloned());
        self.store
            .set(&search_key(search), serde_json::to_vec(&record)?)?;
        info!("CACHED search result with request hash {}", search);
        Ok(())
    }

    /// Returns the cached Search result if it was answered under `bind` and
    /// is fresh (or no upstream is available).
    pub fn get_result(
        &self,
        search: &Fingerprint,
        bind: Option<&Fingerprint>,
        upstream_available: bool,
    ) -> Result<Option<Response>> {
        self.get_result_at(search, bind, upstream_available, current_timestamp_ms())
    }

    fn get_result_at(
        &self,
        search: &Fingerprint,
        bind: Option<&Fingerprint>,
        upstream_available: bool,
        now_ms: i64,
    ) -> Result<Option<Response>> {
        let Some(record) = self.load_search(search)? else {
            return Ok(None);
        };
        debug!("FOUND cached response for request hash {}", search);

        if record.bind_fingerprint.as_ref() != bind {
            debug!("Cached search {} belongs to another bind", search);
            return Ok(None);
        }
        if upstream_available && !record.is_fresh(self.ttl_ms, now_ms) {
            debug!("Cached search {} is stale", search);
            return Ok(None);
        }
        Ok(Some(record.response))
    }

    /// Resolves the Bind that authenticated a cached Search.
    ///
    /// Returns the Bind fingerprint together with its raw request, or `None`
    /// when the Search is unknown, was anonymous, or its Bind is gone.
    pub fn get_bind_request_for_search(
        &self,
        search: &Fingerprint,
    ) -> Result<Option<(Fingerprint, Vec<u8>)>> {
        let Some(bind) = self.load_search(search)?.and_then(|r| r.bind_fingerprint) else {
            return Ok(None);
        };
        let request = self.get_bind_request(&bind)?;
        if request.is_some() {
            debug!("GOT bind request {} for search request hash {}", bind, search);
        }
        Ok(request.map(|request| (bind, request)))
    }

    fn load_bind(&self, bind: &Fingerprint) -> Result<Option<BindRecord>> {
        match self.store.get(&bind_key(bind))? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    fn load_search(&self, search: &Fingerprint) -> Result<Option<SearchRecord>> {
        match self.store.get(&search_key(search))? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }
}

fn bind_key(bind: &Fingerprint) -> String {
    format!("{}{}", BIND_PREFIX, bind)
}

fn search_key(search: &Fingerprint) -> String {
    format!("{}{}", SEARCH_PREFIX, search)
}
