//! Cache Store Module
//!
//! The key/value boundary the session cache is built on, plus the bundled
//! in-process backend: a bounded HashMap with LRU eviction. Values are opaque
//! bytes and never expire on their own; freshness is decided by the caller.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::cache::{CacheStats, LruTracker, MAX_KEY_LENGTH};
use crate::error::{ProxyError, Result};

// == Store Boundary ==
/// A get/set key/value store with per-key atomicity.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    fn exists(&self, key: &str) -> Result<bool>;

    /// Removes every entry, returning how many were removed.
    fn flush(&self) -> Result<usize>;

    fn stats(&self) -> CacheStats;
}

// == Cache Store ==
/// Bounded in-memory storage with LRU eviction.
#[derive(Debug)]
pub struct CacheStore {
    entries: HashMap<String, Vec<u8>>,
    lru: LruTracker,
    stats: CacheStats,
    max_entries: usize,
}

impl CacheStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            lru: LruTracker::new(),
            stats: CacheStats::new(),
            max_entries,
        }
    }

    // == Set ==
    /// Stores a value, evicting the least recently used entry when full.
    pub fn set(&mut self, key: String, value: Vec<u8>) -> Result<()> {
        if key.is_empty() || key.len() > MAX_KEY_LENGTH {
            return Err(ProxyError::Store(format!(
                "key length must be 1..={} bytes",
                MAX_KEY_LENGTH
            )));
        }

        let is_overwrite = self.entries.contains_key(&key);
        if !is_overwrite && self.entries.len() >= self.max_entries {
            match self.lru.evict_oldest() {
                Some(evicted) => {
                    self.entries.remove(&evicted);
                    self.stats.record_eviction();
                }
                None => {
                    return Err(ProxyError::Store(
                        "store is full and eviction failed".to_string(),
                    ))
                }
            }
        }

        self.entries.insert(key.clone(), value);
        self.lru.touch(&key);
        self.stats.record_set();
        self.stats.set_total_entries(self.entries.len());
        Ok(())
    }

    // == Get ==
    /// Retrieves a value, marking it recently used.
    pub fn get(&mut self, key: &str) -> Option<Vec<u8>> {
        match self.entries.get(key) {
            Some(value) => {
                let value = value.clone();
                self.stats.record_hit();
                self.lru.touch(key);
                Some(value)
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    // == Flush ==
    /// Removes every entry; statistics counters are kept.
    pub fn flush(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.lru.clear();
        self.stats.set_total_entries(0);
        count
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.set_total_entries(self.entries.len());
        stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// == Shared Store ==
/// A [`CacheStore`] shared by every connection of the process.
#[derive(Debug)]
pub struct SharedStore {
    inner: Mutex<CacheStore>,
}

impl SharedStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(CacheStore::new(max_entries)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, CacheStore>> {
        self.inner
            .lock()
            .map_err(|_| ProxyError::Store("store lock poisoned".to_string()))
    }
}

impl KvStore for SharedStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.lock()?.get(key))
    }

    fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.lock()?.set(key.to_string(), value)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.lock()?.contains(key))
    }

    fn flush(&self) -> Result<usize> {
        Ok(self.lock()?.flush())
    }

    fn stats(&self) -> CacheStats {
        self.lock().map(|store| store.stats()).unwrap_or_default()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_set_and_get() {
        let mut store = CacheStore::new(100);
        store.set("key1".to_string(), b"value1".to_vec()).unwrap();

        assert_eq!(store.get("key1"), Some(b"value1".to_vec()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_get_nonexistent() {
        let mut store = CacheStore::new(100);
        assert_eq!(store.get("nonexistent"), None);
        assert_eq!(store.stats().misses, 1);
    }

    #[test]
    fn test_store_overwrite() {
        let mut store = CacheStore::new(100);
        store.set("key1".to_string(), b"value1".to_vec()).unwrap();
        store.set("key1".to_string(), b"value2".to_vec()).unwrap();

        assert_eq!(store.get("key1"), Some(b"value2".to_vec()));
        assert_eq!(store.len(), 1);
        assert_eq!(store.stats().sets, 2);
    }

    #[test]
    fn test_store_lru_eviction() {
        let mut store = CacheStore::new(3);
        store.set("key1".to_string(), b"1".to_vec()).unwrap();
        store.set("key2".to_string(), b"2".to_vec()).unwrap();
        store.set("key3".to_string(), b"3".to_vec()).unwrap();

        // key1 becomes most recently used, so key2 goes first
        store.get("key1");
        store.set("key4".to_string(), b"4".to_vec()).unwrap();

        assert_eq!(store.len(), 3);
        assert!(store.contains("key1"));
        assert!(!store.contains("key2"));
        assert_eq!(store.stats().evictions, 1);
    }

    #[test]
    fn test_store_flush() {
        let mut store = CacheStore::new(10);
        store.set("a".to_string(), vec![1]).unwrap();
        store.set("b".to_string(), vec![2]).unwrap();

        assert_eq!(store.flush(), 2);
        assert!(store.is_empty());
        assert_eq!(store.stats().total_entries, 0);
    }

    #[test]
    fn test_store_key_validation() {
        let mut store = CacheStore::new(10);
        let long_key = "x".repeat(MAX_KEY_LENGTH + 1);

        assert!(matches!(store.set(long_key, vec![]), Err(ProxyError::Store(_))));
        assert!(matches!(store.set(String::new(), vec![]), Err(ProxyError::Store(_))));
    }

    #[test]
    fn test_shared_store_trait() {
        let store = SharedStore::new(10);
        store.set("k", vec![1, 2]).unwrap();

        assert!(store.exists("k").unwrap());
        assert!(!store.exists("other").unwrap());
        assert_eq!(store.get("k").unwrap(), Some(vec![1, 2]));
        assert_eq!(store.flush().unwrap(), 1);
        assert_eq!(store.get("k").unwrap(), None);
        assert_eq!(store.stats().hits, 1);
    }
}
