//! Cache Module
//!
//! The key/value store boundary, its in-process LRU backend, and the session
//! cache that maps request fingerprints to recorded LDAP responses.

mod entry;
mod lru;
mod session;
mod stats;
mod store;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use entry::{BindRecord, SearchRecord};
pub use lru::LruTracker;
pub use session::{Response, SessionCache};
pub use stats::CacheStats;
pub use store::{CacheStore, KvStore, SharedStore};

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;
