//! Cache Entry Module
//!
//! Defines the records stored for Bind and Search responses, each stamped
//! with its insertion time so freshness is checked on read instead of relying
//! on store-side expiry.

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::protocol::Fingerprint;

// == Bind Record ==
/// A cached Bind exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindRecord {
    /// Response messages, in the order the upstream sent them
    #[serde(with = "hex_messages")]
    pub response: Vec<Vec<u8>>,
    /// Insertion timestamp (Unix milliseconds)
    pub cached_at: i64,
    /// Raw Bind request, kept so the Bind can be replayed upstream
    #[serde(with = "hex::serde")]
    pub request: Vec<u8>,
}

impl BindRecord {
    pub fn new(response: Vec<Vec<u8>>, request: Vec<u8>) -> Self {
        Self {
            response,
            cached_at: current_timestamp_ms(),
            request,
        }
    }

    pub fn is_fresh(&self, ttl_ms: i64, now_ms: i64) -> bool {
        is_fresh(self.cached_at, ttl_ms, now_ms)
    }
}

// == Search Record ==
/// A cached Search result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRecord {
    /// Every entry message followed by the terminal SearchResultDone
    #[serde(with = "hex_messages")]
    pub response: Vec<Vec<u8>>,
    /// Insertion timestamp (Unix milliseconds)
    pub cached_at: i64,
    /// Bind the result was answered under, `None` for anonymous sessions
    pub bind_fingerprint: Option<Fingerprint>,
}

impl SearchRecord {
    pub fn new(response: Vec<Vec<u8>>, bind_fingerprint: Option<Fingerprint>) -> Self {
        Self {
            response,
            cached_at: current_timestamp_ms(),
            bind_fingerprint,
        }
    }

    pub fn is_fresh(&self, ttl_ms: i64, now_ms: i64) -> bool {
        is_fresh(self.cached_at, ttl_ms, now_ms)
    }
}

// == Serialization ==
/// Stores each message as a hex string instead of a JSON number array.
mod hex_messages {
    use super::*;

    pub fn serialize<S: Serializer>(messages: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(messages.iter().map(hex::encode))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Vec<u8>>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|message| hex::decode(message).map_err(serde::de::Error::custom))
            .collect()
    }
}

// == Utility Functions ==
/// An entry stays fresh while its age is at most the TTL.
fn is_fresh(cached_at: i64, ttl_ms: i64, now_ms: i64) -> bool {
    now_ms.saturating_sub(cached_at) <= ttl_ms
}

/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> i64 {
    Utc::now().timestamp_millis()
}
