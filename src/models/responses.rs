//! Response DTOs for the admin API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;

use crate::cache::CacheStats;

/// Response body for the stats endpoint (GET /stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Store reads that found a record
    pub hits: u64,
    /// Store reads that found nothing
    pub misses: u64,
    /// Records evicted to make room
    pub evictions: u64,
    /// Record writes, including overwrites
    pub sets: u64,
    /// Records currently held
    pub total_entries: usize,
    /// hits / (hits + misses)
    pub hit_rate: f64,
}

impl From<CacheStats> for StatsResponse {
    fn from(stats: CacheStats) -> Self {
        Self {
            hit_rate: stats.hit_rate(),
            hits: stats.hits,
            misses: stats.misses,
            evictions: stats.evictions,
            sets: stats.sets,
            total_entries: stats.total_entries,
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always "healthy" while the process serves requests
    pub status: String,
    /// "online" or "offline", as last observed by the connector
    pub upstream: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    pub fn healthy(upstream_offline: bool) -> Self {
        let upstream = if upstream_offline { "offline" } else { "online" };
        Self {
            status: "healthy".to_string(),
            upstream: upstream.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Response body for the flush endpoint (DELETE /cache)
#[derive(Debug, Clone, Serialize)]
pub struct FlushResponse {
    pub message: String,
    /// Number of records removed
    pub removed: usize,
}

impl FlushResponse {
    pub fn new(removed: usize) -> Self {
        Self {
            message: format!("Flushed {} cached records", removed),
            removed,
        }
    }
}

/// Error response body for all error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_response_from_cache_stats() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            sets: 30,
            evictions: 5,
            total_entries: 25,
        };
        let resp = StatsResponse::from(stats);
        assert!((resp.hit_rate - 0.8).abs() < 0.001);
        assert_eq!(resp.sets, 30);
        assert_eq!(resp.total_entries, 25);
    }

    #[test]
    fn test_stats_response_zero_requests() {
        let resp = StatsResponse::from(CacheStats::default());
        assert_eq!(resp.hit_rate, 0.0);
    }

    #[test]
    fn test_health_response_serialize() {
        let json = serde_json::to_string(&HealthResponse::healthy(true)).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("\"upstream\":\"offline\""));
        assert!(json.contains("timestamp"));
    }

    #[test]
    fn test_flush_response() {
        let resp = FlushResponse::new(3);
        assert_eq!(resp.removed, 3);
        assert!(resp.message.contains('3'));
    }

    #[test]
    fn test_error_response_serialize() {
        let json = serde_json::to_string(&ErrorResponse::new("Something went wrong")).unwrap();
        assert_eq!(json, r#"{"error":"Something went wrong"}"#);
    }
}
