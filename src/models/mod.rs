//! Response models for the admin API
//!
//! DTOs serialized into the admin HTTP response bodies.

pub mod responses;

// Re-export commonly used types
pub use responses::{ErrorResponse, FlushResponse, HealthResponse, StatsResponse};
