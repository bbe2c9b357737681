//! Admin API Module
//!
//! HTTP handlers and routing for the proxy's admin surface.
//!
//! # Endpoints
//! - `GET /health` - Liveness plus upstream online/offline state
//! - `GET /stats` - Cache store statistics
//! - `DELETE /cache` - Flush every cached record

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
