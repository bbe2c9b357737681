//! API Handlers
//!
//! HTTP request handlers for each admin endpoint.

use std::sync::Arc;

use axum::{extract::State, Json};
use tracing::info;

use crate::cache::KvStore;
use crate::error::Result;
use crate::models::{FlushResponse, HealthResponse, StatsResponse};
use crate::upstream::UpstreamConnector;

/// Application state shared across all handlers.
///
/// Holds the same store and connector the proxy sessions use.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn KvStore>,
    pub upstream: Arc<UpstreamConnector>,
}

impl AppState {
    pub fn new(store: Arc<dyn KvStore>, upstream: Arc<UpstreamConnector>) -> Self {
        Self { store, upstream }
    }
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::from(state.store.stats()))
}

/// Handler for GET /health
///
/// Reports the connector's offline flag; no connection attempt is made.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::healthy(state.upstream.is_offline()))
}

/// Handler for DELETE /cache
pub async fn flush_handler(State(state): State<AppState>) -> Result<Json<FlushResponse>> {
    let removed = state.store.flush()?;
    info!("Flushed {} cached records via admin API", removed);
    Ok(Json(FlushResponse::new(removed)))
}
