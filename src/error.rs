//! Error types for the caching proxy
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorResponse;

// == Proxy Error Enum ==
/// Unified error type for the caching proxy.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Socket level failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Byte stream could not be split into messages
    #[error("Framing error: {0}")]
    Frame(String),

    /// Framed message could not be decoded
    #[error("Decode error: {0}")]
    Codec(String),

    /// Key/value store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Cache record could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Upstream TLS setup or handshake failure
    #[error("TLS error: {0}")]
    Tls(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Upstream stopped answering in the middle of an exchange
    #[error("Upstream closed during {0}")]
    UpstreamClosed(&'static str),

    /// A cached Bind could not be resolved for replay
    #[error("No cached bind request available for replay of {0}")]
    ReplayUnavailable(String),
}

// == IntoResponse Implementation ==
impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = match &self {
            ProxyError::Config(_) => StatusCode::BAD_REQUEST,
            ProxyError::UpstreamClosed(_) | ProxyError::Tls(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the caching proxy.
pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_maps_to_internal() {
        let response = ProxyError::Store("poisoned".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_upstream_error_maps_to_bad_gateway() {
        let response = ProxyError::UpstreamClosed("search").into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_error_display() {
        let err = ProxyError::ReplayUnavailable("abc".to_string());
        assert_eq!(
            err.to_string(),
            "No cached bind request available for replay of abc"
        );
    }
}
