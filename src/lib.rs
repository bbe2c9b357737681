//! LDAP Cache Proxy - A transparent caching proxy for LDAP
//!
//! Answers repeated Bind and Search requests from a shared cache and keeps
//! serving cached answers while the upstream directory server is down.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod protocol;
pub mod server;
pub mod session;
pub mod upstream;

pub use api::AppState;
pub use config::Config;
pub use server::ProxyServer;
pub use session::{Session, SessionSettings, SessionState};
pub use upstream::UpstreamConnector;
