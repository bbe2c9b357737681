//! LDAP Cache Proxy - A transparent caching proxy for LDAP
//!
//! Sits between LDAP clients and a directory server, caching Bind and Search
//! responses and answering from the cache when the server is unreachable.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ldap_cache_proxy::api::{create_router, AppState};
use ldap_cache_proxy::cache::{KvStore, SessionCache, SharedStore};
use ldap_cache_proxy::{Config, ProxyServer, SessionSettings, UpstreamConnector};

/// Main entry point for the LDAP cache proxy.
///
/// # Startup Sequence
/// 1. Load configuration from the YAML file and environment
/// 2. Initialize tracing at the configured level (RUST_LOG wins)
/// 3. Create the cache store, flushing it if requested
/// 4. Start the admin API when an admin port is set
/// 5. Accept LDAP clients until SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("failed to load configuration")?;

    let default_filter = config
        .log_filter()
        .unwrap_or("ldap_cache_proxy=info,tower_http=info");
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting LDAP Cache Proxy");
    info!(
        "Configuration loaded: port={}, upstream={}://{}, offline_retry={}s, bind_ttl={}s, max_entries={}",
        config.base_port,
        config.upstream_protocol,
        config.upstream_addr(),
        config.offline_retry,
        config.bind_ttl,
        config.max_entries
    );

    let store: Arc<dyn KvStore> = Arc::new(SharedStore::new(config.max_entries));
    if config.flush_cache {
        let removed = store.flush()?;
        info!("Flushed {} records from the cache store", removed);
    }

    let upstream = Arc::new(UpstreamConnector::from_config(&config)?);
    let cache = SessionCache::new(store.clone(), Duration::from_secs(config.bind_ttl));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Optional admin API
    let admin_handle = if config.admin_port != 0 {
        let app = create_router(AppState::new(store.clone(), upstream.clone()));
        let addr = SocketAddr::from(([0, 0, 0, 0], config.admin_port));
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind admin API on {}", addr))?;
        info!("Admin API listening on http://{}", addr);

        let mut rx = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = rx.wait_for(|stop| *stop).await;
                })
                .await;
            if let Err(e) = result {
                warn!("Admin API stopped with error: {}", e);
            }
        }))
    } else {
        None
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.base_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind LDAP listener on {}", addr))?;

    let server = ProxyServer::new(upstream, cache, SessionSettings::from(&config));
    let mut rx = shutdown_rx;
    let proxy_handle = tokio::spawn(server.serve(listener, async move {
        let _ = rx.wait_for(|stop| *stop).await;
    }));

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    proxy_handle.await?;
    if let Some(handle) = admin_handle {
        handle.await?;
    }

    info!("Proxy shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
