//! Upstream Connection Manager
//!
//! Opens the connection to the directory server for each client connection
//! and keeps a process-wide offline flag. While offline, connect attempts are
//! skipped until the retry interval has passed since the last failure.

use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

use crate::config::{Config, UpstreamProtocol};
use crate::error::{ProxyError, Result};

/// A bidirectional byte stream the session engine can drive.
pub trait ProxyStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ProxyStream for T {}

/// Upstream socket, plain or TLS.
pub type BoxedStream = Box<dyn ProxyStream>;

// == Upstream Connector ==
pub struct UpstreamConnector {
    /// `host:port` to dial
    addr: String,
    /// Server name checked against the TLS certificate
    host: String,
    connect_timeout: Duration,
    offline_retry: Duration,
    /// Present when the upstream speaks ldaps
    tls: Option<TlsConnector>,
    /// Set while the upstream is considered unreachable
    offline_since: Mutex<Option<Instant>>,
}

impl UpstreamConnector {
    /// Builds a connector from configuration, loading the platform trust
    /// store when the upstream uses TLS.
    pub fn from_config(config: &Config) -> Result<Self> {
        let tls = match config.upstream_protocol {
            UpstreamProtocol::Ldap => None,
            UpstreamProtocol::Ldaps => Some(tls_connector()?),
        };

        Ok(Self {
            addr: config.upstream_addr(),
            host: config.upstream_host.clone(),
            connect_timeout: config.connect_timeout(),
            offline_retry: Duration::from_secs(config.offline_retry),
            tls,
            offline_since: Mutex::new(None),
        })
    }

    /// Plain TCP connector, mostly for tests and local upstreams.
    pub fn plain(addr: impl Into<String>, connect_timeout: Duration, offline_retry: Duration) -> Self {
        let addr = addr.into();
        let host = addr
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| addr.clone());
        Self {
            addr,
            host,
            connect_timeout,
            offline_retry,
            tls: None,
            offline_since: Mutex::new(None),
        }
    }

    // == Connect ==
    /// Connects to the upstream unless the offline backoff is still running.
    ///
    /// Returns `None` when offline; callers then work from the cache only.
    pub async fn connect(&self) -> Option<BoxedStream> {
        if !self.should_attempt(Instant::now()) {
            debug!("Upstream offline, skipping connect to {}", self.addr);
            return None;
        }

        match self.establish().await {
            Ok(stream) => {
                debug!("CONNECT to upstream {} successful", self.addr);
                self.set_offline(None);
                Some(stream)
            }
            Err(e) => {
                info!("CONNECT to {} failed ({}), switching to offline mode", self.addr, e);
                self.set_offline(Some(Instant::now()));
                None
            }
        }
    }

    async fn establish(&self) -> Result<BoxedStream> {
        let tcp = timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
        tcp.set_nodelay(true)?;

        let Some(connector) = &self.tls else {
            return Ok(Box::new(tcp));
        };

        let server_name = ServerName::try_from(self.host.clone())
            .map_err(|e| ProxyError::Tls(format!("invalid server name '{}': {}", self.host, e)))?;
        let tls = timeout(self.connect_timeout, connector.connect(server_name, tcp))
            .await
            .map_err(|_| ProxyError::Tls("handshake timed out".to_string()))?
            .map_err(|e| ProxyError::Tls(format!("handshake failed: {}", e)))?;
        Ok(Box::new(tls))
    }

    // == Offline State ==
    /// Online, or offline long enough that a retry is due.
    fn should_attempt(&self, now: Instant) -> bool {
        match *self.offline_guard() {
            None => true,
            Some(since) => now.saturating_duration_since(since) >= self.offline_retry,
        }
    }

    fn set_offline(&self, since: Option<Instant>) {
        *self.offline_guard() = since;
    }

    pub fn is_offline(&self) -> bool {
        self.offline_guard().is_some()
    }

    fn offline_guard(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.offline_since
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

/// TLS client configuration backed by the platform trust store.
fn tls_connector() -> Result<TlsConnector> {
    let native = rustls_native_certs::load_native_certs();
    for err in &native.errors {
        warn!("Skipping unreadable system certificate: {}", err);
    }

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    if added == 0 {
        return Err(ProxyError::Tls("no usable system root certificates".to_string()));
    }
    debug!("Loaded {} root certificates ({} ignored)", added, ignored);

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}
