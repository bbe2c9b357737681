//! Proxy Listener
//!
//! Accepts LDAP client connections and runs one session task per connection.
//! The upstream connection is opened inside the task so a slow or dead
//! upstream never holds up the accept loop.

use std::future::Future;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

use crate::cache::SessionCache;
use crate::session::{Session, SessionSettings};
use crate::upstream::UpstreamConnector;

// == Proxy Server ==
#[derive(Clone)]
pub struct ProxyServer {
    upstream: Arc<UpstreamConnector>,
    cache: SessionCache,
    settings: SessionSettings,
}

impl ProxyServer {
    pub fn new(upstream: Arc<UpstreamConnector>, cache: SessionCache, settings: SessionSettings) -> Self {
        Self {
            upstream,
            cache,
            settings,
        }
    }

    /// Accepts connections until `shutdown` completes.
    ///
    /// Sessions already running are left to finish on their own.
    pub async fn serve(self, listener: TcpListener, shutdown: impl Future<Output = ()>) {
        if let Ok(addr) = listener.local_addr() {
            info!("LDAP proxy listening on {}", addr);
        }
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        info!("CONNECTION from {}", peer);
                        let server = self.clone();
                        tokio::spawn(async move {
                            server.handle_connection(socket, peer.to_string()).await;
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept LDAP connection: {}", e);
                    }
                },
                _ = &mut shutdown => {
                    info!("Proxy listener stopped");
                    break;
                }
            }
        }
    }

    async fn handle_connection(&self, socket: TcpStream, peer: String) {
        if let Err(e) = socket.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY for {}: {}", peer, e);
        }

        let upstream = self.upstream.connect().await;
        if upstream.is_none() {
            info!("Serving {} from cache only", peer);
        }

        let state = Session::new(peer, socket, upstream, self.cache.clone(), &self.settings)
            .run()
            .await;
        debug!("Final session state: {:?}", state);
    }
}
