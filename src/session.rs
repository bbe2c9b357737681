//! Protocol Session Engine
//!
//! Drives one client connection: frames client requests, answers Bind and
//! Search from the session cache when that is safe, and relays to the
//! upstream otherwise.
//!
//! A cached Bind answer leaves the upstream connection unauthenticated. Before
//! the first Search that has to go upstream, the cached Bind request is
//! replayed so the Search runs under the identity the client bound as.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::cache::SessionCache;
use crate::config::Config;
use crate::error::{ProxyError, Result};
use crate::protocol::codec::{decode_all, encode_search_result_done};
use crate::protocol::{Fingerprint, LdapMessage, MessageStream, ProtocolOp, RESULT_SUCCESS};

// == Session Settings ==
/// Per-connection limits and timeouts.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub client_timeout: Duration,
    pub upstream_timeout: Duration,
    pub max_message_bytes: usize,
    pub max_result_bytes: usize,
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            client_timeout: config.client_timeout(),
            upstream_timeout: config.upstream_timeout(),
            max_message_bytes: config.max_message_bytes,
            max_result_bytes: config.max_result_bytes,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

// == Session State ==
/// What this connection knows about its own authentication.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    /// The upstream connection has accepted a Bind on this connection
    pub bound: bool,
    /// Fingerprint of the last Bind the client sent
    pub bind_hash: Option<Fingerprint>,
    /// The last Bind was answered from the cache, not by the upstream
    pub bind_answered_from_cache: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Bound,
    Closed,
}

enum Flow {
    Continue,
    Close,
}

// Logs the end of a connection on every exit path.
struct TransactionLog(String);

impl Drop for TransactionLog {
    fn drop(&mut self) {
        info!("Transaction complete for {}", self.0);
    }
}

// == Session ==
pub struct Session<C, U> {
    peer: String,
    client: MessageStream<C>,
    upstream: Option<MessageStream<U>>,
    cache: SessionCache,
    state: SessionState,
    phase: Phase,
    max_result_bytes: usize,
}

impl<C, U> Session<C, U>
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        peer: impl Into<String>,
        client: C,
        upstream: Option<U>,
        cache: SessionCache,
        settings: &SessionSettings,
    ) -> Self {
        Self {
            peer: peer.into(),
            client: MessageStream::new(client, settings.client_timeout, settings.max_message_bytes),
            upstream: upstream.map(|stream| {
                MessageStream::new(stream, settings.upstream_timeout, settings.max_message_bytes)
            }),
            cache,
            state: SessionState::default(),
            phase: Phase::Idle,
            max_result_bytes: settings.max_result_bytes,
        }
    }

    // == Main Loop ==
    /// Serves requests until Unbind, client close, or an unrecoverable error.
    ///
    /// Returns the final session state.
    pub async fn run(mut self) -> SessionState {
        let _log = TransactionLog(self.peer.clone());

        while self.phase != Phase::Closed {
            debug!("Trying to receive more data from {}", self.peer);
            let requests = self.client.read_messages().await;
            if requests.is_empty() {
                debug!("Nothing more received from {}", self.peer);
                self.phase = Phase::Closed;
                break;
            }

            for raw in requests {
                match self.handle(raw).await {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Close) => {
                        self.phase = Phase::Closed;
                        break;
                    }
                    Err(e) => {
                        warn!("Ending session for {}: {}", self.peer, e);
                        self.phase = Phase::Closed;
                        break;
                    }
                }
            }
        }

        if let Some(upstream) = self.upstream.as_mut() {
            upstream.shutdown().await;
        }
        self.client.shutdown().await;
        self.state
    }

    async fn handle(&mut self, raw: Vec<u8>) -> Result<Flow> {
        let message = LdapMessage::decode(&raw)?;
        debug!("----------------------------------------");
        debug!(
            "HANDLING request with protocolOp {:?}, message id {}",
            message.op, message.message_id
        );

        match message.op {
            ProtocolOp::BindRequest => {
                self.handle_bind_request(raw, &message).await?;
                Ok(Flow::Continue)
            }
            ProtocolOp::UnbindRequest => {
                self.handle_unbind_request(raw).await?;
                Ok(Flow::Close)
            }
            ProtocolOp::SearchRequest => {
                self.handle_search_request(raw, &message).await?;
                Ok(Flow::Continue)
            }
            _ => {
                self.pass_through(raw, &message).await?;
                Ok(Flow::Continue)
            }
        }
    }

    // == Bind ==
    async fn handle_bind_request(&mut self, raw: Vec<u8>, message: &LdapMessage) -> Result<()> {
        info!("HANDLING Bind Request");
        let bind_hash = Fingerprint::of(message);
        debug!("with bind hash {}", bind_hash);
        self.state.bind_hash = Some(bind_hash.clone());

        let upstream_available = self.upstream.is_some();
        let cached = self.cached(|cache| cache.get_bind(&bind_hash, upstream_available));

        let response = match cached {
            Some(response) => {
                info!("GOT bind response from cache");
                // the upstream has not seen this credential on this connection
                self.state.bind_answered_from_cache = true;
                self.state.bound = false;
                response
            }
            None => {
                let Some(upstream) = self.upstream.as_mut() else {
                    warn!("No upstream and no cached bind for {}, leaving bind unanswered", bind_hash);
                    return Ok(());
                };

                upstream.send(std::slice::from_ref(&raw)).await?;
                let response = upstream.read_messages().await;
                if response.is_empty() {
                    return Err(ProxyError::UpstreamClosed("bind"));
                }

                let code = result_code(&response)?;
                self.record(|cache| cache.cache_bind(&bind_hash, &response, &raw));
                self.state.bind_answered_from_cache = false;
                self.state.bound = code == Some(RESULT_SUCCESS);
                info!("GOT bind response from server with result code {:?}", code);
                response
            }
        };

        self.phase = match result_code(&response)? {
            Some(RESULT_SUCCESS) => Phase::Bound,
            _ => Phase::Idle,
        };
        self.respond(&response).await
    }

    /// Re-authenticates the upstream connection with the cached Bind request.
    async fn replay_bind(&mut self, search_hash: &Fingerprint) -> Result<()> {
        let Some(bind_hash) = self.state.bind_hash.clone() else {
            return Ok(());
        };
        info!("REPLAYING bind request with bind hash {}", bind_hash);

        // the Search's own Bind is only usable when it is the session's Bind
        let request = match self.cached(|cache| cache.get_bind_request_for_search(search_hash)) {
            Some((owner, request)) if owner == bind_hash => Some(request),
            _ => self.cached(|cache| cache.get_bind_request(&bind_hash)),
        };
        let Some(request) = request else {
            return Err(ProxyError::ReplayUnavailable(bind_hash.to_string()));
        };
        let Some(upstream) = self.upstream.as_mut() else {
            return Ok(());
        };

        upstream.send(std::slice::from_ref(&request)).await?;
        let response = upstream.read_messages().await;
        if response.is_empty() {
            return Err(ProxyError::UpstreamClosed("bind replay"));
        }

        let code = result_code(&response)?;
        debug!("Received replayed bind response with result code {:?}", code);
        self.record(|cache| cache.cache_bind(&bind_hash, &response, &request));
        self.state.bound = code == Some(RESULT_SUCCESS);
        Ok(())
    }

    // == Unbind ==
    async fn handle_unbind_request(&mut self, raw: Vec<u8>) -> Result<()> {
        info!("HANDLING Unbind Request");
        self.state.bound = false;
        if let Some(upstream) = self.upstream.as_mut() {
            upstream.send(&[raw]).await?;
        }
        Ok(())
    }

    // == Search ==
    async fn handle_search_request(&mut self, raw: Vec<u8>, message: &LdapMessage) -> Result<()> {
        info!("HANDLING Search Request");
        let search_hash = Fingerprint::of(message);
        debug!("with request hash {}", search_hash);

        let bind_hash = self.state.bind_hash.clone();
        let upstream_available = self.upstream.is_some();
        if let Some(response) = self
            .cached(|cache| cache.get_result(&search_hash, bind_hash.as_ref(), upstream_available))
        {
            info!("GOT search response from cache");
            return self.respond(&response).await;
        }

        if self.upstream.is_none() {
            info!("No upstream and no cached result, answering with an empty result set");
            let done = encode_search_result_done(message.message_id, RESULT_SUCCESS);
            return self.respond(&[done]).await;
        }

        if self.state.bind_answered_from_cache && !self.state.bound {
            self.replay_bind(&search_hash).await?;
        }
        self.relay_search(raw, &search_hash).await
    }

    /// Sends the Search upstream and collects every message up to the
    /// terminal SearchResultDone.
    async fn relay_search(&mut self, raw: Vec<u8>, search_hash: &Fingerprint) -> Result<()> {
        let Some(upstream) = self.upstream.as_mut() else {
            return Ok(());
        };
        upstream.send(&[raw]).await?;

        let mut response: Vec<Vec<u8>> = Vec::new();
        let mut buffered = 0usize;
        let mut cacheable = true;
        loop {
            // never hold more than the cap plus one message
            let budget = if cacheable {
                self.max_result_bytes.saturating_sub(buffered).saturating_add(1)
            } else {
                self.max_result_bytes
            };
            let batch = upstream.read_messages_up_to(budget).await;
            if batch.is_empty() {
                return Err(ProxyError::UpstreamClosed("search"));
            }

            let done = decode_all(&batch)?
                .last()
                .is_some_and(|m| m.op == ProtocolOp::SearchResultDone);
            buffered += batch.iter().map(Vec::len).sum::<usize>();
            response.extend(batch);

            if cacheable && buffered > self.max_result_bytes {
                warn!(
                    "Search result exceeds {} bytes, streaming it uncached",
                    self.max_result_bytes
                );
                cacheable = false;
            }
            if !cacheable {
                self.client.send(&response).await?;
                response.clear();
            }
            if done {
                break;
            }
        }

        if !cacheable {
            info!("ANSWERED search request without caching");
            return Ok(());
        }

        let bind_hash = self.state.bind_hash.clone();
        self.record(|cache| cache.cache_result(search_hash, bind_hash.as_ref(), &response));
        info!("GOT search response from server");
        self.respond(&response).await
    }

    // == Other Operations ==
    /// Relays a request the cache does not handle, and its reply if any.
    async fn pass_through(&mut self, raw: Vec<u8>, message: &LdapMessage) -> Result<()> {
        let Some(upstream) = self.upstream.as_mut() else {
            warn!("No upstream, dropping {:?} request", message.op);
            return Ok(());
        };
        debug!("Passing {:?} request through", message.op);

        upstream.send(&[raw]).await?;
        if !message.op.expects_response() {
            return Ok(());
        }

        let response = upstream.read_messages().await;
        if response.is_empty() {
            return Err(ProxyError::UpstreamClosed("pass-through"));
        }
        self.client.send(&response).await
    }

    // == Responses ==
    /// Relays a complete response to the client, unmodified.
    async fn respond(&mut self, response: &[Vec<u8>]) -> Result<()> {
        self.client.send(response).await?;
        match response.last().map(|m| LdapMessage::decode(m)).transpose()? {
            Some(m) if m.op == ProtocolOp::BindResponse => info!("ANSWERED bind request"),
            Some(m) if m.op == ProtocolOp::SearchResultDone => info!("ANSWERED search request"),
            Some(m) => debug!("ANSWERED with {:?}", m.op),
            None => {}
        }
        Ok(())
    }

    /// Cache read; store failures count as a miss.
    fn cached<T>(&self, read: impl FnOnce(&SessionCache) -> Result<Option<T>>) -> Option<T> {
        read(&self.cache).unwrap_or_else(|e| {
            warn!("Cache read failed, treating as miss: {}", e);
            None
        })
    }

    /// Cache write; failures are logged and otherwise ignored.
    fn record(&self, write: impl FnOnce(&SessionCache) -> Result<()>) {
        if let Err(e) = write(&self.cache) {
            warn!("Cache write failed: {}", e);
        }
    }
}

/// Result code of the first message of a Bind response.
fn result_code(response: &[Vec<u8>]) -> Result<Option<u32>> {
    match response.first() {
        Some(raw) => Ok(LdapMessage::decode(raw)?.result_code()),
        None => Ok(None),
    }
}
