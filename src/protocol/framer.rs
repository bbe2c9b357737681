//! Message Framer
//!
//! Splits a raw LDAP byte stream into complete messages using the BER
//! definite-length rule. Nothing here looks at message semantics.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{ProxyError, Result};

// == Public Constants ==
/// Bytes needed before a length can be computed
pub const MIN_FRAME_PREFIX: usize = 3;

/// Size of each socket read
pub const READ_CHUNK_SIZE: usize = 4096;

// == Frame Length ==
/// Computes the total size of the message at the start of `buf`.
///
/// Returns `Ok(None)` when fewer than [`MIN_FRAME_PREFIX`] bytes are buffered
/// or when the long-form length octets are not all present yet. A long-form
/// length that does not fit in `usize` is an error.
///
/// - Short form (length byte < 128): `length + 2`
/// - Long form: low 7 bits count the big-endian length octets that follow,
///   total is `decoded + 2 + octet_count`
pub fn frame_length(buf: &[u8]) -> Result<Option<usize>> {
    if buf.len() < MIN_FRAME_PREFIX {
        return Ok(None);
    }

    let length_byte = buf[1];
    if length_byte & 0x80 == 0 {
        return Ok(Some(length_byte as usize + 2));
    }

    let octets = (length_byte & 0x7f) as usize;
    if buf.len() < octets + 2 {
        return Ok(None);
    }
    if octets > std::mem::size_of::<usize>() {
        return Err(ProxyError::Frame(format!(
            "length uses {} octets, at most {} supported",
            octets,
            std::mem::size_of::<usize>()
        )));
    }

    let value_length = buf[2..2 + octets]
        .iter()
        .try_fold(0usize, |acc, &b| acc.checked_mul(256)?.checked_add(b as usize));

    value_length
        .and_then(|len| len.checked_add(2 + octets))
        .map(Some)
        .ok_or_else(|| ProxyError::Frame("message length overflows usize".to_string()))
}

// == Frame Buffer ==
/// Accumulates unprocessed bytes and hands out complete messages.
#[derive(Debug)]
pub struct FrameBuffer {
    /// Bytes received but not yet framed
    unprocessed: Vec<u8>,
    /// Largest message accepted
    max_message_bytes: usize,
}

impl FrameBuffer {
    pub fn new(max_message_bytes: usize) -> Self {
        Self {
            unprocessed: Vec::new(),
            max_message_bytes,
        }
    }

    /// Appends freshly read bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.unprocessed.extend_from_slice(data);
    }

    /// Slices off the next complete message, if one is fully buffered.
    pub fn next_message(&mut self) -> Result<Option<Vec<u8>>> {
        let length = match frame_length(&self.unprocessed)? {
            Some(length) => length,
            None => return Ok(None),
        };

        if length > self.max_message_bytes {
            return Err(ProxyError::Frame(format!(
                "message of {} bytes exceeds limit of {} bytes",
                length, self.max_message_bytes
            )));
        }

        if self.unprocessed.len() < length {
            return Ok(None);
        }

        let rest = self.unprocessed.split_off(length);
        Ok(Some(std::mem::replace(&mut self.unprocessed, rest)))
    }

    /// Number of buffered bytes not yet framed.
    pub fn pending(&self) -> usize {
        self.unprocessed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unprocessed.is_empty()
    }
}

// == Message Stream ==
/// One side of a proxied connection: a socket plus its reassembly buffer.
#[derive(Debug)]
pub struct MessageStream<S> {
    stream: S,
    buffer: FrameBuffer,
    read_timeout: Duration,
    closed: bool,
}

impl<S> MessageStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, read_timeout: Duration, max_message_bytes: usize) -> Self {
        Self {
            stream,
            buffer: FrameBuffer::new(max_message_bytes),
            read_timeout,
            closed: false,
        }
    }

    /// Reads until at least one message is framed and the buffer is drained.
    ///
    /// Returns what has been framed when the peer closes, when a read times out
    /// with no new data, or when the buffer empties after a message. Read and
    /// framing errors yield no messages and mark the stream closed.
    pub async fn read_messages(&mut self) -> Vec<Vec<u8>> {
        self.read_messages_up_to(usize::MAX).await
    }

    /// Like [`read_messages`](Self::read_messages), but also returns once the
    /// framed messages total at least `budget` bytes.
    ///
    /// A batch overshoots the budget by at most one message. Bytes past the
    /// budget stay buffered for the next call.
    pub async fn read_messages_up_to(&mut self, budget: usize) -> Vec<Vec<u8>> {
        let budget = budget.max(1);
        let mut messages = Vec::new();
        let mut framed = 0usize;

        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            while framed < budget {
                match self.buffer.next_message() {
                    Ok(Some(message)) => {
                        framed += message.len();
                        messages.push(message);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Dropping unframeable stream: {}", e);
                        self.closed = true;
                        return Vec::new();
                    }
                }
            }

            if !messages.is_empty() && (framed >= budget || self.buffer.is_empty()) {
                return messages;
            }
            if self.closed {
                return messages;
            }

            match timeout(self.read_timeout, self.stream.read(&mut chunk)).await {
                Ok(Ok(0)) => {
                    debug!("Peer closed with {} unframed bytes", self.buffer.pending());
                    self.closed = true;
                    return messages;
                }
                Ok(Ok(n)) => self.buffer.extend(&chunk[..n]),
                Ok(Err(e)) => {
                    warn!("Read failed: {}", e);
                    self.closed = true;
                    return Vec::new();
                }
                Err(_) => {
                    debug!("Read timed out after {:?}", self.read_timeout);
                    return messages;
                }
            }
        }
    }

    /// Writes messages in order, unmodified.
    pub async fn send(&mut self, messages: &[Vec<u8>]) -> Result<()> {
        for message in messages {
            self.stream.write_all(message).await?;
        }
        self.stream.flush().await?;
        Ok(())
    }

    /// Closes the write half of the socket.
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!("Shutdown failed: {}", e);
        }
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
