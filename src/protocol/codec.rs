//! LDAP Message Codec
//!
//! Decodes just enough of an `LDAPMessage` envelope to classify it:
//!
//! ```text
//! LDAPMessage ::= SEQUENCE {
//!      messageID       INTEGER,
//!      protocolOp      [APPLICATION n] ...,
//!      controls        [0] Controls OPTIONAL }
//! ```
//!
//! The protocolOp body is kept as raw bytes and never interpreted, except for
//! the leading resultCode of response operations.

use std::ops::Range;

use tracing::debug;

use crate::error::{ProxyError, Result};

// == BER Tags ==
pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_ENUMERATED: u8 = 0x0a;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_CONTROLS: u8 = 0xa0;
const CLASS_MASK: u8 = 0xc0;
const CLASS_APPLICATION: u8 = 0x40;
const CONSTRUCTED: u8 = 0x20;
const TAG_NUMBER_MASK: u8 = 0x1f;

/// LDAP resultCode for success.
pub const RESULT_SUCCESS: u32 = 0;

// == Protocol Operation ==
/// The protocolOp choice of an LDAP message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolOp {
    BindRequest,
    BindResponse,
    UnbindRequest,
    SearchRequest,
    SearchResultEntry,
    SearchResultDone,
    /// Any other application tag number (modify, add, extended, ...)
    Other(u8),
}

impl ProtocolOp {
    /// Abandon request, the one operation besides Unbind with no reply.
    pub const ABANDON_REQUEST: u8 = 16;

    pub fn from_tag_number(number: u8) -> Self {
        match number {
            0 => Self::BindRequest,
            1 => Self::BindResponse,
            2 => Self::UnbindRequest,
            3 => Self::SearchRequest,
            4 => Self::SearchResultEntry,
            5 => Self::SearchResultDone,
            other => Self::Other(other),
        }
    }

    pub fn tag_number(self) -> u8 {
        match self {
            Self::BindRequest => 0,
            Self::BindResponse => 1,
            Self::UnbindRequest => 2,
            Self::SearchRequest => 3,
            Self::SearchResultEntry => 4,
            Self::SearchResultDone => 5,
            Self::Other(n) => n,
        }
    }

    /// Whether the upstream answers this request at all.
    pub fn expects_response(self) -> bool {
        !matches!(self, Self::UnbindRequest)
            && self != Self::Other(Self::ABANDON_REQUEST)
    }
}

// == Decoded Message ==
/// A framed LDAP message with its envelope decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapMessage {
    /// Protocol-level correlation id
    pub message_id: i64,
    /// Operation classification
    pub op: ProtocolOp,
    /// Full protocolOp element (tag, length and body)
    pub op_element: Vec<u8>,
    /// Full controls element, empty when absent
    pub controls: Vec<u8>,
    /// Byte range of the protocolOp body inside `op_element`
    body: Range<usize>,
}

impl LdapMessage {
    /// Decodes one framed message.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let envelope = read_element(raw, 0)?;
        if envelope.tag != TAG_SEQUENCE {
            return Err(codec_error(format!(
                "expected SEQUENCE, found tag {:#04x}",
                envelope.tag
            )));
        }
        if envelope.value.end != raw.len() {
            return Err(codec_error("trailing bytes after message"));
        }

        let id = read_element(raw, envelope.value.start)?;
        if id.tag != TAG_INTEGER {
            return Err(codec_error(format!(
                "expected messageID INTEGER, found tag {:#04x}",
                id.tag
            )));
        }
        let message_id = decode_integer(&raw[id.value.clone()])?;

        let op = read_element(raw, id.value.end)?;
        if op.tag & CLASS_MASK != CLASS_APPLICATION {
            return Err(codec_error(format!(
                "expected APPLICATION protocolOp, found tag {:#04x}",
                op.tag
            )));
        }
        let op_start = id.value.end;
        let op_element = raw[op_start..op.value.end].to_vec();
        let body = (op.value.start - op_start)..(op.value.end - op_start);

        let controls = if op.value.end < envelope.value.end {
            let controls = read_element(raw, op.value.end)?;
            if controls.tag != TAG_CONTROLS || controls.value.end != envelope.value.end {
                return Err(codec_error("unexpected element after protocolOp"));
            }
            raw[op.value.end..].to_vec()
        } else {
            Vec::new()
        };

        Ok(Self {
            message_id,
            op: ProtocolOp::from_tag_number(op.tag & TAG_NUMBER_MASK),
            op_element,
            controls,
            body,
        })
    }

    /// The resultCode of a response carrying an `LDAPResult`.
    ///
    /// Returns `None` for requests, entries, or a body that does not start
    /// with an ENUMERATED.
    pub fn result_code(&self) -> Option<u32> {
        if self.op_element.first().map_or(true, |tag| tag & CONSTRUCTED == 0) {
            return None;
        }
        if matches!(
            self.op,
            ProtocolOp::BindRequest
                | ProtocolOp::UnbindRequest
                | ProtocolOp::SearchRequest
                | ProtocolOp::SearchResultEntry
        ) {
            return None;
        }

        let body = &self.op_element[self.body.clone()];
        let element = read_element(body, 0).ok()?;
        if element.tag != TAG_ENUMERATED {
            return None;
        }
        let code = decode_integer(&body[element.value]).ok()?;
        u32::try_from(code).ok()
    }
}

/// Decodes a batch of framed messages, failing on the first bad one.
pub fn decode_all(messages: &[Vec<u8>]) -> Result<Vec<LdapMessage>> {
    messages.iter().map(|m| LdapMessage::decode(m)).collect()
}

// == Encoding ==
/// Encodes a BER definite length.
pub fn encode_length(len: usize) -> Vec<u8> {
    if len < 128 {
        return vec![len as u8];
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    let mut out = Vec::with_capacity(1 + bytes.len() - skip);
    out.push(0x80 | (bytes.len() - skip) as u8);
    out.extend_from_slice(&bytes[skip..]);
    out
}

/// Encodes a tag, length and value.
pub fn encode_element(tag: u8, value: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend(encode_length(value.len()));
    out.extend_from_slice(value);
    out
}

/// Encodes an INTEGER or ENUMERATED element.
pub fn encode_integer(tag: u8, value: i64) -> Vec<u8> {
    encode_element(tag, &integer_content(value))
}

/// Minimal two's complement big-endian content octets.
fn integer_content(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xff && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

/// Wraps an operation body into a complete `LDAPMessage`.
///
/// `constructed` is false only for primitive operations such as
/// UnbindRequest and DelRequest.
pub fn encode_message(message_id: i64, op: ProtocolOp, constructed: bool, body: &[u8]) -> Vec<u8> {
    let mut tag = CLASS_APPLICATION | op.tag_number();
    if constructed {
        tag |= CONSTRUCTED;
    }
    let mut envelope = encode_integer(TAG_INTEGER, message_id);
    envelope.extend(encode_element(tag, body));
    encode_element(TAG_SEQUENCE, &envelope)
}

/// Encodes an `LDAPResult` body with empty matchedDN and diagnosticMessage.
pub fn encode_ldap_result(result_code: u32) -> Vec<u8> {
    let mut result = encode_integer(TAG_ENUMERATED, result_code as i64);
    result.extend(encode_element(TAG_OCTET_STRING, &[]));
    result.extend(encode_element(TAG_OCTET_STRING, &[]));
    result
}

/// Builds a SearchResultDone with empty matchedDN and diagnosticMessage.
///
/// Used to answer a Search with an empty result set when neither the cache
/// nor the upstream can.
pub fn encode_search_result_done(message_id: i64, result_code: u32) -> Vec<u8> {
    let message = encode_message(
        message_id,
        ProtocolOp::SearchResultDone,
        true,
        &encode_ldap_result(result_code),
    );
    debug!(
        "Encoded SearchResultDone: message_id={}, result_code={}, size={} bytes",
        message_id,
        result_code,
        message.len()
    );
    message
}

// == Element Reader ==
struct Element {
    tag: u8,
    value: Range<usize>,
}

/// Reads the element starting at `pos`; the value range is absolute.
fn read_element(buf: &[u8], pos: usize) -> Result<Element> {
    let tag = *buf
        .get(pos)
        .ok_or_else(|| codec_error("missing element tag"))?;
    if tag & TAG_NUMBER_MASK == TAG_NUMBER_MASK {
        return Err(codec_error("multi-byte tags are not used by LDAP"));
    }

    let length_byte = *buf
        .get(pos + 1)
        .ok_or_else(|| codec_error("missing element length"))?;
    let (length, header) = if length_byte & 0x80 == 0 {
        (length_byte as usize, 2)
    } else {
        let octets = (length_byte & 0x7f) as usize;
        if octets == 0 {
            return Err(codec_error("indefinite length is not allowed"));
        }
        if octets > std::mem::size_of::<u32>() {
            return Err(codec_error("element length too large"));
        }
        let bytes = buf
            .get(pos + 2..pos + 2 + octets)
            .ok_or_else(|| codec_error("truncated element length"))?;
        let length = bytes.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize);
        (length, 2 + octets)
    };

    let start = pos + header;
    let end = start
        .checked_add(length)
        .filter(|&end| end <= buf.len())
        .ok_or_else(|| codec_error("element overruns message"))?;
    Ok(Element {
        tag,
        value: start..end,
    })
}

fn decode_integer(content: &[u8]) -> Result<i64> {
    if content.is_empty() || content.len() > 8 {
        return Err(codec_error(format!(
            "integer of {} octets not supported",
            content.len()
        )));
    }
    let seed: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
    Ok(content
        .iter()
        .fold(seed, |acc, &b| (acc << 8) | b as i64))
}

fn codec_error(msg: impl Into<String>) -> ProxyError {
    ProxyError::Codec(msg.into())
}
