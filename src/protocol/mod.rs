//! Protocol Module
//!
//! LDAP wire handling: stream framing, envelope decoding and request
//! fingerprints.

pub mod codec;
pub mod fingerprint;
pub mod framer;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use codec::{LdapMessage, ProtocolOp, RESULT_SUCCESS};
pub use fingerprint::Fingerprint;
pub use framer::{frame_length, FrameBuffer, MessageStream};
