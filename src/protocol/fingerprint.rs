//! Request fingerprints used as cache keys.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::codec::LdapMessage;

/// Hex SHA-256 digest of a decoded request.
///
/// Covers the messageID, the protocolOp and the controls. Cached responses
/// are relayed unmodified, so a hit must carry the id the client is waiting
/// for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(message: &LdapMessage) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(message.message_id.to_be_bytes());
        hasher.update(&message.op_element);
        hasher.update(&message.controls);
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
