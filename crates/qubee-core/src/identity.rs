//! Peer and session identifiers
//!
//! The engine never interprets a [`PeerId`]; it is whatever the discovery or
//! transport collaborator uses to address a contact. [`SessionId`] is minted
//! by the engine when a handshake completes.

use std::fmt::{Debug, Display};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IdentityError;

/// Maximum accepted length of a peer identifier in bytes
pub const MAX_PEER_ID_LEN: usize = 256;

/// Opaque identifier of a remote peer
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    /// Create a peer identifier, rejecting empty or oversized values
    pub fn new(id: impl Into<String>) -> Result<Self, IdentityError> {
        let id = id.into();
        if id.is_empty() {
            return Err(IdentityError::InvalidFormat(
                "peer id must not be empty".to_string(),
            ));
        }
        if id.len() > MAX_PEER_ID_LEN {
            return Err(IdentityError::InvalidLength {
                expected: MAX_PEER_ID_LEN,
                actual: id.len(),
            });
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the identity as bytes (used as a storage key)
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Parse an identifier previously produced by [`PeerId::as_bytes`]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdentityError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| IdentityError::InvalidFormat(format!("peer id is not utf-8: {}", e)))?;
        Self::new(s)
    }

    /// Get a short display form (for logging)
    pub fn short_id(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(12)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Debug for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerId({})", self.short_id())
    }
}

impl TryFrom<&str> for PeerId {
    type Error = IdentityError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Unique identifier for a ratchet session
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub [u8; 16]);

impl SessionId {
    /// Generate a random session ID
    pub fn generate() -> Self {
        Self(*Uuid::new_v4().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdentityError> {
        let arr: [u8; 16] = bytes.try_into().map_err(|_| IdentityError::InvalidLength {
            expected: 16,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    /// Short hex form for logs
    pub fn short_id(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", Uuid::from_bytes(self.0))
    }
}

impl Debug for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionId({})", self.short_id())
    }
}
