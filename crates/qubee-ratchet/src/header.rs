//! Authenticated message header
//!
//! Wire form: `postcard(fields) || HMAC-SHA256(header_key, fields)[..16]`.
//! The tag is checked before any field is trusted, so a flipped header bit
//! is rejected with [`RatchetError::Authentication`] before ratchet work.

use qubee_crypto::aead::{HEADER_TAG_SIZE, header_tag, verify_header_tag};
use qubee_crypto::{DH_PUBLIC_KEY_SIZE, SecretKey};
use serde::{Deserialize, Serialize};

use crate::error::{RatchetError, RatchetResult};

/// Material the receiver needs to mirror a hybrid ratchet step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepMaterial {
    /// Kyber ciphertext to the receiver's last advertised KEM key
    pub kem_ciphertext: Vec<u8>,
    /// Sender's new KEM public key, for the receiver's next step
    pub kem_public_key: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Sender's ratchet epoch (number of steps it has performed)
    pub epoch: u32,
    /// Global per-direction message counter
    pub counter: u32,
    /// Counter at which the sender's current chain began
    pub chain_start: u32,
    /// Highest epoch of ours the sender has received
    pub acked_epoch: u32,
    pub ratchet_key: [u8; DH_PUBLIC_KEY_SIZE],
    /// Repeated on every message of an epoch until the peer acknowledges it
    pub step: Option<StepMaterial>,
}

impl MessageHeader {
    /// Serialize and append the header tag
    pub fn seal(&self, header_key: &SecretKey) -> RatchetResult<Vec<u8>> {
        let mut bytes = postcard::to_allocvec(self)?;
        let tag = header_tag(header_key, &bytes);
        bytes.extend_from_slice(&tag);
        Ok(bytes)
    }

    /// Verify the tag, then parse
    pub fn open(bytes: &[u8], header_key: &SecretKey) -> RatchetResult<Self> {
        if bytes.len() <= HEADER_TAG_SIZE {
            return Err(RatchetError::Authentication);
        }
        let (fields, tag) = bytes.split_at(bytes.len() - HEADER_TAG_SIZE);
        if !verify_header_tag(header_key, fields, tag) {
            return Err(RatchetError::Authentication);
        }

        let (header, rest) = postcard::take_from_bytes::<Self>(fields)
            .map_err(|e| RatchetError::InvalidEnvelope(format!("malformed header: {}", e)))?;
        if !rest.is_empty() {
            return Err(RatchetError::InvalidEnvelope("trailing bytes in header".to_string()));
        }
        Ok(header)
    }
}
