//! Encrypted envelope and its wire codec
//!
//! ```text
//! header_len:u32 | header | ciphertext_len:u32 | ciphertext | signature_len:u32 | signature | timestamp:u64
//! ```
//!
//! All integers big endian. Truncation and trailing bytes are rejected.

use bytes::{Buf, BufMut, BytesMut};
use qubee_core::Timestamp;

use crate::error::{RatchetError, RatchetResult};

const SEALED_SENDER_LABEL: &[u8] = b"qubee/sealed-sender/v1";

/// One encrypted message as handed to the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    /// Authenticated header bytes (fields plus tag)
    pub header: Vec<u8>,
    pub ciphertext: Vec<u8>,
    /// Sealed-sender signature; empty when disabled
    pub signature: Vec<u8>,
    pub timestamp: Timestamp,
}

impl EncryptedEnvelope {
    /// AEAD associated data: `header || timestamp`
    pub fn associated_data(header: &[u8], timestamp: Timestamp) -> Vec<u8> {
        let mut ad = Vec::with_capacity(header.len() + 8);
        ad.extend_from_slice(header);
        ad.extend_from_slice(&timestamp.as_millis().to_be_bytes());
        ad
    }

    /// Bytes covered by the sealed-sender signature
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(SEALED_SENDER_LABEL.len() + self.header.len() + self.ciphertext.len() + 16);
        buf.put_slice(SEALED_SENDER_LABEL);
        buf.put_u32(self.header.len() as u32);
        buf.put_slice(&self.header);
        buf.put_u32(self.ciphertext.len() as u32);
        buf.put_slice(&self.ciphertext);
        buf.put_u64(self.timestamp.as_millis());
        buf.to_vec()
    }

    pub fn is_signed(&self) -> bool {
        !self.signature.is_empty()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf =
            BytesMut::with_capacity(20 + self.header.len() + self.ciphertext.len() + self.signature.len());
        for field in [&self.header, &self.ciphertext, &self.signature] {
            buf.put_u32(field.len() as u32);
            buf.put_slice(field);
        }
        buf.put_u64(self.timestamp.as_millis());
        buf.to_vec()
    }

    pub fn from_bytes(bytes: &[u8]) -> RatchetResult<Self> {
        let mut buf = bytes;
        let header = read_field(&mut buf, "header")?;
        let ciphertext = read_field(&mut buf, "ciphertext")?;
        let signature = read_field(&mut buf, "signature")?;

        if buf.remaining() < 8 {
            return Err(RatchetError::InvalidEnvelope("truncated timestamp".to_string()));
        }
        let timestamp = Timestamp::from_millis(buf.get_u64());

        if buf.has_remaining() {
            return Err(RatchetError::InvalidEnvelope(format!(
                "{} trailing bytes",
                buf.remaining()
            )));
        }

        Ok(Self {
            header,
            ciphertext,
            signature,
            timestamp,
        })
    }
}

fn read_field(buf: &mut &[u8], name: &str) -> RatchetResult<Vec<u8>> {
    if buf.remaining() < 4 {
        return Err(RatchetError::InvalidEnvelope(format!("truncated {} length", name)));
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(RatchetError::InvalidEnvelope(format!(
            "truncated {}: need {} bytes, have {}",
            name,
            len,
            buf.remaining()
        )));
    }
    let field = buf[..len].to_vec();
    buf.advance(len);
    Ok(field)
}
