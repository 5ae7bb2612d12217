//! AEAD transport codec (ChaCha20-Poly1305) and header authentication
//!
//! The nonce is derived from the message counter, never drawn at random.
//! Each message key is used for exactly one message, so a `(key, nonce)`
//! pair cannot repeat.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{CryptoError, CryptoResult};
use crate::kdf::MessageKey;
use crate::secure_bytes::SecretKey;

/// Size of the nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// Size of the Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of the truncated HMAC appended to headers
pub const HEADER_TAG_SIZE: usize = 16;

/// Nonce for a message counter: 4 zero bytes then the counter, big endian
pub fn nonce_for_counter(counter: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[4..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

/// Encrypt `plaintext`, authenticating `associated_data` alongside it.
pub fn seal(
    message_key: &MessageKey,
    counter: u64,
    associated_data: &[u8],
    plaintext: &[u8],
) -> CryptoResult<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new_from_slice(message_key.as_bytes())
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    let nonce_bytes = nonce_for_counter(counter);

    cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext,
                aad: associated_data,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
}

/// Decrypt and verify. Any failure is [`CryptoError::Authentication`].
pub fn open(
    message_key: &MessageKey,
    counter: u64,
    associated_data: &[u8],
    ciphertext: &[u8],
) -> CryptoResult<Vec<u8>> {
    if ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::Authentication);
    }
    let cipher =
        ChaCha20Poly1305::new_from_slice(message_key.as_bytes()).map_err(|_| CryptoError::Authentication)?;
    let nonce_bytes = nonce_for_counter(counter);

    cipher
        .decrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: ciphertext,
                aad: associated_data,
            },
        )
        .map_err(|_| CryptoError::Authentication)
}

/// Truncated HMAC-SHA256 over serialized header fields
pub fn header_tag(header_key: &SecretKey, data: &[u8]) -> [u8; HEADER_TAG_SIZE] {
    let Ok(mut mac) = <Hmac<Sha256> as Mac>::new_from_slice(header_key.as_bytes()) else {
        unreachable!("HMAC-SHA256 accepts any key size");
    };
    mac.update(data);
    let full = mac.finalize().into_bytes();

    let mut tag = [0u8; HEADER_TAG_SIZE];
    tag.copy_from_slice(&full[..HEADER_TAG_SIZE]);
    tag
}

/// Constant-time check of a header tag
pub fn verify_header_tag(header_key: &SecretKey, data: &[u8], tag: &[u8]) -> bool {
    if tag.len() != HEADER_TAG_SIZE {
        return false;
    }
    let Ok(mut mac) = <Hmac<Sha256> as Mac>::new_from_slice(header_key.as_bytes()) else {
        unreachable!("HMAC-SHA256 accepts any key size");
    };
    mac.update(data);
    mac.verify_truncated_left(tag).is_ok()
}
