//! Passphrase-derived key for sealing session blobs at rest
//!
//! Argon2id stretches the passphrase; each blob is sealed with
//! ChaCha20-Poly1305 under a fresh random nonce stored in front of the
//! ciphertext. The associated data binds a blob to its storage key so blobs
//! cannot be swapped between peers.

use argon2::{Argon2, Params, Version};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};

use crate::aead::{NONCE_SIZE, TAG_SIZE};
use crate::entropy::random_array;
use crate::error::{CryptoError, CryptoResult};
use crate::secure_bytes::{KEY_SIZE, SecretKey};

/// Argon2id memory cost in KiB (19 MiB)
const ARGON2_MEMORY_KIB: u32 = 19 * 1024;
const ARGON2_ITERATIONS: u32 = 2;
const ARGON2_PARALLELISM: u32 = 1;

/// Minimum salt length accepted by [`StorageKey::derive`]
pub const MIN_SALT_LEN: usize = 16;

/// Symmetric key protecting stored blobs
#[derive(Clone)]
pub struct StorageKey {
    key: SecretKey,
}

impl StorageKey {
    /// Derive from a passphrase and a per-installation salt
    pub fn derive(passphrase: &[u8], salt: &[u8]) -> CryptoResult<Self> {
        if salt.len() < MIN_SALT_LEN {
            return Err(CryptoError::KeyDerivationFailed(format!(
                "salt must be at least {} bytes",
                MIN_SALT_LEN
            )));
        }
        let params = Params::new(ARGON2_MEMORY_KIB, ARGON2_ITERATIONS, ARGON2_PARALLELISM, Some(KEY_SIZE))
            .map_err(|e| CryptoError::KeyDerivationFailed(format!("Invalid Argon2 params: {}", e)))?;
        let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params);

        let mut output = [0u8; KEY_SIZE];
        argon2
            .hash_password_into(passphrase, salt, &mut output)
            .map_err(|e| CryptoError::KeyDerivationFailed(format!("Argon2id failed: {}", e)))?;

        Ok(Self {
            key: SecretKey::from_bytes(output),
        })
    }

    /// Use an existing 32-byte key (e.g. from a platform keystore)
    pub fn from_key(key: SecretKey) -> Self {
        Self { key }
    }

    /// `nonce || ciphertext`
    pub fn seal(&self, associated_data: &[u8], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(self.key.as_bytes())
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        let nonce_bytes: [u8; NONCE_SIZE] = random_array()?;

        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad: associated_data,
                },
            )
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn open(&self, associated_data: &[u8], sealed: &[u8]) -> CryptoResult<Vec<u8>> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::DataTooShort {
                expected: NONCE_SIZE + TAG_SIZE,
                actual: sealed.len(),
            });
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
        let cipher =
            ChaCha20Poly1305::new_from_slice(self.key.as_bytes()).map_err(|_| CryptoError::Authentication)?;

        cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad: associated_data,
                },
            )
            .map_err(|_| CryptoError::Authentication)
    }
}

impl std::fmt::Debug for StorageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageKey").finish_non_exhaustive()
    }
}
