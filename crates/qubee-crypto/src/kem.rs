//! Post-quantum key encapsulation using Kyber768 (ML-KEM-768 equivalent)
//!
//! ## Key Sizes
//!
//! - Encapsulation key (public): 1,184 bytes
//! - Decapsulation key (private): 2,400 bytes
//! - Ciphertext: 1,088 bytes
//! - Shared secret: 32 bytes
//!
//! ## Failure behaviour
//!
//! Kyber decapsulation uses implicit rejection: a well-formed ciphertext that
//! was not produced for this key yields a pseudo-random secret rather than an
//! error. The only failure reported here is a ciphertext of the wrong length,
//! surfaced as the detail-free [`CryptoError::DecapsulationFailed`].

use pqcrypto_kyber::kyber768;
use pqcrypto_traits::kem::{Ciphertext as _, PublicKey as _, SecretKey as _, SharedSecret as _};
use qubee_core::Timestamp;
use serde::{Deserialize, Serialize};

use crate::entropy::ensure_entropy;
use crate::error::{CryptoError, CryptoResult};
use crate::secure_bytes::{SecretKey, SecureBytes};

/// Size of the Kyber768 encapsulation key (public) in bytes
pub const KEM_PUBLIC_KEY_SIZE: usize = kyber768::public_key_bytes();

/// Size of the Kyber768 decapsulation key (private) in bytes
pub const KEM_SECRET_KEY_SIZE: usize = kyber768::secret_key_bytes();

/// Size of the Kyber768 ciphertext in bytes
pub const KEM_CIPHERTEXT_SIZE: usize = kyber768::ciphertext_bytes();

/// Size of the shared secret in bytes
pub const KEM_SHARED_SECRET_SIZE: usize = kyber768::shared_secret_bytes();

/// Ephemeral Kyber768 key pair
///
/// Held as raw bytes so it can live inside serialized session state; the
/// decapsulation half is wrapped in [`SecureBytes`] and zeroized on drop.
/// Deserializing checks both key lengths.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "StoredKemKeyPair")]
pub struct KemKeyPair {
    public_key: Vec<u8>,
    secret_key: SecureBytes,
    created_at: Timestamp,
}

#[derive(Deserialize)]
struct StoredKemKeyPair {
    public_key: Vec<u8>,
    secret_key: SecureBytes,
    created_at: Timestamp,
}

impl TryFrom<StoredKemKeyPair> for KemKeyPair {
    type Error = CryptoError;

    fn try_from(stored: StoredKemKeyPair) -> CryptoResult<Self> {
        check_len("decapsulation key", stored.secret_key.len(), KEM_SECRET_KEY_SIZE)?;
        check_len("encapsulation key", stored.public_key.len(), KEM_PUBLIC_KEY_SIZE)?;
        Ok(Self {
            public_key: stored.public_key,
            secret_key: stored.secret_key,
            created_at: stored.created_at,
        })
    }
}

impl KemKeyPair {
    /// Generate a fresh key pair (one per handshake or ratchet step)
    pub fn generate() -> CryptoResult<Self> {
        ensure_entropy()?;
        let (pk, sk) = kyber768::keypair();
        Ok(Self {
            public_key: pk.as_bytes().to_vec(),
            secret_key: SecureBytes::new(sk.as_bytes().to_vec()),
            created_at: Timestamp::now(),
        })
    }

    /// Rebuild from stored key bytes
    pub fn from_keypair_bytes(secret_key: &[u8], public_key: &[u8]) -> CryptoResult<Self> {
        check_len("decapsulation key", secret_key.len(), KEM_SECRET_KEY_SIZE)?;
        check_len("encapsulation key", public_key.len(), KEM_PUBLIC_KEY_SIZE)?;
        Ok(Self {
            public_key: public_key.to_vec(),
            secret_key: SecureBytes::new(secret_key.to_vec()),
            created_at: Timestamp::now(),
        })
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// WARNING: Keep this secret!
    pub fn secret_key(&self) -> &SecureBytes {
        &self.secret_key
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Decapsulate a ciphertext addressed to this key pair
    pub fn decapsulate(&self, ciphertext: &[u8]) -> CryptoResult<SecretKey> {
        decapsulate(ciphertext, self.secret_key.as_slice())
    }

    /// Short identifier of the public half (first 8 bytes hex encoded)
    pub fn short_id(&self) -> String {
        let prefix = self.public_key.get(..8).unwrap_or(&self.public_key);
        hex::encode(prefix)
    }
}

impl std::fmt::Debug for KemKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KemKeyPair")
            .field("public_key", &self.short_id())
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Generate a fresh encapsulation key pair
pub fn generate_encapsulation_key_pair() -> CryptoResult<KemKeyPair> {
    KemKeyPair::generate()
}

/// Encapsulate a fresh shared secret to a peer's public key
///
/// Returns the shared secret and the ciphertext the peer needs to recover it.
pub fn encapsulate(peer_public_key: &[u8]) -> CryptoResult<(SecretKey, Vec<u8>)> {
    check_len("encapsulation key", peer_public_key.len(), KEM_PUBLIC_KEY_SIZE)?;
    let pk = kyber768::PublicKey::from_bytes(peer_public_key)
        .map_err(|e| CryptoError::InvalidKey(format!("Invalid Kyber encapsulation key: {:?}", e)))?;

    ensure_entropy()?;
    let (shared_secret, ciphertext) = kyber768::encapsulate(&pk);
    let secret = SecretKey::from_slice(shared_secret.as_bytes()).ok_or_else(|| {
        CryptoError::KeyDerivationFailed("unexpected Kyber shared secret size".to_string())
    })?;

    Ok((secret, ciphertext.as_bytes().to_vec()))
}

/// Recover the shared secret from a ciphertext with our private key
pub fn decapsulate(ciphertext: &[u8], own_private_key: &[u8]) -> CryptoResult<SecretKey> {
    check_len("decapsulation key", own_private_key.len(), KEM_SECRET_KEY_SIZE)?;
    if ciphertext.len() != KEM_CIPHERTEXT_SIZE {
        return Err(CryptoError::DecapsulationFailed);
    }

    let sk = kyber768::SecretKey::from_bytes(own_private_key)
        .map_err(|e| CryptoError::InvalidKey(format!("Invalid Kyber decapsulation key: {:?}", e)))?;
    let ct = kyber768::Ciphertext::from_bytes(ciphertext).map_err(|_| CryptoError::DecapsulationFailed)?;

    let shared_secret = kyber768::decapsulate(&ct, &sk);
    SecretKey::from_slice(shared_secret.as_bytes()).ok_or(CryptoError::DecapsulationFailed)
}

fn check_len(what: &str, actual: usize, expected: usize) -> CryptoResult<()> {
    if actual != expected {
        return Err(CryptoError::InvalidKey(format!(
            "Invalid {} size: expected {}, got {}",
            what, expected, actual
        )));
    }
    Ok(())
}
