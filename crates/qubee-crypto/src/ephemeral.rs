//! X25519 ephemeral and ratchet key pairs

use qubee_core::Timestamp;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::entropy::random_array;
use crate::error::{CryptoError, CryptoResult};
use crate::secure_bytes::SecretKey;

/// Size of an X25519 public key
pub const DH_PUBLIC_KEY_SIZE: usize = 32;

/// Short-lived X25519 key pair
///
/// Used for the handshake ephemeral and for every DH ratchet step. The
/// private half is stored as a [`SecretKey`] so it zeroizes on drop and can
/// be carried in serialized session state.
#[derive(Clone, Serialize, Deserialize)]
pub struct EphemeralKeyPair {
    secret: SecretKey,
    public: [u8; DH_PUBLIC_KEY_SIZE],
    created_at: Timestamp,
}

impl EphemeralKeyPair {
    pub fn generate() -> CryptoResult<Self> {
        let secret = SecretKey::from_bytes(random_array()?);
        Ok(Self::from_secret(secret))
    }

    pub fn from_secret(secret: SecretKey) -> Self {
        let public = PublicKey::from(&StaticSecret::from(*secret.as_bytes())).to_bytes();
        Self {
            secret,
            public,
            created_at: Timestamp::now(),
        }
    }

    pub fn public_key(&self) -> [u8; DH_PUBLIC_KEY_SIZE] {
        self.public
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// X25519 agreement with a peer public key
    pub fn diffie_hellman(&self, peer_public: &[u8; DH_PUBLIC_KEY_SIZE]) -> CryptoResult<SecretKey> {
        diffie_hellman(&self.secret, peer_public)
    }
}

impl std::fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralKeyPair")
            .field("public", &hex::encode(&self.public[..8]))
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// X25519 with a raw secret, rejecting low-order peer points
pub(crate) fn diffie_hellman(
    secret: &SecretKey,
    peer_public: &[u8; DH_PUBLIC_KEY_SIZE],
) -> CryptoResult<SecretKey> {
    let secret = StaticSecret::from(*secret.as_bytes());
    let shared = secret.diffie_hellman(&PublicKey::from(*peer_public));
    if !shared.was_contributory() {
        return Err(CryptoError::InvalidKey(
            "X25519 peer key is a low-order point".to_string(),
        ));
    }
    Ok(SecretKey::from_bytes(shared.to_bytes()))
}
