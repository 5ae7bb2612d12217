//! Hybrid Ed25519 + Dilithium2 (ML-DSA-44 equivalent) signatures
//!
//! A hybrid signature is the concatenation `ed25519_sig || dilithium_sig`
//! and verifies only if both halves verify. An attacker has to forge both a
//! classical and a post-quantum signature.
//!
//! Byte layouts:
//!
//! - signing key: `ed25519_seed(32) || dilithium2_secret`
//! - verifying key: `ed25519_public(32) || dilithium2_public`
//!
//! Verification never returns an error. Anything malformed is simply `false`.

use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use pqcrypto_dilithium::dilithium2;
use pqcrypto_traits::sign::{DetachedSignature as _, PublicKey as _, SecretKey as _};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::entropy::{ensure_entropy, random_array};
use crate::error::{CryptoError, CryptoResult};
use crate::secure_bytes::SecureBytes;

/// Size of the Ed25519 part of every key and signature
pub const ED25519_KEY_SIZE: usize = 32;
pub const ED25519_SIGNATURE_SIZE: usize = 64;

/// Size of the Dilithium2 signing key in bytes
pub const DILITHIUM_SECRET_KEY_SIZE: usize = dilithium2::secret_key_bytes();

/// Size of the Dilithium2 verifying key in bytes
pub const DILITHIUM_PUBLIC_KEY_SIZE: usize = dilithium2::public_key_bytes();

/// Size of the Dilithium2 signature in bytes
pub const DILITHIUM_SIGNATURE_SIZE: usize = dilithium2::signature_bytes();

pub const SIGNING_KEY_SIZE: usize = ED25519_KEY_SIZE + DILITHIUM_SECRET_KEY_SIZE;
pub const VERIFYING_KEY_SIZE: usize = ED25519_KEY_SIZE + DILITHIUM_PUBLIC_KEY_SIZE;
pub const SIGNATURE_SIZE: usize = ED25519_SIGNATURE_SIZE + DILITHIUM_SIGNATURE_SIZE;

/// Sign `message` with a serialized hybrid signing key
pub fn sign(message: &[u8], private_key: &[u8]) -> CryptoResult<Vec<u8>> {
    let (ed25519, dilithium_secret) = parse_private(private_key)?;
    Ok(sign_parts(&ed25519, &dilithium_secret, message).bytes)
}

/// Verify a serialized hybrid signature against a serialized verifying key
pub fn verify(message: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
    match HybridVerifyingKey::from_bytes(public_key) {
        Ok(key) => key.verify_bytes(message, signature),
        Err(_) => false,
    }
}

fn parse_private(private_key: &[u8]) -> CryptoResult<(SigningKey, dilithium2::SecretKey)> {
    if private_key.len() != SIGNING_KEY_SIZE {
        return Err(CryptoError::InvalidKey(format!(
            "Invalid signing key size: expected {}, got {}",
            SIGNING_KEY_SIZE,
            private_key.len()
        )));
    }
    let (ed_bytes, dil_bytes) = private_key.split_at(ED25519_KEY_SIZE);
    let mut seed = [0u8; ED25519_KEY_SIZE];
    seed.copy_from_slice(ed_bytes);
    let ed25519 = SigningKey::from_bytes(&seed);
    seed.zeroize();

    let dilithium = dilithium2::SecretKey::from_bytes(dil_bytes)
        .map_err(|e| CryptoError::InvalidKey(format!("Invalid Dilithium signing key: {:?}", e)))?;
    Ok((ed25519, dilithium))
}

fn sign_parts(ed25519: &SigningKey, dilithium: &dilithium2::SecretKey, message: &[u8]) -> HybridSignature {
    let ed_sig = ed25519.sign(message);
    let pq_sig = dilithium2::detached_sign(message, dilithium);

    let mut bytes = Vec::with_capacity(SIGNATURE_SIZE);
    bytes.extend_from_slice(&ed_sig.to_bytes());
    bytes.extend_from_slice(pq_sig.as_bytes());
    HybridSignature { bytes }
}

/// Private half of a hybrid signing identity
///
/// The Ed25519 key zeroizes on drop. The Dilithium key is held in the
/// backend's own type, which does not expose zeroization.
#[derive(Clone)]
pub struct HybridSigningKey {
    ed25519: SigningKey,
    dilithium_secret: dilithium2::SecretKey,
    dilithium_public: dilithium2::PublicKey,
}

impl HybridSigningKey {
    /// Generate a new random signing key
    pub fn generate() -> CryptoResult<Self> {
        ensure_entropy()?;
        let mut seed: [u8; ED25519_KEY_SIZE] = random_array()?;
        let ed25519 = SigningKey::from_bytes(&seed);
        seed.zeroize();

        let (dilithium_public, dilithium_secret) = dilithium2::keypair();
        Ok(Self {
            ed25519,
            dilithium_secret,
            dilithium_public,
        })
    }

    /// Create from the private layout plus the matching public layout
    ///
    /// Dilithium cannot derive its public key from the secret key, so both
    /// halves are required to rebuild a signing key.
    pub fn from_keypair_bytes(private_key: &[u8], public_key: &[u8]) -> CryptoResult<Self> {
        let verifying = HybridVerifyingKey::from_bytes(public_key)?;
        let (ed25519, dilithium_secret) = parse_private(private_key)?;

        if ed25519.verifying_key() != verifying.ed25519 {
            return Err(CryptoError::InvalidKey(
                "Ed25519 public key does not match signing key".to_string(),
            ));
        }
        Ok(Self {
            ed25519,
            dilithium_secret,
            dilithium_public: verifying.dilithium,
        })
    }

    /// Export private layout
    ///
    /// WARNING: Keep this secret! Anyone with these bytes can sign as you.
    pub fn to_private_bytes(&self) -> SecureBytes {
        let mut out = Vec::with_capacity(SIGNING_KEY_SIZE);
        out.extend_from_slice(self.ed25519.as_bytes());
        out.extend_from_slice(self.dilithium_secret.as_bytes());
        SecureBytes::new(out)
    }

    pub fn verifying_key(&self) -> HybridVerifyingKey {
        HybridVerifyingKey {
            ed25519: self.ed25519.verifying_key(),
            dilithium: self.dilithium_public.clone(),
        }
    }

    /// Sign a message with both schemes
    pub fn sign(&self, message: &[u8]) -> HybridSignature {
        sign_parts(&self.ed25519, &self.dilithium_secret, message)
    }
}

impl std::fmt::Debug for HybridSigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridSigningKey")
            .field("verifying_key", &self.verifying_key().short_id())
            .finish_non_exhaustive()
    }
}

/// Public half of a hybrid signing identity
#[derive(Clone)]
pub struct HybridVerifyingKey {
    ed25519: VerifyingKey,
    dilithium: dilithium2::PublicKey,
}

impl HybridVerifyingKey {
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != VERIFYING_KEY_SIZE {
            return Err(CryptoError::InvalidKey(format!(
                "Invalid verifying key size: expected {}, got {}",
                VERIFYING_KEY_SIZE,
                bytes.len()
            )));
        }
        let (ed_bytes, dil_bytes) = bytes.split_at(ED25519_KEY_SIZE);
        let mut ed_arr = [0u8; ED25519_KEY_SIZE];
        ed_arr.copy_from_slice(ed_bytes);

        let ed25519 = VerifyingKey::from_bytes(&ed_arr)
            .map_err(|e| CryptoError::InvalidKey(format!("Invalid Ed25519 verifying key: {}", e)))?;
        let dilithium = dilithium2::PublicKey::from_bytes(dil_bytes)
            .map_err(|e| CryptoError::InvalidKey(format!("Invalid Dilithium verifying key: {:?}", e)))?;

        Ok(Self { ed25519, dilithium })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(VERIFYING_KEY_SIZE);
        out.extend_from_slice(self.ed25519.as_bytes());
        out.extend_from_slice(self.dilithium.as_bytes());
        out
    }

    pub fn verify(&self, message: &[u8], signature: &HybridSignature) -> bool {
        self.verify_bytes(message, &signature.bytes)
    }

    /// Verify raw signature bytes; both halves must verify
    pub fn verify_bytes(&self, message: &[u8], signature: &[u8]) -> bool {
        if signature.len() != SIGNATURE_SIZE {
            return false;
        }
        let (ed_part, pq_part) = signature.split_at(ED25519_SIGNATURE_SIZE);

        let Ok(ed_arr) = <[u8; ED25519_SIGNATURE_SIZE]>::try_from(ed_part) else {
            return false;
        };
        let ed_sig = ed25519_dalek::Signature::from_bytes(&ed_arr);
        let ed_ok = self.ed25519.verify_strict(message, &ed_sig).is_ok();

        let pq_ok = match dilithium2::DetachedSignature::from_bytes(pq_part) {
            Ok(sig) => dilithium2::verify_detached_signature(&sig, message, &self.dilithium).is_ok(),
            Err(_) => false,
        };

        ed_ok & pq_ok
    }

    /// Get a short identifier (first 8 bytes hex encoded)
    pub fn short_id(&self) -> String {
        hex::encode(&self.ed25519.as_bytes()[..8])
    }
}

impl std::fmt::Debug for HybridVerifyingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridVerifyingKey")
            .field("id", &self.short_id())
            .finish()
    }
}

impl PartialEq for HybridVerifyingKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for HybridVerifyingKey {}

/// A hybrid signature (`ed25519 || dilithium2`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HybridSignature {
    bytes: Vec<u8>,
}

impl HybridSignature {
    /// Create from raw bytes
    pub fn from_bytes(bytes: Vec<u8>) -> CryptoResult<Self> {
        if bytes.len() != SIGNATURE_SIZE {
            return Err(CryptoError::InvalidKey(format!(
                "Invalid signature size: expected {}, got {}",
                SIGNATURE_SIZE,
                bytes.len()
            )));
        }
        Ok(Self { bytes })
    }

    pub fn to_bytes(&self) -> &[u8] {
        &self.bytes
    }
}
