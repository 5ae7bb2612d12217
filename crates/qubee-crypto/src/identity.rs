//! Long-term hybrid identity keys
//!
//! An [`IdentityKeyPair`] bundles three keys created together at onboarding:
//!
//! - an X25519 key used in the handshake Diffie-Hellman
//! - an Ed25519 + Dilithium2 hybrid signing key used to authenticate
//!   prekey bundles, handshakes and (optionally) sealed-sender envelopes
//!
//! Serialized layouts:
//!
//! - public key: `x25519(32) || ed25519(32) || dilithium2_public`
//! - private key: `x25519(32) || ed25519_seed(32) || dilithium2_secret`
//! - export: `public_len:u32 | public | private_len:u32 | private | created_at:u64`
//!   (big endian, `created_at` in unix milliseconds)

use bytes::{Buf, BufMut};
use qubee_core::Timestamp;

use crate::entropy::{ensure_entropy, random_array};
use crate::ephemeral::{DH_PUBLIC_KEY_SIZE, diffie_hellman};
use crate::error::{CryptoError, CryptoResult};
use crate::secure_bytes::{SecretKey, SecureBytes};
use crate::signature::{
    HybridSignature, HybridSigningKey, HybridVerifyingKey, SIGNING_KEY_SIZE, VERIFYING_KEY_SIZE,
};

const SAFETY_CODE_LABEL: &[u8] = b"qubee/safety-code/v1";

/// Size of a serialized [`PublicIdentity`]
pub const PUBLIC_IDENTITY_SIZE: usize = DH_PUBLIC_KEY_SIZE + VERIFYING_KEY_SIZE;

/// Size of the serialized private key
pub const PRIVATE_IDENTITY_SIZE: usize = 32 + SIGNING_KEY_SIZE;

/// The local user's long-term identity
#[derive(Clone)]
pub struct IdentityKeyPair {
    dh_secret: SecretKey,
    dh_public: [u8; DH_PUBLIC_KEY_SIZE],
    signing: HybridSigningKey,
    created_at: Timestamp,
}

impl IdentityKeyPair {
    /// Generate a new identity
    ///
    /// Fails with [`CryptoError::Entropy`] when the OS random source is
    /// unavailable; there is no fallback.
    pub fn generate() -> CryptoResult<Self> {
        ensure_entropy()?;
        let dh_secret = SecretKey::from_bytes(random_array()?);
        let dh_public = x25519_public(&dh_secret);
        let signing = HybridSigningKey::generate()?;

        Ok(Self {
            dh_secret,
            dh_public,
            signing,
            created_at: Timestamp::now(),
        })
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// The shareable half
    pub fn public_identity(&self) -> PublicIdentity {
        PublicIdentity {
            dh_public: self.dh_public,
            verifying: self.signing.verifying_key(),
        }
    }

    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.public_identity().to_bytes()
    }

    /// WARNING: Keep this secret!
    pub fn private_key_bytes(&self) -> SecureBytes {
        let signing = self.signing.to_private_bytes();
        let mut out = Vec::with_capacity(PRIVATE_IDENTITY_SIZE);
        out.extend_from_slice(self.dh_secret.as_bytes());
        out.extend_from_slice(signing.as_slice());
        SecureBytes::new(out)
    }

    /// Sign with the hybrid identity key
    pub fn sign(&self, message: &[u8]) -> HybridSignature {
        self.signing.sign(message)
    }

    /// X25519 with the identity DH key
    pub fn diffie_hellman(&self, peer_public: &[u8; DH_PUBLIC_KEY_SIZE]) -> CryptoResult<SecretKey> {
        diffie_hellman(&self.dh_secret, peer_public)
    }

    /// Serialize for local secure storage
    pub fn export(&self) -> SecureBytes {
        let public = self.public_key_bytes();
        let private = self.private_key_bytes();

        let mut out = Vec::with_capacity(4 + public.len() + 4 + private.len() + 8);
        out.put_u32(public.len() as u32);
        out.put_slice(&public);
        out.put_u32(private.len() as u32);
        out.put_slice(private.as_slice());
        out.put_u64(self.created_at.as_millis());
        SecureBytes::new(out)
    }

    /// Parse the export layout, validating every length
    pub fn import(bytes: &[u8]) -> CryptoResult<Self> {
        let mut buf = bytes;

        let public = read_prefixed(&mut buf, PUBLIC_IDENTITY_SIZE, "public key")?;
        let private = read_prefixed(&mut buf, PRIVATE_IDENTITY_SIZE, "private key")?;
        if buf.remaining() != 8 {
            return Err(CryptoError::InvalidKey(format!(
                "Invalid identity export trailer: expected 8 bytes, got {}",
                buf.remaining()
            )));
        }
        let created_at = Timestamp::from_millis(buf.get_u64());

        let (dh_private, signing_private) = private.split_at(32);
        let (dh_public_bytes, verifying_public) = public.split_at(DH_PUBLIC_KEY_SIZE);

        let dh_secret = SecretKey::from_slice(dh_private)
            .ok_or_else(|| CryptoError::InvalidKey("Invalid X25519 secret".to_string()))?;
        let dh_public = x25519_public(&dh_secret);
        if dh_public.as_slice() != dh_public_bytes {
            return Err(CryptoError::InvalidKey(
                "X25519 public key does not match secret".to_string(),
            ));
        }
        let signing = HybridSigningKey::from_keypair_bytes(signing_private, verifying_public)?;

        Ok(Self {
            dh_secret,
            dh_public,
            signing,
            created_at,
        })
    }
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("fingerprint", &self.public_identity().fingerprint())
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Public identity of a peer
///
/// The only identity material ever transmitted.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicIdentity {
    dh_public: [u8; DH_PUBLIC_KEY_SIZE],
    verifying: HybridVerifyingKey,
}

impl PublicIdentity {
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != PUBLIC_IDENTITY_SIZE {
            return Err(CryptoError::InvalidKey(format!(
                "Invalid public identity size: expected {}, got {}",
                PUBLIC_IDENTITY_SIZE,
                bytes.len()
            )));
        }
        let (dh, verifying) = bytes.split_at(DH_PUBLIC_KEY_SIZE);
        let mut dh_public = [0u8; DH_PUBLIC_KEY_SIZE];
        dh_public.copy_from_slice(dh);

        Ok(Self {
            dh_public,
            verifying: HybridVerifyingKey::from_bytes(verifying)?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PUBLIC_IDENTITY_SIZE);
        out.extend_from_slice(&self.dh_public);
        out.extend_from_slice(&self.verifying.to_bytes());
        out
    }

    pub fn dh_public(&self) -> &[u8; DH_PUBLIC_KEY_SIZE] {
        &self.dh_public
    }

    pub fn verifying_key(&self) -> &HybridVerifyingKey {
        &self.verifying
    }

    pub fn verify(&self, message: &[u8], signature: &HybridSignature) -> bool {
        self.verifying.verify(message, signature)
    }

    /// Safety-number style fingerprint (first 16 bytes of SHA-256, hex)
    pub fn fingerprint(&self) -> String {
        let digest = <sha2::Sha256 as sha2::Digest>::digest(self.to_bytes());
        hex::encode(&digest[..16])
    }

    /// Eight-digit code two users compare out of band, e.g. `"0412 9937"`
    ///
    /// Both sides get the same code for the same pair of identities,
    /// whichever of them computes it.
    pub fn safety_code(&self, peer: &PublicIdentity) -> String {
        let (mut first, mut second) = (self.to_bytes(), peer.to_bytes());
        if first > second {
            std::mem::swap(&mut first, &mut second);
        }

        let mut hasher = <sha2::Sha256 as sha2::Digest>::new();
        sha2::Digest::update(&mut hasher, SAFETY_CODE_LABEL);
        sha2::Digest::update(&mut hasher, &first);
        sha2::Digest::update(&mut hasher, &second);
        let digest = sha2::Digest::finalize(hasher);

        let mut prefix = &digest[..8];
        let code = prefix.get_u64() % 100_000_000;
        format!("{:04} {:04}", code / 10_000, code % 10_000)
    }
}

impl std::fmt::Debug for PublicIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicIdentity")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

fn x25519_public(secret: &SecretKey) -> [u8; DH_PUBLIC_KEY_SIZE] {
    let secret = x25519_dalek::StaticSecret::from(*secret.as_bytes());
    x25519_dalek::PublicKey::from(&secret).to_bytes()
}

fn read_prefixed<'a>(buf: &mut &'a [u8], expected: usize, what: &str) -> CryptoResult<&'a [u8]> {
    if buf.remaining() < 4 {
        return Err(CryptoError::DataTooShort {
            expected: 4,
            actual: buf.remaining(),
        });
    }
    let len = buf.get_u32() as usize;
    if len != expected {
        return Err(CryptoError::InvalidKey(format!(
            "Invalid {} length: expected {}, got {}",
            what, expected, len
        )));
    }
    if buf.remaining() < len {
        return Err(CryptoError::DataTooShort {
            expected: len,
            actual: buf.remaining(),
        });
    }
    let data: &'a [u8] = *buf;
    let (head, tail) = data.split_at(len);
    *buf = tail;
    Ok(head)
}
