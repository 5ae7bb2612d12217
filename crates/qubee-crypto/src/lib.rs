//! # Qubee Crypto
//!
//! Hybrid classical + post-quantum primitives for the Qubee session engine.
//!
//! ## Modules
//!
//! - [`identity`]: long-term X25519 + Ed25519 + Dilithium2 identity keys
//! - [`kem`]: Kyber768 key encapsulation
//! - [`signature`]: hybrid Ed25519 + Dilithium2 signatures
//! - [`ephemeral`]: X25519 handshake and ratchet key pairs
//! - [`kdf`]: chain, root and handshake key derivation
//! - [`aead`]: ChaCha20-Poly1305 message codec and header authentication
//! - [`at_rest`]: passphrase-derived key for sealing stored blobs
//!
//! ## Security
//!
//! All key generation draws from the OS random source and fails with
//! [`CryptoError::Entropy`] if it is unavailable. Secrets are wrapped in
//! zeroizing containers and never appear in `Debug` output.

pub mod aead;
pub mod at_rest;
pub mod entropy;
pub mod ephemeral;
pub mod error;
pub mod identity;
pub mod kdf;
pub mod kem;
pub mod secure_bytes;
pub mod signature;

pub use at_rest::StorageKey;
pub use ephemeral::{DH_PUBLIC_KEY_SIZE, EphemeralKeyPair};
pub use error::{CryptoError, CryptoResult};
pub use identity::{IdentityKeyPair, PublicIdentity};
pub use kdf::{ChainKey, HandshakeSecrets, MessageKey, RootKey, derive_next, kdf_handshake, kdf_root};
pub use kem::{
    KEM_CIPHERTEXT_SIZE, KEM_PUBLIC_KEY_SIZE, KemKeyPair, decapsulate, encapsulate,
    generate_encapsulation_key_pair,
};
pub use secure_bytes::{KEY_SIZE, SecretKey, SecureBytes};
pub use signature::{HybridSignature, HybridSigningKey, HybridVerifyingKey};
