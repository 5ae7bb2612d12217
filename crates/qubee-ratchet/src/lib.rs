//! # Qubee Ratchet
//!
//! Hybrid (X25519 + Kyber768) double ratchet sessions between two peers.
//!
//! ## Features
//!
//! - **Hybrid handshake**: signed prekey bundles, three X25519 agreements and
//!   one Kyber768 encapsulation folded into a single root key
//! - **Hybrid ratchet**: every ratchet step mixes a fresh DH output *and* a
//!   fresh KEM secret, so post-compromise security holds if either primitive
//!   survives
//! - **Out-of-order delivery**: bounded cache of skipped message keys
//! - **Transactional updates**: state advances on a copy and is committed only
//!   after it has been saved
//! - **Sealed sender** (optional): envelopes signed with the hybrid identity
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use qubee_core::PeerId;
//! use qubee_crypto::IdentityKeyPair;
//! use qubee_ratchet::{EncryptedEnvelope, EngineConfig, SessionManager};
//! use qubee_storage::InMemorySessionStore;
//!
//! let alice = SessionManager::new(
//!     EngineConfig::default(),
//!     Arc::new(IdentityKeyPair::generate()?),
//!     InMemorySessionStore::new(),
//! )?;
//! let bob = SessionManager::new(
//!     EngineConfig::default(),
//!     Arc::new(IdentityKeyPair::generate()?),
//!     InMemorySessionStore::new(),
//! )?;
//! let (alice_id, bob_id) = (PeerId::new("alice")?, PeerId::new("bob")?);
//!
//! // Bob publishes a bundle; Alice answers with a handshake
//! let bundle = bob.generate_prekey_bundle()?;
//! let handshake = alice.initiate_session(&bob_id, &bob.public_identity(), &bundle).await?;
//! bob.accept_session(&alice_id, &alice.public_identity(), &handshake).await?;
//!
//! let envelope = alice.encrypt_message(&bob_id, b"hello").await?;
//! let wire = envelope.to_bytes();
//! let received = EncryptedEnvelope::from_bytes(&wire)?;
//! assert_eq!(bob.decrypt_message(&alice_id, &received).await?, b"hello");
//! ```

pub mod config;
pub mod envelope;
pub mod error;
pub mod handshake;
pub mod header;
pub mod manager;
pub mod session;

pub use config::{EngineConfig, KemAlgorithm, MAX_SKIPPED_KEY_CACHE_LIMIT, SignatureAlgorithm};
pub use envelope::EncryptedEnvelope;
pub use error::{RatchetError, RatchetResult};
pub use handshake::{HandshakeMessage, PrekeyBundle, PrekeySecrets};
pub use header::{MessageHeader, StepMaterial};
pub use manager::SessionManager;
pub use session::{RatchetSession, Role, SESSION_FORMAT_VERSION, SessionInfo, SessionState};
