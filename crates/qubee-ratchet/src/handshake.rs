//! Session establishment: signed prekey bundles and the hybrid handshake
//!
//! The responder publishes a [`PrekeyBundle`] (X25519 signed prekey plus a
//! Kyber768 encapsulation key, signed by its hybrid identity). The initiator
//! answers with a signed [`HandshakeMessage`]. Both sides feed three X25519
//! agreements and one Kyber shared secret into a single HKDF, so recovering
//! the root requires breaking both primitives.

use qubee_crypto::{
    DH_PUBLIC_KEY_SIZE, EphemeralKeyPair, HandshakeSecrets, HybridSignature, IdentityKeyPair,
    KEM_CIPHERTEXT_SIZE, KEM_PUBLIC_KEY_SIZE, KemKeyPair, PublicIdentity, encapsulate, kdf_handshake,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RatchetError, RatchetResult};

const BUNDLE_LABEL: &[u8] = b"qubee/prekey-bundle/v1";
const HANDSHAKE_LABEL: &[u8] = b"qubee/handshake/v1";

/// Public half of a one-time prekey, signed by its owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrekeyBundle {
    pub prekey_id: u32,
    pub signed_prekey: [u8; DH_PUBLIC_KEY_SIZE],
    pub kem_public_key: Vec<u8>,
    pub signature: HybridSignature,
}

impl PrekeyBundle {
    fn signed_bytes(prekey_id: u32, signed_prekey: &[u8], kem_public_key: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(BUNDLE_LABEL.len() + 8 + signed_prekey.len() + kem_public_key.len());
        out.extend_from_slice(BUNDLE_LABEL);
        out.extend_from_slice(&prekey_id.to_be_bytes());
        out.extend_from_slice(signed_prekey);
        out.extend_from_slice(&(kem_public_key.len() as u32).to_be_bytes());
        out.extend_from_slice(kem_public_key);
        out
    }

    /// Check the owner's signature over the bundle
    pub fn verify(&self, owner: &PublicIdentity) -> bool {
        let message = Self::signed_bytes(self.prekey_id, &self.signed_prekey, &self.kem_public_key);
        owner.verify(&message, &self.signature)
    }

    pub fn to_bytes(&self) -> RatchetResult<Vec<u8>> {
        Ok(postcard::to_allocvec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> RatchetResult<Self> {
        postcard::from_bytes(bytes).map_err(|e| RatchetError::Handshake(format!("malformed prekey bundle: {}", e)))
    }
}

/// Private half of a prekey bundle
///
/// Held by the engine until one handshake consumes it.
#[derive(Debug)]
pub struct PrekeySecrets {
    prekey_id: u32,
    signed_prekey: EphemeralKeyPair,
    kem: KemKeyPair,
}

impl PrekeySecrets {
    /// Generate a fresh prekey and its signed public bundle
    pub fn generate(prekey_id: u32, identity: &IdentityKeyPair) -> RatchetResult<(Self, PrekeyBundle)> {
        let signed_prekey = EphemeralKeyPair::generate()?;
        let kem = KemKeyPair::generate()?;

        let public = signed_prekey.public_key();
        let message = PrekeyBundle::signed_bytes(prekey_id, &public, kem.public_key());
        let bundle = PrekeyBundle {
            prekey_id,
            signed_prekey: public,
            kem_public_key: kem.public_key().to_vec(),
            signature: identity.sign(&message),
        };

        Ok((
            Self {
                prekey_id,
                signed_prekey,
                kem,
            },
            bundle,
        ))
    }

    pub fn prekey_id(&self) -> u32 {
        self.prekey_id
    }
}

/// The initiator's first flight
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeMessage {
    pub prekey_id: u32,
    pub ephemeral_key: [u8; DH_PUBLIC_KEY_SIZE],
    pub kem_ciphertext: Vec<u8>,
    /// Initiator's first ratchet public key
    pub ratchet_key: [u8; DH_PUBLIC_KEY_SIZE],
    /// Initiator's first ratchet KEM public key
    pub kem_public_key: Vec<u8>,
    pub signature: HybridSignature,
}

impl HandshakeMessage {
    fn transcript(
        prekey_id: u32,
        ephemeral_key: &[u8],
        kem_ciphertext: &[u8],
        ratchet_key: &[u8],
        kem_public_key: &[u8],
        initiator: &PublicIdentity,
        responder: &PublicIdentity,
    ) -> Vec<u8> {
        let initiator = initiator.to_bytes();
        let responder = responder.to_bytes();

        let mut out = Vec::new();
        out.extend_from_slice(HANDSHAKE_LABEL);
        out.extend_from_slice(&prekey_id.to_be_bytes());
        for field in [
            ephemeral_key,
            kem_ciphertext,
            ratchet_key,
            kem_public_key,
            initiator.as_slice(),
            responder.as_slice(),
        ] {
            out.extend_from_slice(&(field.len() as u32).to_be_bytes());
            out.extend_from_slice(field);
        }
        out
    }

    pub fn to_bytes(&self) -> RatchetResult<Vec<u8>> {
        Ok(postcard::to_allocvec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> RatchetResult<Self> {
        postcard::from_bytes(bytes).map_err(|e| RatchetError::Handshake(format!("malformed handshake: {}", e)))
    }
}

/// Key material both sides hold after a successful handshake
pub(crate) struct Established {
    pub secrets: HandshakeSecrets,
    /// Initiator's first ratchet key pair (initiator side only)
    pub ratchet_key_pair: Option<EphemeralKeyPair>,
    /// Initiator's first ratchet KEM key pair (initiator side only)
    pub kem_key_pair: Option<KemKeyPair>,
    pub peer_ratchet_key: Option<[u8; DH_PUBLIC_KEY_SIZE]>,
    pub peer_kem_public_key: Vec<u8>,
}

/// Initiator side: verify the bundle, derive secrets, build the handshake
pub(crate) fn initiate(
    identity: &IdentityKeyPair,
    peer_identity: &PublicIdentity,
    bundle: &PrekeyBundle,
) -> RatchetResult<(Established, HandshakeMessage)> {
    if !bundle.verify(peer_identity) {
        return Err(RatchetError::Handshake("prekey bundle signature is invalid".to_string()));
    }
    if bundle.kem_public_key.len() != KEM_PUBLIC_KEY_SIZE {
        return Err(RatchetError::Handshake("prekey bundle KEM key has the wrong length".to_string()));
    }

    let ephemeral = EphemeralKeyPair::generate()?;
    let dh1 = identity.diffie_hellman(&bundle.signed_prekey).map_err(handshake_key)?;
    let dh2 = ephemeral
        .diffie_hellman(peer_identity.dh_public())
        .map_err(handshake_key)?;
    let dh3 = ephemeral.diffie_hellman(&bundle.signed_prekey).map_err(handshake_key)?;
    let (kem_secret, kem_ciphertext) = encapsulate(&bundle.kem_public_key)?;

    let secrets = kdf_handshake(&dh1, &dh2, &dh3, &kem_secret)?;

    let ratchet_key_pair = EphemeralKeyPair::generate()?;
    let kem_key_pair = KemKeyPair::generate()?;

    let ephemeral_key = ephemeral.public_key();
    let ratchet_key = ratchet_key_pair.public_key();
    let transcript = HandshakeMessage::transcript(
        bundle.prekey_id,
        &ephemeral_key,
        &kem_ciphertext,
        &ratchet_key,
        kem_key_pair.public_key(),
        &identity.public_identity(),
        peer_identity,
    );
    let message = HandshakeMessage {
        prekey_id: bundle.prekey_id,
        ephemeral_key,
        kem_ciphertext,
        ratchet_key,
        kem_public_key: kem_key_pair.public_key().to_vec(),
        signature: identity.sign(&transcript),
    };
    drop(ephemeral);

    debug!(
        prekey_id = bundle.prekey_id,
        peer = %peer_identity.fingerprint(),
        "Handshake initiated"
    );

    Ok((
        Established {
            secrets,
            ratchet_key_pair: Some(ratchet_key_pair),
            kem_key_pair: Some(kem_key_pair),
            peer_ratchet_key: None,
            peer_kem_public_key: bundle.kem_public_key.clone(),
        },
        message,
    ))
}

/// Responder side: verify the handshake and mirror the derivation
pub(crate) fn respond(
    identity: &IdentityKeyPair,
    peer_identity: &PublicIdentity,
    prekey: &PrekeySecrets,
    message: &HandshakeMessage,
) -> RatchetResult<Established> {
    if message.prekey_id != prekey.prekey_id {
        return Err(RatchetError::Handshake(format!(
            "handshake references prekey {}, expected {}",
            message.prekey_id, prekey.prekey_id
        )));
    }

    let transcript = HandshakeMessage::transcript(
        message.prekey_id,
        &message.ephemeral_key,
        &message.kem_ciphertext,
        &message.ratchet_key,
        &message.kem_public_key,
        peer_identity,
        &identity.public_identity(),
    );
    if !peer_identity.verify(&transcript, &message.signature) {
        return Err(RatchetError::Handshake("handshake signature is invalid".to_string()));
    }
    if message.kem_public_key.len() != KEM_PUBLIC_KEY_SIZE {
        return Err(RatchetError::Handshake("ratchet KEM key has the wrong length".to_string()));
    }
    if message.kem_ciphertext.len() != KEM_CIPHERTEXT_SIZE {
        return Err(RatchetError::Decapsulation);
    }

    let dh1 = prekey
        .signed_prekey
        .diffie_hellman(peer_identity.dh_public())
        .map_err(handshake_key)?;
    let dh2 = identity.diffie_hellman(&message.ephemeral_key).map_err(handshake_key)?;
    let dh3 = prekey
        .signed_prekey
        .diffie_hellman(&message.ephemeral_key)
        .map_err(handshake_key)?;
    let kem_secret = prekey.kem.decapsulate(&message.kem_ciphertext)?;

    let secrets = kdf_handshake(&dh1, &dh2, &dh3, &kem_secret)?;

    debug!(
        prekey_id = message.prekey_id,
        peer = %peer_identity.fingerprint(),
        "Handshake accepted"
    );

    Ok(Established {
        secrets,
        ratchet_key_pair: None,
        kem_key_pair: None,
        peer_ratchet_key: Some(message.ratchet_key),
        peer_kem_public_key: message.kem_public_key.clone(),
    })
}

fn handshake_key(err: qubee_crypto::CryptoError) -> RatchetError {
    RatchetError::Handshake(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_sides_derive_same_secrets() {
        let alice = IdentityKeyPair::generate().unwrap();
        let bob = IdentityKeyPair::generate().unwrap();
        let (prekey, bundle) = PrekeySecrets::generate(7, &bob).unwrap();

        let (init, message) = initiate(&alice, &bob.public_identity(), &bundle).unwrap();
        let resp = respond(&bob, &alice.public_identity(), &prekey, &message).unwrap();

        assert_eq!(init.secrets.root_key.as_bytes(), resp.secrets.root_key.as_bytes());
        assert_eq!(init.secrets.header_key.as_bytes(), resp.secrets.header_key.as_bytes());
        assert_eq!(
            init.secrets.initiator_chain.as_bytes(),
            resp.secrets.initiator_chain.as_bytes()
        );
        assert_eq!(resp.peer_ratchet_key, Some(message.ratchet_key));
    }

    #[test]
    fn test_bundle_signed_by_someone_else_is_rejected() {
        let alice = IdentityKeyPair::generate().unwrap();
        let bob = IdentityKeyPair::generate().unwrap();
        let mallory = IdentityKeyPair::generate().unwrap();
        let (_, bundle) = PrekeySecrets::generate(1, &mallory).unwrap();

        let result = initiate(&alice, &bob.public_identity(), &bundle);
        assert!(matches!(result, Err(RatchetError::Handshake(_))));
    }

    #[test]
    fn test_modified_bundle_is_rejected() {
        let alice = IdentityKeyPair::generate().unwrap();
        let bob = IdentityKeyPair::generate().unwrap();
        let (_, mut bundle) = PrekeySecrets::generate(1, &bob).unwrap();
        bundle.signed_prekey[0] ^= 0x01;

        assert!(initiate(&alice, &bob.public_identity(), &bundle).is_err());
    }

    #[test]
    fn test_handshake_from_wrong_identity_is_rejected() {
        let alice = IdentityKeyPair::generate().unwrap();
        let bob = IdentityKeyPair::generate().unwrap();
        let mallory = IdentityKeyPair::generate().unwrap();
        let (prekey, bundle) = PrekeySecrets::generate(1, &bob).unwrap();

        let (_, message) = initiate(&mallory, &bob.public_identity(), &bundle).unwrap();
        let result = respond(&bob, &alice.public_identity(), &prekey, &message);
        assert!(matches!(result, Err(RatchetError::Handshake(_))));
    }

    #[test]
    fn test_tampered_handshake_is_rejected() {
        let alice = IdentityKeyPair::generate().unwrap();
        let bob = IdentityKeyPair::generate().unwrap();
        let (prekey, bundle) = PrekeySecrets::generate(1, &bob).unwrap();

        let (_, mut message) = initiate(&alice, &bob.public_identity(), &bundle).unwrap();
        message.ratchet_key[5] ^= 0x80;
        assert!(matches!(
            respond(&bob, &alice.public_identity(), &prekey, &message),
            Err(RatchetError::Handshake(_))
        ));
    }

    #[test]
    fn test_unknown_prekey_id() {
        let alice = IdentityKeyPair::generate().unwrap();
        let bob = IdentityKeyPair::generate().unwrap();
        let (prekey, _) = PrekeySecrets::generate(1, &bob).unwrap();
        let (_, other_bundle) = PrekeySecrets::generate(2, &bob).unwrap();

        let (_, message) = initiate(&alice, &bob.public_identity(), &other_bundle).unwrap();
        assert!(respond(&bob, &alice.public_identity(), &prekey, &message).is_err());
    }

    #[test]
    fn test_bundle_bytes_roundtrip() {
        let bob = IdentityKeyPair::generate().unwrap();
        let (_, bundle) = PrekeySecrets::generate(42, &bob).unwrap();

        let decoded = PrekeyBundle::from_bytes(&bundle.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, bundle);
        assert!(decoded.verify(&bob.public_identity()));
        assert!(PrekeyBundle::from_bytes(&[0xFF, 0x00]).is_err());
    }
}
