//! Key derivation: symmetric chain ratchet, root ratchet and handshake
//!
//! - [`derive_next`]: HMAC-SHA256 keyed by the chain key over distinct labels.
//!   A message key never reveals the chain key it came from.
//! - [`kdf_root`]: HKDF-SHA256 salted with the current root key over
//!   `dh || kem`, so a step stays secret if either input does.
//! - [`kdf_handshake`]: one HKDF over all handshake agreements.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};
use crate::secure_bytes::{KEY_SIZE, SecretKey};

type HmacSha256 = Hmac<Sha256>;

/// Label for deriving message keys
const MESSAGE_LABEL: &[u8] = &[0x01];

/// Label for advancing the chain key
const CHAIN_LABEL: &[u8] = &[0x02];

const ROOT_INFO: &[u8] = b"qubee-hybrid-ratchet-v1";
const HANDSHAKE_INFO: &[u8] = b"qubee-hybrid-handshake-v1";

/// Chain key of a sending or receiving chain
pub type ChainKey = SecretKey;

/// Single-use key for one message
pub type MessageKey = SecretKey;

/// Root key shared by both parties
pub type RootKey = SecretKey;

/// Step a chain: returns `(next_chain_key, message_key)`.
pub fn derive_next(chain_key: &ChainKey) -> (ChainKey, MessageKey) {
    let next = hmac_label(chain_key, CHAIN_LABEL);
    let message = hmac_label(chain_key, MESSAGE_LABEL);
    (next, message)
}

fn hmac_label(key: &SecretKey, label: &[u8]) -> SecretKey {
    let Ok(mut mac) = HmacSha256::new_from_slice(key.as_bytes()) else {
        unreachable!("HMAC-SHA256 accepts any key size");
    };
    mac.update(label);
    let result = mac.finalize().into_bytes();

    let mut out = [0u8; KEY_SIZE];
    out.copy_from_slice(&result);
    SecretKey::from_bytes(out)
}

/// Mix a DH output and a KEM secret into the root: `(root', chain)`.
pub fn kdf_root(
    root_key: &RootKey,
    dh_secret: &SecretKey,
    kem_secret: &SecretKey,
) -> CryptoResult<(RootKey, ChainKey)> {
    let mut ikm = Zeroizing::new(Vec::with_capacity(2 * KEY_SIZE));
    ikm.extend_from_slice(dh_secret.as_bytes());
    ikm.extend_from_slice(kem_secret.as_bytes());

    let okm = expand::<{ 2 * KEY_SIZE }>(Some(root_key.as_bytes()), &ikm, ROOT_INFO)?;
    Ok((split_key(&okm[..], 0), split_key(&okm[..], 1)))
}

/// Everything both sides derive from a completed handshake
pub struct HandshakeSecrets {
    pub root_key: RootKey,
    /// Authenticates every header of the session
    pub header_key: SecretKey,
    /// First sending chain of the initiator. The responder has none until
    /// its first ratchet step.
    pub initiator_chain: ChainKey,
}

/// Derive session secrets from `dh1 || dh2 || dh3 || kem`.
///
/// The input is prefixed with 32 `0xFF` bytes for domain separation from
/// the root ratchet.
pub fn kdf_handshake(
    dh1: &SecretKey,
    dh2: &SecretKey,
    dh3: &SecretKey,
    kem_secret: &SecretKey,
) -> CryptoResult<HandshakeSecrets> {
    let mut ikm = Zeroizing::new(Vec::with_capacity(5 * KEY_SIZE));
    ikm.extend_from_slice(&[0xFF; KEY_SIZE]);
    for part in [dh1, dh2, dh3, kem_secret] {
        ikm.extend_from_slice(part.as_bytes());
    }

    let okm = expand::<{ 3 * KEY_SIZE }>(Some(&[0u8; KEY_SIZE]), &ikm, HANDSHAKE_INFO)?;
    Ok(HandshakeSecrets {
        root_key: split_key(&okm[..], 0),
        header_key: split_key(&okm[..], 1),
        initiator_chain: split_key(&okm[..], 2),
    })
}

fn expand<const N: usize>(salt: Option<&[u8]>, ikm: &[u8], info: &[u8]) -> CryptoResult<Zeroizing<[u8; N]>> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    let mut okm = Zeroizing::new([0u8; N]);
    hk.expand(info, &mut okm[..])
        .map_err(|e| CryptoError::KeyDerivationFailed(format!("HKDF expand failed: {}", e)))?;
    Ok(okm)
}

fn split_key(okm: &[u8], index: usize) -> SecretKey {
    let mut out = [0u8; KEY_SIZE];
    out.copy_from_slice(&okm[index * KEY_SIZE..(index + 1) * KEY_SIZE]);
    SecretKey::from_bytes(out)
}
