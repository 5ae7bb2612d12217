//! Zeroizing containers for key material

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of symmetric keys (root, chain, message, header keys)
pub const KEY_SIZE: usize = 32;

/// Secure byte container that zeroizes on drop
///
/// Use this for storing sensitive key material that should not
/// persist in memory after use.
#[derive(Clone, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
pub struct SecureBytes(Vec<u8>);

impl SecureBytes {
    /// Create new secure bytes
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Get the inner bytes (borrowed)
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for SecureBytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for SecureBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for SecureBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecureBytes(<{} bytes>)", self.0.len())
    }
}

/// Fixed-size 32-byte secret (root key, chain key, message key, DH output)
///
/// Equality is intentionally not derived; compare through
/// [`SecretKey::as_bytes`] in tests only.
#[derive(Clone, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
pub struct SecretKey([u8; KEY_SIZE]);

impl SecretKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Copy from a slice, rejecting anything but exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; KEY_SIZE] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// Get the raw key bytes (use with caution)
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Short non-secret fingerprint for logs
    pub fn fingerprint(&self) -> String {
        let digest = <sha2::Sha256 as sha2::Digest>::digest(self.0);
        hex::encode(&digest[..4])
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey({})", self.fingerprint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_key_from_slice() {
        assert!(SecretKey::from_slice(&[7u8; 32]).is_some());
        assert!(SecretKey::from_slice(&[7u8; 31]).is_none());
        assert!(SecretKey::from_slice(&[7u8; 33]).is_none());
    }

    #[test]
    fn test_debug_does_not_leak() {
        let key = SecretKey::from_bytes([0xAB; 32]);
        let debug = format!("{:?}", key);
        assert!(!debug.contains("abababab"));

        let bytes = SecureBytes::new(vec![0xCD; 16]);
        assert_eq!(format!("{:?}", bytes), "SecureBytes(<16 bytes>)");
    }

    #[test]
    fn test_zeroize_clears_bytes() {
        let mut key = SecretKey::from_bytes([0x11; 32]);
        key.zeroize();
        assert_eq!(key.as_bytes(), &[0u8; 32]);
    }
}
