//! Operating-system entropy access
//!
//! Every key generation path goes through this module so that a missing or
//! failing random source surfaces as [`CryptoError::Entropy`] instead of a
//! panic or a silently weaker key.

use rand::TryRngCore;
use rand::rngs::OsRng;
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};

/// Check that the OS random source can be read.
///
/// The post-quantum backends draw their own randomness and abort on failure,
/// so callers check here before handing control to them.
pub fn ensure_entropy() -> CryptoResult<()> {
    let mut sample = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut sample)
        .map_err(|e| CryptoError::Entropy(e.to_string()))?;
    sample.zeroize();
    Ok(())
}

/// Fill a fixed-size array from the OS random source.
pub fn random_array<const N: usize>() -> CryptoResult<[u8; N]> {
    let mut out = [0u8; N];
    OsRng
        .try_fill_bytes(&mut out)
        .map_err(|e| CryptoError::Entropy(e.to_string()))?;
    Ok(out)
}
