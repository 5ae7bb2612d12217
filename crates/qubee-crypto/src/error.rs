//! Error types for qubee-crypto

use thiserror::Error;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The platform random source could not be read. Never recoverable.
    #[error("Entropy source unavailable: {0}")]
    Entropy(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Deliberately carries no detail about the cause
    #[error("Decapsulation failed")]
    DecapsulationFailed,

    #[error("Authentication failed")]
    Authentication,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Data too short: expected at least {expected} bytes, got {actual}")]
    DataTooShort { expected: usize, actual: usize },
}

/// Result type for crypto operations
pub type CryptoResult<T> = Result<T, CryptoError>;
