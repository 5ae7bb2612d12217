//! Error types for the session engine

use qubee_crypto::CryptoError;
use qubee_storage::StorageError;
use thiserror::Error;

/// Errors surfaced by session establishment and message processing
#[derive(Debug, Error)]
pub enum RatchetError {
    /// The OS random source is unavailable. Fatal.
    #[error("Entropy source unavailable: {0}")]
    Entropy(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Malformed or inauthentic peer key material during establishment
    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Decapsulation failed")]
    Decapsulation,

    /// Header MAC, AEAD tag or sealed-sender signature did not verify.
    /// The session was not modified.
    #[error("Message authentication failed")]
    Authentication,

    /// The message fell outside the skipped-key window and can never be
    /// decrypted. Data loss, not an attack.
    #[error("Message {counter} is outside the receive window")]
    OutOfWindow { counter: u32 },

    /// The message key for this counter was already used
    #[error("Message {counter} was already received")]
    Replay { counter: u32 },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("No session for peer {0}")]
    SessionNotFound(String),

    #[error("Session is closed")]
    SessionClosed,

    #[error("A session with peer {0} already exists")]
    SessionExists(String),

    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Message counter exhausted; establish a new session")]
    CounterExhausted,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for engine operations
pub type RatchetResult<T> = Result<T, RatchetError>;

impl From<CryptoError> for RatchetError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Entropy(msg) => RatchetError::Entropy(msg),
            CryptoError::InvalidKey(msg) => RatchetError::InvalidKey(msg),
            CryptoError::DecapsulationFailed => RatchetError::Decapsulation,
            CryptoError::Authentication => RatchetError::Authentication,
            CryptoError::EncryptionFailed(msg) | CryptoError::KeyDerivationFailed(msg) => {
                RatchetError::InvalidKey(msg)
            }
            CryptoError::DataTooShort { expected, actual } => RatchetError::InvalidEnvelope(format!(
                "expected at least {} bytes, got {}",
                expected, actual
            )),
        }
    }
}

impl From<postcard::Error> for RatchetError {
    fn from(err: postcard::Error) -> Self {
        RatchetError::Serialization(err.to_string())
    }
}

impl RatchetError {
    /// Whether the caller may retry the same operation
    ///
    /// Only storage failures qualify; cryptographic failures are final for
    /// the envelope or handshake that caused them.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RatchetError::Storage(_))
    }

    /// Whether this error should be treated as a possible active attack
    pub fn is_security_failure(&self) -> bool {
        matches!(
            self,
            RatchetError::Authentication | RatchetError::Handshake(_) | RatchetError::Replay { .. }
        )
    }
}
