//! Error types for qubee-storage
//!
//! A missing session is not an error: [`SessionStore::load`](crate::SessionStore::load)
//! returns `Ok(None)` for it.

use thiserror::Error;

/// Errors that can occur in storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error during storage operations
    #[error("I/O error: {0}")]
    Io(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// A blob could not be sealed or failed authentication when opened
    #[error("Sealing error: {0}")]
    Sealing(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl StorageError {
    /// Create a new Database error
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database(message.into())
    }
}

impl From<redb::Error> for StorageError {
    fn from(err: redb::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<qubee_crypto::CryptoError> for StorageError {
    fn from(err: qubee_crypto::CryptoError) -> Self {
        StorageError::Sealing(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_error_display() {
        let err = StorageError::database("table locked");
        assert!(matches!(err, StorageError::Database(_)));
        assert!(err.to_string().contains("table locked"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err: StorageError = io.into();
        assert!(matches!(err, StorageError::Io(_)));
    }

    #[test]
    fn test_crypto_conversion() {
        let err: StorageError = qubee_crypto::CryptoError::Authentication.into();
        assert!(matches!(err, StorageError::Sealing(_)));
    }
}
