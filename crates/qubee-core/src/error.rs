//! Error types for identifier parsing

use thiserror::Error;

/// Errors related to peer and session identifiers
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Invalid identity format: {0}")]
    InvalidFormat(String),

    #[error("Invalid identifier length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
