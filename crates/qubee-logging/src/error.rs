//! Logging setup errors

use thiserror::Error;

/// Errors raised while configuring or installing the subscriber
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The configuration could not be parsed or is inconsistent
    #[error("Invalid logging configuration: {0}")]
    Config(String),

    /// Reading the config file or creating the log directory failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The rolling file appender could not be built
    #[error("File appender error: {0}")]
    Appender(String),

    /// A global subscriber is already installed
    #[error("Subscriber already installed: {0}")]
    AlreadyInitialized(String),
}

/// Result type for logging setup
pub type LoggingResult<T> = Result<T, LoggingError>;
