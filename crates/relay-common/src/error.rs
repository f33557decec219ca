//! Error types for the relay

use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Process-level errors: anything that stops the relay from starting or running
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging error: {0}")]
    Logging(String),
}

/// Raised when a decoded payload holds a value the attribute encoder cannot tag
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("unsupported value kind '{kind}' at '{path}'")]
    UnsupportedValueKind { path: String, kind: &'static str },
}
