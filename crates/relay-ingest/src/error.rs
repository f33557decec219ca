//! Ingestion error types

use relay_common::EncodeError;
use thiserror::Error;

use crate::validator::ValidationError;

/// Why a single message could not be ingested.
///
/// Every variant is per-message and recoverable: the handler counts and logs
/// it, then moves on.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("payload is not a JSON object: {0}")]
    Decode(String),

    #[error("invalid message: {0}")]
    InvalidMessage(#[from] ValidationError),

    #[error(transparent)]
    UnsupportedValueKind(#[from] EncodeError),

    #[error("store write failed: {0}")]
    StoreWrite(#[from] StoreError),
}

impl IngestError {
    /// Failure class reported alongside the error in logs
    pub fn cause(&self) -> &'static str {
        match self {
            IngestError::Decode(_) => "DecodeError",
            IngestError::InvalidMessage(_) => "InvalidMessage",
            IngestError::UnsupportedValueKind(_) => "UnsupportedValueKind",
            IngestError::StoreWrite(_) => "StoreWriteError",
        }
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(err: serde_json::Error) -> Self {
        IngestError::Decode(err.to_string())
    }
}

/// Persistence failure of any origin
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("put_item to table '{table}' failed: {message}")]
    Request { table: String, message: String },

    #[error("put_item to table '{table}' timed out after {timeout_ms} ms")]
    Timeout { table: String, timeout_ms: u128 },

    #[error("store client could not be configured: {0}")]
    Config(String),
}

/// Transport connection failures. These are fatal to the process.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("invalid broker URL: {0}")]
    InvalidBrokerUrl(String),

    #[error("subscription failed: {0}")]
    Subscribe(String),

    #[error("MQTT connection lost: {0}")]
    Connection(String),
}
