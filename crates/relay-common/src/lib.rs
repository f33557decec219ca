//! Relay Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, error handling and logging for the telemetry relay.
//!
//! - **Types**: raw transport messages, decoded documents and store attribute maps
//! - **Error Handling**: process-level and encoding error types
//! - **Logging**: `tracing` subscriber setup driven by `LOG_*` variables

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{EncodeError, RelayError, Result};
pub use types::{AttributeMap, AttributeValue, Document, RawMessage, Value};
