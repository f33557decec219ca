//! Relay Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Relays JSON telemetry published over MQTT into a DynamoDB table, one item
//! per message.
//!
//! # Pipeline
//!
//! - **Transport**: subscribes to the configured topics and forwards every
//!   publish onto a bounded channel
//! - **Dispatcher**: runs one [`IngestHandler`] task per message
//! - **Handler**: decode, validate, flatten into typed attributes, write
//! - **Counter / Reporter**: tally each outcome and log the totals periodically
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use relay_ingest::{Dispatcher, IngestHandler, MemoryStore, OutcomeCounter};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let counter = Arc::new(OutcomeCounter::new());
//!     let handler = IngestHandler::new(
//!         Arc::new(MemoryStore::new()),
//!         "urban-race-demo",
//!         Arc::clone(&counter),
//!         Duration::from_secs(10),
//!     );
//!     let (tx, rx) = tokio::sync::mpsc::channel(1024);
//!     drop(tx);
//!
//!     Dispatcher::new(Arc::new(handler), 64)
//!         .run(rx, CancellationToken::new())
//!         .await;
//!     println!("{}", counter.snapshot());
//! }
//! ```

pub mod config;
pub mod counter;
pub mod dispatcher;
pub mod encoder;
pub mod error;
pub mod handler;
pub mod reporter;
pub mod store;
pub mod transport;
pub mod validator;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod testing;

pub use counter::{CounterSnapshot, OutcomeCounter};
pub use dispatcher::Dispatcher;
pub use error::{IngestError, StoreError, TransportError};
pub use handler::{IngestHandler, Outcome};
pub use store::{DynamoStore, ItemStore, MemoryStore, StoreConfig};
pub use transport::{MqttSettings, MqttTransport};
