//! Per-message ingestion
//!
//! decode -> validate -> encode -> write. Any failure along the way becomes
//! an [`Outcome::Failure`]; nothing is propagated to the caller.

use std::sync::Arc;
use std::time::Duration;

use relay_common::RawMessage;
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info_span, warn, Instrument, Span};

use crate::counter::OutcomeCounter;
use crate::encoder;
use crate::error::{IngestError, StoreError};
use crate::store::ItemStore;
use crate::validator;

/// Result of handling one message
#[derive(Debug)]
pub enum Outcome {
    Success,
    Failure(IngestError),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// Ingests messages into one table, tallying every result
pub struct IngestHandler {
    store: Arc<dyn ItemStore>,
    table: String,
    counter: Arc<OutcomeCounter>,
    write_timeout: Duration,
}

impl IngestHandler {
    pub fn new(
        store: Arc<dyn ItemStore>,
        table: impl Into<String>,
        counter: Arc<OutcomeCounter>,
        write_timeout: Duration,
    ) -> Self {
        Self {
            store,
            table: table.into(),
            counter,
            write_timeout,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn counter(&self) -> &Arc<OutcomeCounter> {
        &self.counter
    }

    /// Handle one message.
    ///
    /// Increments exactly one counter. Each message gets its own root span so
    /// its logs are not nested under the dispatcher.
    pub async fn handle(&self, raw: &RawMessage) -> Outcome {
        let span = info_span!(
            parent: Span::none(),
            "ingest_message",
            topic = %raw.topic,
            payload_size = raw.payload.len(),
            table = %self.table,
        );

        async {
            let outcome = match self.ingest(raw).await {
                Ok(()) => {
                    debug!("message ingested");
                    Outcome::Success
                },
                Err(e) => {
                    warn!(cause = e.cause(), error = %e, "could not ingest message");
                    Outcome::Failure(e)
                },
            };
            self.counter.record(&outcome);
            outcome
        }
        .instrument(span)
        .await
    }

    async fn ingest(&self, raw: &RawMessage) -> Result<(), IngestError> {
        let document = decode(&raw.payload)?;
        validator::validate(&document)?;
        let item = encoder::encode(&document)?;

        tokio::time::timeout(self.write_timeout, self.store.put_item(&self.table, item))
            .await
            .map_err(|_| StoreError::Timeout {
                table: self.table.clone(),
                timeout_ms: self.write_timeout.as_millis(),
            })??;

        Ok(())
    }
}

/// Parse a payload that must be a JSON object at the top level
fn decode(payload: &[u8]) -> Result<Map<String, JsonValue>, IngestError> {
    match serde_json::from_slice(payload)? {
        JsonValue::Object(map) => Ok(map),
        other => Err(IngestError::Decode(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
