//! Item persistence
//!
//! The handler writes through the [`ItemStore`] trait. [`DynamoStore`] is the
//! production implementation; [`MemoryStore`] keeps items in process and is
//! what the pipeline tests run against.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_dynamodb::{
    config::Region, error::DisplayErrorContext, primitives::Blob,
    types::AttributeValue as DynamoValue, Client,
};
use relay_common::{AttributeMap, AttributeValue};
use tracing::{debug, info, instrument};

use crate::error::StoreError;

pub mod config;

pub use config::StoreConfig;

/// Something that can persist one attribute map as one item.
///
/// Retry, throttling and connection pooling belong to the implementation.
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn put_item(&self, table: &str, item: AttributeMap) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct DynamoStore {
    client: Client,
}

impl DynamoStore {
    pub async fn new(config: StoreConfig) -> Result<Self, StoreError> {
        debug!("Initializing DynamoDB store with config: {:?}", config);

        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }

        if let Some((access_key, secret_key)) = config.static_credentials() {
            let credentials = Credentials::new(access_key, secret_key, None, None, "relay-static");
            loader = loader.credentials_provider(credentials);
        }

        let shared = loader.load().await;
        if shared.region().is_none() {
            return Err(StoreError::Config(
                "no AWS region configured; pass --aws-region or set AWS_REGION".to_string(),
            ));
        }

        let mut builder = aws_sdk_dynamodb::config::Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(builder.build());

        info!(
            region = ?shared.region(),
            endpoint = ?config.endpoint,
            "DynamoDB client initialized"
        );

        Ok(Self { client })
    }
}

#[async_trait]
impl ItemStore for DynamoStore {
    #[instrument(skip(self, item), fields(attributes = item.len()))]
    async fn put_item(&self, table: &str, item: AttributeMap) -> Result<(), StoreError> {
        self.client
            .put_item()
            .table_name(table)
            .set_item(Some(to_dynamo_item(item)))
            .send()
            .await
            .map_err(|e| StoreError::Request {
                table: table.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        debug!("Item written to {}", table);
        Ok(())
    }
}

fn to_dynamo_item(item: AttributeMap) -> HashMap<String, DynamoValue> {
    item.into_iter()
        .map(|(key, value)| {
            let value = match value {
                AttributeValue::String(s) => DynamoValue::S(s),
                AttributeValue::Number(n) => DynamoValue::N(n),
                AttributeValue::Binary(b) => DynamoValue::B(Blob::new(b)),
            };
            (key, value)
        })
        .collect()
}

/// In-process store keeping every item written, grouped by table
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, Vec<AttributeMap>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Items written to `table`, in write order
    pub fn items(&self, table: &str) -> Vec<AttributeMap> {
        self.tables
            .lock()
            .map(|tables| tables.get(table).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Total items written across all tables
    pub fn len(&self) -> usize {
        self.tables
            .lock()
            .map(|tables| tables.values().map(Vec::len).sum())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn put_item(&self, table: &str, item: AttributeMap) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().map_err(|e| StoreError::Request {
            table: table.to_string(),
            message: e.to_string(),
        })?;
        tables.entry(table.to_string()).or_default().push(item);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_to_dynamo_item_maps_tags() {
        let item = AttributeMap::from([
            ("client_id".to_string(), AttributeValue::String("abc".into())),
            ("location.latitude".to_string(), AttributeValue::Number("37.77".into())),
            ("frame".to_string(), AttributeValue::Binary(vec![0xde, 0xad])),
        ]);

        let converted = to_dynamo_item(item);

        assert_eq!(converted["client_id"], DynamoValue::S("abc".into()));
        assert_eq!(converted["location.latitude"], DynamoValue::N("37.77".into()));
        assert_eq!(converted["frame"], DynamoValue::B(Blob::new(vec![0xde, 0xad])));
    }

    #[tokio::test]
    async fn test_memory_store_groups_by_table() {
        let store = MemoryStore::new();
        let item = AttributeMap::from([(
            "client_id".to_string(),
            AttributeValue::String("abc".into()),
        )]);

        store.put_item("race", item.clone()).await.unwrap();
        store.put_item("race", item.clone()).await.unwrap();
        store.put_item("other", item.clone()).await.unwrap();

        assert_eq!(store.items("race").len(), 2);
        assert_eq!(store.items("other"), vec![item]);
        assert!(store.items("missing").is_empty());
        assert_eq!(store.len(), 3);
    }
}
